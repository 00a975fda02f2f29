//! The gateway's route table.
//!
//! Paths are relative to the API prefix. Every route has a unique name.

use std::sync::Arc;

use axum::http::Method;

use crate::resources::{
    Collection, CreateResource, GetResource, Index, KeyShape, ListResources, Login, Logout,
    PatchResource,
};
use crate::routing::{Route, RouteTable, RouteTableError};
use crate::security::AccessPolicy::{HideFromAnonymous, RejectAnonymous};
use crate::transfer::{CreateUpload, Download, SessionUpload, UploadTarget};

/// Collection name (singular, plural), key shape.
const COLLECTIONS: [(Collection, &str, &str, KeyShape); 6] = [
    (Collection::Users, "User", "Users", KeyShape::Single),
    (Collection::Processes, "Process", "Processes", KeyShape::Single),
    (Collection::Datasets, "Dataset", "Datasets", KeyShape::Scoped("user-id")),
    (Collection::Modules, "Module", "Modules", KeyShape::Scoped("user-id")),
    (Collection::Jobs, "Job", "Jobs", KeyShape::Single),
    (Collection::Tasks, "Task", "Tasks", KeyShape::Scoped("job-id")),
];

/// Task output directories served by prefix downloads.
const TASK_OUTPUTS: [(&str, &str); 4] = [
    ("predictions", "GetTaskPredictions"),
    ("logs", "GetTaskLogs"),
    ("metadata", "GetTaskMetadata"),
    ("parameters", "GetTaskParameters"),
];

fn collection_routes(routes: &mut Vec<Route>) {
    for (collection, singular, plural, shape) in COLLECTIONS {
        let base = format!("/{collection}");
        let by_id = match shape {
            KeyShape::Single => format!("{base}/{{id}}"),
            KeyShape::Scoped(scope) => format!("{base}/{{{scope}}}/{{id}}"),
        };

        routes.push(
            Route::exact(
                format!("Get{plural}"),
                &[Method::GET],
                base.clone(),
                Arc::new(ListResources::new(collection)),
            )
            .policy(RejectAnonymous),
        );
        routes.push(
            Route::exact(
                format!("Post{singular}"),
                &[Method::POST],
                base,
                Arc::new(CreateResource::new(collection)),
            )
            .policy(RejectAnonymous),
        );
        routes.push(
            Route::exact(
                format!("Get{singular}"),
                &[Method::GET],
                by_id.clone(),
                Arc::new(GetResource::new(collection, shape)),
            )
            .policy(HideFromAnonymous),
        );
        routes.push(
            Route::exact(
                format!("Patch{singular}"),
                &[Method::PATCH],
                by_id,
                Arc::new(PatchResource::new(collection, shape)),
            )
            .policy(HideFromAnonymous),
        );
    }
}

fn transfer_routes(routes: &mut Vec<Route>, collection: Collection, singular: &str, id_param: &'static str) {
    let target = UploadTarget::new(collection, id_param);
    let base = format!("/{collection}/{{user-id}}/{{{id_param}}}");

    routes.push(Route::exact(
        format!("Upload{singular}"),
        &[Method::POST],
        format!("{base}/upload"),
        Arc::new(CreateUpload::new(target)),
    ));
    routes.push(Route::exact(
        format!("HeadPatch{singular}"),
        &[Method::HEAD, Method::PATCH],
        format!("{base}/upload/{{upload-id}}"),
        Arc::new(SessionUpload::new(target)),
    ));
    routes.push(Route::prefix(
        format!("Get{singular}Data"),
        &[Method::GET],
        format!("{base}/data"),
        Arc::new(Download::new(collection, ["user-id", id_param], "data")),
    ));
}

/// Every route the gateway serves.
pub fn standard_routes() -> Vec<Route> {
    let mut routes = vec![
        Route::exact("Index", &[Method::GET], "/", Arc::new(Index)),
        Route::exact("LoginUser", &[Method::GET], "/users/login", Arc::new(Login))
            .policy(RejectAnonymous),
        Route::exact("LogoutUser", &[Method::GET], "/users/logout", Arc::new(Logout))
            .policy(RejectAnonymous),
    ];

    collection_routes(&mut routes);
    transfer_routes(&mut routes, Collection::Datasets, "Dataset", "dataset-id");
    transfer_routes(&mut routes, Collection::Modules, "Module", "module-id");

    for (dir, name) in TASK_OUTPUTS {
        routes.push(
            Route::prefix(
                name,
                &[Method::GET],
                format!("/tasks/{{job-id}}/{{task-id}}/{dir}"),
                Arc::new(Download::new(Collection::Tasks, ["job-id", "task-id"], dir)),
            )
            .policy(HideFromAnonymous),
        );
    }
    routes.push(
        Route::exact(
            "GetTaskImage",
            &[Method::GET],
            "/tasks/{job-id}/{id}/image/download",
            Arc::new(Download::new(Collection::Tasks, ["job-id", "id"], "image").blob_only()),
        )
        .policy(HideFromAnonymous),
    );

    routes
}

pub fn standard_table(strict_slash: bool) -> Result<RouteTable, RouteTableError> {
    RouteTable::new(standard_routes(), strict_slash)
}
