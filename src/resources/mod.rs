//! Business resources served by the route table.
//!
//! Documents are kept in memory and keyed by their path id. Blob content
//! (uploads, task outputs) lives in storage, not here.

pub mod handlers;
pub mod store;

pub use handlers::{
    CreateResource, GetResource, Index, KeyShape, ListResources, Login, Logout, PatchResource,
};
pub use store::{Collection, Resource, ResourceError, ResourceStore};
