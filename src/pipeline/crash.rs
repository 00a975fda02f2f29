//! Crash isolation stage.
//!
//! # Responsibilities
//! - Catch panics raised anywhere below this stage
//! - Capture the panic message and a backtrace for the log record
//! - Answer 500 without leaking any detail to the client
//!
//! # Design Decisions
//! - A process-wide panic hook records the backtrace into a thread-local
//!   slot, but only while an isolated future is being polled; other panics
//!   go to the previously installed hook
//! - The panic hook runs before unwinding on the panicking thread, which is
//!   the thread polling the isolated future, so the slot is always ours
//! - Locks and buffers held by the failed request are released by unwinding

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::pin;
use std::sync::Once;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use futures_util::FutureExt;

use crate::http::response::{ApiError, ApiResult};
use crate::observability::{metrics, FieldValue};
use crate::pipeline::{Next, RequestContext, Stage};

thread_local! {
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
    static CAPTURED: RefCell<Option<String>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// Install the capturing panic hook. Idempotent.
pub fn install_panic_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CAPTURING.with(Cell::get) {
                let location = info
                    .location()
                    .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
                    .unwrap_or_else(|| "<unknown>".to_string());
                let trace = format!("at {location}\n{}", Backtrace::force_capture());
                CAPTURED.with(|slot| *slot.borrow_mut() = Some(trace));
            } else {
                previous(info);
            }
        }));
    });
}

/// A recovered panic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub message: String,
    pub stack_trace: String,
}

/// Marks the current thread as polling an isolated future.
struct CaptureGuard {
    was: bool,
}

impl CaptureGuard {
    fn enter() -> Self {
        Self {
            was: CAPTURING.with(|c| c.replace(true)),
        }
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        CAPTURING.with(|c| c.set(self.was));
    }
}

/// Poll `future` to completion, converting a panic into a `Fault`.
pub async fn isolate<F: Future>(future: F) -> Result<F::Output, Fault> {
    install_panic_hook();

    let mut future = pin!(future);
    let guarded = std::future::poll_fn(move |cx| {
        let _guard = CaptureGuard::enter();
        future.as_mut().poll(cx)
    });

    match AssertUnwindSafe(guarded).catch_unwind().await {
        Ok(output) => Ok(output),
        Err(payload) => {
            let stack_trace = CAPTURED
                .with(|slot| slot.borrow_mut().take())
                .unwrap_or_else(|| "<no backtrace captured>".to_string());
            Err(Fault {
                message: panic_message(payload.as_ref()),
                stack_trace,
            })
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Stage converting downstream panics into `ApiError::Internal`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrashIsolation;

#[async_trait]
impl Stage for CrashIsolation {
    fn name(&self) -> &'static str {
        "crash_isolation"
    }

    async fn handle(&self, ctx: RequestContext, req: Request<Body>, next: Next<'_>) -> ApiResult {
        let trace = ctx.trace.clone();
        let log = ctx.log.clone();

        match isolate(next.run(ctx, req)).await {
            Ok(result) => result,
            Err(fault) => {
                trace.record_stack(fault.stack_trace.clone());
                let mut log = log
                    .with_field("panic", FieldValue::Str(fault.message))
                    .with_stack(&fault.stack_trace);
                if let Some(id) = trace.request_id() {
                    log = log.with_request_id(id);
                }
                log.error("handler panicked; request aborted");
                metrics::record_panic();
                Err(ApiError::Internal)
            }
        }
    }
}
