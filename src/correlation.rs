//! Ambient correlation context.
//!
//! Rust has no implicit thread-local inheritance across `tokio::spawn`
//! boundaries, so the context is carried explicitly: callers hold a
//! `Context` and pass it (or its `tracing::Span`) into the task they
//! spawn. A thread-local is kept too, for call sites (ingestion hooks)
//! that only have synchronous access and want `current()`.

use std::cell::RefCell;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    pub run_id: Option<String>,
    pub test_id: Option<String>,
}

impl Context {
    pub fn new(run_id: Option<String>, test_id: Option<String>) -> Self {
        Self { run_id, test_id }
    }

    /// A `tracing` span carrying this context's fields. Instrument a
    /// spawned future with it to propagate correlation across the
    /// concurrency boundary: copying the context into the new task is
    /// an explicit step at the enqueue site.
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "correlated",
            run_id = self.run_id.as_deref().unwrap_or(""),
            test_id = self.test_id.as_deref().unwrap_or(""),
        )
    }
}

thread_local! {
    static CURRENT: RefCell<Context> = RefCell::new(Context::default());
}

/// Sets the ambient run id for the calling thread's subsequent log
/// calls. Mirrors `Sidecar::set_run_id` in the programmatic API.
pub fn set_run_id(id: impl Into<String>) {
    CURRENT.with(|c| c.borrow_mut().run_id = Some(id.into()));
}

pub fn set_test_id(id: impl Into<String>) {
    CURRENT.with(|c| c.borrow_mut().test_id = Some(id.into()));
}

pub fn clear_context() {
    CURRENT.with(|c| *c.borrow_mut() = Context::default());
}

pub fn current() -> Context {
    CURRENT.with(|c| c.borrow().clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_clear_round_trip() {
        clear_context();
        set_run_id("run-1");
        set_test_id("test-1");
        let ctx = current();
        assert_eq!(ctx.run_id.as_deref(), Some("run-1"));
        assert_eq!(ctx.test_id.as_deref(), Some("test-1"));
        clear_context();
        assert_eq!(current(), Context::default());
    }
}
