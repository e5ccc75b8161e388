//! Serialized execution context
//!
//! All session state lives inside one tokio task. [`ContextToken`] is the
//! capability that proves a caller runs inside that task: it can only be
//! created by the task loop, and every state-mutating handler asks for it.
//! [`is_on_context`] answers the same question at runtime so handles can
//! catch re-entry, which would deadlock on the command channel.

use std::future::Future;

tokio::task_local! {
    static ON_CONTEXT: ();
}

/// Proof of running inside the session task
#[derive(Debug)]
pub struct ContextToken {
    _private: (),
}

impl ContextToken {
    pub(crate) fn new() -> Self {
        Self { _private: () }
    }
}

/// Whether the current task is the session's serialized context
pub fn is_on_context() -> bool {
    ON_CONTEXT.try_with(|_| ()).is_ok()
}

/// Run `future` as the serialized context
pub(crate) async fn enter<F: Future>(future: F) -> F::Output {
    ON_CONTEXT.scope((), future).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_is_on_context_only_inside_scope() {
        assert!(!is_on_context());
        let inside = enter(async { is_on_context() }).await;
        assert!(inside);
        assert!(!is_on_context());
    }

    #[tokio::test]
    async fn test_spawned_task_is_not_on_context() {
        let spawned = enter(async { tokio::spawn(async { is_on_context() }).await.unwrap() }).await;
        assert!(!spawned);
    }
}
