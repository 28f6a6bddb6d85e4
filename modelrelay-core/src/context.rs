//! Scoped per-call context.
//!
//! The context-binding wrapper installs a `(key_id, provider_id)`
//! ambient for the duration of one provider call so downstream layers
//! (retry classifier, error tracker) can tag events without threading
//! identity through every signature. The ambient is a tokio task-local:
//! it is visible across the call's suspension points, cleared on scope
//! exit, and never process-global.

use uuid::Uuid;

/// Identity of the call currently in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    /// Virtual key (credential) id the call runs under
    pub key_id: i64,
    /// Provider the call was dispatched to
    pub provider_id: i64,
    /// Correlation id shared by every event of this call
    pub correlation_id: Uuid,
}

impl CallContext {
    pub fn new(key_id: i64, provider_id: i64) -> Self {
        Self {
            key_id,
            provider_id,
            correlation_id: Uuid::new_v4(),
        }
    }
}

tokio::task_local! {
    static CALL_CONTEXT: CallContext;
}

/// Run `future` with `context` installed as the call ambient.
pub async fn with_context<F>(context: CallContext, future: F) -> F::Output
where
    F: std::future::Future,
{
    CALL_CONTEXT.scope(context, future).await
}

/// The ambient call context, when one is installed.
pub fn current() -> Option<CallContext> {
    CALL_CONTEXT.try_with(|ctx| *ctx).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn context_is_scoped_and_cleared() {
        assert_eq!(current(), None);

        let ctx = CallContext::new(11, 22);
        let observed = with_context(ctx, async {
            // Visible across suspension points.
            tokio::task::yield_now().await;
            current()
        })
        .await;

        assert_eq!(observed, Some(ctx));
        assert_eq!(current(), None);
    }

    #[tokio::test]
    async fn nested_scopes_shadow() {
        let outer = CallContext::new(1, 1);
        let inner = CallContext::new(2, 2);

        with_context(outer, async {
            assert_eq!(current().map(|c| c.key_id), Some(1));
            with_context(inner, async {
                assert_eq!(current().map(|c| c.key_id), Some(2));
            })
            .await;
            assert_eq!(current().map(|c| c.key_id), Some(1));
        })
        .await;
    }
}
