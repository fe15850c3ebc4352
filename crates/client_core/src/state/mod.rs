use std::sync::Arc;

use async_trait::async_trait;
use shared::protocol::GatewayEvent;
use tokio::{sync::broadcast, task::JoinHandle};
use tracing::warn;

use crate::gateway::GatewayClient;

pub mod directory;
pub mod members;
pub mod messages;
pub mod voice;

/// Folds pushed events into a local snapshot.
///
/// Reconcilers are stateless about connection health: they react to whatever
/// arrives, and callers re-`fetch` after a reconnect or view re-entry to
/// correct anything missed while offline.
#[async_trait]
pub trait Reconcile: Send + Sync + 'static {
    async fn apply(&self, event: &GatewayEvent);
}

/// Feeds a host's event stream into `reconciler` until the stream closes or
/// the returned handle is aborted.
pub fn attach<R: Reconcile>(reconciler: &Arc<R>, gateway: &GatewayClient) -> JoinHandle<()> {
    let mut events = gateway.subscribe();
    let reconciler = Arc::clone(reconciler);
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => reconciler.apply(&event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "reconciler fell behind the event stream");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
#[path = "../tests/state_tests.rs"]
mod tests;
