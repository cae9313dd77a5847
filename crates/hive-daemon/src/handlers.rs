//! Broker handler registration.
//!
//! Every EC2 action the daemon answers is a [`Handler`]: a subject, an
//! optional queue group, and a payload → payload function. Handlers are
//! registered at startup (fleet-wide subjects) or at ownership-claim time
//! (per-instance point subjects).

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use hive_broker::Broker;

/// One subject's worth of daemon behavior.
#[async_trait]
pub trait Handler: Send + Sync {
    /// The subject to subscribe on.
    fn topic(&self) -> String;

    /// Queue group, for subjects where one worker should win.
    fn queue(&self) -> Option<&str> {
        None
    }

    /// Process one request. `None` means "no reply" (the request is
    /// dropped silently, e.g. a fire-and-forget publish).
    async fn process(&self, payload: Bytes) -> Option<Vec<u8>>;
}

/// Subscribe and serve a handler until shutdown.
pub fn spawn_handler(
    broker: Broker,
    handler: Arc<dyn Handler>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let topic = handler.topic();
        let subscription = match handler.queue() {
            Some(group) => broker.queue_subscribe(&topic, group).await,
            None => broker.subscribe(&topic).await,
        };
        let mut subscription = match subscription {
            Ok(sub) => sub,
            Err(e) => {
                error!(%topic, error = %e, "handler subscription failed");
                return;
            }
        };
        info!(%topic, queue = ?handler.queue(), "handler registered");

        loop {
            tokio::select! {
                message = subscription.next() => {
                    let Some(message) = message else { break };
                    let Some(response) = handler.process(message.payload).await else {
                        continue;
                    };
                    match &message.reply {
                        Some(reply) => {
                            if let Err(e) = broker.reply(reply.as_str(), response).await {
                                error!(%topic, error = %e, "reply failed");
                            }
                        }
                        None => debug!(%topic, "request carried no reply subject"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!(%topic, "handler stopped");
    })
}
