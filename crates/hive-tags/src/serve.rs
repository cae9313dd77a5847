//! Broker-facing tag handlers.
//!
//! Queue subscriptions on the three tag subjects, one task each. Requests
//! are decoded, processed by [`TagsService`], and answered with either the
//! output structure or an error payload.

use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tracing::{debug, error, info};

use hive_broker::{Broker, subjects};
use hive_core::error::generate_error_payload;
use hive_core::{Ec2Error, Ec2ErrorCode};

use crate::service::TagsService;

/// Run the tag service until shutdown.
pub async fn serve(
    broker: Broker,
    service: Arc<TagsService>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), hive_broker::BrokerError> {
    let create = {
        let broker = broker.clone();
        let service = Arc::clone(&service);
        subject_loop(
            broker,
            subjects::CREATE_TAGS,
            shutdown.clone(),
            move |input| {
                let service = Arc::clone(&service);
                async move { service.create_tags(&input).await }
            },
        )
    };
    let describe = {
        let broker = broker.clone();
        let service = Arc::clone(&service);
        subject_loop(
            broker,
            subjects::DESCRIBE_TAGS,
            shutdown.clone(),
            move |input| {
                let service = Arc::clone(&service);
                async move { service.describe_tags(&input).await }
            },
        )
    };
    let delete = {
        let broker = broker.clone();
        let service = Arc::clone(&service);
        subject_loop(broker, subjects::DELETE_TAGS, shutdown, move |input| {
            let service = Arc::clone(&service);
            async move { service.delete_tags(&input).await }
        })
    };

    let (create, describe, delete) = tokio::join!(create, describe, delete);
    create?;
    describe?;
    delete?;
    Ok(())
}

/// One queue subscription: decode, process, reply.
async fn subject_loop<I, O, F, Fut>(
    broker: Broker,
    subject: &'static str,
    mut shutdown: watch::Receiver<bool>,
    process: F,
) -> Result<(), hive_broker::BrokerError>
where
    I: DeserializeOwned,
    O: Serialize,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<O, Ec2Error>>,
{
    let mut sub = broker.queue_subscribe(subject, subjects::QUEUE_GROUP).await?;
    info!(%subject, "tag handler subscribed");

    loop {
        tokio::select! {
            message = sub.next() => {
                let Some(message) = message else { break };
                let Some(reply) = message.reply else {
                    debug!(%subject, "request without reply subject dropped");
                    continue;
                };

                let response = match serde_json::from_slice::<I>(&message.payload) {
                    Ok(input) => match process(input).await {
                        Ok(output) => serde_json::to_vec(&output)
                            .unwrap_or_else(|e| {
                                generate_error_payload(&Ec2Error::internal(e.to_string()))
                            }),
                        Err(err) => generate_error_payload(&err),
                    },
                    Err(e) => generate_error_payload(&Ec2Error::new(
                        Ec2ErrorCode::ValidationError,
                        format!("malformed request: {e}"),
                    )),
                };
                if let Err(e) = broker.reply(reply.as_str(), response).await {
                    error!(%subject, error = %e, "tag reply failed");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    info!(%subject, "tag handler stopped");
    Ok(())
}
