//! The broker client wrapper.

use std::time::Duration;

use async_nats::RequestErrorKind;
use bytes::Bytes;
use futures::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use hive_core::error::validate_error_payload;

use crate::error::{BrokerError, BrokerResult};
use crate::kv::KvStore;

/// Reconnect backoff between attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// A connection to the message fabric.
///
/// Cheap to clone; all clones share the underlying connection, which is safe
/// for concurrent publish/subscribe. Disconnects are retried forever with a
/// 1 s backoff and are never surfaced to callers — callers only ever see
/// per-request failures.
#[derive(Clone)]
pub struct Broker {
    client: async_nats::Client,
}

impl Broker {
    /// Connect to the broker at `url`, optionally with a bearer token.
    pub async fn connect(url: &str, token: Option<&str>) -> BrokerResult<Broker> {
        let mut options = async_nats::ConnectOptions::new()
            .retry_on_initial_connect()
            .reconnect_delay_callback(|_attempts| RECONNECT_DELAY)
            .event_callback(|event| async move {
                match event {
                    async_nats::Event::Disconnected => {
                        warn!("broker connection lost; reconnecting")
                    }
                    async_nats::Event::Connected => info!("broker connected"),
                    other => debug!(event = %other, "broker event"),
                }
            });
        if let Some(token) = token {
            options = options.token(token.to_string());
        }

        let client = options
            .connect(url)
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()))?;
        info!(%url, "broker client ready");
        Ok(Broker { client })
    }

    /// Wrap an existing connection (tests).
    pub fn from_client(client: async_nats::Client) -> Broker {
        Broker { client }
    }

    /// Typed request/reply with an explicit deadline.
    ///
    /// The reply is first inspected for an error envelope; a non-null `Code`
    /// becomes [`BrokerError::Api`] instead of a decode attempt.
    pub async fn request<I, O>(&self, subject: &str, input: &I, timeout: Duration) -> BrokerResult<O>
    where
        I: Serialize,
        O: DeserializeOwned,
    {
        let payload = serde_json::to_vec(input).map_err(BrokerError::Encode)?;
        let bytes = self.request_raw(subject, payload, timeout).await?;
        serde_json::from_slice(&bytes).map_err(BrokerError::Decode)
    }

    /// Request/reply returning the raw payload (already error-checked).
    pub async fn request_raw(
        &self,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> BrokerResult<Bytes> {
        let fut = self.client.request(subject.to_string(), payload.into());
        let msg = match tokio::time::timeout(timeout, fut).await {
            Err(_) => {
                return Err(BrokerError::Timeout {
                    subject: subject.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            Ok(Err(e)) => {
                return Err(match e.kind() {
                    RequestErrorKind::NoResponders => BrokerError::NoResponders {
                        subject: subject.to_string(),
                    },
                    RequestErrorKind::TimedOut => BrokerError::Timeout {
                        subject: subject.to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    },
                    RequestErrorKind::Other => BrokerError::Request {
                        subject: subject.to_string(),
                        detail: e.to_string(),
                    },
                });
            }
            Ok(Ok(msg)) => msg,
        };

        if let Some(err) = validate_error_payload(&msg.payload) {
            return Err(BrokerError::Api(err));
        }
        Ok(msg.payload)
    }

    /// Fan-out: publish `payload` on `subject` with an ephemeral inbox and
    /// collect replies.
    ///
    /// Collection stops early once `expected` replies have arrived, else at
    /// the end of `window`. Replies are returned in arrival order; zero
    /// subscribers yields an empty vector, not an error. Callers are
    /// responsible for skipping malformed or error-payload entries.
    pub async fn scatter(
        &self,
        subject: &str,
        payload: Vec<u8>,
        expected: Option<usize>,
        window: Duration,
    ) -> BrokerResult<Vec<Bytes>> {
        let inbox = self.client.new_inbox();
        let mut sub = self.client.subscribe(inbox.clone()).await.map_err(|e| {
            BrokerError::Subscribe {
                subject: inbox.clone(),
                detail: e.to_string(),
            }
        })?;

        self.client
            .publish_with_reply(subject.to_string(), inbox, payload.into())
            .await
            .map_err(|e| BrokerError::Publish {
                subject: subject.to_string(),
                detail: e.to_string(),
            })?;
        let _ = self.client.flush().await;

        let deadline = Instant::now() + window;
        let mut replies = Vec::new();
        loop {
            if let Some(expected) = expected {
                if replies.len() >= expected {
                    debug!(%subject, count = replies.len(), "fan-out collected expected replies");
                    break;
                }
            }
            match tokio::time::timeout_at(deadline, sub.next()).await {
                Ok(Some(msg)) => replies.push(msg.payload),
                // Subscription ended (connection closed mid-collect).
                Ok(None) => break,
                // Window elapsed.
                Err(_) => break,
            }
        }
        let _ = sub.unsubscribe().await;
        Ok(replies)
    }

    /// Fire-and-forget publish.
    pub async fn publish(&self, subject: &str, payload: Vec<u8>) -> BrokerResult<()> {
        self.client
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| BrokerError::Publish {
                subject: subject.to_string(),
                detail: e.to_string(),
            })
    }

    /// Plain subscription (point subjects, fan-out responders).
    pub async fn subscribe(&self, subject: &str) -> BrokerResult<async_nats::Subscriber> {
        self.client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| BrokerError::Subscribe {
                subject: subject.to_string(),
                detail: e.to_string(),
            })
    }

    /// Queue-group subscription (worker pools).
    pub async fn queue_subscribe(
        &self,
        subject: &str,
        group: &str,
    ) -> BrokerResult<async_nats::Subscriber> {
        self.client
            .queue_subscribe(subject.to_string(), group.to_string())
            .await
            .map_err(|e| BrokerError::Subscribe {
                subject: subject.to_string(),
                detail: e.to_string(),
            })
    }

    /// Reply to a received message.
    pub async fn reply(&self, reply_subject: &str, payload: Vec<u8>) -> BrokerResult<()> {
        self.publish(reply_subject, payload).await
    }

    /// Open (or create) a JetStream KV bucket.
    pub async fn kv(&self, bucket: &str) -> BrokerResult<KvStore> {
        KvStore::open(self.client.clone(), bucket).await
    }

    /// The underlying connection, for callers that need it directly.
    pub fn inner(&self) -> &async_nats::Client {
        &self.client
    }
}
