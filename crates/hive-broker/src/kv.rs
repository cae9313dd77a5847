//! JetStream KV helpers.
//!
//! Shared VM records live in a KV bucket so a stopped instance can be
//! adopted by a different node after a restart. Values are JSON.

use async_nats::jetstream;
use async_nats::jetstream::kv;
use futures::TryStreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{BrokerError, BrokerResult};

/// History depth kept per key; enough to inspect recent ownership moves.
const KV_HISTORY: i64 = 5;

/// A typed view over one KV bucket.
#[derive(Clone)]
pub struct KvStore {
    bucket: String,
    store: kv::Store,
}

impl KvStore {
    /// Open the bucket, creating it on first use.
    pub(crate) async fn open(client: async_nats::Client, bucket: &str) -> BrokerResult<KvStore> {
        let context = jetstream::new(client);
        let store = match context.get_key_value(bucket).await {
            Ok(store) => store,
            Err(_) => context
                .create_key_value(kv::Config {
                    bucket: bucket.to_string(),
                    history: KV_HISTORY,
                    ..Default::default()
                })
                .await
                .map_err(|e| BrokerError::Kv {
                    bucket: bucket.to_string(),
                    detail: e.to_string(),
                })?,
        };
        Ok(KvStore {
            bucket: bucket.to_string(),
            store,
        })
    }

    fn err(&self, e: impl std::fmt::Display) -> BrokerError {
        BrokerError::Kv {
            bucket: self.bucket.clone(),
            detail: e.to_string(),
        }
    }

    /// Store a JSON-encoded value.
    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T) -> BrokerResult<()> {
        let bytes = serde_json::to_vec(value).map_err(BrokerError::Encode)?;
        self.store
            .put(key, bytes.into())
            .await
            .map_err(|e| self.err(e))?;
        Ok(())
    }

    /// Fetch and decode a value; `None` when the key is absent.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> BrokerResult<Option<T>> {
        let entry = self.store.get(key).await.map_err(|e| self.err(e))?;
        match entry {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes).map_err(BrokerError::Decode)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Remove a key.
    pub async fn delete(&self, key: &str) -> BrokerResult<()> {
        self.store.delete(key).await.map_err(|e| self.err(e))
    }

    /// All live keys in the bucket.
    pub async fn keys(&self) -> BrokerResult<Vec<String>> {
        let mut stream = self.store.keys().await.map_err(|e| self.err(e))?;
        let mut keys = Vec::new();
        while let Some(key) = stream.try_next().await.map_err(|e| self.err(e))? {
            keys.push(key);
        }
        Ok(keys)
    }
}
