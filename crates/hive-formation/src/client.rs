//! Peer-side formation client.
//!
//! A joining node discovers the seed out of band, registers itself, then
//! polls status until the cluster is complete.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{FormationError, FormationResult};
use crate::types::{JoinResponse, NodeInfo, StatusResponse};

fn seed_error(url: &str, detail: impl std::fmt::Display) -> FormationError {
    FormationError::Seed {
        url: url.to_string(),
        detail: detail.to_string(),
    }
}

/// Register with the seed, retrying while it comes up.
///
/// A 409 is terminal (our name or address is already taken); transport
/// errors retry on a fixed backoff.
pub async fn join_with_retry(
    seed: &str,
    node: &NodeInfo,
    attempts: u32,
    backoff: Duration,
) -> FormationResult<JoinResponse> {
    let url = format!("http://{seed}/formation/join");
    let client = reqwest::Client::new();

    let mut last_error = String::new();
    for attempt in 1..=attempts {
        match client.post(&url).json(node).send().await {
            Ok(response) => {
                if response.status() == reqwest::StatusCode::CONFLICT {
                    let body: JoinResponse = response
                        .json()
                        .await
                        .map_err(|e| seed_error(&url, e))?;
                    return Err(seed_error(&url, body.message));
                }
                let body: JoinResponse =
                    response.json().await.map_err(|e| seed_error(&url, e))?;
                info!(name = %node.name, joined = body.joined, expected = body.expected, "joined formation");
                return Ok(body);
            }
            Err(e) => {
                debug!(%url, attempt, error = %e, "seed not reachable yet");
                last_error = e.to_string();
                tokio::time::sleep(backoff).await;
            }
        }
    }
    Err(seed_error(&url, format!("gave up after {attempts} attempts: {last_error}")))
}

/// Poll status until complete or the deadline passes.
pub async fn poll_until_complete(
    seed: &str,
    interval: Duration,
    timeout: Duration,
) -> FormationResult<StatusResponse> {
    let url = format!("http://{seed}/formation/status");
    let client = reqwest::Client::new();
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        match client.get(&url).send().await {
            Ok(response) => {
                let status: StatusResponse =
                    response.json().await.map_err(|e| seed_error(&url, e))?;
                if status.complete {
                    info!(joined = status.joined, "formation reported complete");
                    return Ok(status);
                }
                debug!(joined = status.joined, expected = status.expected, "formation incomplete");
                if tokio::time::Instant::now() + interval > deadline {
                    return Err(FormationError::Timeout {
                        timeout_secs: timeout.as_secs(),
                        joined: status.joined,
                        expected: status.expected,
                    });
                }
            }
            Err(e) => {
                warn!(%url, error = %e, "status poll failed");
                if tokio::time::Instant::now() + interval > deadline {
                    return Err(seed_error(&url, e));
                }
            }
        }
        tokio::time::sleep(interval).await;
    }
}
