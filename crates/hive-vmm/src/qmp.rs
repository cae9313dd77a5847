//! QMP monitor client.
//!
//! Line-delimited JSON over the monitor's unix socket. The protocol opens
//! with a greeting that must be acknowledged with `qmp_capabilities` before
//! any command is accepted. Asynchronous event lines may arrive at any
//! point and are skipped while waiting for a command's `return`.

use std::path::Path;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, trace};

use crate::error::{VmmError, VmmResult};

/// Default per-command deadline.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// A connected QMP session.
pub struct QmpClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl QmpClient {
    /// Connect and perform the capabilities handshake.
    pub async fn connect(path: &Path) -> VmmResult<QmpClient> {
        let stream = UnixStream::connect(path)
            .await
            .map_err(|source| VmmError::Monitor {
                path: path.display().to_string(),
                source,
            })?;
        let (read_half, write_half) = stream.into_split();
        let mut client = QmpClient {
            reader: BufReader::new(read_half),
            writer: write_half,
        };

        // Greeting: {"QMP": {"version": …, "capabilities": […]}}
        let greeting = client.read_line().await?;
        if greeting.get("QMP").is_none() {
            return Err(VmmError::Handshake(format!(
                "unexpected greeting: {greeting}"
            )));
        }
        client.send(&json!({"execute": "qmp_capabilities"})).await?;
        let ack = client.read_response("qmp_capabilities").await?;
        trace!(?ack, "qmp capabilities negotiated");
        Ok(client)
    }

    /// Execute a command and return its `return` value.
    pub async fn execute(&mut self, command: &str) -> VmmResult<Value> {
        self.execute_with_timeout(command, COMMAND_TIMEOUT).await
    }

    /// Execute with an explicit deadline.
    pub async fn execute_with_timeout(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> VmmResult<Value> {
        let fut = async {
            self.send(&json!({"execute": command})).await?;
            self.read_response(command).await
        };
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(VmmError::CommandTimeout {
                command: command.to_string(),
            }),
        }
    }

    /// Ask the guest to power down via ACPI.
    pub async fn system_powerdown(&mut self) -> VmmResult<()> {
        self.execute("system_powerdown").await.map(|_| ())
    }

    /// Tell the hypervisor to exit immediately.
    pub async fn quit(&mut self) -> VmmResult<()> {
        self.execute("quit").await.map(|_| ())
    }

    /// Resume a paused guest.
    pub async fn cont(&mut self) -> VmmResult<()> {
        self.execute("cont").await.map(|_| ())
    }

    /// The hypervisor's run state (`running`, `paused`, `shutdown`, …).
    pub async fn query_status(&mut self) -> VmmResult<String> {
        let value = self.execute("query-status").await?;
        value
            .get("status")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| VmmError::Command {
                command: "query-status".to_string(),
                detail: format!("no status in {value}"),
            })
    }

    async fn send(&mut self, value: &Value) -> VmmResult<()> {
        let mut line = value.to_string();
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| VmmError::Command {
                command: value["execute"].as_str().unwrap_or("?").to_string(),
                detail: e.to_string(),
            })
    }

    async fn read_line(&mut self) -> VmmResult<Value> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = self
                .reader
                .read_line(&mut line)
                .await
                .map_err(|e| VmmError::Handshake(e.to_string()))?;
            if n == 0 {
                return Err(VmmError::Handshake("monitor closed".to_string()));
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return serde_json::from_str(trimmed)
                .map_err(|e| VmmError::Handshake(format!("bad monitor line {trimmed:?}: {e}")));
        }
    }

    /// Read until a `return` or `error` for the in-flight command, skipping
    /// asynchronous event lines.
    async fn read_response(&mut self, command: &str) -> VmmResult<Value> {
        loop {
            let value = self.read_line().await?;
            if let Some(event) = value.get("event") {
                debug!(%command, %event, "qmp event while awaiting response");
                continue;
            }
            if let Some(err) = value.get("error") {
                return Err(VmmError::Command {
                    command: command.to_string(),
                    detail: err.to_string(),
                });
            }
            if let Some(ret) = value.get("return") {
                return Ok(ret.clone());
            }
            // Neither event, error nor return; skip greeting echoes.
            debug!(%command, %value, "unexpected qmp line");
        }
    }
}
