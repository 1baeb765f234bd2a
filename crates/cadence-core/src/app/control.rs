//! Control channel - 稼働中のサーバを外から操作する小さなプロトコル
//!
//! # ワイヤ形式
//! 1 行 1 リクエスト（改行区切り）: `<command>::<argument>`
//! - `shutdown::` → `1`
//! - `taskRetry::<TaskRequest の JSON>` → 投入できたら `1`、できなければ `0`
//! - `getMetrics::` → `{"server": {...}, "metrics": {...}}`
//! - それ以外 → `0`
//!
//! listener は独立したタスクで動くので、scheduler や worker が
//! 詰まっていても応答できる。

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use super::shutdown::ShutdownSignal;
use super::status::{RuntimeCounters, bump};
use crate::domain::errors::ControlError;
use crate::domain::TaskRequest;

const MAX_LINE_LENGTH: usize = 1024 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Shutdown,
    /// Raw JSON of a `TaskRequest`.
    TaskRetry(String),
    GetMetrics,
    Unknown(String),
}

impl ControlCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let (command, argument) = line.split_once("::").unwrap_or((line, ""));
        match command {
            "shutdown" => Self::Shutdown,
            "taskRetry" => Self::TaskRetry(argument.to_string()),
            "getMetrics" => Self::GetMetrics,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Self::Shutdown => "shutdown::".to_string(),
            Self::TaskRetry(json) => format!("taskRetry::{json}"),
            Self::GetMetrics => "getMetrics::".to_string(),
            Self::Unknown(command) => format!("{command}::"),
        }
    }

    pub fn task_retry(request: &TaskRequest) -> Result<Self, ControlError> {
        request
            .to_json()
            .map(Self::TaskRetry)
            .map_err(|e| ControlError::Malformed(e.to_string()))
    }
}

/// One response line.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlResponse {
    Accepted,
    Rejected,
    Metrics(serde_json::Value),
}

impl ControlResponse {
    pub fn encode(&self) -> String {
        match self {
            Self::Accepted => "1".to_string(),
            Self::Rejected => "0".to_string(),
            Self::Metrics(value) => value.to_string(),
        }
    }

    fn flag(accepted: bool) -> Self {
        if accepted { Self::Accepted } else { Self::Rejected }
    }
}

/// What the control channel operates on. Implemented by `Runtime`.
#[async_trait]
pub trait ControlTarget: Send + Sync {
    fn request_shutdown(&self);

    /// `true` when the request was accepted by the task queue.
    async fn resubmit(&self, request: TaskRequest) -> bool;

    fn metrics(&self) -> serde_json::Value;
}

pub struct ControlServer {
    listener: TcpListener,
    target: Arc<dyn ControlTarget>,
    counters: Arc<RuntimeCounters>,
}

impl ControlServer {
    pub async fn bind(
        address: &str,
        target: Arc<dyn ControlTarget>,
        counters: Arc<RuntimeCounters>,
    ) -> Result<Self, ControlError> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self {
            listener,
            target,
            counters,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ControlError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop; returns when `shutdown` fires.
    pub async fn serve(self, shutdown: ShutdownSignal) {
        if let Ok(addr) = self.listener.local_addr() {
            info!(%addr, "control channel listening");
        }

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let target = Arc::clone(&self.target);
                        let counters = Arc::clone(&self.counters);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, target, counters).await {
                                debug!(%peer, error = %e, "control connection closed with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "control channel accept failed"),
                },
                _ = shutdown.wait() => {
                    info!("control channel stopped");
                    break;
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    target: Arc<dyn ControlTarget>,
    counters: Arc<RuntimeCounters>,
) -> Result<(), ControlError> {
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    while let Some(line) = framed.next().await {
        let line = line.map_err(codec_error)?;
        bump(&counters.control_requests);

        let command = ControlCommand::parse(&line);
        debug!(?command, "control request");
        let response = match command {
            ControlCommand::Shutdown => {
                framed
                    .send(ControlResponse::Accepted.encode())
                    .await
                    .map_err(codec_error)?;
                info!("shutdown requested over control channel");
                target.request_shutdown();
                return Ok(());
            }
            ControlCommand::TaskRetry(json) => match TaskRequest::from_json(&json) {
                Ok(request) => ControlResponse::flag(target.resubmit(request).await),
                Err(e) => {
                    warn!(error = %e, "malformed taskRetry payload");
                    ControlResponse::Rejected
                }
            },
            ControlCommand::GetMetrics => ControlResponse::Metrics(target.metrics()),
            ControlCommand::Unknown(name) => {
                debug!(command = %name, "unknown control command");
                ControlResponse::Rejected
            }
        };
        framed.send(response.encode()).await.map_err(codec_error)?;
    }
    Ok(())
}

fn codec_error(e: LinesCodecError) -> ControlError {
    match e {
        LinesCodecError::Io(io) => ControlError::Io(io),
        LinesCodecError::MaxLineLengthExceeded => ControlError::Malformed("line too long".into()),
    }
}

/// Operator-side connection to a running server.
pub struct ControlClient {
    framed: Framed<TcpStream, LinesCodec>,
}

impl ControlClient {
    /// Fails with `ControlError::Connect` when nothing is listening.
    pub async fn connect(address: &str) -> Result<Self, ControlError> {
        let connect_error = |reason: String| ControlError::Connect {
            address: address.to_string(),
            reason,
        };
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(address))
            .await
            .map_err(|_| connect_error("timed out".to_string()))?
            .map_err(|e| connect_error(e.to_string()))?;

        Ok(Self {
            framed: Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)),
        })
    }

    /// Sends one command and returns the raw response line.
    pub async fn request(&mut self, command: &ControlCommand) -> Result<String, ControlError> {
        self.framed.send(command.encode()).await.map_err(codec_error)?;
        match self.framed.next().await {
            Some(line) => line.map_err(codec_error),
            None => Err(ControlError::NoResponse),
        }
    }

    pub async fn shutdown(&mut self) -> Result<bool, ControlError> {
        Ok(self.request(&ControlCommand::Shutdown).await? == "1")
    }

    pub async fn task_retry(&mut self, request: &TaskRequest) -> Result<bool, ControlError> {
        let command = ControlCommand::task_retry(request)?;
        Ok(self.request(&command).await? == "1")
    }

    pub async fn metrics(&mut self) -> Result<serde_json::Value, ControlError> {
        let raw = self.request(&ControlCommand::GetMetrics).await?;
        serde_json::from_str(&raw).map_err(|e| ControlError::Malformed(e.to_string()))
    }
}
