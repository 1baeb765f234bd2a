//! tracing subscriber の初期化
//!
//! ライブラリ側からは呼ばない。バイナリが起動時に 1 回だけ呼ぶ。

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log filter {filter:?}: {reason}")]
    Filter { filter: String, reason: String },

    #[error("a global tracing subscriber is already installed")]
    AlreadyInstalled,
}

/// Installs the global subscriber. `RUST_LOG`, when set, wins over `config.level`.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let filter = build_filter(config, std::env::var("RUST_LOG").ok())?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|_| TelemetryError::AlreadyInstalled)
}

fn build_filter(config: &LoggingConfig, env: Option<String>) -> Result<EnvFilter, TelemetryError> {
    let directive = env
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| config.level.clone());
    EnvFilter::try_new(&directive).map_err(|e| TelemetryError::Filter {
        filter: directive,
        reason: e.to_string(),
    })
}
