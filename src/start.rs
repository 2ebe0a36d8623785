//! Startup helpers shared by the binaries.

use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::{ChatError, ChatResult};
use crate::server::{self, AppState};

/// Install the global `tracing` subscriber on stderr (`RUST_LOG` plus `default_level`).
pub fn init_tracing(default_level: tracing::Level) {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .init();
}

/// Run the HTTP server (used by the `mentor-chat-server` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, otherwise see [`exit_code`].
#[must_use]
pub fn run() -> ExitCode {
    init_tracing(tracing::Level::INFO);
    tracing::info!("Starting mentor chat v{}", env!("CARGO_PKG_VERSION"));

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{e}");
            return exit_code(&e);
        }
    };
    let port = config.server.port;

    let state = match initialize(config) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to create state: {e}");
            return exit_code(&e);
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(server::run_server_with_shutdown(state, port, shutdown_signal())) {
        tracing::error!("Server error: {e}");
        return exit_code(&e);
    }

    tracing::info!("Server stopped");
    ExitCode::SUCCESS
}

/// Process exit status for a fatal error: `2` for configuration problems, `1` otherwise.
#[must_use]
pub fn exit_code(err: &ChatError) -> ExitCode {
    if err.is_recoverable() {
        ExitCode::from(1)
    } else {
        ExitCode::from(2)
    }
}

/// Initialize application state without starting the server.
///
/// # Errors
/// Returns an error if state creation fails.
pub fn initialize(config: AppConfig) -> ChatResult<Arc<AppState>> {
    tracing::info!("LLM endpoint: {}", config.llm.endpoint);
    AppState::new(config)
}

/// Resolves on Ctrl+C.
pub fn shutdown_signal() -> impl Future<Output = ()> + Send + 'static {
    async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Cannot listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown requested");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_exit_with_two() {
        assert_eq!(exit_code(&ChatError::Config("no key".to_string())), ExitCode::from(2));
        assert_eq!(exit_code(&ChatError::Network("refused".to_string())), ExitCode::from(1));
    }
}
