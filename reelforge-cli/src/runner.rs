//! Common CLI setup: settings, layout, logging, and signal wiring.

use crate::error::CliError;
use reelforge::config::{DataLayout, Settings};
use reelforge::logging::{init_logging, LoggingGuard};
use tokio_util::sync::CancellationToken;

/// Shared bootstrap for every subcommand.
pub struct CliRunner {
    settings: Settings,
    _logging: LoggingGuard,
}

impl CliRunner {
    /// Loads settings from the environment and initializes logging under
    /// the data root.
    pub fn new() -> Result<Self, CliError> {
        let settings = Settings::from_env()?;
        let layout = DataLayout::new(&settings.root);
        layout.prepare()?;
        let logging = init_logging(&layout.logs_dir())?;
        Ok(Self {
            settings,
            _logging: logging,
        })
    }

    pub fn settings(&self) -> Settings {
        self.settings.clone()
    }

    /// A shutdown token cancelled on the first interrupt or terminate
    /// signal. A second interrupt kills the process immediately.
    pub fn shutdown_on_signals(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let for_signals = token.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            tracing::info!("shutdown signal received, draining");
            for_signals.cancel();
            wait_for_signal().await;
            tracing::warn!("second signal, exiting immediately");
            std::process::exit(crate::error::EXIT_SIGNAL);
        });
        token
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate()).expect("terminate handler installs");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
