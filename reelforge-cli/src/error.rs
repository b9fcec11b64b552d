//! CLI error handling and exit codes.

use reelforge::config::ConfigError;
use reelforge::supervisor::SupervisorError;

/// Exit codes for the command surface.
pub const EXIT_OK: i32 = 0;
pub const EXIT_CONFIG: i32 = 2;
pub const EXIT_RUNTIME: i32 = 3;
pub const EXIT_SIGNAL: i32 = 130;

/// Top-level CLI failure with its exit code.
#[derive(Debug)]
pub enum CliError {
    /// Bad or missing configuration (exit 2).
    Config(String),
    /// Unrecoverable runtime failure (exit 3).
    Runtime(String),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) => EXIT_CONFIG,
            CliError::Runtime(_) => EXIT_RUNTIME,
        }
    }

    /// Prints the message and exits the process.
    pub fn exit(self) -> ! {
        match &self {
            CliError::Config(message) => eprintln!("configuration error: {}", message),
            CliError::Runtime(message) => eprintln!("error: {}", message),
        }
        std::process::exit(self.exit_code())
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<SupervisorError> for CliError {
    fn from(e: SupervisorError) -> Self {
        match e {
            SupervisorError::Config(inner) => CliError::Config(inner.to_string()),
            other => CliError::Runtime(other.to_string()),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Runtime(e.to_string())
    }
}
