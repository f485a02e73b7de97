//! Structured logging setup.
//!
//! Everything in leadflow logs through `tracing`. Binaries call
//! [`init_subscriber`] once at startup; tests use [`capture_logs`] to assert on
//! what an engine reported.

pub mod test_utils;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

/// Output format for the stderr subscriber.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogOutput {
    /// Single-line human readable output.
    #[default]
    Compact,
    /// One JSON object per event.
    Json,
}

/// Initialize the global tracing subscriber on stderr.
///
/// `RUST_LOG` takes precedence over `level` when set. Subsequent calls are
/// no-ops.
pub fn init_subscriber(level: &str, output: LogOutput) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    // try_init fails only when a global subscriber is already installed
    let _ = match output {
        LogOutput::Compact => builder.compact().try_init(),
        LogOutput::Json => builder.json().try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_subscriber_twice_is_harmless() {
        init_subscriber("warn", LogOutput::Compact);
        init_subscriber("debug", LogOutput::Json);
    }

    #[test]
    fn default_output_is_compact() {
        assert_eq!(LogOutput::default(), LogOutput::Compact);
    }
}
