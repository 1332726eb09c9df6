//! Observability: structured logging initialization.

use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

/// Options for environment-based initialization.
#[derive(Debug, Clone, Copy, Default)]
pub struct InitOptions {
    /// Whether verbose output was requested via CLI.
    pub verbose: bool,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

static OBSERVABILITY_INIT: OnceLock<()> = OnceLock::new();

/// Initializes tracing-based logging once for the process.
///
/// Respects `ENGRAM_LOG` (env-filter syntax); `verbose` lowers the
/// default level to debug. Safe to call more than once; later calls are
/// no-ops.
pub fn init(options: InitOptions) {
    OBSERVABILITY_INIT.get_or_init(|| {
        let default_level = if options.verbose { "debug" } else { "info" };
        let filter = EnvFilter::try_from_env("ENGRAM_LOG")
            .unwrap_or_else(|_| EnvFilter::new(default_level));

        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false);

        let result = if options.json {
            builder.json().try_init()
        } else {
            builder.try_init()
        };
        if let Err(err) = result {
            // A subscriber installed by the host process wins.
            tracing::debug!(error = %err, "logging already initialized");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init(InitOptions::default());
        init(InitOptions {
            verbose: true,
            json: true,
        });
    }
}
