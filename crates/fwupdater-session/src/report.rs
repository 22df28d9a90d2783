//! Reporting channel backed by `tracing`

use tracing::{error, info, warn};

use fwupdater_core::{Reporter, Severity};

/// Forwards operator messages to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => info!(target: "fwupdater::report", "{}", message),
            Severity::Warning => warn!(target: "fwupdater::report", "{}", message),
            Severity::Error => error!(target: "fwupdater::report", "{}", message),
        }
    }
}
