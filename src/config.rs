use tracing_subscriber::EnvFilter;

/// Application-level constants
pub const APP_NAME: &str = "LabLens";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Quiet period before a scheduled analysis fires.
pub const DEFAULT_QUIET_PERIOD_MS: u64 = 1500;

/// Upper bound on one provider call, so a hung provider cannot leave the
/// coordinator pending forever.
pub const DEFAULT_ANALYSIS_TIMEOUT_SECS: u64 = 60;

/// Tolerance for float comparisons (round-trip conversion, trend).
pub const FLOAT_TOLERANCE: f64 = 1e-9;

/// Default analysis provider endpoint.
pub const DEFAULT_PROVIDER_URL: &str = "http://localhost:8080";

pub fn default_log_filter() -> String {
    format!("info,{}=debug", env!("CARGO_PKG_NAME"))
}

/// Initialize tracing for binaries and examples. Safe to call more than
/// once; later calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_log_filter())),
        )
        .try_init();
}
