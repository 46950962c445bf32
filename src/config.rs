// src/config.rs

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Default bus endpoint, matching the conventional procman multicast group.
pub const DEFAULT_BUS_URL: &str = "udpm://239.255.76.67:7667?ttl=0";

/// Tunable constants of the deputy. The defaults are the protocol's
/// long-standing values; changing them on one host changes only how
/// aggressively that host's deputy escalates and reports.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct DeputyConfig {
    /// Minimum spacing between two kill signals to the same child, in
    /// microseconds.
    pub kill_retry_interval_us: i64,

    /// How many SIGTERMs a child gets before escalation switches to SIGKILL.
    pub graceful_kill_limit: u32,

    /// Orders older than this many microseconds are dropped as stale.
    pub stale_order_age_us: i64,

    /// Period of the telemetry snapshot and resource sampling, milliseconds.
    pub info_period_ms: u64,

    /// Period of the MARK self-accounting line, seconds.
    pub introspection_period_s: u64,

    /// Largest chunk read from a child stdout pipe in one pass.
    pub stdout_chunk_bytes: usize,

    /// Bus endpoint URL; `-u/--lcmurl` overrides it.
    pub bus_url: String,
}

impl DeputyConfig {
    /// Loads the configuration: built-in defaults, then an optional
    /// `Deputy.toml`, then `PMD_*` environment overrides.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a source fails to parse or a value does not
    /// deserialize.
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .set_default("kill_retry_interval_us", 900_000i64)?
            .set_default("graceful_kill_limit", 6i64)?
            .set_default("stale_order_age_us", 60_000_000i64)?
            .set_default("info_period_ms", 1_000i64)?
            .set_default("introspection_period_s", 120i64)?
            .set_default("stdout_chunk_bytes", 1023i64)?
            .set_default("bus_url", DEFAULT_BUS_URL)?;

        let builder = builder.add_source(File::with_name("Deputy").required(false));

        // E.g. `PMD_INFO_PERIOD_MS=500` overrides the telemetry period.
        let builder = builder.add_source(Environment::with_prefix("PMD").separator("__"));

        let config = builder.build()?;
        config.try_deserialize()
    }
}

impl Default for DeputyConfig {
    fn default() -> Self {
        Self {
            kill_retry_interval_us: 900_000,
            graceful_kill_limit: 6,
            stale_order_age_us: 60_000_000,
            info_period_ms: 1_000,
            introspection_period_s: 120,
            stdout_chunk_bytes: 1023,
            bus_url: DEFAULT_BUS_URL.to_string(),
        }
    }
}
