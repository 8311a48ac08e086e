use std::path::Path;

use tracing::warn;

use crate::error::DispatchError;

use super::types::DispatchConfig;

impl DispatchConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, DispatchError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DispatchError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// Convention: `OFFLOAD_SECTION_KEY` overrides `section.key`.
    /// - `OFFLOAD_POOL_CAPACITY` -> `pool.capacity`
    /// - `OFFLOAD_POOL_TEARDOWN_GRACE_MS` -> `pool.teardown_grace_ms`
    /// - `OFFLOAD_POOL_KEEP_WARM` -> `pool.keep_warm`
    /// - `OFFLOAD_JOBS_TIMEOUT_MS` -> `jobs.timeout_ms` (0 clears it)
    /// - `OFFLOAD_JOBS_ON_UNIT_LOSS` -> `jobs.on_unit_loss`
    /// - `OFFLOAD_JOBS_MAX_RETRIES` -> `jobs.max_retries`
    /// - `OFFLOAD_JOBS_MAX_PAYLOAD_BYTES` -> `jobs.max_payload_bytes`
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup. Unparseable values are
    /// logged and ignored.
    pub(crate) fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = parsed(&lookup, "OFFLOAD_POOL_CAPACITY") {
            self.pool.capacity = v;
        }
        if let Some(v) = parsed(&lookup, "OFFLOAD_POOL_TEARDOWN_GRACE_MS") {
            self.pool.teardown_grace_ms = v;
        }
        if let Some(v) = parsed(&lookup, "OFFLOAD_POOL_KEEP_WARM") {
            self.pool.keep_warm = v;
        }
        if let Some(v) = parsed::<u64>(&lookup, "OFFLOAD_JOBS_TIMEOUT_MS") {
            self.jobs.timeout_ms = (v > 0).then_some(v);
        }
        if let Some(v) = parsed(&lookup, "OFFLOAD_JOBS_ON_UNIT_LOSS") {
            self.jobs.on_unit_loss = v;
        }
        if let Some(v) = parsed(&lookup, "OFFLOAD_JOBS_MAX_RETRIES") {
            self.jobs.max_retries = v;
        }
        if let Some(v) = parsed(&lookup, "OFFLOAD_JOBS_MAX_PAYLOAD_BYTES") {
            self.jobs.max_payload_bytes = v;
        }
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(key, value = %raw, error = %e, "ignoring invalid config override");
            None
        }
    }
}
