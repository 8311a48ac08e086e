use super::types::{DispatchConfig, UnitLossPolicy};
use crate::error::DispatchError;

/// Upper bound on configured pool capacity.
pub const MAX_CAPACITY: usize = 1024;

/// Longest accepted teardown grace period.
const MAX_TEARDOWN_GRACE_MS: u64 = 60_000;

impl DispatchConfig {
    /// Validate the config: capacity bounds, timeout and retry settings.
    pub fn validate(&self) -> Result<(), DispatchError> {
        self.validate_pool()?;
        self.validate_jobs()?;
        Ok(())
    }

    fn validate_pool(&self) -> Result<(), DispatchError> {
        if self.pool.capacity > MAX_CAPACITY {
            return Err(DispatchError::Config(format!(
                "pool.capacity {} exceeds the maximum of {MAX_CAPACITY}",
                self.pool.capacity
            )));
        }
        if self.pool.teardown_grace_ms > MAX_TEARDOWN_GRACE_MS {
            return Err(DispatchError::Config(format!(
                "pool.teardown_grace_ms {} exceeds {MAX_TEARDOWN_GRACE_MS}",
                self.pool.teardown_grace_ms
            )));
        }
        Ok(())
    }

    fn validate_jobs(&self) -> Result<(), DispatchError> {
        if self.jobs.timeout_ms == Some(0) {
            return Err(DispatchError::Config(
                "jobs.timeout_ms must be positive; omit it to disable timeouts".into(),
            ));
        }
        if self.jobs.on_unit_loss == UnitLossPolicy::Retry && self.jobs.max_retries == 0 {
            return Err(DispatchError::Config(
                "jobs.on_unit_loss = \"retry\" requires jobs.max_retries >= 1".into(),
            ));
        }
        if self.jobs.max_payload_bytes == 0 {
            return Err(DispatchError::Config("jobs.max_payload_bytes must be positive".into()));
        }
        Ok(())
    }
}
