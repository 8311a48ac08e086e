use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ── Top-level config ────────────────────────────────────────────────

/// Full dispatcher configuration, usually parsed from `offload.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Unit pool sizing and shutdown behavior.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Per-job limits and the policy for jobs whose unit is lost.
    #[serde(default)]
    pub jobs: JobsConfig,
}

// ── Section configs ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of execution units. 0 = available parallelism.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// How long teardown waits for `cleanup_complete` before forcing termination.
    #[serde(default = "default_teardown_grace_ms")]
    pub teardown_grace_ms: u64,

    /// Keep units alive between batches. When false the pool is torn down as
    /// soon as a batch drains.
    #[serde(default = "default_keep_warm")]
    pub keep_warm: bool,
}

fn default_capacity() -> usize {
    0
}

fn default_teardown_grace_ms() -> u64 {
    500
}

fn default_keep_warm() -> bool {
    true
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            teardown_grace_ms: default_teardown_grace_ms(),
            keep_warm: default_keep_warm(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Per-job timeout in milliseconds. Unset = wait forever.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// What to do with a job whose unit faulted or timed out.
    #[serde(default)]
    pub on_unit_loss: UnitLossPolicy,

    /// Extra attempts allowed under [`UnitLossPolicy::Retry`].
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Largest payload a unit will be sent; bigger jobs fail at submission.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: u64,
}

fn default_max_retries() -> u32 {
    1
}

fn default_max_payload_bytes() -> u64 {
    256 * 1024 * 1024
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            on_unit_loss: UnitLossPolicy::default(),
            max_retries: default_max_retries(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

/// Handling of a job whose unit had to be terminated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitLossPolicy {
    /// Record the job as failed.
    #[default]
    Fail,
    /// Re-queue the job at the front for a fresh unit, up to `max_retries` times.
    Retry,
}

impl FromStr for UnitLossPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" => Ok(Self::Fail),
            "retry" => Ok(Self::Retry),
            other => Err(format!(
                "unknown unit loss policy '{other}' (expected 'fail' or 'retry')"
            )),
        }
    }
}

impl fmt::Display for UnitLossPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fail => f.write_str("fail"),
            Self::Retry => f.write_str("retry"),
        }
    }
}

// ── Accessors ───────────────────────────────────────────────────────

impl DispatchConfig {
    /// Resolve the unit capacity (0 means use available parallelism).
    pub fn resolved_capacity(&self) -> usize {
        if self.pool.capacity == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.pool.capacity
        }
    }

    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.pool.teardown_grace_ms)
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.jobs.timeout_ms.map(Duration::from_millis)
    }

    /// Builder-style capacity override.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.pool.capacity = capacity;
        self
    }

    /// Builder-style timeout override.
    pub fn with_job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.jobs.timeout_ms = timeout.map(|d| d.as_millis() as u64);
        self
    }

    /// Builder-style unit loss policy override.
    pub fn with_unit_loss(mut self, policy: UnitLossPolicy, max_retries: u32) -> Self {
        self.jobs.on_unit_loss = policy;
        self.jobs.max_retries = max_retries;
        self
    }
}
