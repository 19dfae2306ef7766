//! Runtime configuration.
//!
//! Every knob has a default; the environment overrides field-by-field
//! (`ADMISSION_DEADLINE_SECS=10`, `ADMIN_WEBHOOK_URL=...`, etc. via envy).

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct PrismConfig {
    /// Queue residency limit: a task still PENDING/RECEIVED after this many
    /// seconds is expired to TIMEOUT by the sweeper.
    #[serde(default = "default_admission_deadline_secs")]
    pub admission_deadline_secs: u64,

    /// Separate limit for in-flight execution. Long-running GPU inference is
    /// governed here, never by admission control.
    #[serde(default = "default_execution_deadline_secs")]
    pub execution_deadline_secs: u64,

    /// Timeout monitor sweep interval, milliseconds.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Automatic re-deliveries for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry backoff, milliseconds. Doubles per attempt (plus jitter).
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: f64,

    // Queue names.
    #[serde(default = "default_queue_main")]
    pub queue_main: String,
    #[serde(default = "default_queue_io")]
    pub queue_io: String,
    #[serde(default = "default_queue_cpu")]
    pub queue_cpu: String,
    #[serde(default = "default_queue_gpu_general")]
    pub queue_gpu_general: String,
    #[serde(default = "default_queue_gpu_portrait")]
    pub queue_gpu_portrait: String,
    #[serde(default = "default_queue_gpu_landscape")]
    pub queue_gpu_landscape: String,

    /// Fallback GPU category when a classification key matches nothing.
    #[serde(default = "default_gpu_default_category")]
    pub gpu_default_category: String,

    // Worker concurrency per class.
    #[serde(default = "default_io_worker_concurrency")]
    pub io_worker_concurrency: usize,
    #[serde(default = "default_cpu_worker_concurrency")]
    pub cpu_worker_concurrency: usize,
    #[serde(default = "default_gpu_worker_concurrency")]
    pub gpu_worker_concurrency: usize,

    /// Root of the shared per-task scratch space.
    #[serde(default = "default_shared_tmp_path")]
    pub shared_tmp_path: String,

    /// Admin webhook for timeout/failure alerts.
    #[serde(default)]
    pub admin_webhook_url: Option<String>,

    /// Admin email for the same alerts, used when no webhook is set.
    /// Neither configured = log only.
    #[serde(default)]
    pub admin_email: Option<String>,
}

fn default_admission_deadline_secs() -> u64 {
    30
}
fn default_execution_deadline_secs() -> u64 {
    300
}
fn default_sweep_interval_ms() -> u64 {
    1000
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    5000
}
fn default_retry_multiplier() -> f64 {
    2.0
}
fn default_queue_main() -> String {
    "main".into()
}
fn default_queue_io() -> String {
    "io".into()
}
fn default_queue_cpu() -> String {
    "cpu".into()
}
fn default_queue_gpu_general() -> String {
    "gpu-general".into()
}
fn default_queue_gpu_portrait() -> String {
    "gpu-portrait".into()
}
fn default_queue_gpu_landscape() -> String {
    "gpu-landscape".into()
}
fn default_gpu_default_category() -> String {
    "general".into()
}
fn default_io_worker_concurrency() -> usize {
    20
}
fn default_cpu_worker_concurrency() -> usize {
    10
}
fn default_gpu_worker_concurrency() -> usize {
    2
}
fn default_shared_tmp_path() -> String {
    "/tmp/shared/tasks".into()
}

impl Default for PrismConfig {
    fn default() -> Self {
        Self {
            admission_deadline_secs: default_admission_deadline_secs(),
            execution_deadline_secs: default_execution_deadline_secs(),
            sweep_interval_ms: default_sweep_interval_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_multiplier: default_retry_multiplier(),
            queue_main: default_queue_main(),
            queue_io: default_queue_io(),
            queue_cpu: default_queue_cpu(),
            queue_gpu_general: default_queue_gpu_general(),
            queue_gpu_portrait: default_queue_gpu_portrait(),
            queue_gpu_landscape: default_queue_gpu_landscape(),
            gpu_default_category: default_gpu_default_category(),
            io_worker_concurrency: default_io_worker_concurrency(),
            cpu_worker_concurrency: default_cpu_worker_concurrency(),
            gpu_worker_concurrency: default_gpu_worker_concurrency(),
            shared_tmp_path: default_shared_tmp_path(),
            admin_webhook_url: None,
            admin_email: None,
        }
    }
}

impl PrismConfig {
    /// Read overrides from the process environment.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    pub fn admission_deadline(&self) -> Duration {
        Duration::from_secs(self.admission_deadline_secs)
    }

    pub fn execution_deadline(&self) -> Duration {
        Duration::from_secs(self.execution_deadline_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}
