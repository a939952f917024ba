//! Pipeline configuration.
//!
//! These settings make subject naming, budgets, and timing knobs explicit
//! and reproducible for operators. Values load from the process environment
//! with strict validation, or from any key-lookup function for tests.

use std::time::Duration;

use crate::error::{Error, Result};

const ENV_SUBJECT_PREFIX: &str = "FOLIO_PIPELINE_SUBJECT_PREFIX";
const ENV_BUCKET: &str = "FOLIO_PIPELINE_BUCKET";
const ENV_WORKER_GROUP: &str = "FOLIO_PIPELINE_WORKER_GROUP";
const ENV_MAX_OPTIONS_BYTES: &str = "FOLIO_PIPELINE_MAX_OPTIONS_BYTES";
const ENV_PRESIGN_SLACK_SECS: &str = "FOLIO_PIPELINE_PRESIGN_SLACK_SECS";
const ENV_SWEEP_INTERVAL_MS: &str = "FOLIO_PIPELINE_SWEEP_INTERVAL_MS";
const ENV_DEFAULT_TIMEOUT_SECS: &str = "FOLIO_PIPELINE_DEFAULT_TIMEOUT_SECS";
const ENV_RETAIN_RAW: &str = "FOLIO_PIPELINE_RETAIN_RAW";

const DEFAULT_SUBJECT_PREFIX: &str = "docs";
const DEFAULT_BUCKET: &str = "documents";
const DEFAULT_WORKER_GROUP: &str = "workers";
const DEFAULT_MAX_OPTIONS_BYTES: u64 = 64 * 1024;
const DEFAULT_PRESIGN_SLACK_SECS: u64 = 60;
const DEFAULT_SWEEP_INTERVAL_MS: u64 = 200;
const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// Configuration for coordinator and worker instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Subject namespace; jobs and completions publish under this prefix.
    pub subject_prefix: String,
    /// Bucket holding raw and result artifacts.
    pub bucket: String,
    /// Shared consumer group workers pull jobs from.
    pub worker_group: String,
    /// Byte budget for the serialized opaque options payload.
    pub max_options_bytes: usize,
    /// Extra presign validity beyond the processing timeout, so a descriptor
    /// never expires before the job it belongs to.
    pub presign_slack: Duration,
    /// How often the coordinator expires overdue pending requests.
    pub sweep_interval: Duration,
    /// Processing timeout used when the caller does not pass one.
    pub default_timeout: Duration,
    /// Keep raw input artifacts after successful completion.
    pub retain_raw: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            subject_prefix: DEFAULT_SUBJECT_PREFIX.to_string(),
            bucket: DEFAULT_BUCKET.to_string(),
            worker_group: DEFAULT_WORKER_GROUP.to_string(),
            max_options_bytes: usize::try_from(DEFAULT_MAX_OPTIONS_BYTES).unwrap_or(usize::MAX),
            presign_slack: Duration::from_secs(DEFAULT_PRESIGN_SLACK_SECS),
            sweep_interval: Duration::from_millis(DEFAULT_SWEEP_INTERVAL_MS),
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retain_raw: false,
        }
    }
}

impl PipelineConfig {
    /// Returns the subject job envelopes are published on.
    #[must_use]
    pub fn jobs_subject(&self) -> String {
        format!("{}.jobs", self.subject_prefix)
    }

    /// Returns the subject completion envelopes are published on.
    #[must_use]
    pub fn completions_subject(&self) -> String {
        format!("{}.completions", self.subject_prefix)
    }

    /// Loads configuration from the process environment with strict
    /// validation.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a numeric environment value is not
    /// a positive integer.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Loads configuration with a custom environment source.
    ///
    /// This entry point is test-friendly and accepts a key lookup function.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a numeric environment value is not
    /// a positive integer, or a boolean value is not `true`/`false`.
    pub fn from_env_with<F>(get_env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let subject_prefix =
            get_env(ENV_SUBJECT_PREFIX).unwrap_or_else(|| defaults.subject_prefix.clone());
        if subject_prefix.is_empty() || subject_prefix.contains('.') {
            return Err(Error::configuration(format!(
                "{ENV_SUBJECT_PREFIX} must be a non-empty token without dots"
            )));
        }

        let bucket = get_env(ENV_BUCKET).unwrap_or_else(|| defaults.bucket.clone());
        if bucket.is_empty() {
            return Err(Error::configuration(format!(
                "{ENV_BUCKET} must not be empty"
            )));
        }

        let worker_group =
            get_env(ENV_WORKER_GROUP).unwrap_or_else(|| defaults.worker_group.clone());
        if worker_group.is_empty() {
            return Err(Error::configuration(format!(
                "{ENV_WORKER_GROUP} must not be empty"
            )));
        }

        let max_options_bytes = parse_positive_u64_env(
            &get_env,
            ENV_MAX_OPTIONS_BYTES,
            DEFAULT_MAX_OPTIONS_BYTES,
        )?;
        let presign_slack_secs =
            parse_positive_u64_env(&get_env, ENV_PRESIGN_SLACK_SECS, DEFAULT_PRESIGN_SLACK_SECS)?;
        let sweep_interval_ms =
            parse_positive_u64_env(&get_env, ENV_SWEEP_INTERVAL_MS, DEFAULT_SWEEP_INTERVAL_MS)?;
        let default_timeout_secs =
            parse_positive_u64_env(&get_env, ENV_DEFAULT_TIMEOUT_SECS, DEFAULT_TIMEOUT_SECS)?;
        let retain_raw = parse_bool_env(&get_env, ENV_RETAIN_RAW, false)?;

        Ok(Self {
            subject_prefix,
            bucket,
            worker_group,
            max_options_bytes: usize::try_from(max_options_bytes).unwrap_or(usize::MAX),
            presign_slack: Duration::from_secs(presign_slack_secs),
            sweep_interval: Duration::from_millis(sweep_interval_ms),
            default_timeout: Duration::from_secs(default_timeout_secs),
            retain_raw,
        })
    }
}

fn parse_positive_u64_env<F>(get_env: &F, key: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    match get_env(key) {
        None => Ok(default),
        Some(raw) => {
            let value: u64 = raw.parse().map_err(|_| {
                Error::configuration(format!("{key} value '{raw}' is not a positive integer"))
            })?;
            if value == 0 {
                return Err(Error::configuration(format!("{key} must be positive")));
            }
            Ok(value)
        }
    }
}

fn parse_bool_env<F>(get_env: &F, key: &str, default: bool) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match get_env(key) {
        None => Ok(default),
        Some(raw) => match raw.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(Error::configuration(format!(
                "{key} value '{raw}' must be 'true' or 'false'"
            ))),
        },
    }
}
