//! Program configuration
//!
//! `Config::from_env()` starts from `Config::default()` and lets every field
//! be overridden by an environment variable. Batch-level options are copied
//! into [`BatchOptions`] and validated once when a batch starts.

use crate::error::{AppError, AppResult, ConfigError};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How to obtain a browser
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BrowserMode {
    /// Attach to a running Chrome/Edge started with `--remote-debugging-port`
    Connect { port: u16 },
    /// Launch a headless browser, optionally from a specific executable
    Headless { executable: Option<String> },
}

/// Login for the work-order platform. Injected, never generated here.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.username.is_empty() || self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// DOM selectors for the target platform
///
/// `step_field_template` accepts `{grade}` and `{step}` placeholders.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlatformSelectors {
    pub login_email: String,
    pub login_password: String,
    pub login_submit: String,
    pub login_path_marker: String,
    pub form_list_item: String,
    pub form_edit_link: String,
    pub create_form_button: String,
    pub dispenser_select: String,
    pub step_field_template: String,
    pub save_form_button: String,
    pub submit_visit_button: String,
    pub error_banner: String,
}

impl Default for PlatformSelectors {
    fn default() -> Self {
        Self {
            login_email: "input[name='email']".to_string(),
            login_password: "input[name='password']".to_string(),
            login_submit: "button[type='submit']".to_string(),
            login_path_marker: "/login".to_string(),
            form_list_item: ".form-entry[data-form-id]".to_string(),
            form_edit_link: "a.edit-form".to_string(),
            create_form_button: "button.add-form, a.add-form".to_string(),
            dispenser_select: "select[name='dispenser']".to_string(),
            step_field_template: "[data-grade-index='{grade}'] [data-step='{step}']".to_string(),
            save_form_button: "button.save-form".to_string(),
            submit_visit_button: "button.submit-visit".to_string(),
            error_banner: ".alert-danger, .error-message".to_string(),
        }
    }
}

/// Bounded retry settings shared by Network backoff and the attempt cap
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }
}

/// Per-job options derived from the batch options
#[derive(Clone, Debug, PartialEq)]
pub struct JobOptions {
    pub timeout_per_visit: Duration,
    pub phase_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for JobOptions {
    fn default() -> Self {
        BatchOptions::default().job_options()
    }
}

/// Options for one `run_batch` call
#[derive(Clone, Debug, PartialEq)]
pub struct BatchOptions {
    pub delay_between_visits: Duration,
    pub timeout_per_visit: Duration,
    pub phase_timeout: Duration,
    pub retry: RetryConfig,
    pub continue_on_error: bool,
    pub checkpoint_every: usize,
    /// Consecutive Authentication failures that abort the whole batch
    pub auth_failure_abort_threshold: u32,
    pub resume_from_batch_id: Option<String>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            delay_between_visits: Duration::from_secs(2),
            timeout_per_visit: Duration::from_secs(5 * 60),
            phase_timeout: Duration::from_secs(60),
            retry: RetryConfig::default(),
            continue_on_error: true,
            checkpoint_every: 5,
            auth_failure_abort_threshold: 3,
            resume_from_batch_id: None,
        }
    }
}

impl BatchOptions {
    pub fn validate(&self) -> AppResult<()> {
        if self.timeout_per_visit.is_zero() {
            return Err(AppError::invalid_option("timeout_per_visit", "must be greater than zero"));
        }
        if self.phase_timeout.is_zero() {
            return Err(AppError::invalid_option("phase_timeout", "must be greater than zero"));
        }
        if self.phase_timeout > self.timeout_per_visit {
            return Err(AppError::invalid_option(
                "phase_timeout",
                "cannot exceed timeout_per_visit",
            ));
        }
        if self.delay_between_visits > Duration::from_secs(600) {
            return Err(AppError::invalid_option("delay_between_visits", "must be at most 10 minutes"));
        }
        if self.retry.max_attempts == 0 || self.retry.max_attempts > 10 {
            return Err(AppError::invalid_option("retry.max_attempts", "must be between 1 and 10"));
        }
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return Err(AppError::invalid_option(
                "retry.backoff_multiplier",
                "must be a finite number >= 1.0",
            ));
        }
        if self.checkpoint_every == 0 {
            return Err(AppError::invalid_option("checkpoint_every", "must be at least 1"));
        }
        if self.auth_failure_abort_threshold == 0 {
            return Err(AppError::invalid_option(
                "auth_failure_abort_threshold",
                "must be at least 1",
            ));
        }
        if matches!(&self.resume_from_batch_id, Some(id) if id.trim().is_empty()) {
            return Err(AppError::invalid_option("resume_from_batch_id", "must not be blank"));
        }
        Ok(())
    }

    pub fn job_options(&self) -> JobOptions {
        JobOptions {
            timeout_per_visit: self.timeout_per_visit,
            phase_timeout: self.phase_timeout,
            retry: self.retry.clone(),
        }
    }
}

/// Program configuration
#[derive(Clone, Debug)]
pub struct Config {
    pub browser_mode: BrowserMode,
    pub login_url: String,
    pub credentials: Credentials,
    pub selectors: PlatformSelectors,
    /// Folder holding one TOML file per visit
    pub visits_folder: String,
    pub checkpoint_dir: String,
    pub artifact_dir: String,
    pub verbose_logging: bool,
    pub output_log_file: String,
    pub batch: BatchOptions,
    /// Extra fuel grade names: true = metered, false = non-metered
    pub grade_overrides: BTreeMap<String, bool>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            browser_mode: BrowserMode::Connect { port: 2001 },
            login_url: "https://app.workfossa.com/login".to_string(),
            credentials: Credentials::default(),
            selectors: PlatformSelectors::default(),
            visits_folder: "visits".to_string(),
            checkpoint_dir: "data/checkpoints".to_string(),
            artifact_dir: "data/artifacts".to_string(),
            verbose_logging: false,
            output_log_file: "output.txt".to_string(),
            batch: BatchOptions::default(),
            grade_overrides: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        let default_batch = default.batch.clone();

        let browser_mode = if env_or("BROWSER_HEADLESS", false) {
            BrowserMode::Headless {
                executable: std::env::var("BROWSER_EXECUTABLE").ok(),
            }
        } else {
            match default.browser_mode {
                BrowserMode::Connect { port } => BrowserMode::Connect {
                    port: env_or("BROWSER_DEBUG_PORT", port),
                },
                other => other,
            }
        };

        let batch = BatchOptions {
            delay_between_visits: Duration::from_millis(env_or(
                "DELAY_BETWEEN_VISITS_MS",
                default_batch.delay_between_visits.as_millis() as u64,
            )),
            timeout_per_visit: Duration::from_secs(env_or(
                "TIMEOUT_PER_VISIT_SECS",
                default_batch.timeout_per_visit.as_secs(),
            )),
            phase_timeout: Duration::from_secs(env_or(
                "PHASE_TIMEOUT_SECS",
                default_batch.phase_timeout.as_secs(),
            )),
            retry: RetryConfig {
                max_attempts: env_or("RETRY_MAX_ATTEMPTS", default_batch.retry.max_attempts),
                initial_delay: Duration::from_millis(env_or(
                    "RETRY_INITIAL_DELAY_MS",
                    default_batch.retry.initial_delay.as_millis() as u64,
                )),
                backoff_multiplier: env_or(
                    "RETRY_BACKOFF_MULTIPLIER",
                    default_batch.retry.backoff_multiplier,
                ),
                max_delay: default_batch.retry.max_delay,
            },
            continue_on_error: env_or("CONTINUE_ON_ERROR", default_batch.continue_on_error),
            checkpoint_every: env_or("CHECKPOINT_EVERY", default_batch.checkpoint_every),
            auth_failure_abort_threshold: env_or(
                "AUTH_FAILURE_ABORT_THRESHOLD",
                default_batch.auth_failure_abort_threshold,
            ),
            resume_from_batch_id: std::env::var("RESUME_BATCH_ID").ok().filter(|v| !v.is_empty()),
        };

        Self {
            browser_mode,
            login_url: std::env::var("LOGIN_URL").unwrap_or(default.login_url),
            credentials: Credentials {
                username: std::env::var("PLATFORM_USERNAME").unwrap_or_default(),
                password: std::env::var("PLATFORM_PASSWORD").unwrap_or_default(),
            },
            selectors: default.selectors,
            visits_folder: std::env::var("VISITS_FOLDER").unwrap_or(default.visits_folder),
            checkpoint_dir: std::env::var("CHECKPOINT_DIR").unwrap_or(default.checkpoint_dir),
            artifact_dir: std::env::var("ARTIFACT_DIR").unwrap_or(default.artifact_dir),
            verbose_logging: env_or("VERBOSE_LOGGING", default.verbose_logging),
            output_log_file: std::env::var("OUTPUT_LOG_FILE").unwrap_or(default.output_log_file),
            batch,
            grade_overrides: std::env::var("GRADE_OVERRIDES")
                .map(|raw| parse_grade_overrides(&raw))
                .unwrap_or_default(),
        }
    }
}

/// Value of `name` if set and parseable. A malformed value is reported and
/// the default kept.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    let Ok(raw) = std::env::var(name) else {
        return default;
    };
    match parse_env_value(name, &raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("⚠️ {}; using the default", e);
            default
        }
    }
}

fn parse_env_value<T: FromStr>(name: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::EnvVarParseFailed {
        var_name: name.to_string(),
        value: raw.to_string(),
        expected_type: std::any::type_name::<T>().to_string(),
    })
}

/// Parse `"Kerosene=metered, DEF=non-metered"`. Malformed pairs are dropped
/// with a warning.
pub fn parse_grade_overrides(raw: &str) -> BTreeMap<String, bool> {
    let mut overrides = BTreeMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((name, class)) = pair.split_once('=') else {
            tracing::warn!("ignoring grade override without '=': {}", pair);
            continue;
        };
        let metered = match class.trim().to_ascii_lowercase().as_str() {
            "metered" | "meter" | "5" => true,
            "non-metered" | "nonmetered" | "unmetered" | "3" => false,
            other => {
                tracing::warn!("ignoring grade override {}: unknown class {}", name, other);
                continue;
            }
        };
        overrides.insert(name.trim().to_string(), metered);
    }
    overrides
}
