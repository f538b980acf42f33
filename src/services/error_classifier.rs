//! Error classifier and recovery policy - business capability layer
//!
//! Maps raw failures onto [`ErrorKind`] and decides what the orchestrator
//! does next. The session driver never retries on its own; every retry in
//! the engine goes through [`ErrorClassifier::decide`].

use crate::config::RetryConfig;
use crate::error::{AppError, BrowserError, ErrorKind};
use crate::models::job::ErrorRecord;
use std::time::Duration;

/// Re-authentication attempts before an Authentication failure is terminal
pub const MAX_REAUTH_ATTEMPTS: u32 = 3;
/// Session recreations per job
pub const MAX_SESSION_RECREATIONS: u32 = 1;
/// Page reloads per phase
pub const MAX_FORM_RELOADS: u32 = 1;
/// Timeout extensions per phase
pub const MAX_TIMEOUT_EXTENSIONS: u32 = 1;

/// What to do about a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Log in again, then retry the phase
    Reauthenticate { max_attempts: u32 },
    /// Close the browser session, open a new one and restart the job
    RecreateSession { max_attempts: u32 },
    /// Reload the visit page and retry the current phase
    ReloadAndRetryPhase { max_attempts: u32 },
    /// Wait with exponential backoff and retry the phase
    Backoff { max_attempts: u32 },
    /// Double the phase timeout and retry the phase
    ExtendTimeout { max_attempts: u32 },
    /// Do not retry; report to the caller
    Surface,
}

impl RecoveryAction {
    pub fn max_attempts(self) -> u32 {
        match self {
            RecoveryAction::Reauthenticate { max_attempts }
            | RecoveryAction::RecreateSession { max_attempts }
            | RecoveryAction::ReloadAndRetryPhase { max_attempts }
            | RecoveryAction::Backoff { max_attempts }
            | RecoveryAction::ExtendTimeout { max_attempts } => max_attempts,
            RecoveryAction::Surface => 0,
        }
    }
}

/// Result of applying the policy to one failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry { action: RecoveryAction, delay: Duration },
    GiveUp,
}

/// Error classifier with the job's retry settings
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    retry: RetryConfig,
}

impl ErrorClassifier {
    pub fn new(retry: RetryConfig) -> Self {
        Self { retry }
    }

    /// Category for a raw error. CDP and untyped errors are refined by
    /// their message text.
    pub fn kind_of(&self, err: &AppError) -> ErrorKind {
        match err {
            AppError::Browser(BrowserError::Cdp { message }) => {
                kind_from_message(message).unwrap_or(ErrorKind::Browser)
            }
            AppError::Browser(BrowserError::NavigationFailed { message, .. }) => {
                kind_from_message(message).unwrap_or(ErrorKind::Network)
            }
            AppError::Other(message) => kind_from_message(message).unwrap_or(ErrorKind::Browser),
            other => other.kind(),
        }
    }

    /// Classify a raw error as the `attempt`-th failure of its kind
    pub fn classify(&self, err: &AppError, attempt: u32) -> ErrorRecord {
        let kind = self.kind_of(err);
        ErrorRecord {
            kind,
            message: err.to_string(),
            attempt,
            recoverable: attempt <= self.recovery_for(kind).max_attempts(),
            artifact_refs: None,
        }
    }

    pub fn recovery_for(&self, kind: ErrorKind) -> RecoveryAction {
        match kind {
            ErrorKind::Authentication => RecoveryAction::Reauthenticate {
                max_attempts: MAX_REAUTH_ATTEMPTS,
            },
            ErrorKind::Browser => RecoveryAction::RecreateSession {
                max_attempts: MAX_SESSION_RECREATIONS,
            },
            ErrorKind::Form => RecoveryAction::ReloadAndRetryPhase {
                max_attempts: MAX_FORM_RELOADS,
            },
            ErrorKind::Network => RecoveryAction::Backoff {
                max_attempts: self.retry.max_attempts,
            },
            ErrorKind::Timeout => RecoveryAction::ExtendTimeout {
                max_attempts: MAX_TIMEOUT_EXTENSIONS,
            },
            ErrorKind::Validation => RecoveryAction::Surface,
        }
    }

    /// Decide what to do with a classified failure
    pub fn decide(&self, record: &ErrorRecord) -> Decision {
        let action = self.recovery_for(record.kind);
        if action == RecoveryAction::Surface || record.attempt > action.max_attempts() {
            return Decision::GiveUp;
        }
        let delay = match action {
            RecoveryAction::Backoff { .. } => self.retry.delay_for(record.attempt),
            RecoveryAction::Reauthenticate { .. } | RecoveryAction::RecreateSession { .. } => {
                self.retry.initial_delay
            }
            _ => Duration::ZERO,
        };
        Decision::Retry { action, delay }
    }
}

fn kind_from_message(message: &str) -> Option<ErrorKind> {
    let lower = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["net::err", "connection refused", "connection reset", "dns", "network", "econn"]) {
        Some(ErrorKind::Network)
    } else if has(&["timed out", "timeout"]) {
        Some(ErrorKind::Timeout)
    } else if has(&["unauthorized", "401", "session expired", "please log in", "login required"]) {
        Some(ErrorKind::Authentication)
    } else if has(&["no node", "could not find node", "not found", "detached", "stale"]) {
        Some(ErrorKind::Form)
    } else {
        None
    }
}

/// Classify with default retry settings
pub fn classify(err: &AppError, attempt: u32) -> ErrorRecord {
    ErrorClassifier::default().classify(err, attempt)
}

/// Recovery action with default retry settings
pub fn recovery_for(kind: ErrorKind) -> RecoveryAction {
    ErrorClassifier::default().recovery_for(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuthError, FormError, ValidationError};

    fn classifier(max_attempts: u32) -> ErrorClassifier {
        ErrorClassifier::new(RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        })
    }

    #[test]
    fn recovery_table() {
        let c = classifier(4);
        assert_eq!(
            c.recovery_for(ErrorKind::Authentication),
            RecoveryAction::Reauthenticate { max_attempts: 3 }
        );
        assert_eq!(
            c.recovery_for(ErrorKind::Browser),
            RecoveryAction::RecreateSession { max_attempts: 1 }
        );
        assert_eq!(
            c.recovery_for(ErrorKind::Form),
            RecoveryAction::ReloadAndRetryPhase { max_attempts: 1 }
        );
        assert_eq!(
            c.recovery_for(ErrorKind::Network),
            RecoveryAction::Backoff { max_attempts: 4 }
        );
        assert_eq!(
            c.recovery_for(ErrorKind::Timeout),
            RecoveryAction::ExtendTimeout { max_attempts: 1 }
        );
        assert_eq!(c.recovery_for(ErrorKind::Validation), RecoveryAction::Surface);
    }

    #[test]
    fn validation_never_retries() {
        let c = classifier(3);
        let err = AppError::from(ValidationError::ZeroQuantity { code: "2861".into() });
        let record = c.classify(&err, 1);
        assert_eq!(record.kind, ErrorKind::Validation);
        assert!(!record.recoverable);
        assert_eq!(c.decide(&record), Decision::GiveUp);
    }

    #[test]
    fn authentication_retries_three_times() {
        let c = classifier(3);
        let err = AppError::from(AuthError::LoginRejected { url: "/login".into() });
        for attempt in 1..=3 {
            let record = c.classify(&err, attempt);
            assert!(record.recoverable);
            assert!(matches!(
                c.decide(&record),
                Decision::Retry { action: RecoveryAction::Reauthenticate { .. }, .. }
            ));
        }
        assert_eq!(c.decide(&c.classify(&err, 4)), Decision::GiveUp);
    }

    #[test]
    fn form_reloads_once() {
        let c = classifier(3);
        let err = AppError::from(FormError::ElementMissing { selector: "#x".into() });
        assert!(matches!(c.decide(&c.classify(&err, 1)), Decision::Retry { .. }));
        assert_eq!(c.decide(&c.classify(&err, 2)), Decision::GiveUp);
    }

    #[test]
    fn network_backs_off_exponentially() {
        let c = classifier(3);
        let err = AppError::network("connection reset");
        let delays: Vec<_> = (1..=3)
            .map(|attempt| match c.decide(&c.classify(&err, attempt)) {
                Decision::Retry { delay, .. } => delay,
                Decision::GiveUp => panic!("attempt {} should retry", attempt),
            })
            .collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400)
            ]
        );
        assert_eq!(c.decide(&c.classify(&err, 4)), Decision::GiveUp);
    }

    #[test]
    fn cdp_messages_are_refined() {
        let c = classifier(3);
        let cdp = |m: &str| AppError::Browser(BrowserError::Cdp { message: m.into() });
        assert_eq!(c.kind_of(&cdp("net::ERR_INTERNET_DISCONNECTED")), ErrorKind::Network);
        assert_eq!(c.kind_of(&cdp("Could not find node with given id")), ErrorKind::Form);
        assert_eq!(c.kind_of(&cdp("Request timed out.")), ErrorKind::Timeout);
        assert_eq!(c.kind_of(&cdp("Target closed")), ErrorKind::Browser);
        assert_eq!(c.kind_of(&AppError::Other("401 unauthorized".into())), ErrorKind::Authentication);
    }

    #[test]
    fn attempt_is_carried_into_the_record() {
        let record = classify(&AppError::timeout("navigating", 1000), 1);
        assert_eq!(record.kind, ErrorKind::Timeout);
        assert_eq!(record.attempt, 1);
        assert!(record.message.contains("navigating"));
        assert_eq!(recovery_for(ErrorKind::Timeout).max_attempts(), 1);
    }
}
