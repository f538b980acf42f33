#![allow(dead_code)]

use async_trait::async_trait;
use dispenser_form_automation::config::{BatchOptions, Credentials, RetryConfig};
use dispenser_form_automation::infrastructure::{
    BrowserSession, ErrorArtifact, ExistingForm, FormDetection, FormTarget, SessionFactory,
};
use dispenser_form_automation::models::{Dispenser, ProgressEvent, ServiceCode, Visit, WorkOrder};
use dispenser_form_automation::registry::{JobRegistry, ProgressObserver};
use dispenser_form_automation::services::ArtifactWriter;
use dispenser_form_automation::{AppError, AppResult, JobOrchestrator};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Session operations the mock records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Login,
    Navigate,
    Reload,
    DetectForms,
    OpenForm,
    FillStep,
    SaveForm,
    Submit,
    Capture,
    Close,
}

#[derive(Debug, Clone)]
pub struct Call {
    pub session: usize,
    pub url: String,
    pub op: Op,
    pub detail: String,
}

struct Failure {
    /// Only fail while the session is on a URL containing this
    url: Option<String>,
    op: Op,
    remaining: u32,
    make: fn() -> AppError,
}

#[derive(Default)]
struct Script {
    failures: Vec<Failure>,
    calls: Vec<Call>,
    sessions_opened: usize,
    existing_forms: Vec<ExistingForm>,
    fill_delay: Duration,
}

/// Scripted browser: records every call and injects failures on demand
#[derive(Clone, Default)]
pub struct MockSessionFactory {
    script: Arc<Mutex<Script>>,
}

impl MockSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `op` the next `times` times (`u32::MAX` = always)
    pub fn fail(&self, op: Op, times: u32, make: fn() -> AppError) -> &Self {
        self.script.lock().unwrap().failures.push(Failure {
            url: None,
            op,
            remaining: times,
            make,
        });
        self
    }

    /// Fail `op` only while the session sits on a URL containing `url_part`
    pub fn fail_on(&self, url_part: &str, op: Op, times: u32, make: fn() -> AppError) -> &Self {
        self.script.lock().unwrap().failures.push(Failure {
            url: Some(url_part.to_string()),
            op,
            remaining: times,
            make,
        });
        self
    }

    pub fn with_existing_form(&self, form_id: &str, dispenser_number: u32) -> &Self {
        self.script.lock().unwrap().existing_forms.push(ExistingForm {
            form_id: form_id.to_string(),
            label: format!("Dispenser #{}", dispenser_number),
            dispenser_number: Some(dispenser_number),
        });
        self
    }

    pub fn with_fill_delay(&self, delay: Duration) -> &Self {
        self.script.lock().unwrap().fill_delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn count(&self, op: Op) -> usize {
        self.calls().iter().filter(|c| c.op == op).count()
    }

    /// URLs navigated to, in order
    pub fn navigated(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.op == Op::Navigate)
            .map(|c| c.detail)
            .collect()
    }

    pub fn sessions_opened(&self) -> usize {
        self.script.lock().unwrap().sessions_opened
    }
}

#[async_trait]
impl SessionFactory for MockSessionFactory {
    async fn open(&self) -> AppResult<Box<dyn BrowserSession>> {
        let id = {
            let mut script = self.script.lock().unwrap();
            script.sessions_opened += 1;
            script.sessions_opened
        };
        Ok(Box::new(MockSession {
            id,
            url: String::new(),
            script: self.script.clone(),
        }))
    }
}

struct MockSession {
    id: usize,
    url: String,
    script: Arc<Mutex<Script>>,
}

impl MockSession {
    fn record(&self, op: Op, detail: impl Into<String>) -> AppResult<()> {
        let mut script = self.script.lock().unwrap();
        script.calls.push(Call {
            session: self.id,
            url: self.url.clone(),
            op,
            detail: detail.into(),
        });

        let url = &self.url;
        let hit = script.failures.iter_mut().find(|f| {
            f.op == op
                && f.remaining > 0
                && f.url.as_deref().map_or(true, |part| url.contains(part))
        });
        match hit {
            Some(failure) => {
                if failure.remaining != u32::MAX {
                    failure.remaining -= 1;
                }
                Err((failure.make)())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BrowserSession for MockSession {
    async fn login(&mut self, credentials: &Credentials) -> AppResult<()> {
        self.record(Op::Login, credentials.username.clone())
    }

    async fn navigate(&mut self, url: &str) -> AppResult<()> {
        self.url = url.to_string();
        self.record(Op::Navigate, url)
    }

    async fn reload(&mut self) -> AppResult<()> {
        self.record(Op::Reload, "")
    }

    async fn detect_forms(&mut self) -> AppResult<FormDetection> {
        self.record(Op::DetectForms, "")?;
        let existing_forms = self.script.lock().unwrap().existing_forms.clone();
        Ok(FormDetection {
            existing_forms,
            creation_affordances: vec!["button.add-form".to_string()],
        })
    }

    async fn open_form(&mut self, target: &FormTarget) -> AppResult<()> {
        let detail = match target {
            FormTarget::Existing { form_id } => format!("existing:{}", form_id),
            FormTarget::Create { dispenser } => format!("create:{}", dispenser),
        };
        self.record(Op::OpenForm, detail)
    }

    async fn fill_step(&mut self, field_selector: &str, value: &str) -> AppResult<()> {
        let delay = self.script.lock().unwrap().fill_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.record(Op::FillStep, format!("{}={}", field_selector, value))
    }

    async fn save_form(&mut self) -> AppResult<()> {
        self.record(Op::SaveForm, "")
    }

    async fn submit(&mut self) -> AppResult<()> {
        self.record(Op::Submit, "")
    }

    async fn capture_artifact(&mut self) -> ErrorArtifact {
        let _ = self.record(Op::Capture, "");
        ErrorArtifact {
            screenshot: Some(vec![0x89, b'P', b'N', b'G']),
            dom_snapshot: Some(format!("<html><body>{}</body></html>", self.url)),
        }
    }

    async fn close(&mut self) {
        let _ = self.record(Op::Close, "");
    }
}

/// Keeps every event it sees
#[derive(Default)]
pub struct CollectingObserver {
    events: tokio::sync::Mutex<Vec<ProgressEvent>>,
}

impl CollectingObserver {
    pub async fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl ProgressObserver for CollectingObserver {
    async fn on_event(&self, event: &ProgressEvent) {
        self.events.lock().await.push(event.clone());
    }
}

// ========== fixtures ==========

pub fn dispenser(number: u32, grades: &[&str]) -> Dispenser {
    Dispenser::new(number, grades)
}

pub fn work_order(id: &str, code: &str, quantity: u32, instructions: &str, dispensers: Vec<Dispenser>) -> WorkOrder {
    WorkOrder {
        id: id.to_string(),
        service_codes: vec![ServiceCode {
            code: code.to_string(),
            quantity,
            description: String::new(),
        }],
        instructions_text: instructions.to_string(),
        dispensers,
    }
}

/// All-dispensers metering visit with two Regular/Plus/Premium dispensers
pub fn visit(id: &str) -> Visit {
    Visit::new(
        id,
        format!("https://app.example.com/visits/{}", id),
        work_order(
            &format!("W-{}", id),
            "2861",
            2,
            "",
            vec![
                dispenser(1, &["Regular", "Plus", "Premium"]),
                dispenser(2, &["Regular", "Plus", "Premium"]),
            ],
        ),
    )
}

pub fn visits(ids: &[&str]) -> Vec<Visit> {
    ids.iter().map(|id| visit(id)).collect()
}

/// Batch options with no waiting anywhere
pub fn fast_options() -> BatchOptions {
    BatchOptions {
        delay_between_visits: Duration::ZERO,
        timeout_per_visit: Duration::from_secs(10),
        phase_timeout: Duration::from_secs(2),
        retry: RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(10),
        },
        ..BatchOptions::default()
    }
}

pub fn credentials() -> Credentials {
    Credentials::new("tech@example.com", "secret")
}

pub fn orchestrator(
    sessions: &MockSessionFactory,
    registry: Arc<JobRegistry>,
    artifact_dir: &Path,
) -> JobOrchestrator {
    JobOrchestrator::new(Arc::new(sessions.clone()), registry, credentials())
        .with_artifact_writer(ArtifactWriter::with_dir(artifact_dir))
}

pub fn form_error() -> AppError {
    AppError::element_missing("[data-grade-index='0'] [data-step='wet-down']")
}

pub fn auth_error() -> AppError {
    dispenser_form_automation::error::AuthError::LoginRejected {
        url: "https://app.example.com/login".to_string(),
    }
    .into()
}

pub fn network_error() -> AppError {
    AppError::network("net::ERR_CONNECTION_RESET")
}

pub fn browser_error() -> AppError {
    dispenser_form_automation::error::BrowserError::Cdp {
        message: "Target closed".to_string(),
    }
    .into()
}
