//! Browser session seam - infrastructure layer
//!
//! The orchestrator only talks to [`BrowserSession`]. Every call is a single
//! attempt; retries are decided by the error classifier, never in here.

use crate::config::Credentials;
use crate::error::AppResult;
use crate::models::fill_plan::FieldEntry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A form already attached to the visit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExistingForm {
    pub form_id: String,
    pub label: String,
    /// Dispenser number read from the form label, when one is present
    pub dispenser_number: Option<u32>,
}

/// Result of scanning the visit page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormDetection {
    pub existing_forms: Vec<ExistingForm>,
    /// Selectors of controls that create a new form
    pub creation_affordances: Vec<String>,
}

impl FormDetection {
    /// Existing form for a dispenser, if the page has one
    pub fn form_for(&self, dispenser_number: u32) -> Option<&ExistingForm> {
        self.existing_forms
            .iter()
            .find(|f| f.dispenser_number == Some(dispenser_number))
    }

    pub fn can_create(&self) -> bool {
        !self.creation_affordances.is_empty()
    }

    /// Update path when a form exists, create path otherwise
    pub fn target_for(&self, dispenser_number: u32) -> Option<FormTarget> {
        match self.form_for(dispenser_number) {
            Some(form) => Some(FormTarget::Existing {
                form_id: form.form_id.clone(),
            }),
            None if self.can_create() => Some(FormTarget::Create {
                dispenser: dispenser_number,
            }),
            None => None,
        }
    }
}

/// Which form to open before filling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormTarget {
    Existing { form_id: String },
    Create { dispenser: u32 },
}

/// Best-effort capture taken before a failed session closes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorArtifact {
    pub screenshot: Option<Vec<u8>>,
    pub dom_snapshot: Option<String>,
}

/// One controlled browser session, owned by exactly one job
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn login(&mut self, credentials: &Credentials) -> AppResult<()>;

    async fn navigate(&mut self, url: &str) -> AppResult<()>;

    async fn reload(&mut self) -> AppResult<()>;

    async fn detect_forms(&mut self) -> AppResult<FormDetection>;

    async fn open_form(&mut self, target: &FormTarget) -> AppResult<()>;

    async fn fill_step(&mut self, field_selector: &str, value: &str) -> AppResult<()>;

    async fn save_form(&mut self) -> AppResult<()>;

    async fn submit(&mut self) -> AppResult<()>;

    /// Never fails; returns whatever could be captured
    async fn capture_artifact(&mut self) -> ErrorArtifact;

    async fn close(&mut self);

    /// Fill a batch of entries in order
    async fn fill_entries(&mut self, entries: &[FieldEntry]) -> AppResult<()> {
        for entry in entries {
            self.fill_step(&entry.selector, &entry.value).await?;
        }
        Ok(())
    }
}

/// Opens fresh sessions. Called again when a Browser failure discards one.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> AppResult<Box<dyn BrowserSession>>;
}
