//! Chrome session driver
//!
//! [`ChromeSession`] implements [`BrowserSession`] with chromiumoxide and a
//! handful of JS snippets run through [`JsExecutor`]. Every method makes a
//! single attempt and maps what it sees onto an [`AppError`].

use crate::browser::{connect_to_browser, launch_headless_browser, new_blank_page};
use crate::config::{BrowserMode, Config, Credentials, PlatformSelectors};
use crate::error::{AppError, AppResult, AuthError, BrowserError, FormError};
use crate::infrastructure::{
    js_string, BrowserSession, ErrorArtifact, ExistingForm, FormDetection, FormTarget,
    JsExecutor, SessionFactory,
};
use async_trait::async_trait;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Browser;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// "Dispenser #3", "Disp 3/4", "Pump 12 - Diesel"
static LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:dispenser|disp|pump|fp)\s*#?\s*(\d+)").expect("label pattern is valid")
});

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const ELEMENT_WAIT: Duration = Duration::from_secs(10);

/// How a listed form element is identified. Detection and opening must
/// agree on it, or a detected form can't be opened again.
const FORM_ID_OF_EL: &str = "(el.getAttribute('data-form-id') || el.id || '')";

/// Lists form entries and whether a new form can be added
fn detect_forms_script(list_selector: &str, create_selector: &str) -> String {
    format!(
        r#"(() => {{
            const forms = Array.from(document.querySelectorAll({list})).map(el => ({{
                formId: {form_id},
                label: (el.innerText || '').trim().slice(0, 200),
            }}));
            return {{ forms, canCreate: !!document.querySelector({create}) }};
        }})()"#,
        list = js_string(list_selector),
        form_id = FORM_ID_OF_EL,
        create = js_string(create_selector),
    )
}

/// Clicks the edit link of the listed form with `form_id`, or the entry
/// itself when it has none
fn open_existing_form_script(list_selector: &str, edit_link_selector: &str, form_id: &str) -> String {
    format!(
        r#"(() => {{
            const el = Array.from(document.querySelectorAll({list})).find(el => {form_id_of} === {id});
            if (!el) return false;
            const target = el.querySelector({edit}) || el;
            target.scrollIntoView({{ block: 'center' }});
            target.click();
            return true;
        }})()"#,
        list = js_string(list_selector),
        form_id_of = FORM_ID_OF_EL,
        id = js_string(form_id),
        edit = js_string(edit_link_selector),
    )
}

/// Dispenser number named in a form label
pub fn dispenser_number_from_label(label: &str) -> Option<u32> {
    LABEL_RE
        .captures(label)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawForm {
    form_id: String,
    label: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDetection {
    forms: Vec<RawForm>,
    can_create: bool,
}

/// One browser tab driven over CDP
pub struct ChromeSession {
    browser: Mutex<Browser>,
    executor: JsExecutor,
    login_url: String,
    selectors: PlatformSelectors,
    /// Launched by us, so `close` also shuts the process down
    owns_browser: bool,
}

impl ChromeSession {
    pub fn new(
        browser: Browser,
        executor: JsExecutor,
        login_url: impl Into<String>,
        selectors: PlatformSelectors,
        owns_browser: bool,
    ) -> Self {
        Self {
            browser: Mutex::new(browser),
            executor,
            login_url: login_url.into(),
            selectors,
            owns_browser,
        }
    }

    async fn goto(&self, url: &str) -> AppResult<()> {
        self.executor.page().goto(url).await.map_err(|e| {
            let message = e.to_string();
            if message.to_lowercase().contains("timeout") {
                return AppError::timeout("navigation", 0);
            }
            BrowserError::NavigationFailed {
                url: url.to_string(),
                message,
            }
            .into()
        })?;
        Ok(())
    }

    async fn on_login_page(&self) -> AppResult<bool> {
        let url = self.executor.current_url().await?;
        Ok(url.contains(&self.selectors.login_path_marker))
    }

    async fn exists(&self, selector: &str) -> AppResult<bool> {
        self.executor
            .eval_as::<bool>(format!("!!document.querySelector({})", js_string(selector)))
            .await
    }

    /// Poll until `selector` matches or the wait runs out
    async fn wait_for(&self, selector: &str) -> AppResult<()> {
        let deadline = Instant::now() + ELEMENT_WAIT;
        loop {
            if self.exists(selector).await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AppError::element_missing(selector));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn click(&self, selector: &str) -> AppResult<()> {
        let clicked: bool = self
            .executor
            .eval_as(format!(
                r#"(() => {{
                    const el = document.querySelector({sel});
                    if (!el) return false;
                    el.scrollIntoView({{ block: 'center' }});
                    el.click();
                    return true;
                }})()"#,
                sel = js_string(selector)
            ))
            .await?;
        if !clicked {
            return Err(AppError::element_missing(selector));
        }
        Ok(())
    }

    /// Text of the platform's error banner, if one is showing
    async fn error_banner(&self) -> AppResult<Option<String>> {
        let text: String = self
            .executor
            .eval_as(format!(
                r#"(() => {{
                    const el = document.querySelector({sel});
                    return el && el.offsetParent !== null ? (el.innerText || '').trim() : '';
                }})()"#,
                sel = js_string(&self.selectors.error_banner)
            ))
            .await?;
        Ok(Some(text).filter(|t| !t.is_empty()))
    }

    async fn wait_for_page_load(&self) -> AppResult<()> {
        if let Err(e) = self.executor.page().wait_for_navigation().await {
            debug!("wait_for_navigation: {}", e);
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn login(&mut self, credentials: &Credentials) -> AppResult<()> {
        if credentials.is_empty() {
            return Err(AuthError::MissingCredentials.into());
        }

        let login_url = self.login_url.clone();
        self.goto(&login_url).await?;
        if !self.on_login_page().await? {
            debug!("already signed in");
            return Ok(());
        }

        self.wait_for(&self.selectors.login_email).await?;
        let filled: bool = self
            .executor
            .eval_as(format!(
                r#"(() => {{
                    const set = (sel, value) => {{
                        const el = document.querySelector(sel);
                        if (!el) return false;
                        el.focus();
                        el.value = value;
                        el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                        el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                        return true;
                    }};
                    return set({email_sel}, {email}) && set({pass_sel}, {pass});
                }})()"#,
                email_sel = js_string(&self.selectors.login_email),
                email = js_string(&credentials.username),
                pass_sel = js_string(&self.selectors.login_password),
                pass = js_string(&credentials.password),
            ))
            .await?;
        if !filled {
            return Err(AppError::element_missing(&self.selectors.login_password));
        }

        self.click(&self.selectors.login_submit).await?;
        self.wait_for_page_load().await?;

        if self.on_login_page().await? {
            if let Some(banner) = self.error_banner().await? {
                warn!("login rejected: {}", banner);
            }
            return Err(AuthError::LoginRejected { url: login_url }.into());
        }
        info!("✓ signed in as {}", credentials.username);
        Ok(())
    }

    async fn navigate(&mut self, url: &str) -> AppResult<()> {
        self.goto(url).await?;
        if self.on_login_page().await? {
            return Err(AuthError::SessionExpired {
                url: url.to_string(),
            }
            .into());
        }
        debug!("navigated to {}", url);
        Ok(())
    }

    async fn reload(&mut self) -> AppResult<()> {
        self.executor.eval("location.reload(); true").await?;
        self.wait_for_page_load().await
    }

    async fn detect_forms(&mut self) -> AppResult<FormDetection> {
        let raw: RawDetection = self
            .executor
            .eval_as(detect_forms_script(
                &self.selectors.form_list_item,
                &self.selectors.create_form_button,
            ))
            .await?;

        let existing_forms = raw
            .forms
            .into_iter()
            .filter(|f| !f.form_id.is_empty())
            .map(|f| ExistingForm {
                dispenser_number: dispenser_number_from_label(&f.label),
                form_id: f.form_id,
                label: f.label,
            })
            .collect::<Vec<_>>();
        let creation_affordances = if raw.can_create {
            vec![self.selectors.create_form_button.clone()]
        } else {
            Vec::new()
        };

        debug!(
            "detected {} forms, can create: {}",
            existing_forms.len(),
            raw.can_create
        );
        Ok(FormDetection {
            existing_forms,
            creation_affordances,
        })
    }

    async fn open_form(&mut self, target: &FormTarget) -> AppResult<()> {
        match target {
            FormTarget::Existing { form_id } => {
                let opened: bool = self
                    .executor
                    .eval_as(open_existing_form_script(
                        &self.selectors.form_list_item,
                        &self.selectors.form_edit_link,
                        form_id,
                    ))
                    .await?;
                if !opened {
                    return Err(AppError::element_missing(format!(
                        "{} with form id {}",
                        self.selectors.form_list_item, form_id
                    )));
                }
            }
            FormTarget::Create { dispenser } => {
                if !self.exists(&self.selectors.create_form_button).await? {
                    return Err(FormError::NoCreationAffordance {
                        dispenser: *dispenser,
                    }
                    .into());
                }
                self.click(&self.selectors.create_form_button).await?;
                self.wait_for(&self.selectors.dispenser_select).await?;

                let picked: bool = self
                    .executor
                    .eval_as(format!(
                        r#"(() => {{
                            const select = document.querySelector({sel});
                            if (!select) return false;
                            const re = new RegExp('(^|\\D){n}(\\D|$)');
                            const opt = Array.from(select.options).find(o => re.test(o.text) || o.value === '{n}');
                            if (!opt) return false;
                            select.value = opt.value;
                            select.dispatchEvent(new Event('change', {{ bubbles: true }}));
                            return true;
                        }})()"#,
                        sel = js_string(&self.selectors.dispenser_select),
                        n = dispenser
                    ))
                    .await?;
                if !picked {
                    return Err(AppError::element_missing(format!(
                        "{} option for dispenser {}",
                        self.selectors.dispenser_select, dispenser
                    )));
                }
            }
        }
        self.wait_for(&self.selectors.save_form_button).await
    }

    async fn fill_step(&mut self, field_selector: &str, value: &str) -> AppResult<()> {
        let status: String = self
            .executor
            .eval_as(format!(
                r#"(() => {{
                    const el = document.querySelector({sel});
                    if (!el) return 'missing';
                    if (!el.isConnected) return 'stale';
                    const want = {value}.toLowerCase();
                    const fire = (t) => t.dispatchEvent(new Event('change', {{ bubbles: true }}));
                    if (el.tagName === 'SELECT') {{
                        const opt = Array.from(el.options).find(o =>
                            o.value.toLowerCase() === want || o.text.trim().toLowerCase() === want);
                        if (!opt) return 'no-option';
                        el.value = opt.value;
                        fire(el);
                        return 'ok';
                    }}
                    const radio = el.querySelector('input[type=radio][value="' + {value} + '" i]');
                    if (radio) {{ radio.click(); return 'ok'; }}
                    if (el.type === 'checkbox') {{
                        if (!el.checked) el.click();
                        return 'ok';
                    }}
                    el.value = {value};
                    el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                    fire(el);
                    return 'ok';
                }})()"#,
                sel = js_string(field_selector),
                value = js_string(value)
            ))
            .await?;

        match status.as_str() {
            "ok" => Ok(()),
            "stale" => Err(FormError::StaleElement {
                selector: field_selector.to_string(),
            }
            .into()),
            "no-option" => Err(AppError::element_missing(format!(
                "{} option '{}'",
                field_selector, value
            ))),
            _ => Err(AppError::element_missing(field_selector)),
        }
    }

    async fn save_form(&mut self) -> AppResult<()> {
        self.click(&self.selectors.save_form_button).await?;

        let deadline = Instant::now() + ELEMENT_WAIT;
        loop {
            sleep(POLL_INTERVAL).await;
            if let Some(message) = self.error_banner().await? {
                return Err(FormError::SubmitRejected { message }.into());
            }
            if !self.exists(&self.selectors.save_form_button).await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(AppError::timeout("save form", ELEMENT_WAIT.as_millis() as u64));
            }
        }
    }

    async fn submit(&mut self) -> AppResult<()> {
        self.wait_for(&self.selectors.submit_visit_button).await?;
        self.click(&self.selectors.submit_visit_button).await?;
        sleep(Duration::from_millis(500)).await;

        if let Some(message) = self.error_banner().await? {
            return Err(FormError::SubmitRejected { message }.into());
        }
        if self.on_login_page().await? {
            return Err(AuthError::SessionExpired {
                url: self.executor.current_url().await?,
            }
            .into());
        }
        Ok(())
    }

    async fn capture_artifact(&mut self) -> ErrorArtifact {
        let page = self.executor.page();
        let screenshot = match page
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await
        {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("screenshot failed: {}", e);
                None
            }
        };
        let dom_snapshot = match page.content().await {
            Ok(html) => Some(html),
            Err(e) => {
                warn!("DOM snapshot failed: {}", e);
                None
            }
        };
        ErrorArtifact {
            screenshot,
            dom_snapshot,
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.executor.page().clone().close().await {
            debug!("page close: {}", e);
        }
        if self.owns_browser {
            let browser = self.browser.get_mut();
            if let Err(e) = browser.close().await {
                debug!("browser close: {}", e);
            }
            let _ = browser.wait().await;
        }
    }
}

/// Opens [`ChromeSession`]s according to the configured browser mode
#[derive(Debug, Clone)]
pub struct ChromeSessionFactory {
    mode: BrowserMode,
    login_url: String,
    selectors: PlatformSelectors,
}

impl ChromeSessionFactory {
    pub fn new(mode: BrowserMode, login_url: impl Into<String>, selectors: PlatformSelectors) -> Self {
        Self {
            mode,
            login_url: login_url.into(),
            selectors,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.browser_mode.clone(),
            config.login_url.clone(),
            config.selectors.clone(),
        )
    }
}

#[async_trait]
impl SessionFactory for ChromeSessionFactory {
    async fn open(&self) -> AppResult<Box<dyn BrowserSession>> {
        let (browser, owns_browser) = match &self.mode {
            BrowserMode::Connect { port } => (connect_to_browser(*port).await?, false),
            BrowserMode::Headless { executable } => {
                (launch_headless_browser(executable.as_deref()).await?, true)
            }
        };
        let page = new_blank_page(&browser).await?;

        Ok(Box::new(ChromeSession::new(
            browser,
            JsExecutor::new(page),
            self.login_url.clone(),
            self.selectors.clone(),
            owns_browser,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_dispenser_number_from_labels() {
        assert_eq!(dispenser_number_from_label("Dispenser #3 - Regular/Plus"), Some(3));
        assert_eq!(dispenser_number_from_label("PUMP 12"), Some(12));
        assert_eq!(dispenser_number_from_label("Disp 4/5"), Some(4));
        assert_eq!(dispenser_number_from_label("Meter calibration"), None);
    }

    #[test]
    fn forms_are_opened_by_the_id_detection_reports() {
        let detect = detect_forms_script(".form-entry", "button.add-form");
        let open = open_existing_form_script(".form-entry", "a.edit-form", "f9");
        // an entry found through its plain `id` must be found again
        assert!(detect.contains(FORM_ID_OF_EL));
        assert!(open.contains(&format!("{} === \"f9\"", FORM_ID_OF_EL)));
        assert!(!open.contains("[data-form-id="));
        assert!(open.contains("\"a.edit-form\""));
    }

    #[test]
    fn form_ids_are_quoted_for_js() {
        let open = open_existing_form_script(".form-entry", "a.edit-form", "f\"9");
        assert!(open.contains(r#"=== "f\"9""#));
    }

    #[tokio::test]
    #[ignore] // needs Chrome with --remote-debugging-port=2001
    async fn opens_a_session_against_a_running_browser() {
        let _ = tracing_subscriber::fmt::try_init();
        let factory = ChromeSessionFactory::new(
            BrowserMode::Connect { port: 2001 },
            "about:blank",
            PlatformSelectors::default(),
        );
        let mut session = factory.open().await.unwrap();
        session.navigate("about:blank").await.unwrap();
        let detection = session.detect_forms().await.unwrap();
        assert!(detection.existing_forms.is_empty());
        session.close().await;
    }
}
