use crate::error::{AppError, AppResult, BrowserError};
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info};

/// Attach to a browser started with `--remote-debugging-port=<port>`
pub async fn connect_to_browser(port: u16) -> AppResult<Browser> {
    let browser_url = format!("http://localhost:{}", port);
    info!("connecting to browser: {}", browser_url);

    let (browser, mut handler) = Browser::connect(&browser_url).await.map_err(|e| {
        error!("browser connection failed: {}", e);
        AppError::browser_connection_failed(port, e)
    })?;
    debug!("browser connected");

    // drain CDP events in the background
    tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    // let the target list settle
    sleep(Duration::from_millis(300)).await;

    Ok(browser)
}

/// Open a fresh tab for one session
pub async fn new_blank_page(browser: &Browser) -> AppResult<Page> {
    browser.new_page("about:blank").await.map_err(|e| {
        error!("cannot create page: {}", e);
        BrowserError::PageCreationFailed {
            message: e.to_string(),
        }
        .into()
    })
}
