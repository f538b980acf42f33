use std::path::Path;

use crate::error::{AppResult, BrowserError};
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info};

/// Launch a headless browser. Without an explicit executable chromiumoxide
/// looks for Chrome/Chromium on the PATH.
pub async fn launch_headless_browser(executable: Option<&str>) -> AppResult<Browser> {
    info!("🚀 launching headless browser...");
    debug!("executable: {:?}", executable);

    let mut builder = BrowserConfig::builder().new_headless_mode().args(vec![
        "--disable-gpu",
        "--no-sandbox",
        "--disable-dev-shm-usage",
        "--window-size=1366,900",
    ]);
    if let Some(path) = executable {
        builder = builder.chrome_executable(Path::new(path));
    }

    let config = builder.build().map_err(|e| {
        error!("invalid headless browser config: {}", e);
        BrowserError::LaunchFailed { message: e }
    })?;

    let (browser, mut handler) = Browser::launch(config).await.map_err(|e| {
        error!("headless browser launch failed: {}", e);
        BrowserError::LaunchFailed {
            message: e.to_string(),
        }
    })?;
    debug!("headless browser started");

    tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    sleep(Duration::from_millis(300)).await;

    Ok(browser)
}
