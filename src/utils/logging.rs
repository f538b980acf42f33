//! Logging helpers
//!
//! Subscriber setup plus the banner-style lines the binary prints around a
//! batch run.

use crate::config::{BrowserMode, Config};
use crate::models::batch::BatchResult;
use anyhow::Result;
use std::fs::{self, OpenOptions};
use std::io::Write;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over `verbose`.
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},chromiumoxide=warn", default_level)));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// (Re)create the run log with a timestamped header
pub fn init_log_file(log_file_path: &str) -> Result<()> {
    let log_header = format!(
        "{}\nDispenser form automation log - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)?;
    Ok(())
}

/// Append the batch outcome to the run log
pub fn append_run_summary(log_file_path: &str, result: &BatchResult) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path)?;

    writeln!(file, "batch: {}", result.batch_id)?;
    writeln!(file, "finished: {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"))?;
    writeln!(file, "completed ({}):", result.completed_visit_ids.len())?;
    for id in &result.completed_visit_ids {
        writeln!(file, "  ✅ {}", id)?;
    }
    writeln!(file, "failed ({}):", result.failed_visit_ids.len())?;
    for id in &result.failed_visit_ids {
        writeln!(file, "  ❌ {}", id)?;
    }
    if !result.skipped_visit_ids.is_empty() {
        writeln!(file, "skipped from checkpoint: {}", result.skipped_visit_ids.len())?;
    }
    if result.aborted_early {
        writeln!(file, "⚠️ batch aborted early")?;
    }
    Ok(())
}

pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 dispenser form automation starting");
    match &config.browser_mode {
        BrowserMode::Connect { port } => info!("🌐 browser: attach to debug port {}", port),
        BrowserMode::Headless { executable } => info!(
            "🌐 browser: headless ({})",
            executable.as_deref().unwrap_or("auto-detected")
        ),
    }
    info!(
        "⏱️ timeout per visit: {}s, delay between visits: {}ms",
        config.batch.timeout_per_visit.as_secs(),
        config.batch.delay_between_visits.as_millis()
    );
    if let Some(id) = &config.batch.resume_from_batch_id {
        info!("↩️ resuming from batch {}", id);
    }
    info!("{}", "=".repeat(60));
}

pub fn log_visits_loaded(total: usize) {
    info!("✓ found {} visits to process", total);
    info!("💡 visits run one at a time\n");
}

pub fn log_batch_start(batch_id: &str, pending: usize, skipped: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📦 batch {}", batch_id);
    info!("📄 {} visits pending, {} already done", pending, skipped);
    info!("{}", "=".repeat(60));
}

pub fn log_batch_complete(result: &BatchResult) {
    info!("\n{}", "─".repeat(60));
    info!(
        "✓ batch {} finished: {} completed, {} failed{}",
        result.batch_id,
        result.completed_visit_ids.len(),
        result.failed_visit_ids.len(),
        if result.aborted_early { " (aborted early)" } else { "" }
    );
    info!("{}", "─".repeat(60));
}

pub fn print_final_stats(result: &BatchResult, total: usize, log_file_path: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📊 run summary");
    info!(
        "finished at: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ completed: {}/{}", result.completed_visit_ids.len(), total);
    info!("❌ failed: {}", result.failed_visit_ids.len());
    if !result.skipped_visit_ids.is_empty() {
        info!("↩️ skipped (already done): {}", result.skipped_visit_ids.len());
    }
    for id in &result.failed_visit_ids {
        info!("   - {}", truncate_text(id, 60));
    }
    info!("{}", "=".repeat(60));
    info!("\nlog saved to: {}", log_file_path);
}

/// Shorten long text for log lines
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::batch::BatchId;

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_text("Dispenser №12", 11), "Dispenser №...");
        assert_eq!(truncate_text("short", 10), "short");
    }

    #[test]
    fn log_file_gets_header_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.txt");
        let path = path.to_str().unwrap();

        init_log_file(path).unwrap();
        let result = BatchResult {
            batch_id: BatchId::from("b-1"),
            completed_visit_ids: vec!["v1".into()],
            failed_visit_ids: vec!["v2".into()],
            skipped_visit_ids: vec![],
            aborted_early: true,
        };
        append_run_summary(path, &result).unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.starts_with(&"=".repeat(60)));
        assert!(content.contains("batch: b-1"));
        assert!(content.contains("❌ v2"));
        assert!(content.contains("aborted early"));
    }
}
