use crate::models::work_order::Visit;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Load one visit from a TOML file
pub async fn load_visit(toml_file_path: &Path) -> Result<Visit> {
    let content = fs::read_to_string(toml_file_path)
        .await
        .with_context(|| format!("cannot read visit file: {}", toml_file_path.display()))?;

    let mut visit: Visit = toml::from_str(&content)
        .with_context(|| format!("cannot parse visit file: {}", toml_file_path.display()))?;

    visit.file_path = Some(toml_file_path.to_string_lossy().to_string());

    Ok(visit)
}

/// Load every `*.toml` visit in a folder, sorted by file name.
///
/// Files that fail to parse are logged and skipped; one bad file should
/// not block the rest of the schedule.
pub async fn load_all_visits(folder_path: &str) -> Result<Vec<Visit>> {
    let folder = PathBuf::from(folder_path);

    if !folder.exists() {
        anyhow::bail!("visits folder does not exist: {}", folder_path);
    }

    let mut paths = Vec::new();
    let mut entries = fs::read_dir(&folder)
        .await
        .with_context(|| format!("cannot read folder: {}", folder_path))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut visits = Vec::new();
    for path in paths {
        tracing::info!(
            "loading: {}",
            path.file_name().unwrap_or_default().to_string_lossy()
        );

        match load_visit(&path).await {
            Ok(visit) => {
                tracing::info!(
                    "loaded visit {} ({} dispensers)",
                    visit.visit_id,
                    visit.work_order.dispensers.len()
                );
                visits.push(visit);
            }
            Err(e) => {
                tracing::warn!("skipping {}: {:#}", path.display(), e);
            }
        }
    }

    Ok(visits)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VISIT: &str = r#"
visitId = "V-1"
visitUrl = "https://app.example.com/visits/1"

[workOrder]
id = "W-1"

[[workOrder.serviceCodes]]
code = "2861"
quantity = 1

[[workOrder.dispensers]]
number = 1
fuelGrades = ["Regular"]
"#;

    #[tokio::test]
    async fn loads_sorted_and_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.toml"), VISIT.replace("V-1", "V-2")).unwrap();
        std::fs::write(dir.path().join("a.toml"), VISIT).unwrap();
        std::fs::write(dir.path().join("broken.toml"), "visitId = ").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let visits = load_all_visits(dir.path().to_str().unwrap()).await.unwrap();
        let ids: Vec<_> = visits.iter().map(|v| v.visit_id.as_str()).collect();
        assert_eq!(ids, vec!["V-1", "V-2"]);
        assert!(visits[0].file_path.as_deref().unwrap().ends_with("a.toml"));
    }

    #[tokio::test]
    async fn missing_folder_is_an_error() {
        assert!(load_all_visits("/definitely/not/here").await.is_err());
    }
}
