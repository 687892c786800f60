use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;

use super::summary::ImportSummary;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImportReportFile<'a> {
    generated_at: String,
    summary: &'a ImportSummary,
}

/// Persist `summary` as a pretty-printed JSON file under `reports_dir`.
pub fn write_import_report(reports_dir: &Path, summary: &ImportSummary) -> Result<PathBuf> {
    fs::create_dir_all(reports_dir)
        .with_context(|| format!("create reports directory {}", reports_dir.display()))?;

    let now = Utc::now();
    let file_name = format!(
        "{}-{}.json",
        now.format("import-%Y%m%d-%H%M%S"),
        summary.run_id.simple()
    );
    let path = reports_dir.join(file_name);
    let payload = ImportReportFile {
        generated_at: now.to_rfc3339(),
        summary,
    };
    let json = serde_json::to_string_pretty(&payload).context("serialize import report")?;
    fs::write(&path, json).with_context(|| format!("write import report {}", path.display()))?;
    tracing::info!(
        target: "ledgerload",
        event = "import_report_written",
        run_id = %summary.run_id
    );
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use uuid::Uuid;

    #[test]
    fn writes_named_report_with_summary() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("reports");
        let summary = ImportSummary::new(Uuid::now_v7(), 0);

        let path = write_import_report(&dir, &summary).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("import-"));
        assert!(name.ends_with(&format!("{}.json", summary.run_id.simple())));

        let doc: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(doc["generatedAt"].is_string());
        assert_eq!(doc["summary"]["filesDiscovered"], serde_json::json!(0));
        assert_eq!(doc["summary"]["cancelled"], serde_json::json!(false));
    }
}
