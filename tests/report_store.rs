//! SQLite report store against a real database file.

use tempfile::TempDir;

use refinery_eye::config::Config;
use refinery_eye::sqlite_store::SqliteReportStore;
use refinery_eye::migrate;
use refinery_eye_core::models::{AnalysisResult, InspectionFinding, NewReport, Severity};
use refinery_eye_core::store::ReportStore;
use refinery_eye_core::InspectError;

async fn open(tmp: &TempDir) -> SqliteReportStore {
    let toml_str = format!(
        r#"
[db]
path = "{}"

[auth]
username = "inspector"
password_hash = "abcd"
salt = "00ff"
"#,
        tmp.path().join("data/reports.sqlite").display()
    );
    let cfg: Config = toml::from_str(&toml_str).unwrap();
    migrate::run_migrations(&cfg).await.unwrap();
    // A second run must be harmless.
    migrate::run_migrations(&cfg).await.unwrap();
    SqliteReportStore::open(&cfg.db.path).await.unwrap()
}

fn finding(n: u32, tag: &str) -> InspectionFinding {
    InspectionFinding {
        serial_no: n,
        timestamp: format!("00:{:02}", n),
        tag_number: tag.to_string(),
        equipment_type: "Pressure Gauge".to_string(),
        fault_type: "Broken Glass".to_string(),
        severity: Severity::Medium,
        corrective_action: "Replace gauge".to_string(),
        remarks: String::new(),
        standard_reference: None,
    }
}

fn new_report(video: &str, findings: Vec<InspectionFinding>) -> NewReport {
    NewReport {
        video_locator: format!("/api/content/videos/{}", video),
        video_file_name: video.to_string(),
        reference_locators: vec!["/api/content/references/a.pdf".to_string()],
        reference_file_names: vec!["a.pdf".to_string()],
        reference_links: vec![],
        result: AnalysisResult {
            summary: Some("Gauges need attention.".to_string()),
            findings,
        },
    }
}

#[tokio::test]
async fn test_findings_order_survives_storage() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;

    let findings = vec![
        finding(3, "PG-103"),
        finding(1, "PG-101"),
        finding(2, "PG-102"),
    ];
    let saved = store
        .append(new_report("a.mp4", findings.clone()), "inspector")
        .await
        .unwrap();

    let loaded = store.get(&saved.id).await.unwrap();
    assert_eq!(loaded, saved);
    let tags: Vec<&str> = loaded
        .result
        .findings
        .iter()
        .map(|f| f.tag_number.as_str())
        .collect();
    assert_eq!(tags, vec!["PG-103", "PG-101", "PG-102"]);
}

#[tokio::test]
async fn test_list_recent_is_newest_first_and_bounded() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;

    for i in 0..7 {
        store
            .append(new_report(&format!("{}.mp4", i), vec![]), "inspector")
            .await
            .unwrap();
    }

    let recent = store.list_recent(5).await.unwrap();
    assert_eq!(recent.len(), 5);
    assert_eq!(recent[0].video_file_name, "6.mp4");
    assert_eq!(recent[4].video_file_name, "2.mp4");
    assert!(recent
        .windows(2)
        .all(|w| w[0].created_at >= w[1].created_at));

    assert_eq!(store.list_recent(50).await.unwrap().len(), 7);
}

#[tokio::test]
async fn test_delete_is_not_found_the_second_time() {
    let tmp = TempDir::new().unwrap();
    let store = open(&tmp).await;

    let saved = store
        .append(new_report("a.mp4", vec![finding(1, "PG-101")]), "inspector")
        .await
        .unwrap();
    store.delete(&saved.id).await.unwrap();

    assert!(matches!(
        store.delete(&saved.id).await,
        Err(InspectError::NotFound { .. })
    ));
    assert!(matches!(
        store.get(&saved.id).await,
        Err(InspectError::NotFound { .. })
    ));
    assert!(store.list_recent(50).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_open_creates_missing_directories_and_keeps_reports() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("nested/deeper/reports.sqlite");

    let store = SqliteReportStore::open(&path).await.unwrap();
    let saved = store
        .append(new_report("a.mp4", vec![finding(1, "PG-101")]), "inspector")
        .await
        .unwrap();
    store.close().await;
    assert!(path.exists());

    let reopened = SqliteReportStore::open(&path).await.unwrap();
    assert_eq!(reopened.get(&saved.id).await.unwrap(), saved);
}
