use super::*;

#[test]
fn report_counts_failures() {
    let report = IndexBuildReport {
        total: 5,
        succeeded: 3,
        skipped: vec![
            ("a".to_string(), "duplicate id".to_string()),
            ("b".to_string(), "Service error: timeout".to_string()),
        ],
    };
    assert_eq!(report.failed(), 2);
    assert_eq!(report.succeeded + report.failed(), report.total);
}
