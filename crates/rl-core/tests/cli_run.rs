//! End-to-end CLI workflows for rl-core.
//!
//! Each test gets its own config and data directories seeded from
//! tests/fixtures and drives the binary the way a nightly job would.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

struct Workspace {
    tmp: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let config = tmp.path().join("config");
        fs::create_dir_all(&config).unwrap();
        for name in ["policies.json", "retention.toml"] {
            fs::copy(fixtures_dir().join(name), config.join(name)).unwrap();
        }
        Workspace { tmp }
    }

    fn config_dir(&self) -> PathBuf {
        self.tmp.path().join("config")
    }

    fn data_dir(&self) -> PathBuf {
        self.tmp.path().join("data")
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("rl-core").expect("rl-core binary should exist");
        cmd.env_remove("RL_CONFIG_DIR")
            .env_remove("RL_DATA")
            .env_remove("RL_LOG")
            .env_remove("RL_LOG_FORMAT")
            .arg("--config-dir")
            .arg(self.config_dir())
            .arg("--data-dir")
            .arg(self.data_dir());
        cmd
    }

    /// Run a command that must succeed and return its `result` payload.
    fn json(&self, args: &[&str]) -> Value {
        let output = self.cmd().args(args).output().unwrap();
        assert!(
            output.status.success(),
            "{:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        let envelope: Value = serde_json::from_slice(&output.stdout).unwrap();
        envelope["result"].clone()
    }

    fn track(&self, entity: &str, category: &str, date: &str, fixture: &str) -> Value {
        let document = fixtures_dir().join(fixture);
        self.json(&[
            "entity",
            "created",
            entity,
            "--category",
            category,
            "--date",
            date,
            "--document",
            document.to_str().unwrap(),
        ])
    }

    fn run(&self, today: &str) -> Value {
        self.json(&["run", "--today", today])
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

mod lifecycle {
    use super::*;

    #[test]
    fn entity_created_returns_schedule() {
        let ws = Workspace::new();
        let result = ws.track("patient:1", "medical_records", "2005-01-01", "patient.json");

        assert_eq!(result["outcome"], "created");
        let schedule = &result["schedule"];
        assert_eq!(schedule["status"], "active");
        assert_eq!(schedule["policy_id"], "medical_records@v1");
        assert_eq!(schedule["warning_date"], "2024-07-05");
        assert_eq!(schedule["deletion_date"], "2025-04-01");
        assert!(ws.data_dir().join("entities").exists());
    }

    #[test]
    fn full_cycle_deletes_and_verifies() {
        let ws = Workspace::new();
        ws.track("patient:1", "medical_records", "2005-01-01", "patient.json");

        let summary = ws.run("2024-07-05");
        assert_eq!(summary["counts"]["warned"], 1);
        assert_eq!(summary["outcomes"][0]["outcome"], "warned");

        let summary = ws.run("2025-01-01");
        assert_eq!(summary["counts"]["entered_grace"], 1);

        let summary = ws.run("2025-04-01");
        assert_eq!(summary["counts"]["deleted"], 1);
        assert_eq!(summary["counts"]["failed"], 0);

        let schedule = ws.json(&["schedule", "show", "patient:1"]);
        assert_eq!(schedule["status"], "deleted");

        let report = ws.json(&["audit", "verify"]);
        assert_eq!(report["chain"]["is_valid"], true);
        assert_eq!(report["records_checked"], 1);
    }

    #[test]
    fn dry_run_changes_nothing() {
        let ws = Workspace::new();
        ws.track("patient:1", "medical_records", "2005-01-01", "patient.json");

        let summary = ws.json(&["run", "--dry-run", "--today", "2024-07-05"]);
        assert_eq!(summary["dry_run"], true);
        assert_eq!(summary["counts"]["would_warn"], 1);

        let schedule = ws.json(&["schedule", "show", "patient:1"]);
        assert_eq!(schedule["status"], "active");
        assert!(!ws.data_dir().join("outbox").join("warnings.jsonl").exists());
    }

    #[test]
    fn summary_format_prints_counts() {
        let ws = Workspace::new();
        ws.track("patient:1", "medical_records", "2005-01-01", "patient.json");

        ws.cmd()
            .args(["--format", "summary", "run", "--today", "2024-07-05"])
            .assert()
            .success()
            .stdout(predicate::str::contains("advanced=1"))
            .stdout(predicate::str::contains("failed=0"));
    }

    #[test]
    fn md_format_lists_overdue_items() {
        let ws = Workspace::new();
        ws.track("staff_member:3", "staff_records", "2014-01-01", "patient.json");
        ws.run("2023-10-03");

        ws.cmd()
            .args(["--format", "md", "run", "--today", "2024-03-05"])
            .assert()
            .success()
            .stdout(predicate::str::contains("## Overdue pending approval"))
            .stdout(predicate::str::contains("staff_member:3"));
    }

    #[test]
    fn schedule_list_filters_by_category() {
        let ws = Workspace::new();
        ws.track("patient:1", "medical_records", "2005-01-01", "patient.json");
        ws.track("invoice:9", "billing", "2019-03-01", "invoice.json");

        let list = ws.json(&["schedule", "list", "--category", "billing"]);
        assert_eq!(list["count"], 1);
        assert_eq!(list["schedules"][0]["entity"]["entity_id"], "9");
    }
}

// ============================================================================
// Gates
// ============================================================================

mod gates {
    use super::*;

    #[test]
    fn held_schedule_is_skipped() {
        let ws = Workspace::new();
        ws.track("patient:1", "medical_records", "2005-01-01", "patient.json");
        ws.run("2024-07-05");

        let held = ws.json(&[
            "hold", "apply", "patient:1", "--by", "legal@clinic", "--reason", "case 113",
        ]);
        assert_eq!(held["status"], "legal_hold");
        assert_eq!(held["legal_hold_reason"], "case 113");

        let summary = ws.run("2025-06-01");
        assert_eq!(summary["counts"]["skipped_on_hold"], 1);
        assert_eq!(summary["counts"]["deleted"], 0);

        let released = ws.json(&["hold", "release", "patient:1", "--by", "legal@clinic"]);
        assert_eq!(released["status"], "active");
        assert_eq!(released["deletion_date"], "2025-04-01");
    }

    #[test]
    fn approval_unblocks_deletion() {
        let ws = Workspace::new();
        ws.track("staff_member:3", "staff_records", "2014-01-01", "patient.json");
        ws.run("2023-10-03");

        let summary = ws.run("2024-03-05");
        assert_eq!(summary["counts"]["deferred_for_approval"], 1);
        assert_eq!(summary["overdue"][0]["days_overdue"], 4);

        let approved = ws.json(&["approve", "staff_member:3", "--by", "dpo@clinic"]);
        assert_eq!(approved["approved_by"], "dpo@clinic");

        let summary = ws.run("2024-03-06");
        assert_eq!(summary["counts"]["deleted"], 1);
    }

    #[test]
    fn billing_is_anonymized() {
        let ws = Workspace::new();
        ws.track("invoice:9", "billing", "2019-03-01", "invoice.json");
        ws.run("2024-01-31");

        let summary = ws.run("2024-03-31");
        assert_eq!(summary["counts"]["anonymized"], 1);

        let stored =
            fs::read_to_string(ws.data_dir().join("entities/invoice/9.json")).unwrap();
        assert!(!stored.contains("Joao Pereira"));
        assert!(stored.contains("BRL"));
    }

    #[test]
    fn activity_resets_warning() {
        let ws = Workspace::new();
        ws.track("patient:1", "medical_records", "2005-01-01", "patient.json");
        ws.run("2024-07-05");

        let result = ws.json(&["entity", "activity", "patient:1", "--date", "2024-08-01"]);
        assert_eq!(result["outcome"], "updated");
        assert_eq!(result["schedule"]["status"], "active");
        assert_eq!(result["schedule"]["retention_end_date"], "2044-08-01");
    }
}

// ============================================================================
// Audit verification
// ============================================================================

mod audit {
    use super::*;

    #[test]
    fn empty_log_verifies_clean() {
        let ws = Workspace::new();
        ws.cmd().args(["audit", "verify"]).assert().code(0);
    }

    #[test]
    fn tampered_log_exits_15() {
        let ws = Workspace::new();
        ws.track("patient:1", "medical_records", "2005-01-01", "patient.json");
        ws.run("2024-07-05");
        ws.run("2025-04-01");

        let log = ws.data_dir().join("audit").join("audit.jsonl");
        let content = fs::read_to_string(&log).unwrap();
        fs::write(&log, content.replace("J45 asthma", "J45 asthma (edited)")).unwrap();

        ws.cmd()
            .args(["audit", "verify"])
            .assert()
            .code(15)
            .stdout(predicate::str::contains("\"is_valid\": false"));
    }
}
