//! CLI error handling tests for rl-core.
//!
//! These tests verify that invalid arguments, missing schedules and broken
//! configuration produce the documented exit codes and error payloads.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Get a Command for the rl-core binary, isolated in `dir`.
fn rl_core(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("rl-core").expect("rl-core binary should exist");
    cmd.env_remove("RL_CONFIG_DIR")
        .env_remove("RL_DATA")
        .env_remove("RL_LOG_FORMAT")
        .arg("--config-dir")
        .arg(dir.join("config"))
        .arg("--data-dir")
        .arg(dir.join("data"));
    cmd
}

fn with_policies(content: &str) -> TempDir {
    let tmp = tempfile::tempdir().unwrap();
    fs::create_dir_all(tmp.path().join("config")).unwrap();
    fs::write(tmp.path().join("config/policies.json"), content).unwrap();
    tmp
}

fn valid() -> TempDir {
    with_policies(
        &fs::read_to_string(
            Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/policies.json"),
        )
        .unwrap(),
    )
}

// ============================================================================
// Invalid Subcommand Tests
// ============================================================================

mod invalid_subcommand {
    use super::*;

    #[test]
    fn unknown_command_fails() {
        let tmp = valid();
        rl_core(tmp.path())
            .arg("nonexistent-command")
            .assert()
            .failure()
            .stderr(predicate::str::contains("error"));
    }

    #[test]
    fn unknown_hold_subcommand_fails() {
        let tmp = valid();
        rl_core(tmp.path())
            .args(["hold", "nonexistent"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("error"));
    }

    #[test]
    fn hold_without_reason_fails() {
        let tmp = valid();
        rl_core(tmp.path())
            .args(["hold", "apply", "patient:1", "--by", "legal"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--reason"));
    }

    #[test]
    fn malformed_shard_fails() {
        let tmp = valid();
        rl_core(tmp.path())
            .args(["run", "--shard", "3/2"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("error"));
    }

    #[test]
    fn malformed_today_fails() {
        let tmp = valid();
        rl_core(tmp.path())
            .args(["run", "--today", "yesterday"])
            .assert()
            .failure();
    }
}

// ============================================================================
// Invalid Value Tests
// ============================================================================

mod invalid_values {
    use super::*;

    #[test]
    fn invalid_entity_type_filter_is_args_error() {
        let tmp = valid();
        rl_core(tmp.path())
            .args(["run", "--entity-type", "Patient!"])
            .assert()
            .code(10)
            .stderr(predicate::str::contains("ERR_ARGS"));
    }

    #[test]
    fn invalid_status_filter_is_args_error() {
        let tmp = valid();
        rl_core(tmp.path())
            .args(["schedule", "list", "--status", "archived"])
            .assert()
            .code(10);
    }

    #[test]
    fn invalid_entity_reference_is_rejected_by_parser() {
        let tmp = valid();
        rl_core(tmp.path())
            .args(["entity", "created", "no-separator", "--category", "billing"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("type:id"));
    }
}

// ============================================================================
// Not Found Tests
// ============================================================================

mod not_found {
    use super::*;

    #[test]
    fn unknown_schedule_id_exits_12() {
        let tmp = valid();
        rl_core(tmp.path())
            .args(["schedule", "show", "rs-000000000000"])
            .assert()
            .code(12)
            .stderr(predicate::str::contains("ERR_NOT_FOUND"));
    }

    #[test]
    fn unknown_entity_exits_12() {
        let tmp = valid();
        rl_core(tmp.path())
            .args(["approve", "patient:404", "--by", "dpo"])
            .assert()
            .code(12);
    }

    #[test]
    fn unparseable_target_exits_12() {
        let tmp = valid();
        rl_core(tmp.path())
            .args(["hold", "release", "not a target", "--by", "legal"])
            .assert()
            .code(12);
    }

    #[test]
    fn unknown_category_is_config_error() {
        let tmp = valid();
        rl_core(tmp.path())
            .args(["entity", "created", "patient:1", "--category", "unknown"])
            .assert()
            .code(11)
            .stderr(predicate::str::contains("unknown"));
    }
}

// ============================================================================
// Configuration Tests
// ============================================================================

mod configuration {
    use super::*;

    #[test]
    fn malformed_policies_exit_11() {
        let tmp = with_policies("{ not json");
        rl_core(tmp.path())
            .args(["policy", "check"])
            .assert()
            .code(11)
            .stderr(predicate::str::contains("ERR_CONFIG"));
    }

    #[test]
    fn negative_period_exits_11() {
        let tmp = with_policies(
            r#"{"schema_version":"1.0.0","policies":[{"category":"x","version":1,"retention_period":"-5d"}]}"#,
        );
        rl_core(tmp.path()).args(["run"]).assert().code(11);
    }

    #[test]
    fn two_active_versions_exit_11() {
        let tmp = with_policies(
            r#"{"schema_version":"1.0.0","policies":[
                {"category":"x","version":1,"retention_period":"1y"},
                {"category":"x","version":2,"retention_period":"2y"}]}"#,
        );
        rl_core(tmp.path()).args(["policy", "check"]).assert().code(11);
    }

    #[test]
    fn valid_policies_check_passes() {
        let tmp = valid();
        rl_core(tmp.path())
            .args(["policy", "check"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"policy_count\": 3"));
    }

    #[test]
    fn human_errors_without_json() {
        let tmp = with_policies("{ not json");
        rl_core(tmp.path())
            .args(["--format", "summary", "policy", "list"])
            .assert()
            .code(11)
            .stderr(predicate::str::contains("ERR_CONFIG").not());
    }
}

// ============================================================================
// Transition Tests
// ============================================================================

mod transitions {
    use super::*;

    #[test]
    fn duplicate_entity_with_other_category_conflicts() {
        let tmp = valid();
        rl_core(tmp.path())
            .args(["entity", "created", "patient:1", "--category", "medical_records"])
            .assert()
            .success();
        rl_core(tmp.path())
            .args(["entity", "created", "patient:1", "--category", "billing"])
            .assert()
            .code(14)
            .stderr(predicate::str::contains("ERR_CONFLICT"));
    }

    #[test]
    fn releasing_unheld_schedule_is_invalid() {
        let tmp = valid();
        rl_core(tmp.path())
            .args(["entity", "created", "patient:1", "--category", "medical_records"])
            .assert()
            .success();
        rl_core(tmp.path())
            .args(["hold", "release", "patient:1", "--by", "legal"])
            .assert()
            .code(13)
            .stderr(predicate::str::contains("ERR_INVALID_TRANSITION"));
    }
}
