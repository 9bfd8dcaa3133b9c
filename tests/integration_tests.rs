//! Integration tests for the phaseguard CLI
//!
//! These drive the binary end to end against temporary project directories.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use tempfile::TempDir;

/// Helper to create a phaseguard Command rooted at `dir`
fn phaseguard(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("phaseguard");
    cmd.env_remove("PHASEGUARD_STATE_DIR")
        .env_remove("RUST_LOG")
        .env_remove("PHASEGUARD_LOG_FORMAT")
        .arg("--project-dir")
        .arg(dir.path());
    cmd
}

fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

fn write_config(dir: &TempDir, content: &str) {
    fs::create_dir_all(dir.path().join(".phaseguard")).unwrap();
    fs::write(dir.path().join(".phaseguard/phaseguard.toml"), content).unwrap();
}

fn state_file(dir: &TempDir, issue: &str) -> std::path::PathBuf {
    dir.path()
        .join(".phaseguard/state")
        .join(format!("issue-{}.json", issue))
}

/// Run a command expected to succeed and parse its stdout as JSON.
fn json_output(cmd: &mut Command) -> Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).unwrap()
}

/// Run a command expected to fail with `code` and parse its stdout JSON report.
fn json_failure(cmd: &mut Command, code: i32) -> Value {
    let output = cmd.assert().code(code).get_output().stdout.clone();
    serde_json::from_slice(&output).unwrap()
}

fn start_and_complete(dir: &TempDir, issue: &str, phase: &str, outputs: &str) {
    phaseguard(dir).args(["start", issue, phase]).assert().success();
    phaseguard(dir)
        .args(["complete", issue, phase, "--outputs", outputs])
        .assert()
        .success();
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        cargo_bin_cmd!("phaseguard").arg("--help").assert().success();
    }

    #[test]
    fn test_version() {
        cargo_bin_cmd!("phaseguard").arg("--version").assert().success();
    }

    #[test]
    fn test_invalid_phase_rejected() {
        let dir = create_temp_project();
        phaseguard(&dir)
            .args(["start", "42", "deploy"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid phase 'deploy'"));
    }

    #[test]
    fn test_invalid_issue_id_rejected() {
        let dir = create_temp_project();
        phaseguard(&dir)
            .args(["resume", "../etc"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid issue id"));
    }
}

// =============================================================================
// Phase lifecycle
// =============================================================================

mod lifecycle {
    use super::*;

    #[test]
    fn test_fresh_issue_resumes_at_investigation() {
        let dir = create_temp_project();
        phaseguard(&dir)
            .args(["resume", "42"])
            .assert()
            .success()
            .stdout("0 Investigation\n");
        assert!(!state_file(&dir, "42").exists());
    }

    #[test]
    fn test_start_prints_handle_and_persists_state() {
        let dir = create_temp_project();
        let handle = json_output(phaseguard(&dir).args(["start", "42", "investigation", "--agent", "scout"]));
        assert_eq!(handle["issue_id"], "42");
        assert_eq!(handle["phase"], 0);
        assert!(handle["started_at"].is_string());

        let state: Value = serde_json::from_str(&fs::read_to_string(state_file(&dir, "42")).unwrap()).unwrap();
        assert_eq!(state["schema"], "phaseguard/workflow-state");
        assert_eq!(state["phase_records"][0]["status"], "in_progress");
        assert_eq!(state["phase_records"][0]["agent_type"], "scout");
    }

    #[test]
    fn test_full_pipeline() {
        let dir = create_temp_project();
        start_and_complete(&dir, "7", "0", r#"{"findings": "watcher race"}"#);
        start_and_complete(&dir, "7", "1", r#"{"plan": ["lock", "test"]}"#);
        start_and_complete(&dir, "7", "2", r#"{"branchName": "fix-7", "commitsMade": 2}"#);
        start_and_complete(&dir, "7", "3", r#"{"testsPassed": true}"#);
        start_and_complete(&dir, "7", "4", r#"{"prUrl": "https://example.test/pr/7"}"#);

        phaseguard(&dir)
            .args(["resume", "7"])
            .assert()
            .success()
            .stdout("5 Monitoring\n");

        phaseguard(&dir).args(["start", "7", "monitoring"]).assert().success();
        let summary = json_output(phaseguard(&dir).args([
            "complete",
            "7",
            "monitoring",
            "--outputs",
            r#"{"monitoringComplete": true}"#,
        ]));
        assert_eq!(summary["status"], "completed");
        assert_eq!(summary["current_phase"], 6);
        assert!(summary["next_phase"].is_null());

        phaseguard(&dir)
            .args(["resume", "7"])
            .assert()
            .success()
            .stdout("done\n");
    }

    #[test]
    fn test_out_of_order_start_reports_unmet_phase() {
        let dir = create_temp_project();
        start_and_complete(&dir, "5", "0", r#"{"findings": "x"}"#);
        let before = fs::read_to_string(state_file(&dir, "5")).unwrap();

        let report = json_failure(phaseguard(&dir).args(["start", "5", "implementation"]), 2);
        assert_eq!(report["error"], "prerequisite_not_met");
        assert!(
            report["errors"][0]
                .as_str()
                .unwrap()
                .contains("phase 1 (Planning)")
        );

        assert_eq!(fs::read_to_string(state_file(&dir, "5")).unwrap(), before);
    }

    #[test]
    fn test_missing_output_marks_phase_failed() {
        let dir = create_temp_project();
        start_and_complete(&dir, "9", "0", r#"{"findings": "x"}"#);
        start_and_complete(&dir, "9", "1", r#"{"plan": "y"}"#);
        phaseguard(&dir).args(["start", "9", "2"]).assert().success();

        let report = json_failure(
            phaseguard(&dir).args(["complete", "9", "2", "--outputs", r#"{"branchName": "fix-9"}"#]),
            2,
        );
        assert_eq!(report["error"], "output_validation");
        let errors = report["errors"].as_array().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].as_str().unwrap().contains("commitsMade"));

        let state = json_output(phaseguard(&dir).args(["status", "9", "--json"]));
        assert_eq!(state["current_phase"], 2);
        let records = state["phase_records"].as_array().unwrap();
        assert_eq!(records[1]["status"], "completed");
        assert_eq!(records[2]["status"], "failed");
        assert_eq!(records[2]["outputs"]["branchName"], "fix-9");
    }

    #[test]
    fn test_double_start_is_conflict() {
        let dir = create_temp_project();
        phaseguard(&dir).args(["start", "4", "0"]).assert().success();
        let report = json_failure(phaseguard(&dir).args(["start", "4", "0"]), 3);
        assert_eq!(report["error"], "concurrent_execution");
        assert_eq!(report["timeout_secs"], 60);
    }

    #[test]
    fn test_complete_with_wrong_started_at_is_stale() {
        let dir = create_temp_project();
        phaseguard(&dir).args(["start", "11", "0"]).assert().success();
        let report = json_failure(
            phaseguard(&dir).args([
                "complete",
                "11",
                "0",
                "--started-at",
                "2020-01-01T00:00:00Z",
                "--outputs",
                r#"{"findings": "late"}"#,
            ]),
            3,
        );
        assert_eq!(report["error"], "stale_handle");
    }

    #[test]
    fn test_complete_with_handle_started_at() {
        let dir = create_temp_project();
        let handle = json_output(phaseguard(&dir).args(["start", "12", "0"]));
        let started_at = handle["started_at"].as_str().unwrap().to_string();
        phaseguard(&dir)
            .args(["complete", "12", "0", "--started-at", &started_at])
            .args(["--outputs", r#"{"findings": "on time"}"#])
            .assert()
            .success();
    }

    #[test]
    fn test_complete_without_attempt_is_stale() {
        let dir = create_temp_project();
        let report = json_failure(
            phaseguard(&dir).args(["complete", "13", "0", "--outputs", r#"{"findings": "x"}"#]),
            3,
        );
        assert!(report["message"].as_str().unwrap().contains("no attempt is in progress"));
    }

    #[test]
    fn test_outputs_file() {
        let dir = create_temp_project();
        let outputs = dir.path().join("outputs.json");
        fs::write(&outputs, r#"{"findings": "from file"}"#).unwrap();
        phaseguard(&dir).args(["start", "14", "0"]).assert().success();
        phaseguard(&dir)
            .args(["complete", "14", "0", "--outputs-file"])
            .arg(&outputs)
            .assert()
            .success();
    }
}

// =============================================================================
// Skipping
// =============================================================================

mod skipping {
    use super::*;

    #[test]
    fn test_skip_investigation() {
        let dir = create_temp_project();
        let summary = json_output(phaseguard(&dir).args(["skip", "20", "investigation"]));
        assert_eq!(summary["status"], "skipped");
        assert_eq!(summary["current_phase"], 1);

        phaseguard(&dir)
            .args(["resume", "20"])
            .assert()
            .success()
            .stdout("1 Planning\n");
        phaseguard(&dir).args(["start", "20", "planning"]).assert().success();
    }

    #[test]
    fn test_skip_non_skippable_phase_rejected() {
        let dir = create_temp_project();
        start_and_complete(&dir, "21", "0", r#"{"findings": "x"}"#);
        let report = json_failure(phaseguard(&dir).args(["skip", "21", "planning"]), 2);
        assert!(report["errors"][0].as_str().unwrap().contains("not skippable"));
    }
}

// =============================================================================
// Status, phases, reset
// =============================================================================

mod inspection {
    use super::*;

    #[test]
    fn test_status_without_state() {
        let dir = create_temp_project();
        phaseguard(&dir)
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("No workflow state found"));
    }

    #[test]
    fn test_status_lists_issues() {
        let dir = create_temp_project();
        start_and_complete(&dir, "30", "0", r#"{"findings": "x"}"#);
        phaseguard(&dir).args(["skip", "31", "0"]).assert().success();

        let rows = json_output(phaseguard(&dir).args(["status", "--json"]));
        let rows = rows.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["issue_id"], "30");
        assert_eq!(rows[0]["next_phase"], 1);

        phaseguard(&dir)
            .args(["status", "30"])
            .assert()
            .success()
            .stdout(predicate::str::contains("1 (Planning)"))
            .stdout(predicate::str::contains("completed"));
    }

    #[test]
    fn test_phases_table() {
        let dir = create_temp_project();
        phaseguard(&dir)
            .arg("phases")
            .assert()
            .success()
            .stdout(predicate::str::contains("3 (Validation)"))
            .stdout(predicate::str::contains("900s"))
            .stdout(predicate::str::contains("commitsMade"));
    }

    #[test]
    fn test_phases_json_reflects_overrides() {
        let dir = create_temp_project();
        write_config(&dir, "[phases.validation]\ntimeout_secs = 1800\n");
        let defs = json_output(phaseguard(&dir).args(["phases", "--json"]));
        assert_eq!(defs[3]["timeout_secs"], 1800);
        assert_eq!(defs[0]["skippable"], true);
    }

    #[test]
    fn test_corrupt_state_then_reset() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".phaseguard/state")).unwrap();
        fs::write(state_file(&dir, "40"), "{ truncated").unwrap();

        let report = json_failure(phaseguard(&dir).args(["start", "40", "0"]), 4);
        assert_eq!(report["error"], "state_corruption");
        assert_eq!(fs::read_to_string(state_file(&dir, "40")).unwrap(), "{ truncated");

        phaseguard(&dir)
            .args(["reset", "40", "--force"])
            .assert()
            .success()
            .stdout(predicate::str::contains("state moved to"));
        assert!(!state_file(&dir, "40").exists());

        phaseguard(&dir)
            .args(["resume", "40"])
            .assert()
            .success()
            .stdout("0 Investigation\n");
    }

    #[test]
    fn test_reset_unknown_issue() {
        let dir = create_temp_project();
        phaseguard(&dir)
            .args(["reset", "41", "--force"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No state recorded"));
    }
}

// =============================================================================
// Configuration
// =============================================================================

mod configuration {
    use super::*;

    #[test]
    fn test_config_show_defaults() {
        let dir = create_temp_project();
        phaseguard(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("using defaults"))
            .stdout(predicate::str::contains("check_timeout_secs = 30"));
    }

    #[test]
    fn test_config_init_creates_toml() {
        let dir = create_temp_project();
        phaseguard(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created"));
        assert!(dir.path().join(".phaseguard/phaseguard.toml").exists());

        phaseguard(&dir).args(["config", "init"]).assert().failure();
        phaseguard(&dir).args(["config", "init", "--force"]).assert().success();
        phaseguard(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid."));
    }

    #[test]
    fn test_config_validate_unregistered_check() {
        let dir = create_temp_project();
        write_config(
            &dir,
            "[phases.delivery]\nprerequisites = [{ kind = \"no_active_attempt\" }, { kind = \"external\", name = \"pr_open\" }]\n",
        );
        phaseguard(&dir)
            .args(["config", "validate"])
            .assert()
            .code(1)
            .stdout(predicate::str::contains("'pr_open' is not registered"));
    }

    #[test]
    fn test_config_unknown_key_is_error() {
        let dir = create_temp_project();
        write_config(&dir, "[engine]\nstate_directory = \"x\"\n");
        phaseguard(&dir)
            .args(["resume", "1"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("Invalid config file"));
    }

    #[test]
    fn test_state_dir_env_and_flag() {
        let dir = create_temp_project();
        let env_dir = dir.path().join("env-state");
        phaseguard(&dir)
            .env("PHASEGUARD_STATE_DIR", &env_dir)
            .args(["start", "50", "0"])
            .assert()
            .success();
        assert!(env_dir.join("issue-50.json").exists());

        phaseguard(&dir)
            .env("PHASEGUARD_STATE_DIR", &env_dir)
            .args(["--state-dir", "flag-state", "start", "51", "0"])
            .assert()
            .success();
        assert!(dir.path().join("flag-state/issue-51.json").exists());
        assert!(!env_dir.join("issue-51.json").exists());
    }
}

// =============================================================================
// External checks
// =============================================================================

mod external_checks {
    use super::*;

    const CHECKED_CONFIG: &str = r#"
[phases.investigation]
prerequisites = [{ kind = "no_active_attempt" }, { kind = "external", name = "issue_reachable" }]

[checks.issue_reachable]
command = "test -f reachable-$PHASEGUARD_ISSUE || { echo \"issue $PHASEGUARD_ISSUE not found\" >&2; exit 1; }"
"#;

    #[test]
    fn test_failing_check_blocks_start() {
        let dir = create_temp_project();
        write_config(&dir, CHECKED_CONFIG);

        let report = json_failure(phaseguard(&dir).args(["start", "60", "0"]), 2);
        assert!(
            report["errors"][0]
                .as_str()
                .unwrap()
                .contains("issue 60 not found")
        );
        assert!(!state_file(&dir, "60").exists());

        fs::write(dir.path().join("reachable-60"), "").unwrap();
        phaseguard(&dir).args(["start", "60", "0"]).assert().success();
    }

    #[test]
    fn test_slow_check_times_out() {
        let dir = create_temp_project();
        write_config(
            &dir,
            r#"
[phases.investigation]
prerequisites = [{ kind = "external", name = "slow" }]

[checks.slow]
command = "sleep 10"
timeout_secs = 1
"#,
        );
        let report = json_failure(phaseguard(&dir).args(["start", "61", "0"]), 2);
        assert!(report["errors"][0].as_str().unwrap().contains("timed out"));
    }
}

// =============================================================================
// Consultation
// =============================================================================

mod consultation {
    use super::*;

    const SPECIALIST_CONFIG: &str = r#"
[specialists.security]
command = "printf '{\"summary\": \"no secrets in %s\", \"recommendations\": [\"rotate keys\"]}' \"$PHASEGUARD_ISSUE\""

[specialists.broken]
command = "exit 7"
"#;

    #[test]
    fn test_consult_single_specialist() {
        let dir = create_temp_project();
        write_config(&dir, SPECIALIST_CONFIG);
        let bundle = json_output(phaseguard(&dir).args(["consult", "70", "validation", "security"]));
        assert_eq!(bundle["available"], true);
        assert_eq!(bundle["advice"]["summary"], "no secrets in 70");
        assert_eq!(bundle["advice"]["recommendations"][0], "rotate keys");
    }

    #[test]
    fn test_consult_degrades_without_failing() {
        let dir = create_temp_project();
        write_config(&dir, SPECIALIST_CONFIG);
        let bundles = json_output(phaseguard(&dir).args([
            "consult",
            "71",
            "3",
            "broken",
            "missing",
            "security",
        ]));
        let bundles = bundles.as_array().unwrap();
        assert_eq!(bundles.len(), 3);
        assert_eq!(bundles[0]["available"], false);
        assert!(bundles[0]["reason"].as_str().unwrap().contains("exited with code 7"));
        assert_eq!(bundles[1]["available"], false);
        assert_eq!(bundles[2]["available"], true);
        // Consultation never creates or touches workflow state.
        assert!(!state_file(&dir, "71").exists());
    }

    #[test]
    fn test_advice_folded_into_outputs() {
        let dir = create_temp_project();
        write_config(&dir, SPECIALIST_CONFIG);
        let advice = dir.path().join("advice.json");
        let output = phaseguard(&dir)
            .args(["consult", "72", "0", "security"])
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        fs::write(&advice, output).unwrap();

        phaseguard(&dir).args(["start", "72", "0"]).assert().success();
        phaseguard(&dir)
            .args(["complete", "72", "0", "--outputs", r#"{"findings": "x"}"#, "--advice-file"])
            .arg(&advice)
            .assert()
            .success();

        let state = json_output(phaseguard(&dir).args(["status", "72", "--json"]));
        let outputs = &state["phase_records"][0]["outputs"];
        assert_eq!(outputs["advice"]["security"]["summary"], "no secrets in 72");
        assert_eq!(outputs["findings"], "x");
    }

    #[test]
    fn test_advice_file_refuses_to_overwrite_scalar_advice() {
        let dir = create_temp_project();
        write_config(&dir, SPECIALIST_CONFIG);
        let advice = dir.path().join("advice.json");
        let output = phaseguard(&dir)
            .args(["consult", "73", "0", "security"])
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        fs::write(&advice, output).unwrap();

        phaseguard(&dir).args(["start", "73", "0"]).assert().success();
        phaseguard(&dir)
            .args([
                "complete",
                "73",
                "0",
                "--outputs",
                r#"{"findings": "x", "advice": "see review thread"}"#,
                "--advice-file",
            ])
            .arg(&advice)
            .assert()
            .code(1)
            .stderr(predicate::str::contains("non-object value"));

        let state = json_output(phaseguard(&dir).args(["status", "73", "--json"]));
        assert_eq!(state["phase_records"][0]["status"], "in_progress");
    }
}
