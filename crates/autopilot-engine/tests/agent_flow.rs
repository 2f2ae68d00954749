//! Integration tests for the filing agent.
//!
//! These drive the whole agent (state machine, gate, workflow engine and
//! stores) against the scripted page, from launch to a terminal run.

use autopilot_browser::testing::{PageCall, ScriptedLauncher, ScriptedPage};
use autopilot_browser::{Credentials, SessionController};
use autopilot_core::config::TimeoutConfig;
use autopilot_core::{
    AutopilotConfig, AutopilotError, FilingPeriod, LedgerRecord, NoticeStatus, QuestionKind,
    WorkflowStatus,
};
use autopilot_engine::{
    ActivityLogger, Agent, AgentState, MemoryLedger, MemoryNotificationStore, Role,
    WorkflowRequest,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const DASHBOARD: &str = "https://services.gst.gov.in/services/auth/dashboard";

struct Harness {
    agent: Agent,
    page: ScriptedPage,
    notices: Arc<MemoryNotificationStore>,
    _dir: TempDir,
}

fn test_config(dir: &Path) -> AutopilotConfig {
    let mut config = AutopilotConfig::default();
    config.timeouts = TimeoutConfig {
        action_secs: 0,
        navigation_secs: 0,
        login_detect_secs: 0,
        login_confirm_secs: 0,
        verify_secs: 0,
        poll_interval_ms: 5,
        settle_ms: 0,
        reminder_secs: 1,
    };
    config.browser.screenshot_dir = dir.join("screenshots");
    config
}

fn invoice(no: &str, gstin: Option<&str>, taxable: f64, cgst: f64, sgst: f64) -> LedgerRecord {
    LedgerRecord {
        date: "2025-03-10".to_string(),
        document_no: no.to_string(),
        counterparty: format!("Customer {}", no),
        gstin: gstin.map(String::from),
        taxable_value: taxable,
        igst: 0.0,
        cgst,
        sgst,
        total: taxable + cgst + sgst,
    }
}

fn expense(no: &str, taxable: f64, cgst: f64, sgst: f64) -> LedgerRecord {
    LedgerRecord {
        counterparty: "Supplier".to_string(),
        ..invoice(no, Some("27AAAAA0000A1Z5"), taxable, cgst, sgst)
    }
}

fn sample_ledger() -> MemoryLedger {
    MemoryLedger::new(
        vec![
            invoice("S-1", Some("29ABCDE1234F1Z5"), 1000.0, 90.0, 90.0),
            invoice("S-2", None, 200.0, 18.0, 18.0),
            invoice("S-3", Some("  "), 300.0, 27.0, 27.0),
        ],
        vec![expense("P-1", 500.0, 45.0, 45.0)],
    )
}

fn harness_with(page: ScriptedPage, launcher: ScriptedLauncher) -> Harness {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let session = SessionController::new(Box::new(launcher), &config);
    let notices = Arc::new(MemoryNotificationStore::new());
    let agent = Agent::new(session, Arc::new(sample_ledger()), notices.clone())
        .with_activity_log(ActivityLogger::new(dir.path().join(".autopilot")));
    Harness {
        agent,
        page,
        notices,
        _dir: dir,
    }
}

fn harness() -> Harness {
    let page = ScriptedPage::new();
    harness_with(page.clone(), ScriptedLauncher::new(page))
}

fn credentials() -> Credentials {
    Credentials::new("ACME2026", "hunter2")
}

/// Launched and acknowledged, ready for a workflow
async fn active_harness() -> Harness {
    let mut h = harness();
    h.agent.launch(&credentials()).await.unwrap();
    h.agent.handle_operator_message("done").await.unwrap();
    assert_eq!(h.agent.state(), AgentState::Active);
    h
}

fn march() -> FilingPeriod {
    FilingPeriod::new("2024-25", "March")
}

fn status(h: &Harness) -> WorkflowStatus {
    h.agent.run().map(|r| r.status).unwrap()
}

fn fills(page: &ScriptedPage, selector: &str) -> usize {
    page.calls()
        .iter()
        .filter(|c| matches!(c, PageCall::Fill(s, _) if s == selector))
        .count()
}

#[tokio::test]
async fn test_launch_fills_credentials_and_waits_for_operator() {
    let mut h = harness();

    let message = h.agent.launch(&credentials()).await.unwrap();

    assert!(message.contains("CAPTCHA"));
    assert_eq!(h.agent.state(), AgentState::LoggingIn);
    assert_eq!(h.page.filled("#username").as_deref(), Some("ACME2026"));
    assert_eq!(h.page.filled("#user_pass").as_deref(), Some("hunter2"));
    assert!(h.agent.context().session.is_some());
    assert!(h.agent.waiting_notice().is_some());
}

#[tokio::test]
async fn test_launch_without_browser_stays_idle() {
    let mut h = harness_with(ScriptedPage::new(), ScriptedLauncher::failing());

    let message = h.agent.launch(&credentials()).await.unwrap();

    assert!(message.starts_with("Error during login init"));
    assert_eq!(h.agent.state(), AgentState::Idle);
    assert!(h.agent.context().session.is_none());
}

#[tokio::test]
async fn test_login_timeout_then_acknowledgment_reaches_active() {
    let mut h = harness();
    h.agent.launch(&credentials()).await.unwrap();

    let detected = h.agent.wait_for_login(Duration::from_millis(20)).await.unwrap();
    assert!(!detected);
    assert_eq!(h.agent.state(), AgentState::LoggingIn);

    h.agent.handle_operator_message("I've completed it").await.unwrap();
    assert_eq!(h.agent.state(), AgentState::Active);
    assert!(h.agent.context().session.as_ref().unwrap().authenticated);
}

#[tokio::test]
async fn test_detected_login_moves_to_active() {
    let mut h = harness();
    h.page
        .redirect("https://services.gst.gov.in/services/login", DASHBOARD);
    h.agent.launch(&credentials()).await.unwrap();

    assert!(h.agent.wait_for_login(Duration::from_millis(50)).await.unwrap());
    assert_eq!(h.agent.state(), AgentState::Active);
    assert_eq!(
        h.agent.transcript().last_agent().unwrap().text,
        "Login confirmed. Ready for a workflow."
    );
}

#[tokio::test]
async fn test_workflow_before_login_is_rejected() {
    let mut h = harness();
    h.agent.launch(&credentials()).await.unwrap();
    let calls_before = h.page.calls().len();

    let err = h.agent.run_workflow(WorkflowRequest::ViewNotices).await.unwrap_err();

    assert!(err.is_protocol());
    assert!(h.agent.run().is_none());
    assert_eq!(h.page.calls().len(), calls_before);
}

#[tokio::test]
async fn test_stop_twice_is_idle_both_times() {
    let mut h = active_harness().await;

    h.agent.stop().await.unwrap();
    assert_eq!(h.agent.state(), AgentState::Idle);
    assert_eq!(h.page.count(&PageCall::Close), 1);

    h.agent.stop().await.unwrap();
    assert_eq!(h.agent.state(), AgentState::Idle);
    assert_eq!(h.page.count(&PageCall::Close), 1);
    assert!(h.agent.context().session.is_none());
}

#[tokio::test]
async fn test_stop_cancels_parked_run() {
    let mut h = active_harness().await;
    h.agent
        .run_workflow(WorkflowRequest::FileReturnB(march()))
        .await
        .unwrap();

    h.agent.stop().await.unwrap();

    assert_eq!(status(&h), WorkflowStatus::Cancelled);
    assert!(!h.agent.context().gate.is_waiting());
    assert!(h.agent.context().question_matches_status());
}

#[tokio::test]
async fn test_view_notices_appends_one_record_per_candidate() {
    let mut h = active_harness().await;
    h.page.set_table(
        "table tbody tr",
        vec![
            vec!["ZA2903250001", "01/03/2025", "Show cause notice", "Reply required"],
            vec!["ZA2903250002", "05/03/2025", "Scrutiny of returns"],
            vec!["header only"],
        ],
    );

    let finished = h.agent.run_workflow(WorkflowRequest::ViewNotices).await.unwrap();

    assert_eq!(finished, WorkflowStatus::Completed);
    assert_eq!(h.agent.state(), AgentState::Active);

    let records = h.notices.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].notice_type, "Portal Notice");
    assert_eq!(records[0].description, "Show cause notice (ID: ZA2903250001)");
    assert_eq!(records[0].action_required, "Reply required");
    assert_eq!(records[1].action_required, "Unknown");
    assert!(records.iter().all(|r| r.status == NoticeStatus::Pending));
    assert!(h
        .agent
        .transcript()
        .last_agent()
        .unwrap()
        .text
        .starts_with("Found 2 notices"));
}

#[tokio::test]
async fn test_unreachable_notices_page_fails_run() {
    let mut h = active_harness().await;
    h.page
        .make_unreachable("https://services.gst.gov.in/services/auth/viewnotices");

    let finished = h.agent.run_workflow(WorkflowRequest::ViewNotices).await.unwrap();

    assert_eq!(finished, WorkflowStatus::Failed);
    assert_eq!(h.agent.state(), AgentState::Active);
    assert!(h.notices.records().is_empty());
}

#[tokio::test]
async fn test_return_a_enters_grouped_rows_and_one_aggregate() {
    let mut h = active_harness().await;

    let parked = h
        .agent
        .run_workflow(WorkflowRequest::FileReturnA(march()))
        .await
        .unwrap();

    assert_eq!(parked, WorkflowStatus::AwaitingConfirmation);
    assert_eq!(h.agent.state(), AgentState::AwaitingConfirmation);

    assert_eq!(fills(&h.page, "#ctin"), 1);
    assert_eq!(h.page.filled("#ctin").as_deref(), Some("29ABCDE1234F1Z5"));
    assert_eq!(h.page.filled("#inum").as_deref(), Some("S-1"));
    assert_eq!(h.page.filled("#ival").as_deref(), Some("1180.00"));

    assert_eq!(fills(&h.page, "#b2cs-txval"), 1);
    assert_eq!(h.page.filled("#b2cs-txval").as_deref(), Some("500.00"));
    assert_eq!(h.page.filled("#b2cs-camt").as_deref(), Some("45.00"));
    assert_eq!(h.page.filled("#b2cs-samt").as_deref(), Some("45.00"));
    assert_eq!(h.page.filled("#b2cs-iamt").as_deref(), Some("0.00"));

    let question = h.agent.context().gate.pending().unwrap();
    assert_eq!(question.kind, QuestionKind::Confirmation);
    assert!(question.prompt.contains("1 invoice(s) entered individually"));
    assert!(h.agent.context().question_matches_status());
}

#[tokio::test]
async fn test_return_a_full_filing_with_code() {
    let mut h = active_harness().await;
    h.agent
        .run_workflow(WorkflowRequest::FileReturnA(march()))
        .await
        .unwrap();

    h.agent.handle_operator_message("yes").await.unwrap();
    assert_eq!(h.agent.state(), AgentState::AwaitingOtp);
    assert_eq!(status(&h), WorkflowStatus::AwaitingOtp);
    assert_eq!(h.page.count(&PageCall::Click("#submit-return".to_string())), 1);
    assert!(h.agent.context().question_matches_status());

    h.agent.handle_operator_message(" 482913 ").await.unwrap();
    assert_eq!(status(&h), WorkflowStatus::Completed);
    assert_eq!(h.agent.state(), AgentState::Active);
    assert_eq!(h.page.filled("#otp").as_deref(), Some("482913"));
    assert!(h.agent.context().last_failed_return.is_none());
    assert!(h.agent.context().question_matches_status());
}

#[tokio::test]
async fn test_declining_return_b_cancels_without_code_question() {
    let mut h = active_harness().await;
    h.agent
        .run_workflow(WorkflowRequest::FileReturnB(march()))
        .await
        .unwrap();
    assert_eq!(h.page.filled("#osup-txval").as_deref(), Some("1500.00"));
    assert_eq!(h.page.filled("#itc-camt").as_deref(), Some("45.00"));

    h.agent.handle_operator_message("no").await.unwrap();

    assert_eq!(status(&h), WorkflowStatus::Cancelled);
    assert_eq!(h.agent.state(), AgentState::Active);
    assert!(!h.agent.context().gate.is_waiting());
    assert_eq!(h.page.count(&PageCall::Click("#submit-return".to_string())), 0);
    assert!(h.page.filled("#otp").is_none());
    assert_eq!(
        h.agent.transcript().last_agent().unwrap().text,
        "Cancelled. Nothing was submitted."
    );
}

#[tokio::test]
async fn test_unclear_reply_reprompts_and_keeps_question() {
    let mut h = active_harness().await;
    h.agent
        .run_workflow(WorkflowRequest::FileReturnB(march()))
        .await
        .unwrap();
    let question_id = h.agent.context().gate.pending().unwrap().id;

    h.agent
        .handle_operator_message("what is the due date again?")
        .await
        .unwrap();

    assert_eq!(status(&h), WorkflowStatus::AwaitingConfirmation);
    assert_eq!(h.agent.state(), AgentState::AwaitingConfirmation);
    assert_eq!(h.agent.context().gate.pending().unwrap().id, question_id);
    assert_eq!(
        h.agent.transcript().last_agent().unwrap().text,
        "Please reply yes to go ahead or no to cancel."
    );
    let last_two: Vec<Role> = h
        .agent
        .transcript()
        .entries()
        .iter()
        .rev()
        .take(2)
        .map(|e| e.role)
        .collect();
    assert_eq!(last_two, vec![Role::Agent, Role::Operator]);
}

#[tokio::test]
async fn test_second_workflow_while_parked_is_rejected() {
    let mut h = active_harness().await;
    h.agent
        .run_workflow(WorkflowRequest::FileReturnB(march()))
        .await
        .unwrap();
    let run_id = h.agent.run().unwrap().id;
    let calls_before = h.page.calls().len();

    let err = h
        .agent
        .run_workflow(WorkflowRequest::CreatePayment { amount: 100.0 })
        .await
        .unwrap_err();

    assert!(matches!(err, AutopilotError::Protocol(_)));
    assert_eq!(h.agent.run().unwrap().id, run_id);
    assert_eq!(status(&h), WorkflowStatus::AwaitingConfirmation);
    assert_eq!(h.page.calls().len(), calls_before);
}

#[tokio::test]
async fn test_wrong_code_fails_and_resubmit_restarts_at_submit() {
    let mut h = active_harness().await;
    h.page.fail_selector(".alert-success");
    h.agent
        .run_workflow(WorkflowRequest::FileReturnB(march()))
        .await
        .unwrap();
    h.agent.handle_operator_message("yes").await.unwrap();
    h.agent.handle_operator_message("000000").await.unwrap();

    assert_eq!(status(&h), WorkflowStatus::Failed);
    assert_eq!(h.agent.state(), AgentState::Active);
    assert!(!h.agent.context().gate.is_waiting());
    let failed_id = h.agent.run().unwrap().id;
    assert!(h
        .agent
        .transcript()
        .last_agent()
        .unwrap()
        .text
        .contains("/resubmit"));

    h.page.restore_selector(".alert-success");
    h.page.clear_calls();
    let parked = h.agent.resubmit().await.unwrap();

    assert_eq!(parked, WorkflowStatus::AwaitingConfirmation);
    assert_ne!(h.agent.run().unwrap().id, failed_id);
    assert!(h.agent.context().last_failed_return.is_some());
    assert!(h
        .page
        .calls()
        .iter()
        .all(|c| !matches!(c, PageCall::Navigate(_) | PageCall::Fill(..))));

    h.agent.handle_operator_message("submit").await.unwrap();
    h.agent.handle_operator_message("123456").await.unwrap();
    assert_eq!(status(&h), WorkflowStatus::Completed);
    assert!(h.agent.context().last_failed_return.is_none());
}

#[tokio::test]
async fn test_declined_resubmit_keeps_failed_return() {
    let mut h = active_harness().await;
    h.page.fail_selector(".alert-success");
    h.agent
        .run_workflow(WorkflowRequest::FileReturnA(march()))
        .await
        .unwrap();
    h.agent.handle_operator_message("yes").await.unwrap();
    h.agent.handle_operator_message("000000").await.unwrap();
    assert_eq!(status(&h), WorkflowStatus::Failed);

    h.agent.resubmit().await.unwrap();
    h.agent.handle_operator_message("no").await.unwrap();
    assert_eq!(status(&h), WorkflowStatus::Cancelled);
    assert!(h.agent.context().last_failed_return.is_some());

    h.page.restore_selector(".alert-success");
    let parked = h.agent.resubmit().await.unwrap();
    assert_eq!(parked, WorkflowStatus::AwaitingConfirmation);
    h.agent.handle_operator_message("yes").await.unwrap();
    h.agent.handle_operator_message("123456").await.unwrap();

    assert_eq!(status(&h), WorkflowStatus::Completed);
    assert!(h.agent.context().last_failed_return.is_none());
    assert!(h.agent.resubmit().await.unwrap_err().is_protocol());
}

#[tokio::test]
async fn test_resubmit_without_failed_return_is_rejected() {
    let mut h = active_harness().await;

    let err = h.agent.resubmit().await.unwrap_err();

    assert!(err.is_protocol());
    assert!(h.agent.run().is_none());
}

#[tokio::test]
async fn test_payment_acknowledgment_records_challan() {
    let mut h = active_harness().await;

    let parked = h
        .agent
        .run_workflow(WorkflowRequest::CreatePayment { amount: 1000.0 })
        .await
        .unwrap();
    assert_eq!(parked, WorkflowStatus::AwaitingConfirmation);
    assert_eq!(h.page.filled("#cgst-tax").as_deref(), Some("500.00"));
    assert_eq!(h.page.filled("#sgst-tax").as_deref(), Some("500.00"));

    h.agent.handle_operator_message("done").await.unwrap();

    assert_eq!(status(&h), WorkflowStatus::Completed);
    assert_eq!(h.agent.state(), AgentState::Active);
    let records = h.notices.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].notice_type, "Challan");
    assert_eq!(records[0].action_required, "Pay at Bank/Online");
    assert!(records[0].description.contains("1000.00"));
}

#[tokio::test]
async fn test_invalid_payment_amount_has_no_side_effects() {
    let mut h = active_harness().await;
    let calls_before = h.page.calls().len();

    for amount in [0.0, -250.0, f64::NAN] {
        let err = h
            .agent
            .run_workflow(WorkflowRequest::CreatePayment { amount })
            .await
            .unwrap_err();
        assert!(matches!(err, AutopilotError::Workflow(_)));
    }

    assert!(h.agent.run().is_none());
    assert_eq!(h.page.calls().len(), calls_before);
}

#[tokio::test]
async fn test_degraded_steps_are_listed_in_the_question() {
    let mut h = active_harness().await;
    h.page.fail_selector("#tile-4");
    h.page.fail_text("Eligible ITC");

    h.agent
        .run_workflow(WorkflowRequest::FileReturnB(march()))
        .await
        .unwrap();

    let run = h.agent.run().unwrap();
    assert_eq!(run.status, WorkflowStatus::AwaitingConfirmation);
    assert_eq!(run.degraded_steps().len(), 1);
    let prompt = &h.agent.context().gate.pending().unwrap().prompt;
    assert!(prompt.contains("Needs attention"));
    assert!(prompt.contains("'Eligible ITC' not opened"));
}

#[tokio::test]
async fn test_slow_pages_degrade_preparation_and_preview() {
    let mut h = active_harness().await;
    h.page.stall_loading();

    let parked = h
        .agent
        .run_workflow(WorkflowRequest::FileReturnB(march()))
        .await
        .unwrap();

    assert_eq!(parked, WorkflowStatus::AwaitingConfirmation);
    let run = h.agent.run().unwrap();
    let notes: Vec<String> = run
        .degraded_steps()
        .iter()
        .map(|s| format!("{:?}", s.outcome))
        .collect();
    assert!(notes.iter().any(|n| n.contains("preparation screen still loading")));
    assert!(notes.iter().any(|n| n.contains("preview still loading")));
    let prompt = &h.agent.context().gate.pending().unwrap().prompt;
    assert!(prompt.contains("preview still loading"));
}

#[tokio::test]
async fn test_browser_loss_mid_workflow_fails_run() {
    let mut h = active_harness().await;
    h.agent
        .run_workflow(WorkflowRequest::FileReturnB(march()))
        .await
        .unwrap();
    h.page.crash();

    h.agent.handle_operator_message("yes").await.unwrap();

    assert_eq!(status(&h), WorkflowStatus::Failed);
    assert_eq!(h.agent.state(), AgentState::Active);
    assert!(h.agent.context().gate.pending().is_none());
    assert!(h.agent.context().question_matches_status());
    let run = h.agent.run().unwrap();
    assert!(run.steps.iter().all(|s| !s.description.contains("one-time code")));
    let last = h.agent.transcript().last_agent().unwrap().text.clone();
    assert!(last.contains("browser stopped responding"));
    assert!(!last.contains("one-time code"));
}

#[tokio::test]
async fn test_browser_loss_while_preparing_fails_before_question() {
    let mut h = active_harness().await;
    h.page.crash();

    let status = h
        .agent
        .run_workflow(WorkflowRequest::CreatePayment { amount: 200.0 })
        .await
        .unwrap();

    assert_eq!(status, WorkflowStatus::Failed);
    assert!(!h.agent.context().gate.is_waiting());
    assert_eq!(h.agent.state(), AgentState::Active);
}

#[tokio::test]
async fn test_relaunch_after_browser_loss() {
    let mut h = active_harness().await;
    h.page.crash();
    h.agent
        .run_workflow(WorkflowRequest::FileReturnB(march()))
        .await
        .unwrap();
    assert_eq!(status(&h), WorkflowStatus::Failed);

    h.agent.stop().await.unwrap();
    h.page.recover();
    h.agent.launch(&credentials()).await.unwrap();
    h.agent.handle_operator_message("done").await.unwrap();

    let parked = h
        .agent
        .run_workflow(WorkflowRequest::FileReturnB(march()))
        .await
        .unwrap();
    assert_eq!(parked, WorkflowStatus::AwaitingConfirmation);
}

#[tokio::test]
async fn test_chat_text_never_starts_a_workflow() {
    let mut h = active_harness().await;

    h.agent
        .handle_operator_message("please file my GSTR-1 for March")
        .await
        .unwrap();

    assert!(h.agent.run().is_none());
    assert_eq!(h.agent.state(), AgentState::Active);
}

#[tokio::test]
async fn test_context_serializes() {
    let mut h = active_harness().await;
    h.agent
        .run_workflow(WorkflowRequest::FileReturnA(march()))
        .await
        .unwrap();

    let json = serde_json::to_string(h.agent.context()).unwrap();
    assert!(json.contains("\"awaiting_confirmation\""));

    let status_text = h.agent.status();
    assert!(status_text.contains("State: awaiting_confirmation"));
    assert!(status_text.contains("Waiting on:"));
}
