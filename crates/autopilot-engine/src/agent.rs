//! Agent runtime
//!
//! Owns the browser session and the serializable [`AgentContext`], and is the
//! only place where state machine actions turn into effects. Every operator
//! command passes through [`transition`] first, so a command that is not valid
//! in the current state is rejected before the browser is touched.

use crate::activity_logger::ActivityLogger;
use crate::gate::HumanInputGate;
use crate::ledger;
use crate::state_machine::{interpret_reply, transition, Action, AgentEvent, AgentState, OperatorIntent};
use crate::stores::{LedgerSource, NotificationSink};
use crate::transcript::{ChatEntry, Transcript};
use crate::workflow::{describe, terminal_summary, NoticeScan, RunProgress, WorkflowEngine};
use autopilot_browser::{Credentials, SessionController};
use autopilot_core::fail_open::fail_open_with_retries;
use autopilot_core::{
    AutopilotError, FilingPeriod, NewNotice, QuestionKind, Result, SessionInfo, StepOutcome, WorkflowKind,
    WorkflowParams, WorkflowRun, WorkflowStatus,
};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Attempts per notification append
const NOTIFICATION_ATTEMPTS: usize = 3;

/// Everything about the agent that is not the browser
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentContext {
    pub state: AgentState,
    pub session: Option<SessionInfo>,
    pub run: Option<WorkflowRun>,
    pub gate: HumanInputGate,
    pub transcript: Transcript,
    /// Most recent return run that failed, kept for resubmission
    pub last_failed_return: Option<WorkflowRun>,
}

impl AgentContext {
    /// An open question exists exactly when the run is waiting on one
    pub fn question_matches_status(&self) -> bool {
        let awaiting = self
            .run
            .as_ref()
            .map(|r| r.status.is_awaiting())
            .unwrap_or(false);
        self.gate.is_waiting() == awaiting
    }
}

/// A workflow the operator asked for, before its parameters are built
#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowRequest {
    ViewNotices,
    FileReturnA(FilingPeriod),
    FileReturnB(FilingPeriod),
    CreatePayment { amount: f64 },
}

impl WorkflowRequest {
    pub fn kind(&self) -> WorkflowKind {
        match self {
            Self::ViewNotices => WorkflowKind::ViewNotices,
            Self::FileReturnA(_) => WorkflowKind::FileReturnA,
            Self::FileReturnB(_) => WorkflowKind::FileReturnB,
            Self::CreatePayment { .. } => WorkflowKind::CreatePayment,
        }
    }
}

/// Which engine entry point the next call resumes at
#[derive(Debug, Clone, PartialEq, Eq)]
enum Continuation {
    Start,
    ResumeAtSubmit,
    Submit,
    ConfirmCode(String),
    AcknowledgePayment,
}

pub struct Agent {
    context: AgentContext,
    session: SessionController,
    ledger: Arc<dyn LedgerSource>,
    notices: Arc<dyn NotificationSink>,
    activity: Option<ActivityLogger>,
}

impl Agent {
    pub fn new(session: SessionController, ledger: Arc<dyn LedgerSource>, notices: Arc<dyn NotificationSink>) -> Self {
        Self {
            context: AgentContext::default(),
            session,
            ledger,
            notices,
            activity: None,
        }
    }

    pub fn with_activity_log(mut self, logger: ActivityLogger) -> Self {
        self.activity = Some(logger);
        self
    }

    pub fn context(&self) -> &AgentContext {
        &self.context
    }

    pub fn state(&self) -> AgentState {
        self.context.state
    }

    pub fn run(&self) -> Option<&WorkflowRun> {
        self.context.run.as_ref()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.context.transcript
    }

    /// Transcript entries the console has not shown yet
    pub fn take_unread(&mut self) -> Vec<ChatEntry> {
        self.context.transcript.take_unread()
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Fail with a protocol error if `event` is not valid now
    fn guard(&self, event: &AgentEvent) -> Result<()> {
        let (_, actions) = transition(self.context.state, event.clone());
        match actions.into_iter().find_map(|a| match a {
            Action::Reject { reason } => Some(reason),
            _ => None,
        }) {
            Some(reason) => Err(AutopilotError::Protocol(reason)),
            None => Ok(()),
        }
    }

    /// Run `event` through the state machine and carry out its actions
    async fn apply(&mut self, event: AgentEvent) -> Result<()> {
        let from = self.context.state;
        let (next, actions) = transition(from, event);

        for action in actions {
            match action {
                Action::Reject { reason } => return Err(AutopilotError::Protocol(reason)),
                Action::Announce { message } => self.context.transcript.agent(message),
                Action::CancelRun => self.cancel_run().await,
                Action::CloseSession => {
                    self.session.close().await?;
                }
            }
        }

        if next != from {
            info!("Agent state: {} -> {}", from, next);
        }
        self.context.state = next;
        self.sync_session();
        Ok(())
    }

    fn sync_session(&mut self) {
        self.context.session = self.session.info().cloned();
    }

    async fn cancel_run(&mut self) {
        self.context.gate.cancel();
        if let Some(run) = self.context.run.as_mut() {
            if !run.status.is_terminal() && run.advance(WorkflowStatus::Cancelled).is_ok() {
                info!("[{}] {} cancelled", run.short_id(), run.kind);
                if let Some(activity) = &self.activity {
                    activity.log_run_complete(run).await;
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Session
    // -----------------------------------------------------------------------

    /// Open the browser and fill in the login form
    ///
    /// Returns the message shown to the operator. A browser that never came
    /// up leaves the agent Idle.
    pub async fn launch(&mut self, credentials: &Credentials) -> Result<String> {
        let placeholder = AgentEvent::Launch {
            instruction: String::new(),
        };
        self.guard(&placeholder)?;

        let message = self.session.login(credentials).await;
        if !self.session.is_open() {
            error!("{}", message);
            self.context.transcript.agent(message.clone());
            self.sync_session();
            return Ok(message);
        }

        if let Some(activity) = &self.activity {
            activity.log_session_start(&credentials.username).await;
        }
        self.apply(AgentEvent::Launch {
            instruction: message.clone(),
        })
        .await?;
        Ok(message)
    }

    /// The operator says the login is done. Detection is a short courtesy
    /// check; the acknowledgment wins either way.
    pub async fn acknowledge_login(&mut self) -> Result<()> {
        self.guard(&AgentEvent::LoginAcknowledged { detected: false })?;

        let confirm = self.session.timeouts().login_confirm();
        let detected = self.session.wait_for_login(confirm).await;
        self.session.mark_authenticated();
        self.apply(AgentEvent::LoginAcknowledged { detected }).await
    }

    /// Poll for the dashboard. Moves to Active only if it is seen.
    pub async fn wait_for_login(&mut self, timeout: Duration) -> Result<bool> {
        self.guard(&AgentEvent::LoginAcknowledged { detected: true })?;

        let detected = self.session.wait_for_login(timeout).await;
        if detected {
            self.apply(AgentEvent::LoginAcknowledged { detected }).await?;
        } else {
            self.context
                .transcript
                .agent("Dashboard not detected yet. Reply 'done' once you are logged in.");
        }
        Ok(detected)
    }

    /// Tear down the session and cancel any run. Safe to repeat.
    pub async fn stop(&mut self) -> Result<()> {
        self.apply(AgentEvent::Stop).await
    }

    // -----------------------------------------------------------------------
    // Workflows
    // -----------------------------------------------------------------------

    fn ensure_no_active_run(&self) -> Result<()> {
        match &self.context.run {
            Some(run) if !run.status.is_terminal() => Err(AutopilotError::Protocol(format!(
                "{} run {} is still {}",
                run.kind,
                run.short_id(),
                run.status
            ))),
            _ => Ok(()),
        }
    }

    async fn build_params(&self, request: WorkflowRequest) -> Result<WorkflowParams> {
        Ok(match request {
            WorkflowRequest::ViewNotices => WorkflowParams::ViewNotices,
            WorkflowRequest::FileReturnA(period) => WorkflowParams::FileReturnA {
                period,
                invoices: self.ledger.invoices().await?,
            },
            WorkflowRequest::FileReturnB(period) => {
                let invoices = self.ledger.invoices().await?;
                let expenses = self.ledger.expenses().await?;
                WorkflowParams::FileReturnB {
                    period,
                    figures: ledger::return_b_figures(&invoices, &expenses),
                }
            }
            WorkflowRequest::CreatePayment { amount } => {
                if !amount.is_finite() || amount <= 0.0 {
                    return Err(AutopilotError::Workflow(format!(
                        "payment amount must be a positive number, got {}",
                        amount
                    )));
                }
                WorkflowParams::CreatePayment { amount }
            }
        })
    }

    /// Start a workflow and run it to its first pause or to the end
    pub async fn run_workflow(&mut self, request: WorkflowRequest) -> Result<WorkflowStatus> {
        self.guard(&AgentEvent::StartWorkflow {
            description: String::new(),
        })?;
        self.ensure_no_active_run()?;

        let params = self.build_params(request).await?;
        self.start_run(WorkflowRun::new(params)).await?;

        let kind = self.context.run.as_ref().map(|r| r.kind);
        if kind == Some(WorkflowKind::ViewNotices) {
            return self.run_view_notices().await;
        }
        let progress = self.drive(Continuation::Start).await;
        self.settle(progress).await
    }

    /// New run of the last failed return, parked at the submit confirmation
    pub async fn resubmit(&mut self) -> Result<WorkflowStatus> {
        self.guard(&AgentEvent::StartWorkflow {
            description: String::new(),
        })?;
        self.ensure_no_active_run()?;
        let params = self
            .context
            .last_failed_return
            .as_ref()
            .map(|failed| failed.params.clone())
            .ok_or_else(|| AutopilotError::Protocol("there is no failed return to resubmit".to_string()))?;

        self.start_run(WorkflowRun::new(params)).await?;
        let progress = self.drive(Continuation::ResumeAtSubmit).await;
        self.settle(progress).await
    }

    async fn start_run(&mut self, run: WorkflowRun) -> Result<()> {
        let description = describe(&run.params);
        self.apply(AgentEvent::StartWorkflow { description }).await?;
        if let Some(activity) = &self.activity {
            activity.log_run_start(&run).await;
        }
        self.context.run = Some(run);
        Ok(())
    }

    /// Lend the engine the session, gate and transcript for one call
    async fn drive(&mut self, next: Continuation) -> Result<RunProgress> {
        let Some(run) = self.context.run.as_mut() else {
            return Err(AutopilotError::Protocol("no workflow run".to_string()));
        };
        let mut engine = WorkflowEngine::new(
            &self.session,
            &mut self.context.gate,
            &mut self.context.transcript,
            self.activity.as_ref(),
        );
        match next {
            Continuation::Start => match run.kind {
                WorkflowKind::FileReturnA => engine.file_return_a(run).await,
                WorkflowKind::FileReturnB => engine.file_return_b(run).await,
                WorkflowKind::CreatePayment => engine.create_payment(run).await,
                WorkflowKind::ViewNotices => Err(AutopilotError::Protocol(
                    "the notice check has no parked continuation".to_string(),
                )),
            },
            Continuation::ResumeAtSubmit => engine.resume_at_submit(run).await,
            Continuation::Submit => engine.submit(run).await,
            Continuation::ConfirmCode(code) => engine.confirm_code(run, &code).await,
            Continuation::AcknowledgePayment => engine.acknowledge_payment(run).await,
        }
    }

    async fn run_view_notices(&mut self) -> Result<WorkflowStatus> {
        let Some(run) = self.context.run.as_mut() else {
            return Err(AutopilotError::Protocol("no workflow run".to_string()));
        };
        let mut engine = WorkflowEngine::new(
            &self.session,
            &mut self.context.gate,
            &mut self.context.transcript,
            self.activity.as_ref(),
        );
        let scan = engine.view_notices(run).await;

        let summary = match scan {
            Ok(NoticeScan::Found(candidates)) if candidates.is_empty() => "No notices found.".to_string(),
            Ok(NoticeScan::Found(candidates)) => {
                let today = Local::now().date_naive();
                let mut saved = 0;
                for candidate in &candidates {
                    let notice = NewNotice::from_candidate(candidate, today);
                    let sink = Arc::clone(&self.notices);
                    let stored = fail_open_with_retries(
                        "notifications::append",
                        || {
                            let sink = Arc::clone(&sink);
                            let notice = notice.clone();
                            async move { sink.append(notice).await }
                        },
                        NOTIFICATION_ATTEMPTS,
                    )
                    .await;
                    if stored.is_some() {
                        saved += 1;
                    }
                }
                format!(
                    "Found {} notices. Saved {} to the notification store.",
                    candidates.len(),
                    saved
                )
            }
            Ok(NoticeScan::Unreadable { reason }) => format!("Could not fetch notices: {}.", reason),
            Err(e) => return self.fail_run(e).await,
        };
        self.finish(Some(summary)).await
    }

    /// Turn an engine result into the next agent state
    async fn settle(&mut self, progress: Result<RunProgress>) -> Result<WorkflowStatus> {
        match progress {
            Ok(RunProgress::Parked(kind)) => {
                let prompt = self
                    .context
                    .gate
                    .pending()
                    .map(|q| q.prompt.clone())
                    .unwrap_or_default();
                self.apply(AgentEvent::QuestionOpened { kind, prompt }).await?;
                Ok(self.run_status())
            }
            Ok(RunProgress::Finished(_)) => self.finish(None).await,
            Err(e) => self.fail_run(e).await,
        }
    }

    /// The run is terminal: log it, remember a failed return, report
    async fn finish(&mut self, summary: Option<String>) -> Result<WorkflowStatus> {
        let Some(run) = self.context.run.as_ref() else {
            return Err(AutopilotError::Protocol("no workflow run".to_string()));
        };
        let mut text = terminal_summary(run);
        if let Some(extra) = summary {
            text = format!("{} {}", extra, text);
        }
        if let Some(activity) = &self.activity {
            activity.log_run_complete(run).await;
        }
        match run.status {
            WorkflowStatus::Failed if run.kind.has_code_step() => {
                self.context.last_failed_return = Some(run.clone());
            }
            WorkflowStatus::Completed => {
                // Kept through declined or failed retries until the return is filed
                let filed = self
                    .context
                    .last_failed_return
                    .as_ref()
                    .is_some_and(|failed| failed.params == run.params);
                if filed {
                    self.context.last_failed_return = None;
                }
            }
            _ => {}
        }
        let status = run.status;
        self.apply(AgentEvent::WorkflowFinished { summary: text }).await?;
        Ok(status)
    }

    /// An engine call errored: mark the run failed and report it
    async fn fail_run(&mut self, err: AutopilotError) -> Result<WorkflowStatus> {
        error!("Workflow error: {}", err);
        self.context.gate.cancel();
        if let Some(run) = self.context.run.as_mut() {
            if !run.status.is_terminal() {
                let idx = run.begin_step(format!("Stopped: {}", err));
                run.set_outcome(
                    idx,
                    StepOutcome::Failed {
                        reason: err.to_string(),
                    },
                );
                if let Err(e) = run.advance(WorkflowStatus::Failed) {
                    warn!("Could not mark run failed: {}", e);
                }
            }
        }
        let hint = self
            .session
            .is_lost()
            .then(|| "The browser stopped responding. Use /stop, then /launch to log in again.".to_string());
        let status = self.finish(hint).await?;
        if err.is_protocol() {
            return Err(err);
        }
        Ok(status)
    }

    fn run_status(&self) -> WorkflowStatus {
        self.context
            .run
            .as_ref()
            .map(|r| r.status)
            .unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Operator messages
    // -----------------------------------------------------------------------

    /// Route a free-text operator message by the current state
    pub async fn handle_operator_message(&mut self, text: &str) -> Result<()> {
        self.context.transcript.operator(text);

        match interpret_reply(self.context.state, text) {
            OperatorIntent::Affirm => self.resume_confirmed(text).await,
            OperatorIntent::Decline => {
                self.context.gate.receive_reply(text)?;
                self.apply(AgentEvent::Declined).await?;
                if let Some(run) = self.context.run.as_ref() {
                    info!("[{}] declined by operator", run.short_id());
                }
                Ok(())
            }
            OperatorIntent::Code(code) => {
                let question = self.context.gate.receive_reply(code)?;
                let code = question.answer.unwrap_or_default();
                let progress = self.drive(Continuation::ConfirmCode(code)).await;
                self.settle(progress).await.map(|_| ())
            }
            OperatorIntent::AcknowledgeLogin => self.acknowledge_login().await,
            OperatorIntent::Unclear => self.apply(AgentEvent::UnclearReply).await,
            OperatorIntent::Informational => {
                let reply = match self.context.state {
                    AgentState::Idle => "Please launch the agent first (/launch).",
                    AgentState::LoggingIn => {
                        "Finish the login in the browser, then reply 'done'."
                    }
                    _ => "Noted. I only act on commands here; /help lists them.",
                };
                self.context.transcript.agent(reply);
                Ok(())
            }
        }
    }

    /// Affirmative reply: run the continuation the run is parked at
    async fn resume_confirmed(&mut self, text: &str) -> Result<()> {
        if let Some(question) = self.context.gate.pending() {
            if question.kind != QuestionKind::Confirmation {
                return Err(AutopilotError::Protocol(format!(
                    "question {} expects a {:?} reply",
                    question.id, question.kind
                )));
            }
        }
        self.context.gate.receive_reply(text)?;
        let kind = self
            .context
            .run
            .as_ref()
            .map(|r| r.kind)
            .ok_or_else(|| AutopilotError::Protocol("no workflow run".to_string()))?;

        if kind == WorkflowKind::CreatePayment {
            let progress = self.drive(Continuation::AcknowledgePayment).await;
            let amount = match self.context.run.as_ref().map(|r| &r.params) {
                Some(WorkflowParams::CreatePayment { amount }) => *amount,
                _ => 0.0,
            };
            if matches!(progress, Ok(RunProgress::Finished(WorkflowStatus::Completed))) {
                self.record_challan(amount).await;
            }
            return self.settle(progress).await.map(|_| ());
        }

        let progress = self.drive(Continuation::Submit).await;
        self.settle(progress).await.map(|_| ())
    }

    async fn record_challan(&self, amount: f64) {
        let notice = NewNotice::challan(amount, Local::now().date_naive());
        let sink = Arc::clone(&self.notices);
        fail_open_with_retries(
            "notifications::append_challan",
            || {
                let sink = Arc::clone(&sink);
                let notice = notice.clone();
                async move { sink.append(notice).await }
            },
            NOTIFICATION_ATTEMPTS,
        )
        .await;
    }

    // -----------------------------------------------------------------------
    // Reporting
    // -----------------------------------------------------------------------

    /// Reminder text while the agent waits on the operator
    pub fn waiting_notice(&self) -> Option<String> {
        if let Some(question) = self.context.gate.pending() {
            let waited = chrono::Utc::now() - question.created_at;
            return Some(format!(
                "Still waiting for your reply ({} min): {}",
                waited.num_minutes(),
                question.prompt.lines().last().unwrap_or_default()
            ));
        }
        if self.context.state == AgentState::LoggingIn {
            return Some("Still waiting for you to finish logging in. Reply 'done' when you see the dashboard.".to_string());
        }
        None
    }

    pub fn status(&self) -> String {
        let mut lines = vec![format!("State: {}", self.context.state)];
        match &self.context.session {
            Some(info) => lines.push(format!(
                "Session: {} (since {})",
                if info.authenticated { "logged in" } else { "not logged in" },
                info.created_at.format("%H:%M:%S")
            )),
            None => lines.push("Session: none".to_string()),
        }
        if let Some(run) = &self.context.run {
            lines.push(format!(
                "Run {}: {} ({}, {} steps, {} degraded)",
                run.short_id(),
                describe(&run.params),
                run.status,
                run.steps.len(),
                run.degraded_steps().len()
            ));
        }
        if let Some(question) = self.context.gate.pending() {
            lines.push(format!("Waiting on: {}", question.prompt));
        }
        if let Some(failed) = &self.context.last_failed_return {
            lines.push(format!("Resubmittable: {}", describe(&failed.params)));
        }
        lines.join("\n")
    }
}
