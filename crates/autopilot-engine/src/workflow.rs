//! Workflow engine
//!
//! Each workflow is a fixed sequence of steps. A step announces itself before
//! it runs (transcript, tracing, run record, activity log), so the trail is
//! complete whether or not the step works. Targeting failures degrade the
//! step and the workflow moves on; only an unreachable entry page fails the
//! run. A lost browser session is an error at the next step boundary, so no
//! question is ever asked about a page that is gone.
//!
//! Workflows never wait for the operator. They park a question on the gate,
//! set the run status, and return [`RunProgress::Parked`]. The caller resumes
//! with [`WorkflowEngine::submit`], [`WorkflowEngine::confirm_code`] or
//! [`WorkflowEngine::acknowledge_payment`] once the reply arrives.

use crate::activity_logger::ActivityLogger;
use crate::gate::HumanInputGate;
use crate::ledger;
use crate::transcript::Transcript;
use autopilot_browser::{Interactor, SessionController, Strategy};
use autopilot_core::config::{ClickTarget, PortalConfig};
use autopilot_core::{
    AutopilotError, FilingPeriod, LedgerSnapshot, NoticeCandidate, QuestionKind, Result,
    ReturnBFigures, RowAmounts, StepOutcome, TaxSplit, WorkflowParams, WorkflowRun,
    WorkflowStatus,
};
use tracing::{info, warn};

/// Result of reading the notices page
#[derive(Debug, Clone, PartialEq)]
pub enum NoticeScan {
    /// Rows read from the table, possibly none
    Found(Vec<NoticeCandidate>),
    /// The page could not be read at all
    Unreadable { reason: String },
}

/// What the ledger-entry sub-procedure did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntrySummary {
    /// Rows entered individually (counterparty has a tax-ID)
    pub grouped_entries: usize,
    /// The single summary entry for the remaining rows, if any
    pub aggregate: Option<RowAmounts>,
    /// Entries whose dialog could not be completed
    pub incomplete: usize,
}

/// Where a workflow call left the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunProgress {
    /// Waiting on the gate
    Parked(QuestionKind),
    /// Terminal
    Finished(WorkflowStatus),
}

/// Short human label for a run
pub fn describe(params: &WorkflowParams) -> String {
    match params {
        WorkflowParams::ViewNotices => "the notice check".to_string(),
        WorkflowParams::FileReturnA { period, invoices } => {
            format!("GSTR-1 for {} ({} invoices)", period, invoices.len())
        }
        WorkflowParams::FileReturnB { period, figures } => format!(
            "GSTR-3B for {} (net payable ₹ {:.2})",
            period, figures.net_payable
        ),
        WorkflowParams::CreatePayment { amount } => format!("a payment challan for ₹ {:.2}", amount),
    }
}

/// One-paragraph outcome of a terminal run
pub fn terminal_summary(run: &WorkflowRun) -> String {
    let label = describe(&run.params);
    let mut summary = match run.status {
        WorkflowStatus::Completed => format!("Finished {}.", label),
        WorkflowStatus::Cancelled => format!("Cancelled {}.", label),
        _ => {
            let failed = run.steps.iter().rev().find_map(|s| match &s.outcome {
                StepOutcome::Failed { reason } => Some(format!("{}: {}", s.description, reason)),
                _ => None,
            });
            match failed {
                Some(at) => format!("{} failed at '{}'.", label, at),
                None => format!("{} failed.", label),
            }
        }
    };
    if run.status == WorkflowStatus::Failed && run.kind.has_code_step() {
        summary.push_str(" Use /resubmit to go back to the submit step.");
    }
    append_attention(&mut summary, run);
    summary
}

fn append_attention(text: &mut String, run: &WorkflowRun) {
    let degraded: Vec<String> = run
        .steps
        .iter()
        .filter_map(|s| match &s.outcome {
            StepOutcome::Degraded { note } => Some(format!("- {}: {}", s.description, note)),
            _ => None,
        })
        .collect();
    if !degraded.is_empty() {
        text.push_str("\nNeeds attention:\n");
        text.push_str(&degraded.join("\n"));
    }
}

/// Notice rows with at least three cells: id, date, description, type
pub fn parse_notice_rows(rows: Vec<Vec<String>>) -> Vec<NoticeCandidate> {
    rows.into_iter()
        .filter(|cells| cells.len() >= 3)
        .map(|cells| {
            let notice_type = cells
                .get(3)
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
                .unwrap_or("Unknown")
                .to_string();
            NoticeCandidate {
                notice_id: cells[0].trim().to_string(),
                date: cells[1].trim().to_string(),
                description: cells[2].trim().to_string(),
                notice_type,
            }
        })
        .collect()
}

fn money(value: f64) -> String {
    format!("{:.2}", value)
}

/// Runs workflow steps against a borrowed session
pub struct WorkflowEngine<'a> {
    session: &'a SessionController,
    gate: &'a mut HumanInputGate,
    transcript: &'a mut Transcript,
    activity: Option<&'a ActivityLogger>,
}

impl<'a> WorkflowEngine<'a> {
    pub fn new(
        session: &'a SessionController,
        gate: &'a mut HumanInputGate,
        transcript: &'a mut Transcript,
        activity: Option<&'a ActivityLogger>,
    ) -> Self {
        Self {
            session,
            gate,
            transcript,
            activity,
        }
    }

    fn portal(&self) -> &'a PortalConfig {
        let session: &'a SessionController = self.session;
        session.portal()
    }

    fn page(&self) -> Result<Interactor<'a>> {
        self.checkpoint()?;
        let session: &'a SessionController = self.session;
        session
            .interactor()
            .ok_or_else(|| AutopilotError::Session("browser session is not running".to_string()))
    }

    // -----------------------------------------------------------------------
    // Step bookkeeping
    // -----------------------------------------------------------------------

    fn checkpoint(&self) -> Result<()> {
        if self.session.is_lost() {
            return Err(AutopilotError::Session("the browser session was lost".to_string()));
        }
        Ok(())
    }

    async fn step(&mut self, run: &mut WorkflowRun, description: impl Into<String>) -> Result<usize> {
        self.checkpoint()?;
        let description = description.into();
        info!("[{}] {}", run.short_id(), description);
        self.transcript.agent(description.clone());
        if let Some(activity) = self.activity {
            activity.log_step(&description).await;
        }
        Ok(run.begin_step(description))
    }

    async fn degrade(&mut self, run: &mut WorkflowRun, index: usize, note: impl Into<String>) {
        let note = note.into();
        warn!("[{}] degraded: {}", run.short_id(), note);
        if let Some(activity) = self.activity {
            activity.log_degraded(&note).await;
        }
        run.set_outcome(index, StepOutcome::Degraded { note });
    }

    fn fail(&mut self, run: &mut WorkflowRun, index: usize, reason: impl Into<String>) -> Result<RunProgress> {
        self.checkpoint()?;
        let reason = reason.into();
        warn!("[{}] failed: {}", run.short_id(), reason);
        run.set_outcome(index, StepOutcome::Failed { reason });
        run.advance(WorkflowStatus::Failed)?;
        Ok(RunProgress::Finished(WorkflowStatus::Failed))
    }

    fn complete(&mut self, run: &mut WorkflowRun) -> Result<RunProgress> {
        self.checkpoint()?;
        run.advance(WorkflowStatus::Completed)?;
        info!("[{}] {} completed", run.short_id(), run.kind);
        Ok(RunProgress::Finished(WorkflowStatus::Completed))
    }

    async fn park(&mut self, run: &mut WorkflowRun, kind: QuestionKind, prompt: String) -> Result<RunProgress> {
        self.checkpoint()?;
        let question = self.gate.ask(kind, prompt)?;
        if let Some(activity) = self.activity {
            activity.log_question(question).await;
        }
        let status = match kind {
            QuestionKind::Confirmation => WorkflowStatus::AwaitingConfirmation,
            QuestionKind::OneTimeCode => WorkflowStatus::AwaitingOtp,
        };
        if let Err(e) = run.advance(status) {
            self.gate.cancel();
            return Err(e);
        }
        Ok(RunProgress::Parked(kind))
    }

    fn begin(&mut self, run: &mut WorkflowRun) -> Result<Interactor<'a>> {
        let page = self.page()?;
        run.advance(WorkflowStatus::Running)?;
        Ok(page)
    }

    /// Click through a chain, degrading the step if every strategy misses
    async fn click_or_degrade(
        &mut self,
        run: &mut WorkflowRun,
        page: &Interactor<'_>,
        index: usize,
        target: &ClickTarget,
    ) -> bool {
        if page.attempt(&Strategy::click_chain(target)).await.succeeded() {
            true
        } else {
            self.degrade(run, index, format!("'{}' not found", target.label)).await;
            false
        }
    }

    async fn screenshot_step(
        &mut self,
        run: &mut WorkflowRun,
        page: &Interactor<'_>,
        label: &str,
    ) -> Result<Option<String>> {
        let idx = self.step(run, "Capturing the preview for your review").await?;
        match page.capture_screenshot(label).await {
            Some(path) => Ok(Some(path.display().to_string())),
            None => {
                self.degrade(run, idx, "screenshot not captured").await;
                Ok(None)
            }
        }
    }

    // -----------------------------------------------------------------------
    // ViewNotices
    // -----------------------------------------------------------------------

    /// Read the notices table. Storing the results is the caller's job.
    pub async fn view_notices(&mut self, run: &mut WorkflowRun) -> Result<NoticeScan> {
        let page = self.begin(run)?;
        let portal = self.portal();

        let idx = self.step(run, "Opening the notices and orders page").await?;
        if !page.navigate(&portal.notices_url).await {
            let reason = format!("could not load {}", portal.notices_url);
            self.fail(run, idx, reason.clone())?;
            return Ok(NoticeScan::Unreadable { reason });
        }

        let idx = self.step(run, "Waiting for the notices table to load").await?;
        if !page.wait_for_idle().await {
            self.degrade(run, idx, "page still loading, reading what is there").await;
        }

        let idx = self.step(run, "Reading the notices table").await?;
        match page.read_table(&portal.selectors.notice_rows).await {
            Some(rows) => {
                let candidates = parse_notice_rows(rows);
                info!("[{}] {} notices read", run.short_id(), candidates.len());
                self.complete(run)?;
                Ok(NoticeScan::Found(candidates))
            }
            None => {
                let reason = "the notices table could not be read".to_string();
                self.fail(run, idx, reason.clone())?;
                Ok(NoticeScan::Unreadable { reason })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Returns dashboard (shared by both returns)
    // -----------------------------------------------------------------------

    /// Open the returns dashboard and pick the period. `false` means the run
    /// has already been failed.
    async fn open_period(&mut self, run: &mut WorkflowRun, page: &Interactor<'_>, period: &FilingPeriod) -> Result<bool> {
        let portal = self.portal();
        let selectors = &portal.selectors;
        let action = page.timeouts().action();

        let idx = self.step(run, "Opening the returns dashboard").await?;
        if !page.navigate(&portal.returns_url).await {
            self.fail(run, idx, format!("could not load {}", portal.returns_url))?;
            return Ok(false);
        }
        if !page.wait_for_idle().await {
            self.degrade(run, idx, "dashboard still loading").await;
        }

        let idx = self
            .step(run, format!("Selecting financial year {} and period {}", period.financial_year, period.period))
            .await?;
        let year = page
            .select_by_label(&selectors.financial_year, &period.financial_year, action)
            .await;
        let month = page.select_by_label(&selectors.period, &period.period, action).await;
        if !(year && month) {
            self.degrade(
                run,
                idx,
                format!("could not select {}; please select it in the browser and click SEARCH", period),
            )
            .await;
        }

        let idx = self.step(run, "Searching for the selected period").await?;
        self.click_or_degrade(run, page, idx, &selectors.search).await;
        Ok(true)
    }

    async fn open_preparation(
        &mut self,
        run: &mut WorkflowRun,
        page: &Interactor<'_>,
        description: &str,
        target: &ClickTarget,
        url: &str,
    ) -> Result<()> {
        let idx = self.step(run, description).await?;
        if !page.attempt(&Strategy::open_chain(target, url)).await.succeeded() {
            self.degrade(run, idx, format!("preparation screen not reached; open '{}' in the browser", target.label))
                .await;
        } else if !page.wait_for_idle().await {
            self.degrade(run, idx, "preparation screen still loading").await;
        }
        Ok(())
    }

    async fn preview(&mut self, run: &mut WorkflowRun, page: &Interactor<'_>, target: &ClickTarget) -> Result<()> {
        let idx = self.step(run, "Generating the preview").await?;
        if self.click_or_degrade(run, page, idx, target).await && !page.wait_for_idle().await {
            self.degrade(run, idx, "preview still loading; check it in the browser").await;
        }
        Ok(())
    }

    fn confirmation_prompt(run: &WorkflowRun, body: String, screenshot: Option<String>, ask: &str) -> String {
        let mut prompt = body;
        if let Some(path) = screenshot {
            prompt.push_str(&format!("\nPreview: {}", path));
        }
        append_attention(&mut prompt, run);
        prompt.push('\n');
        prompt.push_str(ask);
        prompt
    }

    // -----------------------------------------------------------------------
    // FileReturnA
    // -----------------------------------------------------------------------

    /// Prepare the outward-supply return up to the submit confirmation
    pub async fn file_return_a(&mut self, run: &mut WorkflowRun) -> Result<RunProgress> {
        let WorkflowParams::FileReturnA { period, invoices } = run.params.clone() else {
            return Err(AutopilotError::Workflow(format!("{} is not a GSTR-1 run", run.kind)));
        };
        let page = self.begin(run)?;
        let portal = self.portal();

        if !self.open_period(run, &page, &period).await? {
            return Ok(RunProgress::Finished(WorkflowStatus::Failed));
        }
        self.open_preparation(
            run,
            &page,
            "Opening GSTR-1 preparation",
            &portal.selectors.return_a_prepare,
            &portal.return_a_url,
        )
        .await?;

        let summary = self.enter_ledger_rows(run, &page, &invoices).await?;

        self.preview(run, &page, &portal.selectors.return_a_preview).await?;
        let screenshot = self.screenshot_step(run, &page, "gstr1-preview").await?;

        let mut body = format!(
            "GSTR-1 for {} is ready for review: {} invoice(s) entered individually",
            period, summary.grouped_entries
        );
        match summary.aggregate {
            Some(totals) => body.push_str(&format!(
                ", plus one summary entry (taxable ₹ {}, tax ₹ {}).",
                money(totals.taxable_value),
                money(totals.taxes.total())
            )),
            None => body.push('.'),
        }
        let prompt = Self::confirmation_prompt(run, body, screenshot, "Reply yes to submit or no to cancel.");
        self.park(run, QuestionKind::Confirmation, prompt).await
    }

    /// Enter ledger rows: counterparties with a tax-ID one by one, the rest
    /// summed into a single entry
    pub async fn enter_ledger_rows(
        &mut self,
        run: &mut WorkflowRun,
        page: &Interactor<'_>,
        invoices: &LedgerSnapshot,
    ) -> Result<EntrySummary> {
        let selectors = &self.portal().selectors;
        let action = page.timeouts().action();
        let parts = ledger::partition(invoices);
        let mut summary = EntrySummary {
            aggregate: parts.aggregate_totals(),
            ..Default::default()
        };

        for row in &parts.grouped {
            let counterparty = row.counterparty_id().unwrap_or_default();
            let idx = self
                .step(run, format!("Adding invoice {} for {}", row.document_no(), counterparty))
                .await?;
            summary.grouped_entries += 1;

            let complete = page.attempt(&Strategy::click_chain(&selectors.grouped_add)).await.succeeded()
                && page.fill_by_selector(&selectors.grouped_tax_id, counterparty, action).await
                && page.fill_by_selector(&selectors.grouped_number, row.document_no(), action).await
                && page
                    .fill_by_selector(&selectors.grouped_value, &money(row.amounts().total), action)
                    .await
                && page.attempt(&Strategy::click_chain(&selectors.grouped_save)).await.succeeded();
            if !complete {
                summary.incomplete += 1;
                self.degrade(run, idx, format!("invoice {} not saved; add it in the browser", row.document_no()))
                    .await;
            }
        }

        if let Some(totals) = summary.aggregate {
            let idx = self
                .step(
                    run,
                    format!(
                        "Adding one summary entry for {} invoice(s) without a tax-ID (taxable ₹ {})",
                        parts.aggregate.len(),
                        money(totals.taxable_value)
                    ),
                )
                .await?;
            let complete = page.attempt(&Strategy::click_chain(&selectors.aggregate_add)).await.succeeded()
                && page
                    .fill_by_selector(&selectors.aggregate_taxable, &money(totals.taxable_value), action)
                    .await
                && page
                    .fill_by_selector(&selectors.aggregate_igst, &money(totals.taxes.igst), action)
                    .await
                && page
                    .fill_by_selector(&selectors.aggregate_cgst, &money(totals.taxes.cgst), action)
                    .await
                && page
                    .fill_by_selector(&selectors.aggregate_sgst, &money(totals.taxes.sgst), action)
                    .await
                && page.attempt(&Strategy::click_chain(&selectors.aggregate_save)).await.succeeded();
            if !complete {
                summary.incomplete += 1;
                self.degrade(run, idx, "summary entry not saved; add it in the browser").await;
            }
        }

        Ok(summary)
    }

    // -----------------------------------------------------------------------
    // FileReturnB
    // -----------------------------------------------------------------------

    async fn fill_section(
        &mut self,
        run: &mut WorkflowRun,
        page: &Interactor<'_>,
        description: String,
        open: &ClickTarget,
        fields: &[(&str, f64)],
        confirm: &ClickTarget,
    ) -> Result<()> {
        let action = page.timeouts().action();
        let idx = self.step(run, description).await?;
        if !page.attempt(&Strategy::click_chain(open)).await.succeeded() {
            self.degrade(run, idx, format!("'{}' not opened; fill it in the browser", open.label))
                .await;
            return Ok(());
        }
        let mut missing = Vec::new();
        for (selector, value) in fields {
            if !page.fill_by_selector(selector, &money(*value), action).await {
                missing.push(*selector);
            }
        }
        let confirmed = page.attempt(&Strategy::click_chain(confirm)).await.succeeded();
        if !missing.is_empty() || !confirmed {
            let mut note = format!("'{}' incomplete", open.label);
            if !missing.is_empty() {
                note.push_str(&format!(" (fields {})", missing.join(", ")));
            }
            if !confirmed {
                note.push_str(", not confirmed");
            }
            self.degrade(run, idx, note).await;
        }
        Ok(())
    }

    /// Prepare the summary return up to the submit confirmation
    pub async fn file_return_b(&mut self, run: &mut WorkflowRun) -> Result<RunProgress> {
        let WorkflowParams::FileReturnB { period, figures } = run.params.clone() else {
            return Err(AutopilotError::Workflow(format!("{} is not a GSTR-3B run", run.kind)));
        };
        let page = self.begin(run)?;
        let portal = self.portal();
        let selectors = &portal.selectors;

        if !self.open_period(run, &page, &period).await? {
            return Ok(RunProgress::Finished(WorkflowStatus::Failed));
        }
        self.open_preparation(
            run,
            &page,
            "Opening GSTR-3B preparation",
            &selectors.return_b_prepare,
            &portal.return_b_url,
        )
        .await?;

        let ReturnBFigures {
            taxable_sales,
            liability,
            credit,
            net_payable,
        } = figures;
        self.fill_section(
            run,
            &page,
            format!(
                "Filling outward liability: taxable ₹ {}, IGST ₹ {}, CGST ₹ {}, SGST ₹ {}",
                money(taxable_sales),
                money(liability.igst),
                money(liability.cgst),
                money(liability.sgst)
            ),
            &selectors.liability_open,
            &[
                (selectors.liability_taxable.as_str(), taxable_sales),
                (selectors.liability_igst.as_str(), liability.igst),
                (selectors.liability_cgst.as_str(), liability.cgst),
                (selectors.liability_sgst.as_str(), liability.sgst),
            ],
            &selectors.liability_confirm,
        )
        .await?;
        self.fill_section(
            run,
            &page,
            format!(
                "Filling eligible input credit: IGST ₹ {}, CGST ₹ {}, SGST ₹ {}",
                money(credit.igst),
                money(credit.cgst),
                money(credit.sgst)
            ),
            &selectors.credit_open,
            &[
                (selectors.credit_igst.as_str(), credit.igst),
                (selectors.credit_cgst.as_str(), credit.cgst),
                (selectors.credit_sgst.as_str(), credit.sgst),
            ],
            &selectors.credit_confirm,
        )
        .await?;

        self.preview(run, &page, &selectors.return_b_preview).await?;
        let screenshot = self.screenshot_step(run, &page, "gstr3b-preview").await?;

        let body = format!(
            "GSTR-3B for {} is ready for review: tax ₹ {} against credit ₹ {}, net payable ₹ {}.",
            period,
            money(liability.total()),
            money(credit.total()),
            money(net_payable)
        );
        let prompt = Self::confirmation_prompt(run, body, screenshot, "Reply yes to submit or no to cancel.");
        self.park(run, QuestionKind::Confirmation, prompt).await
    }

    // -----------------------------------------------------------------------
    // CreatePayment
    // -----------------------------------------------------------------------

    /// Fill a payment challan and ask the operator to finish it
    pub async fn create_payment(&mut self, run: &mut WorkflowRun) -> Result<RunProgress> {
        let WorkflowParams::CreatePayment { amount } = run.params else {
            return Err(AutopilotError::Workflow(format!("{} is not a payment run", run.kind)));
        };
        let page = self.begin(run)?;
        let portal = self.portal();
        let action = page.timeouts().action();

        let idx = self.step(run, "Opening the challan creation page").await?;
        if !page.navigate(&portal.payment_url).await {
            return self.fail(run, idx, format!("could not load {}", portal.payment_url));
        }
        if !page.wait_for_idle().await {
            self.degrade(run, idx, "page still loading").await;
        }

        let split: TaxSplit = TaxSplit::domestic(amount);
        let idx = self
            .step(run, format!("Filling CGST ₹ {} and SGST ₹ {}", money(split.cgst), money(split.sgst)))
            .await?;
        let cgst = page
            .fill_by_selector(&portal.selectors.payment_cgst, &money(split.cgst), action)
            .await;
        let sgst = page
            .fill_by_selector(&portal.selectors.payment_sgst, &money(split.sgst), action)
            .await;
        if !(cgst && sgst) {
            self.degrade(run, idx, "tax fields not filled; enter the amounts in the browser").await;
        }

        let screenshot = self.screenshot_step(run, &page, "challan").await?;
        let body = format!("Challan for ₹ {} is filled in.", money(amount));
        let prompt = Self::confirmation_prompt(
            run,
            body,
            screenshot,
            "Choose the payment method in the browser and generate the challan, then reply yes to acknowledge or no to cancel.",
        );
        self.park(run, QuestionKind::Confirmation, prompt).await
    }

    /// The operator finished the challan in the browser
    pub async fn acknowledge_payment(&mut self, run: &mut WorkflowRun) -> Result<RunProgress> {
        self.step(run, "Challan generation acknowledged").await?;
        self.complete(run)
    }

    // -----------------------------------------------------------------------
    // Submission tail
    // -----------------------------------------------------------------------

    /// Park a fresh run directly at the submit confirmation
    pub async fn resume_at_submit(&mut self, run: &mut WorkflowRun) -> Result<RunProgress> {
        self.begin(run)?;
        let label = describe(&run.params);
        self.step(run, format!("Resuming {} at the submit step", label)).await?;
        let prompt = format!(
            "The prepared return is still on the portal. Submit {} now? Reply yes to submit or no to cancel.",
            label
        );
        self.park(run, QuestionKind::Confirmation, prompt).await
    }

    /// Submit the return and ask for the one-time code
    pub async fn submit(&mut self, run: &mut WorkflowRun) -> Result<RunProgress> {
        let page = self.page()?;
        let selectors = &self.portal().selectors;

        let idx = self.step(run, "Submitting the return").await?;
        self.click_or_degrade(run, &page, idx, &selectors.submit).await;

        let idx = self.step(run, "Choosing verification by one-time code").await?;
        self.click_or_degrade(run, &page, idx, &selectors.verify_method).await;

        self.park(
            run,
            QuestionKind::OneTimeCode,
            "Enter the one-time code sent to your registered mobile number and email.".to_string(),
        )
        .await
    }

    /// Enter the code and wait for the portal to accept it. A rejected code
    /// fails the run; there is no retry here.
    pub async fn confirm_code(&mut self, run: &mut WorkflowRun, code: &str) -> Result<RunProgress> {
        let page = self.page()?;
        let selectors = &self.portal().selectors;
        let timeouts = page.timeouts();

        let idx = self.step(run, "Entering the one-time code").await?;
        if !page.fill_by_selector(&selectors.otp_input, code, timeouts.action()).await {
            self.degrade(run, idx, "code field not found").await;
        }

        let idx = self.step(run, "Verifying the code").await?;
        self.click_or_degrade(run, &page, idx, &selectors.verify).await;

        let idx = self.step(run, "Waiting for the portal to confirm the filing").await?;
        if page.wait_for_selector(&selectors.verify_success, timeouts.verify()).await {
            self.complete(run)
        } else {
            self.fail(run, idx, "the portal did not accept the code")
        }
    }
}
