//! Core type definitions for the autopilot

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Ledger (consumed, read-only)
// ---------------------------------------------------------------------------

/// Tax split across the three components
///
/// `igst` is the interstate component; `cgst` and `sgst` are the two
/// intrastate (domestic) components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TaxSplit {
    pub igst: f64,
    pub cgst: f64,
    pub sgst: f64,
}

impl TaxSplit {
    pub fn new(igst: f64, cgst: f64, sgst: f64) -> Self {
        Self { igst, cgst, sgst }
    }

    /// Split an amount evenly across the two domestic components
    pub fn domestic(amount: f64) -> Self {
        Self {
            igst: 0.0,
            cgst: amount / 2.0,
            sgst: amount / 2.0,
        }
    }

    pub fn total(&self) -> f64 {
        self.igst + self.cgst + self.sgst
    }
}

impl std::ops::Add for TaxSplit {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            igst: self.igst + rhs.igst,
            cgst: self.cgst + rhs.cgst,
            sgst: self.sgst + rhs.sgst,
        }
    }
}

impl std::iter::Sum for TaxSplit {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |acc, t| acc + t)
    }
}

/// Monetary columns shared by invoice and expense rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RowAmounts {
    pub taxable_value: f64,
    pub taxes: TaxSplit,
    pub total: f64,
}

impl std::ops::Add for RowAmounts {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            taxable_value: self.taxable_value + rhs.taxable_value,
            taxes: self.taxes + rhs.taxes,
            total: self.total + rhs.total,
        }
    }
}

/// Raw invoice/expense record as stored by the ledger collaborator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    #[serde(default)]
    pub date: String,
    #[serde(default, alias = "invoice_no")]
    pub document_no: String,
    #[serde(default, alias = "customer_name", alias = "vendor_name")]
    pub counterparty: String,
    #[serde(default)]
    pub gstin: Option<String>,
    #[serde(default)]
    pub taxable_value: f64,
    #[serde(default)]
    pub igst: f64,
    #[serde(default)]
    pub cgst: f64,
    #[serde(default)]
    pub sgst: f64,
    #[serde(default, alias = "total_amount")]
    pub total: f64,
}

/// Ledger row, classified once at ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum LedgerRow {
    /// Counterparty identified by tax-ID: filed individually
    WithCounterpartyId {
        counterparty_id: String,
        document_no: String,
        date: String,
        amounts: RowAmounts,
    },
    /// Counterparty not identified: summed into one entry
    WithoutCounterpartyId {
        document_no: String,
        date: String,
        amounts: RowAmounts,
    },
}

impl LedgerRow {
    /// Classify a raw record. A blank tax-ID counts as absent.
    pub fn from_record(record: LedgerRecord) -> Self {
        let amounts = RowAmounts {
            taxable_value: record.taxable_value,
            taxes: TaxSplit::new(record.igst, record.cgst, record.sgst),
            total: record.total,
        };

        match record.gstin.map(|id| id.trim().to_string()) {
            Some(id) if !id.is_empty() => Self::WithCounterpartyId {
                counterparty_id: id,
                document_no: record.document_no,
                date: record.date,
                amounts,
            },
            _ => Self::WithoutCounterpartyId {
                document_no: record.document_no,
                date: record.date,
                amounts,
            },
        }
    }

    pub fn amounts(&self) -> &RowAmounts {
        match self {
            Self::WithCounterpartyId { amounts, .. } | Self::WithoutCounterpartyId { amounts, .. } => {
                amounts
            }
        }
    }

    pub fn document_no(&self) -> &str {
        match self {
            Self::WithCounterpartyId { document_no, .. }
            | Self::WithoutCounterpartyId { document_no, .. } => document_no,
        }
    }

    pub fn counterparty_id(&self) -> Option<&str> {
        match self {
            Self::WithCounterpartyId { counterparty_id, .. } => Some(counterparty_id),
            Self::WithoutCounterpartyId { .. } => None,
        }
    }
}

/// Ordered, read-only collection of ledger rows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub rows: Vec<LedgerRow>,
}

impl LedgerSnapshot {
    pub fn from_records(records: impl IntoIterator<Item = LedgerRecord>) -> Self {
        Self {
            rows: records.into_iter().map(LedgerRow::from_record).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn taxable_total(&self) -> f64 {
        self.rows.iter().map(|r| r.amounts().taxable_value).sum()
    }

    pub fn tax_totals(&self) -> TaxSplit {
        self.rows.iter().map(|r| r.amounts().taxes).sum()
    }
}

// ---------------------------------------------------------------------------
// Notices (produced, append-only)
// ---------------------------------------------------------------------------

/// Notification record status, owned by the notification store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoticeStatus {
    #[default]
    Pending,
    Acknowledged,
    Paid,
}

impl std::fmt::Display for NoticeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Acknowledged => write!(f, "Acknowledged"),
            Self::Paid => write!(f, "Paid"),
        }
    }
}

/// A stored notification record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoticeRecord {
    pub id: u64,
    pub date: String,
    #[serde(rename = "type")]
    pub notice_type: String,
    pub description: String,
    pub action_required: String,
    #[serde(default)]
    pub status: NoticeStatus,
}

/// Append request for the notification store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNotice {
    pub date: String,
    pub notice_type: String,
    pub description: String,
    pub action_required: String,
}

impl NewNotice {
    /// Record for a notice scraped from the portal
    pub fn from_candidate(candidate: &NoticeCandidate, today: NaiveDate) -> Self {
        let date = if candidate.date.trim().is_empty() {
            today.to_string()
        } else {
            candidate.date.trim().to_string()
        };
        Self {
            date,
            notice_type: "Portal Notice".to_string(),
            description: format!("{} (ID: {})", candidate.description.trim(), candidate.notice_id.trim()),
            action_required: candidate.notice_type.clone(),
        }
    }

    /// Record tracking a generated payment instrument
    pub fn challan(amount: f64, today: NaiveDate) -> Self {
        Self {
            date: today.to_string(),
            notice_type: "Challan".to_string(),
            description: format!("Payment challan created - Amount: ₹ {:.2}", amount),
            action_required: "Pay at Bank/Online".to_string(),
        }
    }
}

/// A notice row read from the portal's notices table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoticeCandidate {
    pub notice_id: String,
    pub date: String,
    pub description: String,
    pub notice_type: String,
}

// ---------------------------------------------------------------------------
// Workflows
// ---------------------------------------------------------------------------

/// The four named multi-step procedures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    ViewNotices,
    /// Outward-supply return (GSTR-1)
    FileReturnA,
    /// Periodic summary return (GSTR-3B)
    FileReturnB,
    CreatePayment,
}

impl WorkflowKind {
    /// Whether the workflow ends with a submit + one-time-code tail
    pub fn has_code_step(&self) -> bool {
        matches!(self, Self::FileReturnA | Self::FileReturnB)
    }
}

impl std::fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ViewNotices => write!(f, "view_notices"),
            Self::FileReturnA => write!(f, "file_return_a"),
            Self::FileReturnB => write!(f, "file_return_b"),
            Self::CreatePayment => write!(f, "create_payment"),
        }
    }
}

impl std::str::FromStr for WorkflowKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "view_notices" | "notices" => Ok(Self::ViewNotices),
            "file_return_a" | "return_a" | "gstr1" => Ok(Self::FileReturnA),
            "file_return_b" | "return_b" | "gstr3b" => Ok(Self::FileReturnB),
            "create_payment" | "payment" | "pay" => Ok(Self::CreatePayment),
            _ => Err(format!("Invalid workflow: {}", s)),
        }
    }
}

/// Workflow run status
///
/// Forward order: Pending < Running < AwaitingConfirmation < AwaitingOtp < Completed.
/// Failed and Cancelled are reachable from any non-terminal status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Pending,
    Running,
    AwaitingConfirmation,
    AwaitingOtp,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::AwaitingConfirmation => 2,
            Self::AwaitingOtp => 3,
            Self::Completed | Self::Failed | Self::Cancelled => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Statuses in which a pending question must exist
    pub fn is_awaiting(&self) -> bool {
        matches!(self, Self::AwaitingConfirmation | Self::AwaitingOtp)
    }

    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Failed | Self::Cancelled => true,
            _ => next.rank() > self.rank(),
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::AwaitingConfirmation => write!(f, "awaiting_confirmation"),
            Self::AwaitingOtp => write!(f, "awaiting_otp"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Return period selection on the returns dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilingPeriod {
    /// Financial-year label, e.g. `2024-25`
    pub financial_year: String,
    /// Period label, e.g. `March`
    pub period: String,
}

impl FilingPeriod {
    pub fn new(financial_year: impl Into<String>, period: impl Into<String>) -> Self {
        Self {
            financial_year: financial_year.into(),
            period: period.into(),
        }
    }
}

impl std::fmt::Display for FilingPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.period, self.financial_year)
    }
}

/// Figures entered into the summary return
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReturnBFigures {
    pub taxable_sales: f64,
    /// Tax on outward supplies, as entered in the liability section
    pub liability: TaxSplit,
    /// Input credit, as entered in the credit section
    pub credit: TaxSplit,
    /// `max(0, collected - available)`
    pub net_payable: f64,
}

/// Workflow-specific parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowParams {
    ViewNotices,
    FileReturnA {
        period: FilingPeriod,
        invoices: LedgerSnapshot,
    },
    FileReturnB {
        period: FilingPeriod,
        figures: ReturnBFigures,
    },
    CreatePayment {
        amount: f64,
    },
}

impl WorkflowParams {
    pub fn kind(&self) -> WorkflowKind {
        match self {
            Self::ViewNotices => WorkflowKind::ViewNotices,
            Self::FileReturnA { .. } => WorkflowKind::FileReturnA,
            Self::FileReturnB { .. } => WorkflowKind::FileReturnB,
            Self::CreatePayment { .. } => WorkflowKind::CreatePayment,
        }
    }

    pub fn period(&self) -> Option<&FilingPeriod> {
        match self {
            Self::FileReturnA { period, .. } | Self::FileReturnB { period, .. } => Some(period),
            _ => None,
        }
    }
}

/// Outcome of a single workflow step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Ok,
    /// Targeting failed; the workflow continued without it
    Degraded { note: String },
    Failed { reason: String },
}

/// Audit-trail entry for one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub description: String,
    pub outcome: StepOutcome,
    pub at: DateTime<Utc>,
}

/// One execution of a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub kind: WorkflowKind,
    pub params: WorkflowParams,
    pub status: WorkflowStatus,
    pub steps: Vec<StepRecord>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRun {
    pub fn new(params: WorkflowParams) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind: params.kind(),
            params,
            status: WorkflowStatus::Pending,
            steps: Vec::new(),
            started_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, enforcing forward-only transitions
    pub fn advance(&mut self, next: WorkflowStatus) -> crate::Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(crate::AutopilotError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Append a step record; the description is written before the step runs
    pub fn begin_step(&mut self, description: impl Into<String>) -> usize {
        self.steps.push(StepRecord {
            description: description.into(),
            outcome: StepOutcome::Ok,
            at: Utc::now(),
        });
        self.updated_at = Utc::now();
        self.steps.len() - 1
    }

    pub fn set_outcome(&mut self, index: usize, outcome: StepOutcome) {
        if let Some(step) = self.steps.get_mut(index) {
            step.outcome = outcome;
        }
    }

    pub fn degraded_steps(&self) -> Vec<&StepRecord> {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::Degraded { .. }))
            .collect()
    }

    pub fn short_id(&self) -> String {
        self.id.to_string()[..8].to_string()
    }
}

// ---------------------------------------------------------------------------
// Human input
// ---------------------------------------------------------------------------

/// What kind of reply a pending question expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    /// Yes/no (submit/cancel, or acknowledge)
    Confirmation,
    /// One-time verification code
    OneTimeCode,
}

/// The single open question to the operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingQuestion {
    pub id: Uuid,
    pub kind: QuestionKind,
    pub prompt: String,
    pub created_at: DateTime<Utc>,
    /// Absent until resolved
    pub answer: Option<String>,
}

impl PendingQuestion {
    pub fn new(kind: QuestionKind, prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            prompt: prompt.into(),
            created_at: Utc::now(),
            answer: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Serializable view of the browser session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub authenticated: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl SessionInfo {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            authenticated: false,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

impl Default for SessionInfo {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(gstin: Option<&str>, taxable: f64) -> LedgerRecord {
        LedgerRecord {
            document_no: "INV-1".to_string(),
            gstin: gstin.map(String::from),
            taxable_value: taxable,
            cgst: taxable * 0.09,
            sgst: taxable * 0.09,
            total: taxable * 1.18,
            ..Default::default()
        }
    }

    #[test]
    fn test_row_classified_at_ingestion() {
        let row = LedgerRow::from_record(record(Some("29ABCDE1234F1Z5"), 100.0));
        assert_eq!(row.counterparty_id(), Some("29ABCDE1234F1Z5"));

        let row = LedgerRow::from_record(record(None, 100.0));
        assert!(row.counterparty_id().is_none());
    }

    #[test]
    fn test_blank_tax_id_is_absent() {
        let row = LedgerRow::from_record(record(Some("   "), 100.0));
        assert!(matches!(row, LedgerRow::WithoutCounterpartyId { .. }));
    }

    #[test]
    fn test_record_aliases() {
        let json = r#"{"invoice_no":"A-7","customer_name":"Acme","gstin":"","taxable_value":50.0,"total_amount":59.0}"#;
        let rec: LedgerRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.document_no, "A-7");
        assert_eq!(rec.counterparty, "Acme");
        assert_eq!(rec.total, 59.0);
    }

    #[test]
    fn test_status_forward_only() {
        use WorkflowStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(AwaitingConfirmation));
        assert!(AwaitingConfirmation.can_transition_to(AwaitingOtp));
        assert!(AwaitingConfirmation.can_transition_to(Completed));
        assert!(!AwaitingOtp.can_transition_to(Running));
        assert!(!Running.can_transition_to(Running));
        assert!(AwaitingOtp.can_transition_to(Cancelled));
        assert!(Pending.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Cancelled.can_transition_to(Running));
    }

    #[test]
    fn test_run_advance_rejects_backwards() {
        let mut run = WorkflowRun::new(WorkflowParams::CreatePayment { amount: 10.0 });
        assert_eq!(run.kind, WorkflowKind::CreatePayment);
        run.advance(WorkflowStatus::Running).unwrap();
        run.advance(WorkflowStatus::AwaitingConfirmation).unwrap();

        let err = run.advance(WorkflowStatus::Running).unwrap_err();
        assert!(err.is_protocol());
        assert_eq!(run.status, WorkflowStatus::AwaitingConfirmation);
    }

    #[test]
    fn test_notice_from_candidate() {
        let candidate = NoticeCandidate {
            notice_id: "ZA123".to_string(),
            date: "".to_string(),
            description: "Show cause".to_string(),
            notice_type: "Unknown".to_string(),
        };
        let today = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let notice = NewNotice::from_candidate(&candidate, today);
        assert_eq!(notice.date, "2025-03-01");
        assert_eq!(notice.notice_type, "Portal Notice");
        assert_eq!(notice.description, "Show cause (ID: ZA123)");
        assert_eq!(notice.action_required, "Unknown");
    }

    #[test]
    fn test_workflow_kind_parse() {
        assert_eq!("gstr1".parse::<WorkflowKind>().unwrap(), WorkflowKind::FileReturnA);
        assert_eq!("file-return-b".parse::<WorkflowKind>().unwrap(), WorkflowKind::FileReturnB);
        assert!("dance".parse::<WorkflowKind>().is_err());
        assert!(WorkflowKind::FileReturnB.has_code_step());
        assert!(!WorkflowKind::CreatePayment.has_code_step());
    }
}
