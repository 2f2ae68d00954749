//! Activity Logger - Human-readable audit trail in `.autopilot/activity.md`
//!
//! Records, for later review:
//! - Session starts
//! - Workflow runs with their parameters
//! - Every step description, and the steps that degraded
//! - Questions put to the operator
//! - Terminal status of each run

use autopilot_core::fail_open::fail_open;
use autopilot_core::{PendingQuestion, StepOutcome, WorkflowParams, WorkflowRun, WorkflowStatus};
use chrono::Utc;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

/// Activity logger for sessions and workflow runs
#[derive(Debug, Clone)]
pub struct ActivityLogger {
    output_path: PathBuf,
}

impl ActivityLogger {
    /// Create a new activity logger writing into `autopilot_dir`
    pub fn new(autopilot_dir: PathBuf) -> Self {
        Self {
            output_path: autopilot_dir.join("activity.md"),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.output_path
    }

    /// Log the start of a browser session
    ///
    /// This operation is fail-open - logging failures won't crash the tool
    pub async fn log_session_start(&self, username: &str) {
        fail_open("activity_logger::log_session_start", || async {
            if let Some(dir) = self.output_path.parent() {
                tokio::fs::create_dir_all(dir).await?;
            }
            let fresh = !tokio::fs::try_exists(&self.output_path).await.unwrap_or(false);

            let mut content = String::new();
            if fresh {
                content.push_str("# Autopilot Activity Log\n\n");
            }
            content.push_str(&format!(
                "## Session\n**Started**: {}\n**User**: {}\n\n---\n\n",
                Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
                username
            ));

            self.append_internal(&content).await
        })
        .await;
    }

    /// Log the start of a workflow run
    ///
    /// This operation is fail-open - logging failures won't crash the tool
    pub async fn log_run_start(&self, run: &WorkflowRun) {
        fail_open("activity_logger::log_run_start", || async {
            let mut content = format!(
                "### Run {} - {}\n**Started**: {}\n",
                run.short_id(),
                run.kind,
                run.started_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            match &run.params {
                WorkflowParams::ViewNotices => {}
                WorkflowParams::FileReturnA { period, invoices } => {
                    content.push_str(&format!("**Period**: {}\n**Rows**: {}\n", period, invoices.len()));
                }
                WorkflowParams::FileReturnB { period, figures } => {
                    content.push_str(&format!(
                        "**Period**: {}\n**Net payable**: {:.2}\n",
                        period, figures.net_payable
                    ));
                }
                WorkflowParams::CreatePayment { amount } => {
                    content.push_str(&format!("**Amount**: {:.2}\n", amount));
                }
            }
            content.push('\n');

            self.append_internal(&content).await
        })
        .await;
    }

    /// Log a step description, written before the step runs
    ///
    /// This operation is fail-open - logging failures won't crash the tool
    pub async fn log_step(&self, description: &str) {
        fail_open("activity_logger::log_step", || async {
            let content = format!("- {} {}\n", Utc::now().format("%H:%M:%S"), description);
            self.append_internal(&content).await
        })
        .await;
    }

    /// Log a step that continued without its target
    pub async fn log_degraded(&self, note: &str) {
        fail_open("activity_logger::log_degraded", || async {
            self.append_internal(&format!("  - degraded: {}\n", note)).await
        })
        .await;
    }

    /// Log a question put to the operator
    pub async fn log_question(&self, question: &PendingQuestion) {
        fail_open("activity_logger::log_question", || async {
            let content = format!(
                "\n> **Waiting for operator** ({:?}): {}\n\n",
                question.kind,
                question.prompt.replace('\n', "\n> ")
            );
            self.append_internal(&content).await
        })
        .await;
    }

    /// Log the terminal status of a run
    ///
    /// This operation is fail-open - logging failures won't crash the tool
    pub async fn log_run_complete(&self, run: &WorkflowRun) {
        fail_open("activity_logger::log_run_complete", || async {
            let icon = match run.status {
                WorkflowStatus::Completed => "✓",
                WorkflowStatus::Cancelled => "-",
                _ => "✗",
            };

            let mut content = format!(
                "\n**Status**: {} {}\n**Steps**: {} ({} degraded)\n",
                icon,
                run.status,
                run.steps.len(),
                run.degraded_steps().len()
            );
            for step in &run.steps {
                if let StepOutcome::Failed { reason } = &step.outcome {
                    content.push_str(&format!("**Failed at**: {} ({})\n", step.description, reason));
                }
            }
            content.push_str("\n---\n\n");

            self.append_internal(&content).await
        })
        .await;
    }

    /// Append content to the activity log (internal, returns Result for fail_open)
    async fn append_internal(&self, content: &str) -> autopilot_core::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output_path)
            .await?;

        file.write_all(content.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_core::{FilingPeriod, LedgerSnapshot, QuestionKind};
    use tempfile::TempDir;
    use tokio::fs;

    #[tokio::test]
    async fn test_log_session_start_writes_header_once() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join(".autopilot");
        let logger = ActivityLogger::new(dir.clone());

        logger.log_session_start("ACME2026").await;
        logger.log_session_start("ACME2026").await;

        let content = fs::read_to_string(dir.join("activity.md")).await.unwrap();
        assert_eq!(content.matches("# Autopilot Activity Log").count(), 1);
        assert_eq!(content.matches("## Session").count(), 2);
        assert!(content.contains("**User**: ACME2026"));
    }

    #[tokio::test]
    async fn test_log_run() {
        let temp_dir = TempDir::new().unwrap();
        let logger = ActivityLogger::new(temp_dir.path().to_path_buf());

        let mut run = WorkflowRun::new(WorkflowParams::FileReturnA {
            period: FilingPeriod::new("2024-25", "March"),
            invoices: LedgerSnapshot::default(),
        });
        logger.log_run_start(&run).await;

        let idx = run.begin_step("Opening returns dashboard");
        logger.log_step("Opening returns dashboard").await;
        run.set_outcome(
            idx,
            StepOutcome::Degraded {
                note: "period not selected".to_string(),
            },
        );
        logger.log_degraded("period not selected").await;
        logger
            .log_question(&PendingQuestion::new(QuestionKind::Confirmation, "Submit?"))
            .await;
        run.advance(WorkflowStatus::Cancelled).unwrap();
        logger.log_run_complete(&run).await;

        let content = fs::read_to_string(temp_dir.path().join("activity.md")).await.unwrap();
        assert!(content.contains("- file_return_a"));
        assert!(content.contains("**Period**: March 2024-25"));
        assert!(content.contains("Opening returns dashboard"));
        assert!(content.contains("degraded: period not selected"));
        assert!(content.contains("**Waiting for operator** (Confirmation): Submit?"));
        assert!(content.contains("**Status**: - cancelled"));
        assert!(content.contains("(1 degraded)"));
    }

    #[tokio::test]
    async fn test_unwritable_path_is_fail_open() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, "not a directory").await.unwrap();

        let logger = ActivityLogger::new(blocker.join("nested"));
        logger.log_step("this goes nowhere").await;
        logger.log_session_start("user").await;
    }
}
