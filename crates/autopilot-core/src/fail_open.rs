//! Fail-open utilities for side channels
//!
//! Screenshots, the activity log and notification appends are conveniences
//! around a workflow, never part of it. A failure there is logged and the
//! workflow keeps going.
//!
//! DO NOT use fail-open for:
//! - Browser steps (they have their own fallback policy)
//! - Gate bookkeeping (protocol errors must surface)
//! - Workflow status changes (state)

use std::future::Future;
use tracing::warn;

use crate::Result;

/// Execute an operation that should fail open
///
/// Logs the error via `tracing::warn!` on failure and returns `None`.
///
/// ```no_run
/// use autopilot_core::fail_open::fail_open;
/// use autopilot_core::Result;
///
/// async fn append_audit_line() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let written = fail_open("activity_logger", || append_audit_line()).await;
///     // written is None if the append failed
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}

/// Like `fail_open`, retrying up to `max_attempts` times
///
/// Waits `100ms * attempt` between attempts.
pub async fn fail_open_with_retries<F, Fut, T>(
    operation_name: &str,
    mut f: F,
    max_attempts: usize,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    for attempt in 1..=max_attempts {
        match f().await {
            Ok(val) => return Some(val),
            Err(e) if attempt == max_attempts => {
                warn!(
                    "{} failed after {} attempts (fail-open): {}",
                    operation_name, max_attempts, e
                );
            }
            Err(e) => {
                warn!(
                    "{} failed (attempt {}/{}): {}",
                    operation_name, attempt, max_attempts, e
                );
                let delay_ms = 100 * attempt as u64;
                tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AutopilotError;

    #[tokio::test]
    async fn test_fail_open_passes_value_through() {
        let result = fail_open("screenshot", || async { Ok::<_, AutopilotError>("shot.png") }).await;
        assert_eq!(result, Some("shot.png"));
    }

    #[tokio::test]
    async fn test_fail_open_swallows_error() {
        let result = fail_open("screenshot", || async {
            Err::<(), _>(AutopilotError::ScreenshotFailed("tab gone".to_string()))
        })
        .await;
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_retries_stop_at_first_success() {
        let mut attempts = 0;
        let result = fail_open_with_retries(
            "notification_store::append",
            || {
                attempts += 1;
                let current = attempts;
                async move {
                    if current < 2 {
                        Err(AutopilotError::Store("locked".to_string()))
                    } else {
                        Ok(current)
                    }
                }
            },
            3,
        )
        .await;
        assert_eq!(result, Some(2));
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn test_retries_give_up() {
        let mut attempts = 0;
        let result = fail_open_with_retries(
            "notification_store::append",
            || {
                attempts += 1;
                async move { Err::<u64, _>(AutopilotError::Store("disk full".to_string())) }
            },
            2,
        )
        .await;
        assert_eq!(result, None);
        assert_eq!(attempts, 2);
    }
}
