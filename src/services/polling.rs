//! Ticket polling and change detection.
//!
//! One long-lived task pulls the project's tickets, decides which need
//! (re)validation, and dispatches validation workflows. The interval
//! adapts to the incomplete-ticket backlog; transient platform or engine
//! failures sleep the loop briefly instead of killing it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use assistiq_workflow::{EngineError, StartOptions, WorkflowClient};
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::db_service::DbService;
use super::jira_client::{JiraClient, TicketRef};
use crate::workflows::definitions::VALIDATE_TICKET;

/// Upper bound on tickets pulled per cycle.
const MAX_TICKETS_PER_POLL: usize = 50;
/// Floor for the adaptive interval.
const MIN_INTERVAL: Duration = Duration::from_secs(60);
/// Ceiling for the adaptive interval.
const MAX_INTERVAL: Duration = Duration::from_secs(600);
/// Pause after a connection-class failure.
const RECONNECT_PAUSE: Duration = Duration::from_secs(60);

/// Why a ticket was selected for processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketDisposition {
    /// Never validated before.
    New,
    /// Incomplete and updated since the last validation.
    Stale,
    /// Complete; terminal for the pipeline.
    Skip,
}

/// Classify one ticket against its stored validation state.
pub fn categorize_ticket(
    last_status: Option<&str>,
    ticket_updated_at: Option<DateTime<Utc>>,
    last_validated_at: Option<DateTime<Utc>>,
) -> TicketDisposition {
    match last_status {
        None => TicketDisposition::New,
        Some("incomplete") => match (ticket_updated_at, last_validated_at) {
            (Some(updated), Some(validated)) if updated > validated => TicketDisposition::Stale,
            (Some(_), None) => TicketDisposition::Stale,
            _ => TicketDisposition::Skip,
        },
        Some(_) => TicketDisposition::Skip,
    }
}

/// Adaptive interval from the incomplete backlog size.
pub fn next_interval(base: Duration, incomplete_count: i64) -> Duration {
    let interval = match incomplete_count {
        0 => base,
        1..=4 => base.mul_f64(0.6).max(MIN_INTERVAL),
        5..=14 => base.mul_f64(0.4).max(MIN_INTERVAL),
        _ => MIN_INTERVAL,
    };
    interval.min(MAX_INTERVAL)
}

/// The polling loop and its collaborators.
pub struct PollingService {
    jira: Arc<JiraClient>,
    db: Arc<DbService>,
    engine: Arc<dyn WorkflowClient>,
    task_queue: String,
    project: String,
    base_interval: Duration,
}

impl PollingService {
    pub fn new(
        jira: Arc<JiraClient>,
        db: Arc<DbService>,
        engine: Arc<dyn WorkflowClient>,
        task_queue: String,
        project: String,
        base_interval: Duration,
    ) -> Self {
        Self {
            jira,
            db,
            engine,
            task_queue,
            project,
            base_interval,
        }
    }

    /// Run until the shutdown signal flips. The in-flight iteration always
    /// completes before the loop exits.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            project = %self.project,
            "polling service started, base interval {:?}",
            self.base_interval
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let sleep_for = match self.poll_once().await {
                Ok(interval) => interval,
                Err(e) => {
                    error!("polling cycle failed: {}", e);
                    RECONNECT_PAUSE
                }
            };

            info!("polling cycle complete, next poll in {:?}", sleep_for);
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("polling service stopped");
    }

    /// One polling cycle. Returns the interval before the next one.
    async fn poll_once(&self) -> Result<Duration, anyhow::Error> {
        let tickets = self
            .jira
            .search_project(&self.project, MAX_TICKETS_PER_POLL)
            .await?;
        if tickets.is_empty() {
            info!("no tickets found in project {}", self.project);
            return Ok(self.base_interval);
        }

        let keys: Vec<String> = tickets.iter().map(|t| t.key.clone()).collect();
        let statuses = self.db.get_last_known_statuses(&keys).await?;
        let to_process = self.select_for_processing(&tickets, &statuses).await?;

        info!(
            fetched = tickets.len(),
            to_process = to_process.len(),
            "categorization complete"
        );

        for ticket_key in &to_process {
            if let Err(e) = self.trigger_validation(ticket_key).await {
                warn!(%ticket_key, "failed to trigger validation: {}", e);
                if matches!(e, EngineError::Unavailable(_)) {
                    // Connection-class failure: give the engine a minute.
                    return Ok(RECONNECT_PAUSE);
                }
            }
        }

        let incomplete = self.db.count_incomplete().await?;
        Ok(next_interval(self.base_interval, incomplete))
    }

    async fn select_for_processing(
        &self,
        tickets: &[TicketRef],
        statuses: &HashMap<String, String>,
    ) -> Result<Vec<String>, sqlx::Error> {
        let mut to_process = Vec::new();
        for ticket in tickets {
            let last_status = statuses.get(&ticket.key).map(String::as_str);
            let last_validated = match last_status {
                Some("incomplete") => {
                    self.db.get_last_validation_timestamp(&ticket.key).await?
                }
                _ => None,
            };
            match categorize_ticket(last_status, ticket.updated_at, last_validated) {
                TicketDisposition::New => to_process.push(ticket.key.clone()),
                TicketDisposition::Stale => {
                    warn!(ticket_key = %ticket.key, "ticket updated since validation, re-validating");
                    to_process.push(ticket.key.clone());
                }
                TicketDisposition::Skip => {}
            }
        }
        Ok(to_process)
    }

    async fn trigger_validation(&self, ticket_key: &str) -> Result<(), EngineError> {
        let opts = StartOptions::new(format!("validate-ticket-{ticket_key}"))
            .task_queue(self.task_queue.clone())
            .terminate_if_running();
        self.engine
            .start_workflow(VALIDATE_TICKET, json!({ "ticket_key": ticket_key }), opts)
            .await?;
        info!(ticket_key, "validation workflow triggered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn unknown_tickets_are_new() {
        assert_eq!(
            categorize_ticket(None, Some(ts(100)), None),
            TicketDisposition::New
        );
    }

    #[test]
    fn updated_incomplete_tickets_are_stale() {
        assert_eq!(
            categorize_ticket(Some("incomplete"), Some(ts(200)), Some(ts(100))),
            TicketDisposition::Stale
        );
    }

    #[test]
    fn untouched_incomplete_tickets_are_skipped() {
        assert_eq!(
            categorize_ticket(Some("incomplete"), Some(ts(100)), Some(ts(200))),
            TicketDisposition::Skip
        );
    }

    #[test]
    fn incomplete_without_validation_timestamp_is_stale() {
        assert_eq!(
            categorize_ticket(Some("incomplete"), Some(ts(100)), None),
            TicketDisposition::Stale
        );
    }

    #[test]
    fn complete_tickets_are_terminal() {
        assert_eq!(
            categorize_ticket(Some("complete"), Some(ts(999)), Some(ts(1))),
            TicketDisposition::Skip
        );
    }

    #[test]
    fn new_and_stale_are_disjoint_from_skip() {
        // Exhaustive over the status values the log can hold.
        for status in [None, Some("incomplete"), Some("complete"), Some("error")] {
            let disposition = categorize_ticket(status, Some(ts(200)), Some(ts(100)));
            match status {
                None => assert_eq!(disposition, TicketDisposition::New),
                Some("incomplete") => assert_eq!(disposition, TicketDisposition::Stale),
                _ => assert_eq!(disposition, TicketDisposition::Skip),
            }
        }
    }

    #[test]
    fn interval_adapts_to_backlog() {
        let base = Duration::from_secs(300);
        assert_eq!(next_interval(base, 0), base);
        assert_eq!(next_interval(base, 3), Duration::from_secs(180));
        assert_eq!(next_interval(base, 10), Duration::from_secs(120));
        assert_eq!(next_interval(base, 20), Duration::from_secs(60));
    }

    #[test]
    fn interval_respects_floor_and_ceiling() {
        assert_eq!(next_interval(Duration::from_secs(70), 10), MIN_INTERVAL);
        assert_eq!(next_interval(Duration::from_secs(3600), 0), MAX_INTERVAL);
    }
}
