//! Notification dispatcher
//!
//! Every sink is best-effort: a failed publish, status post or chat message
//! is logged and never changes the run's persisted outcome.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::bridge::{ChatMessage, ChatSender, CommitStatus, LiveBus, VcsAdapter};
use crate::ci::{Run, RunId, RunKind, RunStatus};

/// Topic every live status event is published on
pub const STATUS_TOPIC: &str = "zeroci_status";

/// Commit-status context of the formatting check
pub const STYLE_STATUS_CONTEXT: &str = "Black-Formatting";

/// Compact live-update payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub id: RunId,
    pub status: RunStatus,
    #[serde(flatten)]
    pub kind: RunKind,
    pub timestamp: DateTime<Utc>,
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,
}

impl StatusEvent {
    pub fn from_run(run: &Run, domain: &str) -> Self {
        Self {
            id: run.id.clone(),
            status: run.status,
            kind: run.kind.clone(),
            timestamp: run.timestamp,
            link: run.link(domain),
            triggered_by: run.meta.triggered_by.clone(),
        }
    }
}

/// Chat text for a finished run
///
/// Anything other than success or failure reads as errored.
pub fn report_message(status: RunStatus, kind: &RunKind) -> String {
    let subject = match kind {
        RunKind::Project { name } => format!("{} tests", name),
        _ => "Run".to_string(),
    };
    match status {
        RunStatus::Success => format!("✅ {} passed", subject),
        RunStatus::Failure => format!("❌ {} failed", subject),
        _ => format!("⛔️ {} errored", subject),
    }
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    vcs: Arc<dyn VcsAdapter>,
    chat: Arc<dyn ChatSender>,
    bus: Arc<dyn LiveBus>,
    domain: String,
    status_context: String,
}

impl NotificationDispatcher {
    pub fn new(
        vcs: Arc<dyn VcsAdapter>,
        chat: Arc<dyn ChatSender>,
        bus: Arc<dyn LiveBus>,
        domain: impl Into<String>,
        status_context: impl Into<String>,
    ) -> Self {
        Self {
            vcs,
            chat,
            bus,
            domain: domain.into(),
            status_context: status_context.into(),
        }
    }

    async fn publish(&self, topic: &str, event: &StatusEvent) {
        let payload = match serde_json::to_value(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(topic, error = %e, "Couldn't encode status event");
                return;
            }
        };
        if let Err(e) = self.bus.publish(topic, payload).await {
            warn!(topic, run_id = %event.id, error = %e, "Couldn't publish status event");
        }
    }

    /// Announce a freshly created run to live viewers
    ///
    /// Scheduled runs are also announced on their schedule's own topic.
    pub async fn publish_created(&self, run: &Run) {
        let event = StatusEvent::from_run(run, &self.domain);
        self.publish(STATUS_TOPIC, &event).await;
        if let Some(schedule) = run.kind.schedule_name() {
            self.publish(schedule, &event).await;
        }
    }

    /// Post the formatting-check result on the run's commit
    pub async fn post_style_status(&self, run: &Run, status: RunStatus) {
        let (Some(repo), Some(commit)) = (run.kind.repo(), run.kind.commit()) else {
            return;
        };
        let commit_status = CommitStatus {
            state: status,
            link: run.link(&self.domain),
            context: STYLE_STATUS_CONTEXT.to_string(),
        };
        if let Err(e) = self.vcs.post_status(repo, commit, &commit_status).await {
            warn!(run_id = %run.id, repo, error = %e, "Couldn't post formatting status");
        }
    }

    /// Report a finished run on every sink
    pub async fn dispatch(&self, run: &Run) {
        let link = run.link(&self.domain);

        self.publish(STATUS_TOPIC, &StatusEvent::from_run(run, &self.domain))
            .await;

        if run.kind.posts_commit_status() {
            if let (Some(repo), Some(commit)) = (run.kind.repo(), run.kind.commit()) {
                let commit_status = CommitStatus {
                    state: run.status,
                    link: link.clone(),
                    context: self.status_context.clone(),
                };
                match self.vcs.post_status(repo, commit, &commit_status).await {
                    Ok(()) => info!(run_id = %run.id, status = %run.status, "Posted run status"),
                    Err(e) => warn!(run_id = %run.id, repo, error = %e, "Couldn't post run status"),
                }
            }
        }

        let message = ChatMessage {
            text: report_message(run.status, &run.kind),
            link,
            repo: run.kind.repo().map(str::to_string),
            branch: run.kind.branch().map(str::to_string),
            commit: run.kind.commit().map(str::to_string),
            committer: run.kind.committer().map(str::to_string),
            bin_link: run.bin_link(&self.domain),
            triggered_by: run.meta.triggered_by.clone(),
        };
        match self.chat.send(&message).await {
            Ok(()) => info!(run_id = %run.id, text = %message.text, "Sent chat notification"),
            Err(e) => warn!(run_id = %run.id, error = %e, "Couldn't send chat notification"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ci::RunMeta;

    #[test]
    fn test_report_message() {
        let scheduled = RunKind::Scheduled {
            schedule_name: "nightly".to_string(),
        };
        assert_eq!(report_message(RunStatus::Success, &scheduled), "✅ Run passed");
        assert_eq!(report_message(RunStatus::Failure, &scheduled), "❌ Run failed");
        assert_eq!(report_message(RunStatus::Error, &scheduled), "⛔️ Run errored");
        assert_eq!(report_message(RunStatus::Pending, &scheduled), "⛔️ Run errored");

        let project = RunKind::Project {
            name: "js-sdk".to_string(),
        };
        assert_eq!(report_message(RunStatus::Success, &project), "✅ js-sdk tests passed");
    }

    #[test]
    fn test_status_event_payload() {
        let run = Run::new(
            RunId::from("r1"),
            RunKind::Scheduled {
                schedule_name: "nightly".to_string(),
            },
            RunMeta::default(),
        );
        let payload = serde_json::to_value(StatusEvent::from_run(&run, "https://ci")).unwrap();

        assert_eq!(payload["id"], "r1");
        assert_eq!(payload["status"], "pending");
        assert_eq!(payload["type"], "scheduled");
        assert_eq!(payload["schedule_name"], "nightly");
        assert_eq!(payload["link"], "https://ci/schedules/nightly?id=r1");
        assert!(payload.get("triggered_by").is_none());
    }
}
