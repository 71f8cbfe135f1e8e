//! Best-effort webhook notifier.
//!
//! Posts Slack/Discord-compatible JSON payloads for terminal job events
//! and newly discovered high-impact findings. Failures are swallowed with
//! a warning; notification can never affect the pipeline.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::warn;

use scanforge_core::model::{Job, JobStatus, Severity};
use scanforge_parsers::ParsedVulnerability;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
        }
    }

    /// One notification per terminal job transition.
    pub async fn notify_job_terminal(&self, job: &Job) {
        let emoji = match job.status {
            JobStatus::Completed => ":white_check_mark:",
            JobStatus::Timeout => ":hourglass:",
            _ => ":x:",
        };
        let mut text = format!("{emoji} Job `{}` ({}) {}", job.id, job.tool_name, job.status);
        if let Some(message) = &job.error_message {
            text.push_str(&format!(" — {message}"));
        }
        self.post(json!({"text": text})).await;
    }

    /// One notification summarising the high/critical findings of a parse.
    pub async fn notify_new_findings(&self, job: &Job, findings: &[ParsedVulnerability]) {
        let serious = findings
            .iter()
            .filter(|v| v.severity >= Severity::High)
            .count();
        if serious == 0 {
            return;
        }
        self.post(json!({
            "text": format!(
                ":rotating_light: {} high/critical finding(s) from {} (job `{}`)",
                serious, job.tool_name, job.id
            ),
        }))
        .await;
    }

    async fn post(&self, payload: Value) {
        if let Err(e) = self.client.post(&self.url).json(&payload).send().await {
            warn!(url = %self.url, "webhook notification failed: {e}");
        }
    }
}
