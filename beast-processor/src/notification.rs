//! Webhook notification dispatch for liveness events.
//!
//! Fire-and-forget HTTP POST of stall/recovery events as JSON.

use serde_json::Value;
use tracing::warn;

use crate::liveness::LivenessEvent;

/// Dispatches liveness events to a webhook URL via HTTP POST.
#[derive(Clone)]
pub struct WebhookDispatcher {
    url: String,
    client: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new(url: &str) -> Self {
        WebhookDispatcher {
            url: url.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Fire-and-forget POST of a liveness event as JSON.
    pub fn notify(&self, event: &LivenessEvent, timestamp: f64) {
        let payload = event_payload(event, timestamp);
        let client = self.client.clone();
        let url = self.url.clone();

        tokio::spawn(async move {
            let result = client
                .post(&url)
                .json(&payload)
                .send()
                .await
                .and_then(|resp| resp.error_for_status());
            if let Err(e) = result {
                warn!("webhook POST to {url} failed: {e}");
            }
        });
    }
}

fn event_payload(event: &LivenessEvent, timestamp: f64) -> Value {
    serde_json::json!({
        "event": event.name(),
        "silent_for": event.silent_for(),
        "timestamp": timestamp,
    })
}
