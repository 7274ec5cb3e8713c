//! Webhook notification dispatch for raised alerts.
//!
//! Fire-and-forget HTTP POST of each alert as JSON.

use serde_json::Value;

use minetrack_core::types::{Alert, AlertPriority};

/// Dispatches alerts to a webhook URL via HTTP POST.
#[derive(Clone)]
pub struct WebhookDispatcher {
    url: String,
    min_priority: AlertPriority,
    client: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new(url: &str) -> Self {
        WebhookDispatcher {
            url: url.to_string(),
            min_priority: AlertPriority::Low,
            client: reqwest::Client::new(),
        }
    }

    /// Only forward alerts at or above `priority`.
    pub fn with_min_priority(mut self, priority: AlertPriority) -> Self {
        self.min_priority = priority;
        self
    }

    pub fn accepts(&self, alert: &Alert) -> bool {
        alert.priority >= self.min_priority
    }

    /// Fire-and-forget POST of an alert. Must be called inside a tokio runtime.
    pub fn notify(&self, alert: &Alert, device_name: &str) {
        if !self.accepts(alert) {
            return;
        }
        let payload = payload(alert, device_name);
        let client = self.client.clone();
        let url = self.url.clone();
        let alert_id = alert.id.clone();

        tokio::spawn(async move {
            match client.post(&url).json(&payload).send().await {
                Ok(resp) if !resp.status().is_success() => {
                    tracing::warn!(alert = %alert_id, status = %resp.status(), "webhook rejected alert");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(alert = %alert_id, error = %e, "webhook POST failed"),
            }
        });
    }
}

fn payload(alert: &Alert, device_name: &str) -> Value {
    serde_json::json!({
        "id": alert.id,
        "type": alert.alert_type,
        "priority": alert.priority,
        "device_id": alert.device_id,
        "device_name": device_name,
        "message": alert.message,
        "geofence_id": alert.geofence_id,
        "lat": alert.location.map(|l| l.lat),
        "lng": alert.location.map(|l| l.lng),
        "depth": alert.location.map(|l| l.depth),
        "timestamp": alert.timestamp,
    })
}
