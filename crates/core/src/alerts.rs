//! Alerting sink — trait for surfacing operational alerts from any module.
//!
//! Modules accept an `Arc<dyn AlertSink>` and raise alerts on quota
//! near-exhaustion, permanent job failure, permanent connection loss, and
//! conversion escalations. Production implementations route to pagers or
//! webhooks; the engine itself only defines the seam.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    pub component: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

pub trait AlertSink: Send + Sync {
    fn raise(&self, alert: Alert);
}

/// No-op sink for modules that don't need alerting wired up.
pub struct NoOpSink;

impl AlertSink for NoOpSink {
    fn raise(&self, _alert: Alert) {}
}

/// Sink that forwards alerts to the structured log at a level matching
/// their severity. Default for the standalone binary.
pub struct TracingSink;

impl AlertSink for TracingSink {
    fn raise(&self, alert: Alert) {
        match alert.severity {
            AlertSeverity::Info => {
                tracing::info!(component = %alert.component, "{}", alert.message)
            }
            AlertSeverity::Warning => {
                tracing::warn!(component = %alert.component, "{}", alert.message)
            }
            AlertSeverity::Critical => {
                tracing::error!(component = %alert.component, "{}", alert.message)
            }
        }
    }
}

/// In-memory sink that captures alerts for testing.
#[derive(Default)]
pub struct CaptureSink {
    alerts: Mutex<Vec<Alert>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            alerts: Mutex::new(Vec::new()),
        }
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().expect("alert mutex poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.alerts.lock().expect("alert mutex poisoned").len()
    }

    pub fn count_severity(&self, severity: AlertSeverity) -> usize {
        self.alerts
            .lock()
            .expect("alert mutex poisoned")
            .iter()
            .filter(|a| a.severity == severity)
            .count()
    }
}

impl AlertSink for CaptureSink {
    fn raise(&self, alert: Alert) {
        self.alerts.lock().expect("alert mutex poisoned").push(alert);
    }
}

/// Convenience builder for an `Alert` stamped with the current time.
pub fn make_alert(
    severity: AlertSeverity,
    component: impl Into<String>,
    message: impl Into<String>,
) -> Alert {
    Alert {
        severity,
        component: component.into(),
        message: message.into(),
        timestamp: Utc::now(),
    }
}

/// Convenience: a no-op alert sink.
pub fn noop_sink() -> Arc<dyn AlertSink> {
    Arc::new(NoOpSink)
}

/// Convenience: a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}

/// Convenience: a log-forwarding sink.
pub fn tracing_sink() -> Arc<dyn AlertSink> {
    Arc::new(TracingSink)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_sink() {
        let sink = capture_sink();
        assert_eq!(sink.count(), 0);

        sink.raise(make_alert(AlertSeverity::Warning, "quota", "80% used"));
        sink.raise(make_alert(AlertSeverity::Critical, "channel", "connection lost"));

        assert_eq!(sink.count(), 2);
        assert_eq!(sink.count_severity(AlertSeverity::Warning), 1);
        assert_eq!(sink.count_severity(AlertSeverity::Critical), 1);

        let alerts = sink.alerts();
        assert_eq!(alerts[0].component, "quota");
        assert_eq!(alerts[1].message, "connection lost");
    }

    #[test]
    fn test_noop_sink() {
        let sink = noop_sink();
        // Should not panic
        sink.raise(make_alert(AlertSeverity::Info, "test", "noop"));
    }
}
