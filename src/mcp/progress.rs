//! MCP progress notifications.
//!
//! A client opts in by attaching `_meta.progressToken` to a `tools/call`
//! request. Long-running tools then report through a [`ProgressReporter`];
//! the transport writes each notification to the request's stream ahead of
//! the final response.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::mcp::protocol::JsonRpcNotification;

/// Progress token chosen by the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum ProgressToken {
    String(String),
    Number(i64),
}

/// Progress notification params.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressParams {
    pub progress_token: ProgressToken,
    pub progress: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressParams {
    /// Wrap as a `notifications/progress` message.
    pub fn into_notification(self) -> JsonRpcNotification {
        JsonRpcNotification::new(
            "notifications/progress",
            serde_json::to_value(self).ok(),
        )
    }
}

/// Emits progress for one request.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    token: ProgressToken,
    sender: mpsc::UnboundedSender<JsonRpcNotification>,
    total: Option<u64>,
}

impl ProgressReporter {
    pub fn new(
        token: ProgressToken,
        sender: mpsc::UnboundedSender<JsonRpcNotification>,
        total: Option<u64>,
    ) -> Self {
        Self {
            token,
            sender,
            total,
        }
    }

    /// Same token and channel with a different total.
    pub fn with_total(&self, total: u64) -> Self {
        Self {
            total: Some(total),
            ..self.clone()
        }
    }

    /// Send a progress notification. Failures are ignored; the request
    /// stream may already be gone.
    pub fn report(&self, progress: u64, message: Option<&str>) {
        let params = ProgressParams {
            progress_token: self.token.clone(),
            progress,
            total: self.total,
            message: message.map(String::from),
        };
        let _ = self.sender.send(params.into_notification());
    }

    /// Report `progress == total`, if a total is known.
    pub fn complete(&self, message: Option<&str>) {
        if let Some(total) = self.total {
            self.report(total, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params_of(notification: &JsonRpcNotification) -> ProgressParams {
        serde_json::from_value(notification.params.clone().unwrap()).unwrap()
    }

    #[test]
    fn test_report_sends_notification() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter =
            ProgressReporter::new(ProgressToken::String("test".to_string()), tx, Some(4));

        reporter.report(2, Some("Halfway"));

        let notification = rx.try_recv().unwrap();
        assert_eq!(notification.method, "notifications/progress");
        let params = params_of(&notification);
        assert_eq!(params.progress, 2);
        assert_eq!(params.total, Some(4));
        assert_eq!(params.message.as_deref(), Some("Halfway"));
    }

    #[test]
    fn test_complete_requires_total() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = ProgressReporter::new(ProgressToken::Number(1), tx, None);

        reporter.complete(Some("Done"));
        assert!(rx.try_recv().is_err());

        reporter.with_total(3).complete(Some("Done"));
        let params = params_of(&rx.try_recv().unwrap());
        assert_eq!(params.progress, 3);
    }

    #[test]
    fn test_report_after_receiver_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let reporter = ProgressReporter::new(ProgressToken::Number(7), tx, Some(1));
        reporter.report(1, None);
    }

    #[test]
    fn test_progress_params_serialization() {
        let params = ProgressParams {
            progress_token: ProgressToken::Number(1),
            progress: 50,
            total: Some(100),
            message: Some("Working...".to_string()),
        };

        let json = serde_json::to_string(&params).unwrap();
        assert!(json.contains("\"progressToken\":1"));
        assert!(json.contains("\"progress\":50"));
        assert!(json.contains("\"total\":100"));
    }
}
