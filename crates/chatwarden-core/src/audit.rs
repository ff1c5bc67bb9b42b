use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::info;

/// Admin-facing moderation log. Best effort: implementations swallow their
/// own delivery failures.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log_to_admin(&self, text: &str);
}

/// Used when no audit channel is configured.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn log_to_admin(&self, text: &str) {
        info!(audit = %text, "audit log");
    }
}

#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    entries: Mutex<Vec<String>>,
}

impl RecordingAuditSink {
    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn log_to_admin(&self, text: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text.to_owned());
    }
}
