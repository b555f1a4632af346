//! Out-of-band delivery of confirmation codes.

use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::code::ConfirmationCode;

#[derive(Debug, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait ConfirmationNotifier: Send + Sync {
    async fn send_code(&self, email: &str, code: ConfirmationCode) -> Result<(), NotifyError>;
}

/// Records that a code went out. The code itself is never logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl ConfirmationNotifier for LogNotifier {
    async fn send_code(&self, email: &str, _code: ConfirmationCode) -> Result<(), NotifyError> {
        tracing::info!(email = %email, "confirmation code issued");
        Ok(())
    }
}

/// Keeps every delivered code in memory. Intended for tests and local runs.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, ConfirmationCode)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent code delivered to `email` (case-insensitive).
    pub fn last_code_for(&self, email: &str) -> Option<ConfirmationCode> {
        if let Ok(sent) = self.sent.lock() {
            sent.iter()
                .rev()
                .find(|(to, _)| to.eq_ignore_ascii_case(email))
                .map(|(_, code)| *code)
        } else {
            None
        }
    }

    pub fn sent_count(&self) -> usize {
        if let Ok(sent) = self.sent.lock() { sent.len() } else { 0 }
    }
}

#[async_trait]
impl ConfirmationNotifier for RecordingNotifier {
    async fn send_code(&self, email: &str, code: ConfirmationCode) -> Result<(), NotifyError> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((email.to_string(), code));
            Ok(())
        } else {
            Err(NotifyError("recording notifier poisoned".into()))
        }
    }
}
