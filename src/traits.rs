//! Collaborator seams
//!
//! Second-factor verification and trustee notification live outside this
//! crate. The coordinator only sees these traits; the reference
//! implementations here back the CLI and tests.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Mutex;

/// Checks a numeric second-factor code for an owner
pub trait MfaVerifier: Send + Sync {
    fn verify(&self, owner_id: &str, code: u32) -> Result<bool>;
}

/// Delivers trustee notifications
pub trait TrusteeNotifier: Send + Sync {
    fn notify_share_created(
        &self,
        trustee_id: &str,
        wallet_id: &str,
        index: u32,
        total: u32,
    ) -> Result<()>;

    fn notify_recovery_attempt(&self, trustee_id: &str, wallet_id: &str) -> Result<()>;

    fn notify_recovery_complete(&self, trustee_id: &str, wallet_id: &str) -> Result<()>;
}

/// Accepts exactly one configured code per owner
#[derive(Debug, Default, Clone)]
pub struct StaticMfaVerifier {
    codes: HashMap<String, u32>,
}

impl StaticMfaVerifier {
    pub fn new(codes: HashMap<String, u32>) -> Self {
        Self { codes }
    }

    pub fn with_code(mut self, owner_id: &str, code: u32) -> Self {
        self.codes.insert(owner_id.to_string(), code);
        self
    }
}

impl MfaVerifier for StaticMfaVerifier {
    fn verify(&self, owner_id: &str, code: u32) -> Result<bool> {
        Ok(self.codes.get(owner_id) == Some(&code))
    }
}

/// Emits notifications as structured log events
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl TrusteeNotifier for LogNotifier {
    fn notify_share_created(
        &self,
        trustee_id: &str,
        wallet_id: &str,
        index: u32,
        total: u32,
    ) -> Result<()> {
        tracing::info!(trustee = trustee_id, wallet = wallet_id, index, total, "trustee assigned recovery share");
        Ok(())
    }

    fn notify_recovery_attempt(&self, trustee_id: &str, wallet_id: &str) -> Result<()> {
        tracing::info!(trustee = trustee_id, wallet = wallet_id, "recovery attempt underway");
        Ok(())
    }

    fn notify_recovery_complete(&self, trustee_id: &str, wallet_id: &str) -> Result<()> {
        tracing::info!(trustee = trustee_id, wallet = wallet_id, "recovery completed");
        Ok(())
    }
}

/// A notification as recorded by [`NotificationLog`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    ShareCreated {
        trustee_id: String,
        wallet_id: String,
        index: u32,
        total: u32,
    },
    RecoveryAttempt {
        trustee_id: String,
        wallet_id: String,
    },
    RecoveryComplete {
        trustee_id: String,
        wallet_id: String,
    },
}

/// Collects notifications in memory, for outbox-style delivery or tests
#[derive(Debug, Default)]
pub struct NotificationLog {
    sent: Mutex<Vec<Notification>>,
}

impl NotificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far, in order
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Remove and return everything recorded so far
    pub fn drain(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .map(|mut s| std::mem::take(&mut *s))
            .unwrap_or_default()
    }

    fn push(&self, notification: Notification) -> Result<()> {
        self.sent
            .lock()
            .map_err(|_| anyhow::anyhow!("notification log lock poisoned"))?
            .push(notification);
        Ok(())
    }
}

impl TrusteeNotifier for NotificationLog {
    fn notify_share_created(
        &self,
        trustee_id: &str,
        wallet_id: &str,
        index: u32,
        total: u32,
    ) -> Result<()> {
        self.push(Notification::ShareCreated {
            trustee_id: trustee_id.to_string(),
            wallet_id: wallet_id.to_string(),
            index,
            total,
        })
    }

    fn notify_recovery_attempt(&self, trustee_id: &str, wallet_id: &str) -> Result<()> {
        self.push(Notification::RecoveryAttempt {
            trustee_id: trustee_id.to_string(),
            wallet_id: wallet_id.to_string(),
        })
    }

    fn notify_recovery_complete(&self, trustee_id: &str, wallet_id: &str) -> Result<()> {
        self.push(Notification::RecoveryComplete {
            trustee_id: trustee_id.to_string(),
            wallet_id: wallet_id.to_string(),
        })
    }
}
