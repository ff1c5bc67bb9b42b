use std::{sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    actions::ChatActions,
    audit::AuditSink,
    blacklist::PhraseStore,
    types::{InboundMessage, UserId},
    violations::ViolationLedger,
};

#[derive(Debug, Clone)]
pub struct ModerationSettings {
    /// Chat or channel where admins read the audit log. Messages posted
    /// there are never moderated.
    pub audit_channel: Option<u64>,
    pub ban_threshold: u32,
    pub warning_ttl: Duration,
}

impl Default for ModerationSettings {
    fn default() -> Self {
        Self {
            audit_channel: None,
            ban_threshold: 2,
            warning_ttl: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationDecision {
    Warn,
    Ban,
}

impl EscalationDecision {
    pub fn for_count(violations: u32, ban_threshold: u32) -> Self {
        if violations >= ban_threshold.max(1) {
            Self::Ban
        } else {
            Self::Warn
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationOutcome {
    Exempt,
    Clean,
    Warned { violations: u32 },
    Banned { violations: u32 },
    BanFailed { violations: u32 },
}

pub struct ModerationPolicy {
    phrases: Arc<PhraseStore>,
    ledger: Arc<ViolationLedger>,
    actions: Arc<dyn ChatActions>,
    audit: Arc<dyn AuditSink>,
    settings: ModerationSettings,
    /// Held from the increment until the escalation finished, so two hits
    /// racing for the same user never both ban.
    escalation: Mutex<()>,
}

impl ModerationPolicy {
    pub fn new(
        phrases: Arc<PhraseStore>,
        ledger: Arc<ViolationLedger>,
        actions: Arc<dyn ChatActions>,
        audit: Arc<dyn AuditSink>,
        settings: ModerationSettings,
    ) -> Self {
        Self {
            phrases,
            ledger,
            actions,
            audit,
            settings,
            escalation: Mutex::new(()),
        }
    }

    /// Screens one inbound message and applies the escalation for a hit.
    /// Every collaborator failure is logged and absorbed; only a failed ban
    /// changes the flow (the counter is then left in place).
    pub async fn moderate(&self, message: InboundMessage) -> ModerationOutcome {
        if self.is_exempt_by_context(&message) {
            return ModerationOutcome::Exempt;
        }

        debug!(
            chat_id = message.message.chat_id(),
            user_id = message.sender_id,
            "screening message"
        );
        if !self.phrases.check_message(&message.text).await {
            return ModerationOutcome::Clean;
        }
        if self.sender_is_admin(&message).await {
            return ModerationOutcome::Exempt;
        }

        let _escalating = self.escalation.lock().await;
        let user_id = message.sender_id;
        let violations = self.ledger.add_violation(user_id).await;

        match self.actions.delete_message(&message.message).await {
            Ok(()) => info!(
                message_id = message.message.message_id,
                user_id, violations, "deleted blacklisted message"
            ),
            Err(error) => warn!(
                ?error,
                message_id = message.message.message_id,
                chat_id = message.message.chat_id(),
                user_id,
                "failed to delete blacklisted message"
            ),
        }

        match EscalationDecision::for_count(violations, self.settings.ban_threshold) {
            EscalationDecision::Ban => self.ban(user_id, violations).await,
            EscalationDecision::Warn => self.warn(&message, violations).await,
        }
    }

    /// Forgets the violations of a user who left. Users without violations,
    /// including the ones just removed by a ban, leave no audit entry.
    pub async fn member_left(&self, user_id: UserId) -> bool {
        if !self.ledger.clear_violations(user_id).await {
            debug!(user_id, "member left without violations");
            return false;
        }
        let name = self.actions.display_name(user_id).await;
        self.audit
            .log_to_admin(&format!("👋 Member left the chat.\n\nUser: {name}"))
            .await;
        true
    }

    fn is_exempt_by_context(&self, message: &InboundMessage) -> bool {
        if message.is_command {
            return true;
        }

        self.settings.audit_channel.is_some_and(|audit_channel| {
            let channel = message.message.channel;
            channel.channel_id == audit_channel || channel.chat_id == audit_channel
        })
    }

    /// Only asked for messages that hit the blacklist.
    async fn sender_is_admin(&self, message: &InboundMessage) -> bool {
        match message.sender_is_admin {
            Some(is_admin) => is_admin,
            None => {
                self.actions
                    .is_admin(message.message.chat_id(), message.sender_id)
                    .await
            }
        }
    }

    async fn ban(&self, user_id: UserId, violations: u32) -> ModerationOutcome {
        match self.actions.ban_user_everywhere(user_id).await {
            Ok(report) => {
                self.ledger.clear_violations(user_id).await;
                let name = self.actions.display_name(user_id).await;
                self.audit
                    .log_to_admin(&format!(
                        "🔨 Banned for spam.\n\nBanned: {name}\nViolations: {violations}"
                    ))
                    .await;
                info!(
                    user_id,
                    violations,
                    chats = report.banned.len(),
                    failed = report.failed.len(),
                    "user banned after repeated violations"
                );
                ModerationOutcome::Banned { violations }
            }
            Err(error) => {
                error!(?error, user_id, violations, "failed to ban user for repeated violations");
                ModerationOutcome::BanFailed { violations }
            }
        }
    }

    async fn warn(&self, message: &InboundMessage, violations: u32) -> ModerationOutcome {
        let name = self.actions.display_name(message.sender_id).await;
        let warning = format!("⚠️ {name}, your message was removed. A repeat violation will get you banned.");

        match self
            .actions
            .send_message(&message.message.channel, &warning)
            .await
        {
            Ok(sent) => self
                .actions
                .schedule_deletion(sent, self.settings.warning_ttl),
            Err(error) => warn!(
                ?error,
                user_id = message.sender_id,
                "failed to send violation warning"
            ),
        }

        self.audit
            .log_to_admin(&format!(
                "⚠️ Violation detected.\n\nUser: {name}\nViolation: #{violations}\nMessage: `{}`",
                message.text
            ))
            .await;
        ModerationOutcome::Warned { violations }
    }
}
