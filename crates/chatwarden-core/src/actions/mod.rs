mod mock;

use std::{
    collections::BTreeSet,
    sync::{PoisonError, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::types::{ChannelRef, ChatId, MessageRef, UserId};

pub use mock::{MockChatActions, SentMessage};

/// Outcome of a ban fanned out over every known chat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BanReport {
    pub banned: Vec<ChatId>,
    pub failed: Vec<ChatId>,
}

/// Platform operations the moderation core drives. Implementations talk to
/// the chat transport; the core never touches the network itself.
#[async_trait]
pub trait ChatActions: Send + Sync {
    async fn delete_message(&self, message: &MessageRef) -> anyhow::Result<()>;

    async fn ban_user_in_chat(&self, chat_id: ChatId, user_id: UserId) -> anyhow::Result<()>;

    async fn send_message(&self, channel: &ChannelRef, text: &str) -> anyhow::Result<MessageRef>;

    /// Fire-and-forget; the message is deleted once `delay` has passed.
    fn schedule_deletion(&self, message: MessageRef, delay: Duration);

    async fn is_admin(&self, chat_id: ChatId, user_id: UserId) -> bool;

    async fn display_name(&self, user_id: UserId) -> String;

    async fn known_chats(&self) -> Vec<ChatId>;

    /// Bans the user in every known chat. Fails when there is no known chat
    /// or when no single ban went through.
    async fn ban_user_everywhere(&self, user_id: UserId) -> anyhow::Result<BanReport> {
        let chats = self.known_chats().await;
        if chats.is_empty() {
            warn!(user_id, "no group chats registered; nothing to ban from");
            anyhow::bail!("no known chats to ban user {user_id} from");
        }

        let mut report = BanReport::default();
        for chat_id in chats {
            match self.ban_user_in_chat(chat_id, user_id).await {
                Ok(()) => {
                    info!(user_id, chat_id, "user banned in chat");
                    report.banned.push(chat_id);
                }
                Err(error) => {
                    warn!(?error, user_id, chat_id, "failed to ban user in chat");
                    report.failed.push(chat_id);
                }
            }
        }

        if report.banned.is_empty() {
            anyhow::bail!(
                "failed to ban user {user_id} in all {} known chats",
                report.failed.len()
            );
        }
        Ok(report)
    }
}

/// Group chats the bot has seen, used as the fan-out set for bans.
#[derive(Debug, Default)]
pub struct ChatRegistry {
    chats: RwLock<BTreeSet<ChatId>>,
}

impl ChatRegistry {
    /// Returns `true` the first time a chat is seen.
    pub fn register(&self, chat_id: ChatId) -> bool {
        let inserted = self
            .chats
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(chat_id);
        if inserted {
            info!(chat_id, "registered group chat");
        }
        inserted
    }

    pub fn all(&self) -> Vec<ChatId> {
        self.chats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }
}
