use std::{
    collections::HashSet,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::types::{ChannelRef, ChatId, MessageRef, UserId};

use super::{ChatActions, ChatRegistry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub message: MessageRef,
    pub text: String,
}

/// In-process stand-in for a chat platform: records every action and can be
/// told to fail specific ones.
#[derive(Debug)]
pub struct MockChatActions {
    registry: ChatRegistry,
    admins: Mutex<HashSet<(ChatId, UserId)>>,
    failing_ban_chats: Mutex<HashSet<ChatId>>,
    fail_deletes: AtomicBool,
    fail_sends: AtomicBool,
    next_message_id: AtomicU64,
    admin_checks: AtomicU64,
    deleted: Mutex<Vec<MessageRef>>,
    bans: Mutex<Vec<(ChatId, UserId)>>,
    sent: Mutex<Vec<SentMessage>>,
    scheduled: Mutex<Vec<(MessageRef, Duration)>>,
}

impl Default for MockChatActions {
    fn default() -> Self {
        Self {
            registry: ChatRegistry::default(),
            admins: Mutex::new(HashSet::new()),
            failing_ban_chats: Mutex::new(HashSet::new()),
            fail_deletes: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            next_message_id: AtomicU64::new(10_000),
            admin_checks: AtomicU64::new(0),
            deleted: Mutex::new(Vec::new()),
            bans: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            scheduled: Mutex::new(Vec::new()),
        }
    }
}

impl MockChatActions {
    pub fn registry(&self) -> &ChatRegistry {
        &self.registry
    }

    pub fn grant_admin(&self, chat_id: ChatId, user_id: UserId) {
        lock(&self.admins).insert((chat_id, user_id));
    }

    pub fn fail_bans_in(&self, chat_id: ChatId) {
        lock(&self.failing_ban_chats).insert(chat_id);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// How many times `is_admin` was asked.
    pub fn admin_checks(&self) -> u64 {
        self.admin_checks.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<MessageRef> {
        lock(&self.deleted).clone()
    }

    pub fn bans(&self) -> Vec<(ChatId, UserId)> {
        lock(&self.bans).clone()
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        lock(&self.sent).clone()
    }

    pub fn scheduled(&self) -> Vec<(MessageRef, Duration)> {
        lock(&self.scheduled).clone()
    }
}

#[async_trait]
impl ChatActions for MockChatActions {
    async fn delete_message(&self, message: &MessageRef) -> anyhow::Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            anyhow::bail!("message {} cannot be deleted", message.message_id);
        }
        lock(&self.deleted).push(*message);
        Ok(())
    }

    async fn ban_user_in_chat(&self, chat_id: ChatId, user_id: UserId) -> anyhow::Result<()> {
        if lock(&self.failing_ban_chats).contains(&chat_id) {
            anyhow::bail!("not enough rights to ban in chat {chat_id}");
        }
        lock(&self.bans).push((chat_id, user_id));
        Ok(())
    }

    async fn send_message(&self, channel: &ChannelRef, text: &str) -> anyhow::Result<MessageRef> {
        if self.fail_sends.load(Ordering::SeqCst) {
            anyhow::bail!("cannot send to channel {}", channel.channel_id);
        }
        let message = MessageRef {
            channel: *channel,
            message_id: self.next_message_id.fetch_add(1, Ordering::Relaxed),
        };
        lock(&self.sent).push(SentMessage {
            message,
            text: text.to_owned(),
        });
        Ok(message)
    }

    fn schedule_deletion(&self, message: MessageRef, delay: Duration) {
        lock(&self.scheduled).push((message, delay));
    }

    async fn is_admin(&self, chat_id: ChatId, user_id: UserId) -> bool {
        self.admin_checks.fetch_add(1, Ordering::SeqCst);
        lock(&self.admins).contains(&(chat_id, user_id))
    }

    async fn display_name(&self, user_id: UserId) -> String {
        format!("@user{user_id}")
    }

    async fn known_chats(&self) -> Vec<ChatId> {
        self.registry.all()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
