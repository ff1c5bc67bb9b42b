use std::{num::NonZeroU64, sync::Arc, time::Duration};

use async_trait::async_trait;
use serenity::{
    cache::Cache,
    http::Http,
    model::{
        channel::Message,
        gateway::{GatewayIntents, Ready},
        guild::Member,
        id::{ChannelId, GuildId, MessageId, UserId as DiscordUserId},
        permissions::Permissions,
        user::User,
    },
    prelude::*,
};
use tracing::{debug, error, info, warn};

use crate::{
    actions::{ChatActions, ChatRegistry},
    audit::{AuditSink, TracingAuditSink},
    blacklist::PhraseStore,
    commands::AdminCommandHandler,
    config::AppConfig,
    moderation::ModerationPolicy,
    scheduler::DeletionScheduler,
    types::{ChannelRef, ChatId, CommandInvocation, InboundMessage, MessageRef, UserId},
    violations::ViolationLedger,
};

const BAN_REASON: &str = "repeated blacklist violations";

/// Chat actions against the Discord REST API. A chat is a guild; channels are
/// its text channels.
pub struct DiscordChatActions {
    http: Arc<Http>,
    registry: Arc<ChatRegistry>,
    scheduler: Arc<DeletionScheduler>,
}

impl DiscordChatActions {
    pub fn new(
        http: Arc<Http>,
        registry: Arc<ChatRegistry>,
        scheduler: Arc<DeletionScheduler>,
    ) -> Self {
        Self {
            http,
            registry,
            scheduler,
        }
    }

    async fn lookup_admin(&self, chat_id: ChatId, user_id: UserId) -> anyhow::Result<bool> {
        let guild_id = GuildId::from(non_zero(chat_id)?);
        let user_id = DiscordUserId::from(non_zero(user_id)?);

        let guild = guild_id.to_partial_guild(&self.http).await?;
        if guild.owner_id == user_id {
            return Ok(true);
        }

        let member = guild_id.member(&self.http, user_id).await?;
        Ok(member
            .roles
            .iter()
            .filter_map(|role_id| guild.roles.get(role_id))
            .any(|role| role.permissions.contains(Permissions::ADMINISTRATOR)))
    }
}

#[async_trait]
impl ChatActions for DiscordChatActions {
    async fn delete_message(&self, message: &MessageRef) -> anyhow::Result<()> {
        let channel = ChannelId::from(non_zero(message.channel.channel_id)?);
        let message_id = MessageId::from(non_zero(message.message_id)?);
        channel.delete_message(&self.http, message_id).await?;
        Ok(())
    }

    async fn ban_user_in_chat(&self, chat_id: ChatId, user_id: UserId) -> anyhow::Result<()> {
        let guild_id = GuildId::from(non_zero(chat_id)?);
        let user_id = DiscordUserId::from(non_zero(user_id)?);
        guild_id
            .ban_with_reason(&self.http, user_id, 0, BAN_REASON)
            .await?;
        Ok(())
    }

    async fn send_message(&self, channel: &ChannelRef, text: &str) -> anyhow::Result<MessageRef> {
        let channel_id = ChannelId::from(non_zero(channel.channel_id)?);
        let sent = channel_id.say(&self.http, text).await?;
        Ok(MessageRef {
            channel: *channel,
            message_id: sent.id.get(),
        })
    }

    fn schedule_deletion(&self, message: MessageRef, delay: Duration) {
        let http = self.http.clone();
        self.scheduler.schedule(delay, async move {
            let (Some(channel), Some(message_id)) = (
                NonZeroU64::new(message.channel.channel_id),
                NonZeroU64::new(message.message_id),
            ) else {
                return;
            };
            if let Err(error) = ChannelId::from(channel)
                .delete_message(&http, MessageId::from(message_id))
                .await
            {
                debug!(?error, message_id = message.message_id, "scheduled deletion failed");
            }
        });
    }

    async fn is_admin(&self, chat_id: ChatId, user_id: UserId) -> bool {
        match self.lookup_admin(chat_id, user_id).await {
            Ok(is_admin) => is_admin,
            Err(error) => {
                error!(?error, chat_id, user_id, "failed to check member rights");
                false
            }
        }
    }

    async fn display_name(&self, user_id: UserId) -> String {
        let Ok(id) = non_zero(user_id) else {
            return format!("ID: {user_id}");
        };
        match DiscordUserId::from(id).to_user(&self.http).await {
            Ok(user) => format!("@{}", user.name),
            Err(error) => {
                debug!(?error, user_id, "failed to resolve user name");
                format!("ID: {user_id}")
            }
        }
    }

    async fn known_chats(&self) -> Vec<ChatId> {
        self.registry.all()
    }
}

/// Posts audit entries into the admin channel.
pub struct DiscordAuditSink {
    http: Arc<Http>,
    channel: ChannelId,
}

impl DiscordAuditSink {
    pub fn new(http: Arc<Http>, channel: ChannelId) -> Self {
        Self { http, channel }
    }
}

#[async_trait]
impl AuditSink for DiscordAuditSink {
    async fn log_to_admin(&self, text: &str) {
        if let Err(error) = self.channel.say(&self.http, text).await {
            error!(?error, channel_id = self.channel.get(), "failed to send admin log");
        }
    }
}

struct Handler {
    policy: Arc<ModerationPolicy>,
    commands: Arc<AdminCommandHandler>,
    registry: Arc<ChatRegistry>,
    prefix: String,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        for guild in &ready.guilds {
            self.registry.register(guild.id.get());
        }
        info!(
            user = %ready.user.name,
            guilds = ready.guilds.len(),
            "Discord gateway ready"
        );
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let Some(guild_id) = msg.guild_id else {
            return;
        };
        self.registry.register(guild_id.get());

        let message = MessageRef {
            channel: ChannelRef {
                chat_id: guild_id.get(),
                channel_id: msg.channel_id.get(),
            },
            message_id: msg.id.get(),
        };
        let mut inbound =
            InboundMessage::new(message, msg.author.id.get(), &msg.content, &self.prefix);
        inbound.sender_is_admin = cached_admin(&ctx.cache, guild_id, &msg);
        let is_command = inbound.is_command;

        let outcome = self.policy.moderate(inbound).await;
        debug!(?outcome, message_id = message.message_id, "moderation finished");

        if is_command {
            self.commands
                .handle(CommandInvocation {
                    message,
                    sender_id: msg.author.id.get(),
                    text: msg.content.clone(),
                    reply_to_sender: msg
                        .referenced_message
                        .as_ref()
                        .map(|replied| replied.author.id.get()),
                })
                .await;
        }
    }

    async fn guild_member_removal(
        &self,
        _ctx: Context,
        guild_id: GuildId,
        user: User,
        _member_data_if_available: Option<Member>,
    ) {
        debug!(guild_id = guild_id.get(), user_id = user.id.get(), "member left guild");
        self.policy.member_left(user.id.get()).await;
    }
}

pub async fn start_discord_bot(
    token: String,
    config: &AppConfig,
    phrases: Arc<PhraseStore>,
    ledger: Arc<ViolationLedger>,
    scheduler: Arc<DeletionScheduler>,
) -> anyhow::Result<()> {
    let http = Arc::new(Http::new(&token));
    let registry = Arc::new(ChatRegistry::default());
    let actions: Arc<dyn ChatActions> = Arc::new(DiscordChatActions::new(
        http.clone(),
        registry.clone(),
        scheduler,
    ));

    let audit: Arc<dyn AuditSink> = match config.audit_channel_id.and_then(NonZeroU64::new) {
        Some(channel) => Arc::new(DiscordAuditSink::new(http, ChannelId::from(channel))),
        None => {
            warn!("AUDIT_CHANNEL_ID is not set; audit entries go to the local log only");
            Arc::new(TracingAuditSink)
        }
    };

    let policy = Arc::new(ModerationPolicy::new(
        phrases.clone(),
        ledger.clone(),
        actions.clone(),
        audit.clone(),
        config.moderation_settings(),
    ));
    let commands = Arc::new(AdminCommandHandler::new(
        phrases,
        ledger,
        actions,
        audit,
        config.command_settings(),
    ));

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::MESSAGE_CONTENT;

    let handler = Handler {
        policy,
        commands,
        registry,
        prefix: config.command_prefix.clone(),
    };
    let mut client = Client::builder(token, intents)
        .event_handler(handler)
        .await?;

    info!("starting Discord gateway client");
    client.start().await?;
    Ok(())
}

/// Resolves the author's rights from the gateway cache. `None` when the guild
/// is not cached yet; the REST lookup in `DiscordChatActions` covers that case.
fn cached_admin(cache: &Cache, guild_id: GuildId, msg: &Message) -> Option<bool> {
    let guild = cache.guild(guild_id)?;
    if guild.owner_id == msg.author.id {
        return Some(true);
    }

    let roles = match (&msg.member, guild.members.get(&msg.author.id)) {
        (Some(partial), _) => partial.roles.clone(),
        (None, Some(member)) => member.roles.clone(),
        (None, None) => return None,
    };
    Some(roles.iter().filter_map(|role_id| guild.roles.get(role_id)).any(|role| {
        role.permissions.contains(Permissions::ADMINISTRATOR)
    }))
}

fn non_zero(id: u64) -> anyhow::Result<NonZeroU64> {
    NonZeroU64::new(id).ok_or_else(|| anyhow::anyhow!("Discord ids are never zero"))
}
