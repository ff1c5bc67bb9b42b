use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tokio::time::Instant;
use tracing::{info, warn};

use crate::{
    actions::ChatActions,
    audit::AuditSink,
    blacklist::PhraseStore,
    types::{ChannelRef, CommandInvocation, UserId},
    violations::ViolationLedger,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    BanWord(Vec<String>),
    UnbanWord(Vec<String>),
    ListBanWords,
    SpamBan(Option<UserId>),
}

impl AdminCommand {
    fn name(&self) -> &'static str {
        match self {
            AdminCommand::BanWord(_) => "banword",
            AdminCommand::UnbanWord(_) => "unbanword",
            AdminCommand::ListBanWords => "listbanword",
            AdminCommand::SpamBan(_) => "spamban",
        }
    }
}

/// `None` for text that is not one of the admin commands.
pub fn parse_admin_command(text: &str, prefix: &str) -> Option<AdminCommand> {
    let rest = text.trim().strip_prefix(prefix)?;
    let mut parts = rest.split_whitespace();
    let name = parts.next()?.to_lowercase();
    let args = parts.map(str::to_owned).collect::<Vec<_>>();

    match name.as_str() {
        "banword" => Some(AdminCommand::BanWord(args)),
        "unbanword" => Some(AdminCommand::UnbanWord(args)),
        "listbanword" => Some(AdminCommand::ListBanWords),
        "spamban" => Some(AdminCommand::SpamBan(
            args.first().and_then(|arg| parse_user_ref(arg)),
        )),
        _ => None,
    }
}

/// Accepts `<@123>`, `<@!123>`, `@123` and `123`.
fn parse_user_ref(raw: &str) -> Option<UserId> {
    let trimmed = raw
        .strip_prefix("<@")
        .and_then(|inner| inner.strip_suffix('>'))
        .map(|inner| inner.trim_start_matches('!'))
        .unwrap_or_else(|| raw.trim_start_matches('@'));
    trimmed.parse().ok()
}

/// One command per user per window. A throttled attempt restarts the window.
#[derive(Debug)]
pub struct CommandRateLimiter {
    window: Duration,
    last_seen: Mutex<HashMap<UserId, Instant>>,
}

impl CommandRateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn allow(&self, user_id: UserId) -> bool {
        let now = Instant::now();
        let mut last_seen = self
            .last_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let previous = last_seen.insert(user_id, now);
        previous.is_none_or(|at| now.duration_since(at) >= self.window)
    }
}

#[derive(Debug, Clone)]
pub struct CommandSettings {
    pub prefix: String,
    pub reply_ttl: Duration,
    pub rate_limit: Duration,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            prefix: "/".to_owned(),
            reply_ttl: Duration::from_secs(10),
            rate_limit: Duration::from_secs(1),
        }
    }
}

pub struct AdminCommandHandler {
    phrases: Arc<PhraseStore>,
    ledger: Arc<ViolationLedger>,
    actions: Arc<dyn ChatActions>,
    audit: Arc<dyn AuditSink>,
    limiter: CommandRateLimiter,
    settings: CommandSettings,
}

impl AdminCommandHandler {
    pub fn new(
        phrases: Arc<PhraseStore>,
        ledger: Arc<ViolationLedger>,
        actions: Arc<dyn ChatActions>,
        audit: Arc<dyn AuditSink>,
        settings: CommandSettings,
    ) -> Self {
        Self {
            phrases,
            ledger,
            actions,
            audit,
            limiter: CommandRateLimiter::new(settings.rate_limit),
            settings,
        }
    }

    /// Returns the command that was recognised, whether or not it was
    /// allowed to run.
    pub async fn handle(&self, invocation: CommandInvocation) -> Option<AdminCommand> {
        let command = parse_admin_command(&invocation.text, &self.settings.prefix)?;
        let channel = invocation.message.channel;

        if !self.limiter.allow(invocation.sender_id) {
            self.reply_ephemeral(
                &channel,
                "⏱️ Please send no more than one command per second.",
                Duration::from_secs(5),
            )
            .await;
            return Some(command);
        }

        if !self
            .actions
            .is_admin(channel.chat_id, invocation.sender_id)
            .await
        {
            let text = format!(
                "ℹ The {}{} command is available to admins only.",
                self.settings.prefix,
                command.name()
            );
            self.reply_ephemeral(&channel, &text, self.settings.reply_ttl)
                .await;
            return Some(command);
        }

        match &command {
            AdminCommand::BanWord(words) => self.ban_word(&invocation, words).await,
            AdminCommand::UnbanWord(words) => self.unban_word(&invocation, words).await,
            AdminCommand::ListBanWords => self.list_ban_words(&channel).await,
            AdminCommand::SpamBan(target) => {
                let target = invocation.reply_to_sender.or(*target);
                self.spam_ban(&invocation, target).await;
            }
        }
        Some(command)
    }

    async fn ban_word(&self, invocation: &CommandInvocation, words: &[String]) {
        let channel = invocation.message.channel;
        if words.is_empty() {
            self.usage(&channel, "banword").await;
            return;
        }

        let joined = words.join(" ");
        if !self.phrases.add_phrase(words).await {
            let text = format!("ℹ Already blacklisted: {joined}");
            self.reply_ephemeral(&channel, &text, self.settings.reply_ttl)
                .await;
            return;
        }

        let text = format!("✅ Added blacklisted phrase: {joined}");
        self.reply_ephemeral(&channel, &text, self.settings.reply_ttl)
            .await;
        let admin = self.actions.display_name(invocation.sender_id).await;
        self.audit
            .log_to_admin(&format!(
                "🚫 Blacklisted phrase added\n\nAdmin: {admin}\nPhrase: `{joined}`"
            ))
            .await;
    }

    async fn unban_word(&self, invocation: &CommandInvocation, words: &[String]) {
        let channel = invocation.message.channel;
        if words.is_empty() {
            self.usage(&channel, "unbanword").await;
            return;
        }

        let joined = words.join(" ");
        if !self.phrases.remove_phrase(words).await {
            self.reply_ephemeral(
                &channel,
                "❌ That phrase is not on the list.",
                self.settings.reply_ttl,
            )
            .await;
            return;
        }

        let text = format!("✅ Removed blacklisted phrase: {joined}");
        self.reply_ephemeral(&channel, &text, self.settings.reply_ttl)
            .await;
        let admin = self.actions.display_name(invocation.sender_id).await;
        self.audit
            .log_to_admin(&format!(
                "✅ Blacklisted phrase removed\n\nAdmin: {admin}\nPhrase: `{joined}`"
            ))
            .await;
    }

    async fn list_ban_words(&self, channel: &ChannelRef) {
        let phrases = self.phrases.list().await;
        let text = if phrases.is_empty() {
            "📭 The list is empty.".to_owned()
        } else {
            let lines = phrases
                .iter()
                .enumerate()
                .map(|(index, phrase)| format!("{}. `{phrase}`", index + 1))
                .collect::<Vec<_>>()
                .join("\n");
            format!("🚫 Blacklisted phrases:\n\n{lines}")
        };

        if let Err(error) = self.actions.send_message(channel, &text).await {
            warn!(?error, "failed to send blacklist listing");
        }
    }

    async fn spam_ban(&self, invocation: &CommandInvocation, target: Option<UserId>) {
        let channel = invocation.message.channel;
        let Some(target) = target else {
            self.reply_ephemeral(
                &channel,
                "❌ Could not tell which user to ban.",
                self.settings.reply_ttl,
            )
            .await;
            return;
        };

        if self.actions.is_admin(channel.chat_id, target).await {
            self.reply_ephemeral(
                &channel,
                "⛔ Admins cannot be banned.",
                self.settings.reply_ttl,
            )
            .await;
            return;
        }

        if let Err(error) = self.actions.ban_user_everywhere(target).await {
            warn!(?error, user_id = target, "spam ban did not reach any chat");
        }
        self.ledger.clear_violations(target).await;

        let banned = self.actions.display_name(target).await;
        let admin = self.actions.display_name(invocation.sender_id).await;
        if let Err(error) = self
            .actions
            .send_message(&channel, &format!("🔨 {banned} was banned for spam."))
            .await
        {
            warn!(?error, "failed to announce spam ban");
        }
        self.audit
            .log_to_admin(&format!(
                "🔨 User banned for spam.\n\nBanned: {banned}\nAdmin: {admin}"
            ))
            .await;
        info!(user_id = target, admin_id = invocation.sender_id, "spam ban issued");
    }

    async fn usage(&self, channel: &ChannelRef, name: &str) {
        let text = format!(
            "💡 Usage: {}{name} word1 [word2 ...]",
            self.settings.prefix
        );
        self.reply_ephemeral(channel, &text, self.settings.reply_ttl)
            .await;
    }

    async fn reply_ephemeral(&self, channel: &ChannelRef, text: &str, ttl: Duration) {
        match self.actions.send_message(channel, text).await {
            Ok(sent) => self.actions.schedule_deletion(sent, ttl),
            Err(error) => warn!(?error, "failed to send command reply"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use crate::{
        actions::MockChatActions,
        audit::RecordingAuditSink,
        blacklist::PhraseStore,
        persistence::{JsonFile, LogPersistFailures},
        types::{ChannelRef, CommandInvocation, MessageRef},
        violations::ViolationLedger,
    };

    use super::{
        AdminCommand, AdminCommandHandler, CommandRateLimiter, CommandSettings,
        parse_admin_command,
    };

    const GROUP: u64 = 300;
    const ADMIN: u64 = 1;
    const MEMBER: u64 = 2;

    struct Harness {
        _dir: tempfile::TempDir,
        handler: AdminCommandHandler,
        phrases: Arc<PhraseStore>,
        ledger: Arc<ViolationLedger>,
        actions: Arc<MockChatActions>,
        audit: Arc<RecordingAuditSink>,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let failures = Arc::new(LogPersistFailures);
        let phrases = Arc::new(
            PhraseStore::open(
                JsonFile::new(dir.path().join("blacklist.json")),
                failures.clone(),
            )
            .await,
        );
        let ledger = Arc::new(
            ViolationLedger::open(JsonFile::new(dir.path().join("violations.json")), failures)
                .await,
        );
        let actions = Arc::new(MockChatActions::default());
        actions.registry().register(GROUP);
        actions.grant_admin(GROUP, ADMIN);
        let audit = Arc::new(RecordingAuditSink::default());

        let handler = AdminCommandHandler::new(
            phrases.clone(),
            ledger.clone(),
            actions.clone(),
            audit.clone(),
            CommandSettings {
                rate_limit: Duration::ZERO,
                ..CommandSettings::default()
            },
        );

        Harness {
            _dir: dir,
            handler,
            phrases,
            ledger,
            actions,
            audit,
        }
    }

    fn invocation(sender_id: u64, text: &str) -> CommandInvocation {
        CommandInvocation {
            message: MessageRef {
                channel: ChannelRef {
                    chat_id: GROUP,
                    channel_id: GROUP + 1,
                },
                message_id: 77,
            },
            sender_id,
            text: text.to_owned(),
            reply_to_sender: None,
        }
    }

    #[test]
    fn parses_admin_commands() {
        assert_eq!(
            parse_admin_command("/banword Buy Now", "/"),
            Some(AdminCommand::BanWord(vec!["Buy".into(), "Now".into()]))
        );
        assert_eq!(
            parse_admin_command("  /UNBANWORD spam ", "/"),
            Some(AdminCommand::UnbanWord(vec!["spam".into()]))
        );
        assert_eq!(
            parse_admin_command("/listbanword", "/"),
            Some(AdminCommand::ListBanWords)
        );
        assert_eq!(
            parse_admin_command("/spamban <@!1234>", "/"),
            Some(AdminCommand::SpamBan(Some(1234)))
        );
        assert_eq!(
            parse_admin_command("/spamban @55", "/"),
            Some(AdminCommand::SpamBan(Some(55)))
        );
        assert_eq!(
            parse_admin_command("/spamban someone", "/"),
            Some(AdminCommand::SpamBan(None))
        );
        assert_eq!(parse_admin_command("/ping", "/"), None);
        assert_eq!(parse_admin_command("banword spam", "/"), None);
        assert_eq!(
            parse_admin_command("!banword spam", "!"),
            Some(AdminCommand::BanWord(vec!["spam".into()]))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limiter_allows_one_command_per_window() {
        let limiter = CommandRateLimiter::new(Duration::from_secs(1));

        assert!(limiter.allow(1));
        assert!(!limiter.allow(1));
        assert!(limiter.allow(2));

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!(limiter.allow(1));
    }

    #[tokio::test]
    async fn banword_adds_phrase_and_logs() {
        let h = harness().await;

        let command = h.handler.handle(invocation(ADMIN, "/banword Buy Now")).await;

        assert_eq!(
            command,
            Some(AdminCommand::BanWord(vec!["Buy".into(), "Now".into()]))
        );
        assert!(h.phrases.check_message("buy it now").await);
        let sent = h.actions.sent();
        assert!(sent[0].text.contains("Added blacklisted phrase: Buy Now"));
        assert_eq!(
            h.actions.scheduled(),
            vec![(sent[0].message, Duration::from_secs(10))]
        );
        let entries = h.audit.entries();
        assert!(entries[0].contains("Admin: @user1"));
        assert!(entries[0].contains("`Buy Now`"));
    }

    #[tokio::test]
    async fn banword_reports_duplicates_without_logging() {
        let h = harness().await;
        h.handler.handle(invocation(ADMIN, "/banword spam")).await;
        h.handler.handle(invocation(ADMIN, "/banword SPAM")).await;

        assert_eq!(h.phrases.list().await.len(), 1);
        assert!(h.actions.sent()[1].text.contains("Already blacklisted"));
        assert_eq!(h.audit.entries().len(), 1);
    }

    #[tokio::test]
    async fn non_admins_are_refused() {
        let h = harness().await;

        h.handler.handle(invocation(MEMBER, "/banword spam")).await;

        assert!(h.phrases.list().await.is_empty());
        assert!(h.actions.sent()[0].text.contains("/banword command is available to admins only"));
        assert!(h.audit.entries().is_empty());
    }

    #[tokio::test]
    async fn missing_words_get_usage_hint() {
        let h = harness().await;

        h.handler.handle(invocation(ADMIN, "/unbanword")).await;

        assert!(h.actions.sent()[0].text.contains("Usage: /unbanword"));
    }

    #[tokio::test]
    async fn unbanword_removes_known_phrase() {
        let h = harness().await;
        h.phrases.add_phrase(&["spam"]).await;

        h.handler.handle(invocation(ADMIN, "/unbanword nope")).await;
        h.handler.handle(invocation(ADMIN, "/unbanword spam")).await;

        let sent = h.actions.sent();
        assert!(sent[0].text.contains("not on the list"));
        assert!(sent[1].text.contains("Removed blacklisted phrase: spam"));
        assert!(h.phrases.list().await.is_empty());
        assert_eq!(h.audit.entries().len(), 1);
    }

    #[tokio::test]
    async fn listbanword_numbers_phrases() {
        let h = harness().await;
        h.handler.handle(invocation(ADMIN, "/listbanword")).await;
        h.phrases.add_phrase(&["spam"]).await;
        h.phrases.add_phrase(&["buy", "now"]).await;
        h.handler.handle(invocation(ADMIN, "/listbanword")).await;

        let sent = h.actions.sent();
        assert_eq!(sent[0].text, "📭 The list is empty.");
        assert!(sent[1].text.contains("1. `spam`\n2. `buy now`"));
        assert!(h.actions.scheduled().is_empty());
    }

    #[tokio::test]
    async fn spamban_bans_reply_target_and_clears_violations() {
        let h = harness().await;
        h.ledger.add_violation(MEMBER).await;
        let mut request = invocation(ADMIN, "/spamban");
        request.reply_to_sender = Some(MEMBER);

        h.handler.handle(request).await;

        assert_eq!(h.actions.bans(), vec![(GROUP, MEMBER)]);
        assert_eq!(h.ledger.get_violations(MEMBER).await, 0);
        assert!(h.actions.sent()[0].text.contains("@user2 was banned for spam"));
        assert!(h.audit.entries()[0].contains("Admin: @user1"));
    }

    #[tokio::test]
    async fn spamban_refuses_admin_targets_and_unknown_users() {
        let h = harness().await;

        h.handler.handle(invocation(ADMIN, "/spamban <@1>")).await;
        h.handler.handle(invocation(ADMIN, "/spamban nobody")).await;

        assert!(h.actions.bans().is_empty());
        let sent = h.actions.sent();
        assert!(sent[0].text.contains("Admins cannot be banned"));
        assert!(sent[1].text.contains("Could not tell which user"));
    }

    #[tokio::test]
    async fn throttled_commands_do_not_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let failures = Arc::new(LogPersistFailures);
        let phrases = Arc::new(
            PhraseStore::open(JsonFile::new(dir.path().join("b.json")), failures.clone()).await,
        );
        let ledger =
            Arc::new(ViolationLedger::open(JsonFile::new(dir.path().join("v.json")), failures).await);
        let actions = Arc::new(MockChatActions::default());
        actions.grant_admin(GROUP, ADMIN);
        let handler = AdminCommandHandler::new(
            phrases.clone(),
            ledger,
            actions.clone(),
            Arc::new(RecordingAuditSink::default()),
            CommandSettings::default(),
        );

        handler.handle(invocation(ADMIN, "/banword one")).await;
        handler.handle(invocation(ADMIN, "/banword two")).await;

        assert_eq!(phrases.list().await.len(), 1);
        let sent = actions.sent();
        assert!(sent[1].text.contains("no more than one command per second"));
        assert_eq!(actions.scheduled()[1].1, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn unknown_commands_are_ignored() {
        let h = harness().await;
        assert_eq!(h.handler.handle(invocation(ADMIN, "/start")).await, None);
        assert!(h.actions.sent().is_empty());
    }
}
