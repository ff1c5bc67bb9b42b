use std::{env, net::SocketAddr, path::PathBuf, time::Duration};

use crate::{commands::CommandSettings, moderation::ModerationSettings};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_bind: SocketAddr,
    pub discord_token: Option<String>,
    pub data_dir: PathBuf,
    pub blacklist_file: String,
    pub violations_file: String,
    pub audit_channel_id: Option<u64>,
    pub command_prefix: String,
    pub ban_threshold: u32,
    pub warning_ttl_sec: u64,
    pub command_reply_ttl_sec: u64,
    pub command_rate_limit_ms: u64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let port = env::var("PORT").unwrap_or_else(|_| "8080".to_owned());
        let http_bind = env::var("HTTP_BIND").unwrap_or_else(|_| format!("0.0.0.0:{port}"));
        let http_bind = http_bind.parse()?;

        Ok(Self {
            http_bind,
            discord_token: env::var("DISCORD_TOKEN").ok(),
            data_dir: env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data")),
            blacklist_file: env::var("BLACKLIST_FILE")
                .unwrap_or_else(|_| "blacklist.json".to_owned()),
            violations_file: env::var("VIOLATIONS_FILE")
                .unwrap_or_else(|_| "violations.json".to_owned()),
            audit_channel_id: env::var("AUDIT_CHANNEL_ID")
                .ok()
                .and_then(|raw| raw.trim().parse().ok()),
            command_prefix: env::var("COMMAND_PREFIX").unwrap_or_else(|_| "/".to_owned()),
            ban_threshold: env_u64("BAN_THRESHOLD", 2).clamp(1, u64::from(u32::MAX)) as u32,
            warning_ttl_sec: env_u64("WARNING_TTL_SEC", 5),
            command_reply_ttl_sec: env_u64("COMMAND_REPLY_TTL_SEC", 10),
            command_rate_limit_ms: env_u64("COMMAND_RATE_LIMIT_MS", 1_000),
        })
    }

    pub fn blacklist_path(&self) -> PathBuf {
        self.data_dir.join(&self.blacklist_file)
    }

    pub fn violations_path(&self) -> PathBuf {
        self.data_dir.join(&self.violations_file)
    }

    pub fn moderation_settings(&self) -> ModerationSettings {
        ModerationSettings {
            audit_channel: self.audit_channel_id,
            ban_threshold: self.ban_threshold,
            warning_ttl: Duration::from_secs(self.warning_ttl_sec),
        }
    }

    pub fn command_settings(&self) -> CommandSettings {
        CommandSettings {
            prefix: self.command_prefix.clone(),
            reply_ttl: Duration::from_secs(self.command_reply_ttl_sec),
            rate_limit: Duration::from_millis(self.command_rate_limit_ms),
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .unwrap_or(default)
}
