pub mod actions;
pub mod audit;
pub mod blacklist;
pub mod commands;
pub mod config;
pub mod discord_bot;
pub mod http;
pub mod moderation;
pub mod persistence;
pub mod scheduler;
pub mod types;
pub mod violations;
