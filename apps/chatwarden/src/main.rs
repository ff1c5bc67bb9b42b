use std::sync::Arc;

use chatwarden_core::{
    blacklist::PhraseStore,
    config::AppConfig,
    discord_bot,
    http::{self, AppState},
    persistence::{JsonFile, LogPersistFailures, PersistFailureHandler},
    scheduler::DeletionScheduler,
    violations::ViolationLedger,
};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;

    let failures: Arc<dyn PersistFailureHandler> = Arc::new(LogPersistFailures);
    let phrases = Arc::new(
        PhraseStore::open(JsonFile::new(config.blacklist_path()), failures.clone()).await,
    );
    let ledger = Arc::new(
        ViolationLedger::open(JsonFile::new(config.violations_path()), failures).await,
    );
    let scheduler = Arc::new(DeletionScheduler::default());

    if let Some(discord_token) = config.discord_token.clone() {
        let bot_config = config.clone();
        let bot_phrases = phrases.clone();
        let bot_ledger = ledger.clone();
        let bot_scheduler = scheduler.clone();
        tokio::spawn(async move {
            if let Err(error) = discord_bot::start_discord_bot(
                discord_token,
                &bot_config,
                bot_phrases,
                bot_ledger,
                bot_scheduler,
            )
            .await
            {
                warn!(?error, "Discord bot stopped with error");
            }
        });
    } else {
        warn!("DISCORD_TOKEN is not set; Discord bot is disabled");
    }

    let app = http::router(AppState { phrases, ledger });
    let listener = TcpListener::bind(config.http_bind).await?;
    info!("chatwarden admin API listening on {}", config.http_bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown();
    info!("chatwarden stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .compact()
        .init();
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(?error, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
