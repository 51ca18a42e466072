/// Sparklink client shell - connects the engine to a live backend and tails
/// its events. Useful for poking at a development server.
use sparklink_core::kv::SledStore;
use sparklink_core::{
    Config, CredentialStore, MatchCache, RealtimeSession, RestApi, SearchController,
    SseSearchStream, WsChannel,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let store = Arc::new(SledStore::open(&config.data_dir)?);
    let credentials = CredentialStore::new(store.clone())?;
    if let Ok(token) = std::env::var("SPARKLINK_TOKEN") {
        credentials.sign_in(&token)?;
    }
    if credentials.token().is_none() {
        info!("no credential present; set SPARKLINK_TOKEN to connect");
    }

    let session = RealtimeSession::new(&config, Arc::new(WsChannel::new()));
    let runner = session.start(&credentials);

    let api = Arc::new(RestApi::new(&config, credentials.clone())?);
    let matches = MatchCache::new(store);
    let search = SearchController::new(
        api,
        Arc::new(SseSearchStream::new(&config)?),
        credentials.clone(),
        matches,
        &config,
    );

    info!("🔗 Sparklink client started");
    info!("   API: {}", config.api_base_url);
    info!("   Realtime: {}", config.realtime_url);

    if std::env::var("SPARKLINK_SEARCH").is_ok() {
        search.start().await?;
        info!("matchmaking search running");
    }

    let mut events = session.subscribe();
    let mut state = session.state();
    let mut search_state = search.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                info!("connection state: {:?}", *state.borrow());
            }
            changed = search_state.changed() => {
                if changed.is_err() {
                    break;
                }
                info!("search state: {:?}", search_state.borrow().clone());
            }
            event = events.recv() => {
                match event {
                    Ok(event) => info!("event: {:?}", event),
                    Err(_) => continue,
                }
            }
        }
    }

    info!("shutting down");
    search.cancel().await;
    session.close();
    runner.await.ok();
    Ok(())
}
