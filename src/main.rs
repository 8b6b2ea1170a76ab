/// Console Query Service
///
/// Serves ad-hoc range queries over the game server's console log and a
/// live view of the most recent classified console events.
use console_pipeline::config::Config;
use console_pipeline::gameplay_filter::BotPredicate;
use console_pipeline::live_tail::{live_buffer, LiveTailAdapter};
use console_pipeline::log_source::HttpLogSource;
use console_pipeline::query::QueryOrchestrator;
use console_pipeline::server::{router, AppState};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (fails silently if not found)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("Starting Console Query Service");

    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("❌ Configuration error: {:#}", e);
            error!("💡 Please set the required environment variables:");
            error!("   - LOG_SOURCE_URL: console log store (e.g., http://localhost:8080)");
            error!("   - LIVE_FEED_URL: console push feed (optional, e.g., ws://localhost:8080/feed)");
            error!("   - LIVE_BUFFER_CAPACITY, LIVE_RECONNECT_SECS, CLASSIFY_BATCH_SIZE (optional)");
            error!("   - BOT_MARKER, WORLD_ACTOR, BIND_PORT (optional)");
            std::process::exit(1);
        }
    };

    config.log_config();

    let bots = BotPredicate::new(config.bot_marker.clone(), config.world_actor.clone());
    let source = Arc::new(HttpLogSource::new(config.log_source_url.clone()));
    let orchestrator = Arc::new(
        QueryOrchestrator::new(source)
            .with_bots(bots)
            .with_batch_size(config.classify_batch_size),
    );

    let shutdown = CancellationToken::new();

    let live = match config.live_feed_url {
        Some(ref feed_url) => {
            let (writer, handle) = live_buffer(config.live_buffer_capacity);
            let adapter = LiveTailAdapter::new(feed_url.clone(), writer, orchestrator.classifier())
                .with_reconnect_delay(config.live_reconnect_delay);
            tokio::spawn(adapter.run(shutdown.clone()));
            info!(
                "Started live tail (buffer: {}, reconnect: {:?})",
                config.live_buffer_capacity, config.live_reconnect_delay
            );
            Some(handle)
        }
        None => {
            info!("Live tail disabled (LIVE_FEED_URL not set)");
            None
        }
    };

    let app = router(Arc::new(AppState::new(orchestrator, live)));

    let addr = format!("0.0.0.0:{}", config.bind_port);
    info!("🚀 Console Query Service listening on {}", addr);
    info!("");
    info!("📊 Endpoints:");
    info!("   GET  /health        - Health check");
    info!("   POST /query         - Range query (time_range, category, player_substring, exclude_name, view)");
    info!("   GET  /live?since=N  - Live console events after sequence N");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
