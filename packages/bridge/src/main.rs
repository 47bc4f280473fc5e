use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info};

use bridge::config::BridgeAppConfig;
use bridge::dispatch::DispatchGateway;
use bridge::event::{BroadcastSink, EventSink};
use bridge::ratelimit::UpdateRateLimiter;
use bridge::registry::JudgeRegistry;
use bridge::server::{run_admin_listener, run_judge_listener};
use bridge::session::SessionContext;
use bridge::store::{MemoryStore, SubmissionStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = BridgeAppConfig::load().context("Failed to load config")?;
    info!(
        judge_address = %config.listen.judge_address,
        admin_address = %config.listen.admin_address,
        judges = config.judges.len(),
        "Bridge starting"
    );

    let store: Arc<dyn SubmissionStore> = Arc::new(MemoryStore::new());
    let events: Arc<dyn EventSink> = BroadcastSink::new(1024);
    let registry = JudgeRegistry::new();
    let limiter = Arc::new(UpdateRateLimiter::new(
        config.updates.max_updates,
        config.updates.window(),
    ));

    let ctx = Arc::new(SessionContext {
        store: Arc::clone(&store),
        events,
        registry: Arc::clone(&registry),
        secrets: config.judges.clone(),
        protocol: config.protocol.clone(),
        limiter,
    });
    let gateway = Arc::new(DispatchGateway::new(Arc::clone(&registry), store));

    let judge_listener = TcpListener::bind(&config.listen.judge_address)
        .await
        .context("Failed to bind judge listener")?;
    let admin_listener = TcpListener::bind(&config.listen.admin_address)
        .await
        .context("Failed to bind admin listener")?;

    let max_frame = config.protocol.max_frame_bytes;
    let judge_side = tokio::spawn(run_judge_listener(ctx, judge_listener));
    let admin_side = tokio::spawn(run_admin_listener(
        gateway,
        registry,
        admin_listener,
        max_frame,
    ));

    let (judge_result, admin_result) = tokio::try_join!(judge_side, admin_side)?;
    if let Err(e) = judge_result {
        error!(error = %e, "Judge listener stopped unexpectedly");
    }
    if let Err(e) = admin_result {
        error!(error = %e, "Admin listener stopped unexpectedly");
    }

    Ok(())
}
