use dotenvy::dotenv;
use futures::future::join_all;
use std::sync::Arc;
use token_metrics_agents::agents::build_agents;
use token_metrics_agents::config::{self, Settings};
use token_metrics_agents::rpc::{ContractCaller, HttpCaller};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenv().ok();

    let settings = Arc::new(Settings::from_env());

    // Initialize logging
    let level = if settings.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!(
        networks = settings.rpc_urls.len(),
        groups = settings.group_ids.len(),
        "Starting token metrics agents..."
    );

    let configs = config::load_agents_file(&settings.agents_path)?;
    let caller: Arc<dyn ContractCaller> = Arc::new(HttpCaller::new());
    let lookup = |key: &str| std::env::var(key).ok();
    let agents = build_agents(configs, Arc::clone(&settings), caller, &lookup);

    if agents.is_empty() {
        warn!("No agent could be started. Check {} and the agent key variables.", settings.agents_path.display());
        return Ok(());
    }

    info!("Running {} agents", agents.len());
    let handles: Vec<_> = agents.into_iter().map(|agent| agent.spawn()).collect();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Shutting down..."),
        _ = join_all(handles) => warn!("All agents exited"),
    }

    Ok(())
}
