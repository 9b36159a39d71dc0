use std::path::PathBuf;

use clap::Parser;
use tokio::sync::mpsc::unbounded_channel;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{
    bybit::{BybitClient, Endpoints},
    config::Config,
    discord::DiscordClient,
    engine::TradeEngine,
    state::BotState,
};

mod bybit;
mod config;
mod discord;
mod engine;
mod parser;
mod state;
mod supervisor;
mod util;
mod venue;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Override the state file location.
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Force dry-run regardless of environment configuration.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();

    let mut cfg = Config::from_env()?;
    if let Some(state_file) = args.state_file {
        cfg.state_file = state_file;
    }
    if args.dry_run {
        cfg.dry_run = true;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&cfg.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        category = %cfg.category,
        quote = %cfg.quote,
        dry_run = cfg.dry_run,
        testnet = cfg.bybit_testnet,
        demo = cfg.bybit_demo,
        "starting"
    );

    let endpoints = Endpoints::select(cfg.bybit_testnet, cfg.bybit_demo);
    let venue = BybitClient::new(
        endpoints.rest,
        &cfg.bybit_api_key,
        &cfg.bybit_api_secret,
        &cfg.recv_window,
    );
    let chat = DiscordClient::new(&cfg.discord_token, &cfg.channel_id);
    let state = BotState::load(&cfg.state_file)?;
    info!(
        active = state.active_trade_count(),
        history = state.trade_history.len(),
        "state loaded"
    );

    let (ev_tx, ev_rx) = unbounded_channel();
    supervisor::spawn_stream_pump(
        cfg.bybit_api_key.clone(),
        cfg.bybit_api_secret.clone(),
        endpoints.private_ws.to_string(),
        ev_tx,
    );

    let engine = TradeEngine::new(venue, chat.clone(), cfg, state);
    engine.startup_sync().await;

    supervisor::run(engine, chat, ev_rx).await
}
