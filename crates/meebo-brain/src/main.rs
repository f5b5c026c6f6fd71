//! Meebo brain daemon
//!
//! Binds the bus endpoint, loads the dialogue script and answers clients
//! until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chatpath::{DialogueGraph, GraphOptions};
use clap::Parser;
use meeboconf::MeeboConfig;
use meeboproto::zmq::{ZmqConnector, ZmqConsumer};
use meeboproto::{Environment, EnvironmentSeed, ReplyPublishers, TransportError, TransportPolicy};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use meebo_brain::{telemetry, Capabilities, Router, RouterSettings, SnapshotArchive};

#[derive(Parser, Debug)]
#[command(name = "meebo-brain")]
#[command(version, about = "Central brain for Meebo doorbells", long_about = None)]
struct Cli {
    /// Config file (defaults to ./meebo.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dialogue script, overriding paths.script
    #[arg(short, long)]
    script: Option<PathBuf>,

    /// Endpoint to bind, overriding broker.bind
    #[arg(short, long)]
    bind: Option<String>,

    /// Print the merged configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = MeeboConfig::load_from(cli.config.as_deref()).context("loading configuration")?;
    if let Some(script) = cli.script {
        config.infra.paths.script = script;
    }
    if let Some(bind) = cli.bind {
        config.infra.broker.bind = bind;
    }

    if cli.print_config {
        print!("{}", config.to_toml());
        return Ok(());
    }

    telemetry::init(&config.infra.telemetry.log_level)?;
    info!("🧠 meebo-brain {} starting", env!("CARGO_PKG_VERSION"));

    let dialogue = &config.bootstrap.dialogue;
    let options = GraphOptions {
        language: dialogue.language.clone(),
        max_hops: dialogue.max_hops,
    };
    let script = &config.infra.paths.script;
    let graph = DialogueGraph::load(script, options)
        .with_context(|| format!("loading dialogue script {}", script.display()))?;
    info!("   Dialogue: {} rows from {}", graph.len(), script.display());

    if !config.infra.broker.username.is_empty() {
        warn!("broker credentials are configured but the ZMQ bus does not authenticate");
    }

    let env = Environment::new(EnvironmentSeed::brain(&config));
    let caps = Capabilities::from_config(&config, graph.intents());
    let mut router = Router::new(env, Arc::new(graph), caps, RouterSettings::from_config(&config));
    if config.infra.snapshots.enabled {
        let archive = SnapshotArchive::new(config.infra.snapshots.dir.clone());
        info!("   Snapshots: {}", archive.dir().display());
        router = router.with_snapshots(archive);
    }

    let context = Arc::new(tmq::Context::new());
    let policy = TransportPolicy::from(&config.infra.transport);
    let mut inbound = ZmqConsumer::bind(&context, &config.infra.broker.bind)
        .with_context(|| format!("binding {}", config.infra.broker.bind))?;
    let mut replies = ReplyPublishers::new(Arc::new(ZmqConnector::new(context, policy)));
    info!("   Bus: {}", config.infra.broker.bind);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, shutting down");
                signal.cancel();
            }
            Err(e) => warn!("could not listen for Ctrl-C: {}", e),
        }
    });

    info!("✅ {} ready", config.infra.broker.brain_name);
    match router.run(&mut inbound, &mut replies, shutdown).await {
        Ok(()) | Err(TransportError::Closed) => {}
        Err(e) => return Err(e.into()),
    }

    info!("meebo-brain shutdown complete");
    Ok(())
}
