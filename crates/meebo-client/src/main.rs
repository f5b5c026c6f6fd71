//! Meebo client daemon
//!
//! Runs the configured sensors against the brain and speaks its answers
//! until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use meeboconf::MeeboConfig;
use meeboproto::zmq::{ZmqConnector, ZmqConsumer};
use meeboproto::{Environment, EnvironmentSeed, TransportError, TransportPolicy};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use meebo_client::{
    spawn_producers, telemetry, CommandListener, CommandSpeaker, Conversation, ConversationTiming, ProducerContext,
    Reactor, ReactorSettings, ResponseListener, Sensors, SilentListener,
};

#[derive(Parser, Debug)]
#[command(name = "meebo-client")]
#[command(version, about = "Meebo doorbell client", long_about = None)]
struct Cli {
    /// Config file (defaults to ./meebo.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Client name, overriding client.name
    #[arg(short, long)]
    name: Option<String>,

    /// Print the merged configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = MeeboConfig::load_from(cli.config.as_deref()).context("loading configuration")?;
    if let Some(name) = cli.name {
        config.infra.client.name = name;
    }

    if cli.print_config {
        print!("{}", config.to_toml());
        return Ok(());
    }

    telemetry::init(&config.infra.telemetry.log_level, &config.infra.client.name)?;
    info!("🚪 meebo-client {} starting as {}", env!("CARGO_PKG_VERSION"), config.infra.client.name);

    let env = Environment::new(EnvironmentSeed::client(&config));
    let context = Arc::new(tmq::Context::new());
    let policy = TransportPolicy::from(&config.infra.transport);
    let connector = ZmqConnector::new(context.clone(), policy);
    let brain = config.infra.broker.endpoint.clone();

    let mut inbound = ZmqConsumer::bind(&context, &config.infra.client.listen)
        .with_context(|| format!("binding {}", config.infra.client.listen))?;
    info!("   Listening: {} (brain answers to {})", config.infra.client.listen, config.infra.client.reply_to);

    let listener: Arc<dyn ResponseListener> = match CommandListener::new(&config.infra.speech.listen_command) {
        Some(listener) => Arc::new(listener),
        None => {
            warn!("no speech.listen_command configured, visitors' answers will not be heard");
            Arc::new(SilentListener)
        }
    };
    let conversation = Conversation::new(
        env.clone(),
        Arc::new(CommandSpeaker::new(
            config.infra.speech.language.clone(),
            config.infra.speech.player.clone(),
        )),
        listener,
        ConversationTiming::from(&config.bootstrap.timing),
    );
    let outbound = connector
        .publisher(&brain)
        .with_context(|| format!("connecting to brain at {brain}"))?;
    let mut reactor = Reactor::new(
        env.clone(),
        conversation,
        Box::new(outbound),
        ReactorSettings::from_config(&config),
    );

    if let Err(e) = reactor.connect().await {
        warn!("brain at {} did not take our hello, carrying on: {}", brain, e);
    }

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

    let ctx = ProducerContext::from_config(env, &config);
    let producers = spawn_producers(&ctx, Sensors::from_config(&config), &connector, &brain, &shutdown);
    info!("✅ {} producers running", producers.len());

    let outcome = reactor.run(&mut inbound, shutdown.clone()).await;
    shutdown.cancel();
    for producer in producers {
        let _ = producer.await;
    }

    match outcome {
        Ok(()) | Err(TransportError::Closed) => {
            info!("meebo-client shutdown complete");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
