//! ami-listener: keeps an AMI session open and relays events over HTTP
//!
//! Reads `ami-listener.toml` (or `--config`), lets flags and environment
//! variables override it, and runs until SIGINT or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, info};

use asterisk_ami_tokio::{
    AmiListener, Config, EventKey, HandlerRegistry, HttpRelay, RelayHandler, StopHandle,
};

#[derive(Parser)]
#[command(name = "ami-listener")]
#[command(about = "Persistent Asterisk AMI event listener with HTTP relay")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "ami-listener.toml")]
    config: PathBuf,

    /// Asterisk host (overrides config file)
    #[arg(long, env = "AMI_HOST")]
    host: Option<String>,

    /// AMI port (overrides config file)
    #[arg(long, env = "AMI_PORT")]
    port: Option<u16>,

    /// AMI username (overrides config file)
    #[arg(long, env = "AMI_USERNAME")]
    username: Option<String>,

    /// AMI secret (overrides config file)
    #[arg(long, env = "AMI_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Event mask sent after login, e.g. "call,agent"
    #[arg(long, env = "AMI_EVENT_MASK")]
    event_mask: Option<String>,

    /// URL receiving one JSON POST per event
    #[arg(long, env = "AMI_RELAY_URL")]
    relay_url: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.ami.host = host;
        }
        if let Some(port) = self.port {
            config.ami.port = port;
        }
        if let Some(username) = self.username {
            config.ami.username = username;
        }
        if let Some(secret) = self.secret {
            config.ami.secret = secret;
        }
        if let Some(mask) = self.event_mask {
            config.ami.event_mask = Some(mask);
        }
        if let Some(url) = self.relay_url {
            config.relay.url = Some(url);
        }
    }
}

fn build_registry(config: &Config) -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(EventKey::Any, |event| async move {
        debug!(
            "Event {} channel={:?} uniqueid={:?}",
            event
                .event()
                .unwrap_or_default(),
            event.channel(),
            event.unique_id()
        );
        Ok(())
    });

    if let Some(url) = &config.relay.url {
        let relay = Arc::new(HttpRelay::new(config.relay.timeout()));
        if config
            .relay
            .event_types
            .is_empty()
        {
            registry.register_handler(EventKey::Any, RelayHandler::new(relay, url.clone()));
        } else {
            for event_type in &config.relay.event_types {
                registry.register_handler(
                    event_type.as_str(),
                    RelayHandler::new(relay.clone(), url.clone()),
                );
            }
        }
        info!("Relaying events to {}", url);
    }

    registry
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ami_listener=info".parse()?)
                .add_directive("asterisk_ami_tokio=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    info!("Config file: {}", cli.config.display());

    let mut config = Config::load_or_default(&cli.config)?;
    cli.apply(&mut config);
    config.validate()?;
    debug!("{:?}", config);

    let stop = StopHandle::new();
    let listener = AmiListener::new(config.listener_config(), build_registry(&config))
        .with_stop_handle(stop.clone());

    tokio::spawn(async move {
        match shutdown_signal().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => tracing::error!("Signal handler failed, stopping: {}", e),
        }
        stop.stop();
    });

    let stats = listener
        .run()
        .await;
    info!(
        "Exited after {} sessions, {} events ({} handler failures)",
        stats.sessions, stats.events_dispatched, stats.handler_failures
    );
    Ok(())
}
