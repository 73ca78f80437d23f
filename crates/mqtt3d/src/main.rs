//! `mqtt3d`: a lightweight MQTT 3.1 / 3.1.1 broker.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mqtt3_broker::{Broker, BrokerConfig, ManagementServer};

/// A lightweight MQTT 3.1 / 3.1.1 broker.
#[derive(Parser)]
#[command(name = "mqtt3d", version, about)]
struct Cli {
    /// Address to listen on for MQTT connections; a bare `:port` binds all
    /// interfaces.
    #[arg(long, default_value = ":1883")]
    address: String,

    /// Address of the HTTP management endpoint; an empty value disables it.
    #[arg(long, default_value = "localhost:8883")]
    management: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mqtt3d=info,mqtt3_broker=info")),
        )
        .init();

    let config = BrokerConfig {
        bind_addr: cli.address,
        management_addr: (!cli.management.is_empty()).then_some(cli.management),
        ..BrokerConfig::default()
    };

    let management_addr = config.management_addr.clone();
    let broker = Broker::bind(config).await?;

    if let Some(addr) = management_addr {
        let management = ManagementServer::bind(&addr, Arc::clone(&broker)).await?;
        tokio::spawn(async move {
            if let Err(err) = management.run().await {
                error!(error = %err, "management endpoint failed");
            }
        });
    }

    let serve = tokio::spawn(Arc::clone(&broker).run());

    tokio::select! {
        result = serve => result??,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
            broker.stop();
        }
    }

    Ok(())
}
