pub mod announce;
pub mod config;
pub mod server;
pub mod statistics;

use std::{sync::Arc, time::Duration};

use tokio::sync::watch;

use service::{
    command::CommandGate,
    limiter::ReflectionLimiter,
    session::{ClientRegistry, RegistryOptions},
};

use self::{announce::Announcer, config::Config, statistics::Statistics};

#[rustfmt::skip]
static SOFTWARE: &str = concat!(
    "tunnel-rs.",
    env!("CARGO_PKG_VERSION")
);

/// In order to let integration tooling use the tunnel-server crate and
/// start the server directly, a function is opened to replace the main
/// function.
///
/// Runs until the process receives an interrupt, then signals every task
/// to stop and returns.
pub async fn startup(config: Arc<Config>) -> anyhow::Result<()> {
    log::info!("{} starting", SOFTWARE);

    let statistics = Statistics::default();
    let registry = Arc::new(ClientRegistry::new(RegistryOptions {
        max_clients: config.tunnel.max_clients,
        ip_limit: config.tunnel.ip_limit,
        timeout: Duration::from_secs(config.tunnel.client_timeout_secs),
    }));

    let gate = Arc::new(CommandGate::new(config.maintenance.password.as_deref()));
    let limiter = Arc::new(ReflectionLimiter::default());
    let announcer = Announcer::from_config(&config)?;

    let (shutdown, signal) = watch::channel(false);

    server::start(&config, &registry, &gate, &limiter, &statistics, &signal)?;

    tokio::spawn(announce::heartbeat(
        registry.clone(),
        announcer,
        statistics.clone(),
        signal.clone(),
    ));

    tokio::signal::ctrl_c().await?;

    log::info!("interrupt received, shutting down");
    let _ = shutdown.send(true);

    Ok(())
}
