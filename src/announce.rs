use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Result;
use reqwest::{Client, Url};
use tokio::{sync::watch, time::interval};

use service::session::ClientRegistry;

use crate::{config::Config, statistics::Statistics};

/// Cleanup and announce period. The first pass runs immediately at
/// startup.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

const ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(10);

/// The announce dialect understood by the directory.
const PROTOCOL_VERSION: &str = "3";

/// HTTP client for the directory service.
///
/// The directory learns about this instance from a GET with the instance
/// state in the query string; the query values are percent-encoded by the
/// request builder. Anything but an `OK` body is a failed announce.
pub struct Announcer {
    client: Client,
    url: Url,
    name: String,
    password: String,
    port: u16,
    max_clients: usize,
}

impl Announcer {
    /// Build the announcer, or `None` when announcing is turned off. A
    /// malformed directory URL is a startup error, not a runtime one.
    pub fn from_config(config: &Config) -> Result<Option<Self>> {
        if config.master.no_announce {
            return Ok(None);
        }

        let Some(url) = &config.master.url else {
            log::warn!("no master url configured, announce disabled");
            return Ok(None);
        };

        Ok(Some(Self {
            client: Client::builder().timeout(ANNOUNCE_TIMEOUT).build()?,
            url: url.parse()?,
            name: config.master.name.clone(),
            password: config.master.password.clone(),
            port: config.tunnel.port,
            max_clients: config.tunnel.max_clients,
        }))
    }

    async fn announce(&self, clients: usize, maintenance: bool) -> Result<()> {
        let response = self
            .client
            .get(self.url.clone())
            .query(&[
                ("version", PROTOCOL_VERSION.to_string()),
                ("name", self.name.clone()),
                ("port", self.port.to_string()),
                ("clients", clients.to_string()),
                ("maxclients", self.max_clients.to_string()),
                ("masterpw", self.password.clone()),
                ("maintenance", if maintenance { "1" } else { "0" }.to_string()),
            ])
            .send()
            .await?;

        let body = response.text().await?;
        if !body.eq_ignore_ascii_case("OK") {
            anyhow::bail!("unexpected master response: {body:?}");
        }

        Ok(())
    }
}

/// The periodic cleanup and announce task.
///
/// Eviction runs under the client-table lock; the announce runs after the
/// lock is released so a slow directory never stalls the relay. Announce
/// failures are logged and the service carries on.
pub async fn heartbeat(
    registry: Arc<ClientRegistry>,
    announcer: Option<Announcer>,
    statistics: Statistics,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(HEARTBEAT_INTERVAL);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        let clients = registry.sweep(Instant::now());

        let counts = statistics.counts();
        log::info!(
            "heartbeat: clients={}, received={}pkts/{}bytes, sent={}pkts/{}bytes, dropped={}pkts",
            clients,
            counts.received_pkts.get(),
            counts.received_bytes.get(),
            counts.send_pkts.get(),
            counts.send_bytes.get(),
            counts.dropped_pkts.get(),
        );

        if let Some(announcer) = &announcer {
            if let Err(e) = announcer
                .announce(clients, registry.maintenance())
                .await
            {
                log::error!("master announce failed: err={e}");
            }
        }
    }
}
