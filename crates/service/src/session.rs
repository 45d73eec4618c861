use std::{
    net::{IpAddr, SocketAddr},
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use ahash::AHashMap;
use parking_lot::Mutex;

use codec::packet::{ID_COMMAND, ID_NONE};

/// The probe quota map never tracks more than this many addresses per
/// window; once full, every further probe goes unanswered until the next
/// sweep.
pub const MAX_PINGS_GLOBAL: usize = 5000;

/// Probe replies per address per window.
pub const MAX_PINGS_PER_IP: usize = 20;

/// Table sizing and eviction policy, fixed at startup.
#[derive(Debug, Clone, Copy)]
pub struct RegistryOptions {
    /// Ceiling on the number of registered clients.
    pub max_clients: usize,
    /// Ceiling on registered clients per source address.
    pub ip_limit: usize,
    /// Idle time after which a client may be evicted or rebound.
    pub timeout: Duration,
}

/// One registered client: the endpoint it was last heard from, and when.
#[derive(Debug, Clone, Copy)]
struct TunnelClient {
    endpoint: SocketAddr,
    last_receive: Instant,
}

impl TunnelClient {
    fn timed_out(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_receive) >= timeout
    }
}

/// The tables that must be mutated together: the client table, the per-IP
/// admission counter derived from it, and the probe quota.
#[derive(Default)]
struct State {
    clients: AHashMap<u32, TunnelClient>,
    ip_counts: AHashMap<IpAddr, usize>,
    ping_counts: AHashMap<IpAddr, usize>,
}

/// The client table and its admission policy.
///
/// All reads and writes for one datagram happen under one lock acquisition,
/// so the admission decision, the counter updates and the forward target
/// are always mutually consistent. The maintenance flag is a plain atomic;
/// it is only ever written from the relay path.
pub struct ClientRegistry {
    state: Mutex<State>,
    maintenance: AtomicBool,
    options: RegistryOptions,
}

impl ClientRegistry {
    pub fn new(options: RegistryOptions) -> Self {
        Self {
            state: Mutex::new(State {
                clients: AHashMap::with_capacity(options.max_clients),
                ip_counts: AHashMap::with_capacity(options.max_clients),
                ping_counts: AHashMap::default(),
            }),
            maintenance: AtomicBool::new(false),
            options,
        }
    }

    /// Admit or refresh `sender` from `from`, then forward to `receiver`.
    ///
    /// The whole of one datagram's table work runs under a single lock
    /// acquisition, and `send` is invoked inside it, so the target endpoint
    /// cannot be rewritten between the lookup and the send. Returns whether
    /// `send` was invoked.
    ///
    /// A receiver that is not registered is not an error: announcing
    /// yourself to a peer that has not registered yet is how clients
    /// punch holes.
    ///
    /// # Test
    ///
    /// ```
    /// use std::time::{Duration, Instant};
    ///
    /// use tunnel_server_service::session::{ClientRegistry, RegistryOptions};
    ///
    /// let registry = ClientRegistry::new(RegistryOptions {
    ///     max_clients: 200,
    ///     ip_limit: 8,
    ///     timeout: Duration::from_secs(60),
    /// });
    ///
    /// let now = Instant::now();
    /// let first = "203.0.113.1:1000".parse().unwrap();
    /// let second = "203.0.113.2:2000".parse().unwrap();
    ///
    /// // The receiver is unknown, so nothing is sent, but the sender is
    /// // now registered.
    /// assert!(!registry.route(1, 2, first, now, |_| {}));
    /// assert_eq!(registry.endpoint_of(1), Some(first));
    ///
    /// let mut target = None;
    /// assert!(registry.route(2, 1, second, now, |to| target = Some(to)));
    /// assert_eq!(target, Some(first));
    /// ```
    pub fn route<F>(&self, sender: u32, receiver: u32, from: SocketAddr, now: Instant, send: F) -> bool
    where
        F: FnOnce(SocketAddr),
    {
        // Reserved identifiers never enter the table.
        if sender == ID_NONE || sender == ID_COMMAND {
            return false;
        }

        let ip = from.ip().to_canonical();
        let mut state = self.state.lock();
        let State {
            clients, ip_counts, ..
        } = &mut *state;

        let endpoint = match clients.get_mut(&sender) {
            Some(client) if client.endpoint == from => {
                client.last_receive = now;
                client.endpoint
            }
            Some(client) => {
                // A different endpoint may only take over an identifier
                // once the old one has gone quiet.
                if !client.timed_out(now, self.options.timeout)
                    || self.maintenance.load(Ordering::Relaxed)
                {
                    return false;
                }

                let old = client.endpoint.ip().to_canonical();
                if !is_new_connection_allowed(ip_counts, self.options.ip_limit, ip, Some(old)) {
                    return false;
                }

                client.endpoint = from;
                client.last_receive = now;
                client.endpoint
            }
            None => {
                if clients.len() >= self.options.max_clients {
                    log::info!("client table full: max={}", self.options.max_clients);
                    return false;
                }

                if self.maintenance.load(Ordering::Relaxed)
                    || !is_new_connection_allowed(ip_counts, self.options.ip_limit, ip, None)
                {
                    return false;
                }

                clients.insert(
                    sender,
                    TunnelClient {
                        endpoint: from,
                        last_receive: now,
                    },
                );

                from
            }
        };

        let Some(target) = clients.get(&receiver) else {
            return false;
        };

        // Never echo a payload back to where it came from.
        if target.endpoint == endpoint {
            return false;
        }

        send(target.endpoint);

        true
    }

    /// Whether a latency probe from `ip` may be answered in this window.
    ///
    /// Shares the client-table lock: the quota map is cleared by the same
    /// sweep that evicts clients.
    pub fn ping_permitted(&self, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        let mut state = self.state.lock();

        if state.ping_counts.len() >= MAX_PINGS_GLOBAL {
            return false;
        }

        match state.ping_counts.get(&ip).copied() {
            Some(count) if count >= MAX_PINGS_PER_IP => false,
            _ => {
                *state.ping_counts.entry(ip).or_insert(0) += 1;

                true
            }
        }
    }

    /// Evict every timed-out client, release its admission slot, and start
    /// a fresh probe window. Returns the number of clients that remain.
    ///
    /// # Test
    ///
    /// ```
    /// use std::time::{Duration, Instant};
    ///
    /// use tunnel_server_service::session::{ClientRegistry, RegistryOptions};
    ///
    /// let registry = ClientRegistry::new(RegistryOptions {
    ///     max_clients: 200,
    ///     ip_limit: 8,
    ///     timeout: Duration::from_secs(60),
    /// });
    ///
    /// let start = Instant::now();
    /// registry.route(1, 2, "203.0.113.1:1000".parse().unwrap(), start, |_| {});
    ///
    /// assert_eq!(registry.sweep(start + Duration::from_secs(30)), 1);
    /// assert_eq!(registry.sweep(start + Duration::from_secs(90)), 0);
    /// ```
    pub fn sweep(&self, now: Instant) -> usize {
        let mut state = self.state.lock();
        let State {
            clients,
            ip_counts,
            ping_counts,
        } = &mut *state;

        clients.retain(|_, client| {
            if client.timed_out(now, self.options.timeout) {
                release_ip(ip_counts, client.endpoint.ip().to_canonical());

                false
            } else {
                true
            }
        });

        ping_counts.clear();

        clients.len()
    }

    /// Whether new admissions and endpoint rebinds are currently refused.
    pub fn maintenance(&self) -> bool {
        self.maintenance.load(Ordering::Relaxed)
    }

    pub fn set_maintenance(&self, enabled: bool) {
        self.maintenance.store(enabled, Ordering::Relaxed);
    }

    /// Flip maintenance mode and return the new value.
    pub fn toggle_maintenance(&self) -> bool {
        !self.maintenance.fetch_xor(true, Ordering::Relaxed)
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.state.lock().clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The endpoint a client is currently registered from.
    pub fn endpoint_of(&self, client: u32) -> Option<SocketAddr> {
        self.state.lock().clients.get(&client).map(|it| it.endpoint)
    }

    /// Number of registered clients sharing one source address.
    pub fn connections_from(&self, ip: IpAddr) -> usize {
        self.state
            .lock()
            .ip_counts
            .get(&ip.to_canonical())
            .copied()
            .unwrap_or(0)
    }
}

/// The per-IP admission check.
///
/// Counts are adjusted here and only here on the admission side; the sweep
/// releases slots on the eviction side. When an identifier rebinds to a new
/// address the old address gives its slot back.
fn is_new_connection_allowed(
    ip_counts: &mut AHashMap<IpAddr, usize>,
    ip_limit: usize,
    new: IpAddr,
    old: Option<IpAddr>,
) -> bool {
    if ip_counts.get(&new).copied().unwrap_or(0) >= ip_limit {
        return false;
    }

    match old {
        None => {
            *ip_counts.entry(new).or_insert(0) += 1;

            true
        }
        Some(old) if old != new => {
            *ip_counts.entry(new).or_insert(0) += 1;
            release_ip(ip_counts, old);

            true
        }
        // Same address: the slot just moves ports.
        Some(_) => true,
    }
}

fn release_ip(ip_counts: &mut AHashMap<IpAddr, usize>, ip: IpAddr) {
    if let Some(count) = ip_counts.get_mut(&ip) {
        *count -= 1;
        if *count == 0 {
            ip_counts.remove(&ip);
        }
    }
}
