use std::{
    io::ErrorKind::ConnectionReset,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    sync::Arc,
    time::Instant,
};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::{net::UdpSocket, sync::watch, time::interval};

use codec::{
    packet::{self, Datagram},
    reflection::{self, ReplyTemplate},
};
use service::{
    command::{Authorization, CommandGate, MAINTENANCE_TOGGLE},
    limiter::{ReflectionLimiter, RESET_INTERVAL},
    session::ClientRegistry,
};

use crate::{
    config::Config,
    statistics::{Statistics, Stats},
};

/// Bind both sockets and start the receive loops.
///
/// Bind failures are the one class of error that aborts startup; once the
/// tasks are running, everything packet-shaped is handled locally.
pub fn start(
    config: &Config,
    registry: &Arc<ClientRegistry>,
    gate: &Arc<CommandGate>,
    limiter: &Arc<ReflectionLimiter>,
    statistics: &Statistics,
    shutdown: &watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let tunnel = bind_dual_stack(config.tunnel.port)?;
    let reflection = bind_v4(config.reflection.port)?;

    log::info!(
        "tunnel server listening: addr={}, transport=UDP",
        tunnel.local_addr()?,
    );

    log::info!(
        "reflection responder listening: addr={}, transport=UDP",
        reflection.local_addr()?,
    );

    tokio::spawn(relay_server(
        tunnel,
        registry.clone(),
        gate.clone(),
        statistics.clone(),
        shutdown.clone(),
    ));

    tokio::spawn(reflection_server(
        reflection,
        limiter.clone(),
        statistics.clone(),
        shutdown.clone(),
    ));

    tokio::spawn(reset_reflection_counter(limiter.clone(), shutdown.clone()));

    Ok(())
}

/// The relay bind accepts both families on one socket; v4 peers show up
/// v4-mapped.
fn bind_dual_stack(port: u16) -> anyhow::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_only_v6(false)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)).into())?;

    Ok(UdpSocket::from_std(socket.into())?)
}

fn bind_v4(port: u16) -> anyhow::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)).into())?;

    Ok(UdpSocket::from_std(socket.into())?)
}

/// Sources the relay refuses to talk to regardless of payload.
fn hostile_source(addr: &SocketAddr) -> bool {
    if addr.port() == 0 {
        return true;
    }

    match addr.ip().to_canonical() {
        IpAddr::V4(ip) => ip.is_loopback() || ip.is_unspecified() || ip.is_broadcast(),
        IpAddr::V6(ip) => ip.is_loopback() || ip.is_unspecified(),
    }
}

/// tunnel socket process task.
///
/// Read one datagram at a time into the pooled buffer, classify it, and
/// dispatch. Relay payloads are sent onward from the same buffer; the
/// table lookup and the forward happen under one lock acquisition.
async fn relay_server(
    socket: UdpSocket,
    registry: Arc<ClientRegistry>,
    gate: Arc<CommandGate>,
    statistics: Statistics,
    mut shutdown: watch::Receiver<bool>,
) {
    let local_addr = socket.local_addr().ok();
    let mut buf = vec![0u8; packet::MAX_DATAGRAM_LEN];

    loop {
        let (size, from) = tokio::select! {
            _ = shutdown.changed() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok(it) => it,
                // Also reported when a previous send bounced; harmless for
                // a connectionless socket.
                Err(e) if e.kind() == ConnectionReset => continue,
                Err(e) => {
                    log::error!("tunnel server read failed: addr={local_addr:?}, err={e}");
                    break;
                }
            },
        };

        statistics.add(Stats::ReceivedBytes(size));
        statistics.add(Stats::ReceivedPkts(1));

        if size < packet::HEADER_LEN || hostile_source(&from) {
            statistics.add(Stats::DroppedPkts(1));
            continue;
        }

        let now = Instant::now();

        match packet::classify(&buf[..size]) {
            Datagram::Ping(probe) => {
                if !registry.ping_permitted(from.ip()) {
                    log::debug!("probe rate limited: addr={from}");
                    statistics.add(Stats::DroppedPkts(1));
                    continue;
                }

                if let Err(e) = socket.send_to(probe, from).await {
                    if e.kind() != ConnectionReset {
                        log::error!("tunnel server write failed: addr={from}, err={e}");
                        break;
                    }
                } else {
                    statistics.add(Stats::SendBytes(probe.len()));
                    statistics.add(Stats::SendPkts(1));
                }
            }
            Datagram::Command { command, digest } => {
                match gate.authorize(digest, now) {
                    Authorization::Granted => {
                        if command == MAINTENANCE_TOGGLE {
                            let enabled = registry.toggle_maintenance();
                            log::info!("maintenance mode changed: enabled={enabled}, addr={from}");
                        }
                    }
                    Authorization::Denied => {
                        log::warn!("maintenance command with a bad digest: addr={from}");
                    }
                    Authorization::RateLimited | Authorization::Disabled => {}
                }
            }
            Datagram::Relay { sender, receiver } => {
                let mut sent = 0;
                registry.route(sender, receiver, from, now, |target| {
                    // Inside the table lock, so the send must not block;
                    // a full socket buffer drops the packet.
                    if socket.try_send_to(&buf[..size], target).is_ok() {
                        sent = size;
                    }
                });

                if sent > 0 {
                    statistics.add(Stats::SendBytes(sent));
                    statistics.add(Stats::SendPkts(1));
                }
            }
            Datagram::Discard => {
                statistics.add(Stats::DroppedPkts(1));
            }
        }
    }

    log::info!("tunnel server close: addr={local_addr:?}");
}

/// reflection socket process task.
///
/// Answers correctly-tagged requests with the requester's own address,
/// obfuscated. IPv4 only: the reply format has room for four address
/// bytes.
async fn reflection_server(
    socket: UdpSocket,
    limiter: Arc<ReflectionLimiter>,
    statistics: Statistics,
    mut shutdown: watch::Receiver<bool>,
) {
    let local_addr = socket.local_addr().ok();
    let template = ReplyTemplate::generate();
    let mut buf = vec![0u8; reflection::RECV_BUFFER_LEN];

    loop {
        let (size, from) = tokio::select! {
            _ = shutdown.changed() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok(it) => it,
                Err(e) if e.kind() == ConnectionReset => continue,
                Err(e) => {
                    log::error!("reflection responder read failed: addr={local_addr:?}, err={e}");
                    break;
                }
            },
        };

        statistics.add(Stats::ReceivedBytes(size));
        statistics.add(Stats::ReceivedPkts(1));

        if size != reflection::REQUEST_LEN || hostile_source(&from) {
            statistics.add(Stats::DroppedPkts(1));
            continue;
        }

        if !limiter.permitted(from.ip()) {
            log::debug!("reflection rate limited: addr={from}");
            statistics.add(Stats::DroppedPkts(1));
            continue;
        }

        if !reflection::is_request(&buf[..size]) {
            statistics.add(Stats::DroppedPkts(1));
            continue;
        }

        let SocketAddr::V4(v4) = from else {
            statistics.add(Stats::DroppedPkts(1));
            continue;
        };

        let reply = template.reply(*v4.ip(), v4.port());
        if let Err(e) = socket.send_to(&reply, from).await {
            if e.kind() != ConnectionReset {
                log::error!("reflection responder write failed: addr={from}, err={e}");
                break;
            }
        } else {
            statistics.add(Stats::SendBytes(reply.len()));
            statistics.add(Stats::SendPkts(1));
        }
    }

    log::info!("reflection responder close: addr={local_addr:?}");
}

/// Opens a fresh reflection window on a fixed period.
async fn reset_reflection_counter(
    limiter: Arc<ReflectionLimiter>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(RESET_INTERVAL);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => limiter.reset(),
        }
    }
}
