use std::{
    net::SocketAddr,
    time::{Duration, Instant},
};

use codec::crypto::password_digest;
use tunnel_server_service::{
    command::{Authorization, CommandGate, COMMAND_RATE_LIMIT},
    session::{ClientRegistry, RegistryOptions, MAX_PINGS_PER_IP},
};

const TIMEOUT: Duration = Duration::from_secs(60);

fn registry(max_clients: usize, ip_limit: usize) -> ClientRegistry {
    ClientRegistry::new(RegistryOptions {
        max_clients,
        ip_limit,
        timeout: TIMEOUT,
    })
}

fn addr(value: &str) -> SocketAddr {
    value.parse().unwrap()
}

#[test]
fn admission_then_forward() {
    let registry = registry(200, 8);
    let now = Instant::now();
    let first = addr("203.0.113.1:1000");
    let second = addr("203.0.113.2:2000");

    // Client 1 announces itself to a receiver nobody has registered yet:
    // admitted, nothing forwarded.
    let mut target = None;
    assert!(!registry.route(1, 2, first, now, |to| target = Some(to)));
    assert_eq!(target, None);
    assert_eq!(registry.endpoint_of(1), Some(first));

    // Client 2 answers; its payload goes to where client 1 last spoke from.
    assert!(registry.route(2, 1, second, now, |to| target = Some(to)));
    assert_eq!(target, Some(first));
    assert_eq!(registry.len(), 2);
}

#[test]
fn refresh_is_idempotent() {
    let registry = registry(200, 8);
    let now = Instant::now();
    let source = addr("203.0.113.1:1000");

    registry.route(1, 2, source, now, |_| {});
    registry.route(1, 2, source, now + Duration::from_secs(1), |_| {});

    assert_eq!(registry.len(), 1);
    assert_eq!(registry.endpoint_of(1), Some(source));
    assert_eq!(registry.connections_from(source.ip()), 1);
}

#[test]
fn reserved_identifiers_are_never_admitted() {
    let registry = registry(200, 8);
    let now = Instant::now();

    assert!(!registry.route(0, 2, addr("203.0.113.1:1000"), now, |_| {}));
    assert!(!registry.route(u32::MAX, 2, addr("203.0.113.1:1000"), now, |_| {}));
    assert!(registry.is_empty());
}

#[test]
fn payloads_never_loop_back_to_their_source() {
    let registry = registry(200, 8);
    let now = Instant::now();
    let shared = addr("203.0.113.1:1000");

    registry.route(2, 9, shared, now, |_| {});

    // Both identifiers sit on the same endpoint; forwarding would echo.
    let mut sent = false;
    assert!(!registry.route(1, 2, shared, now, |_| sent = true));
    assert!(!sent);
}

#[test]
fn per_ip_admission_cap() {
    let registry = registry(200, 2);
    let now = Instant::now();

    assert!(!registry.route(1, 9, addr("203.0.113.1:1000"), now, |_| {}));
    assert!(!registry.route(2, 9, addr("203.0.113.1:1001"), now, |_| {}));
    assert!(!registry.route(3, 9, addr("203.0.113.1:1002"), now, |_| {}));

    assert_eq!(registry.len(), 2);
    assert_eq!(registry.endpoint_of(3), None);
    assert_eq!(registry.connections_from(addr("203.0.113.1:0").ip()), 2);

    // A different source address is not affected by the full one.
    registry.route(4, 9, addr("203.0.113.2:1000"), now, |_| {});
    assert_eq!(registry.endpoint_of(4), Some(addr("203.0.113.2:1000")));
}

#[test]
fn table_size_cap() {
    let registry = registry(2, 8);
    let now = Instant::now();

    registry.route(1, 9, addr("203.0.113.1:1000"), now, |_| {});
    registry.route(2, 9, addr("203.0.113.2:1000"), now, |_| {});
    registry.route(3, 9, addr("203.0.113.3:1000"), now, |_| {});

    assert_eq!(registry.len(), 2);
    assert_eq!(registry.endpoint_of(3), None);
    // The refused admission must not leak an admission slot.
    assert_eq!(registry.connections_from(addr("203.0.113.3:0").ip()), 0);
}

#[test]
fn rebind_waits_for_the_timeout() {
    let registry = registry(200, 8);
    let start = Instant::now();
    let original = addr("203.0.113.1:1000");
    let moved = addr("203.0.113.1:1001");

    registry.route(7, 9, original, start, |_| {});

    // Too early: the identifier is still owned by the original endpoint.
    assert!(!registry.route(7, 9, moved, start + Duration::from_secs(30), |_| {}));
    assert_eq!(registry.endpoint_of(7), Some(original));

    // Past the timeout the endpoint follows the sender. Same address, so
    // the admission count must not move.
    registry.route(7, 9, moved, start + TIMEOUT, |_| {});
    assert_eq!(registry.endpoint_of(7), Some(moved));
    assert_eq!(registry.connections_from(original.ip()), 1);
}

#[test]
fn rebind_across_addresses_moves_the_admission_slot() {
    let registry = registry(200, 8);
    let start = Instant::now();
    let original = addr("203.0.113.1:1000");
    let moved = addr("203.0.113.2:2000");

    registry.route(7, 9, original, start, |_| {});
    registry.route(7, 9, moved, start + TIMEOUT, |_| {});

    assert_eq!(registry.endpoint_of(7), Some(moved));
    assert_eq!(registry.connections_from(original.ip()), 0);
    assert_eq!(registry.connections_from(moved.ip()), 1);
}

#[test]
fn maintenance_refuses_new_clients_and_rebinds_only() {
    let registry = registry(200, 8);
    let start = Instant::now();
    let original = addr("203.0.113.1:1000");
    let peer = addr("203.0.113.2:2000");

    registry.route(1, 2, original, start, |_| {});
    registry.route(2, 1, peer, start, |_| {});

    registry.set_maintenance(true);

    // New admissions are refused.
    assert!(!registry.route(3, 1, addr("203.0.113.3:3000"), start, |_| {}));
    assert_eq!(registry.endpoint_of(3), None);

    // So are endpoint rewrites, even after the timeout.
    assert!(!registry.route(1, 2, addr("203.0.113.1:1001"), start + TIMEOUT, |_| {}));
    assert_eq!(registry.endpoint_of(1), Some(original));

    // Established clients keep flowing.
    let mut target = None;
    assert!(registry.route(2, 1, peer, start, |to| target = Some(to)));
    assert_eq!(target, Some(original));
}

#[test]
fn sweep_evicts_idle_clients_and_their_slots() {
    let registry = registry(200, 8);
    let start = Instant::now();
    let source = addr("203.0.113.1:1000");

    registry.route(1, 9, source, start, |_| {});
    registry.route(2, 9, addr("203.0.113.2:1000"), start + TIMEOUT / 2, |_| {});

    // Only the older client has gone quiet for the full timeout.
    assert_eq!(registry.sweep(start + TIMEOUT), 1);
    assert_eq!(registry.endpoint_of(1), None);
    assert_eq!(registry.connections_from(source.ip()), 0);
    assert_eq!(registry.endpoint_of(2), Some(addr("203.0.113.2:1000")));

    // The freed identifier can register again immediately.
    assert!(!registry.route(1, 9, source, start + TIMEOUT, |_| {}));
    assert_eq!(registry.endpoint_of(1), Some(source));
}

#[test]
fn ping_quota_per_window() {
    let registry = registry(200, 8);
    let ip = addr("203.0.113.5:0").ip();

    for _ in 0..MAX_PINGS_PER_IP {
        assert!(registry.ping_permitted(ip));
    }
    assert!(!registry.ping_permitted(ip));

    // Another address has its own quota.
    assert!(registry.ping_permitted(addr("203.0.113.6:0").ip()));

    // The sweep opens a fresh window.
    registry.sweep(Instant::now());
    assert!(registry.ping_permitted(ip));
}

#[test]
fn command_gate_rate_limits_all_attempts() {
    let gate = CommandGate::new(Some("panda"));
    let start = Instant::now();
    let good = password_digest("panda");
    let bad = password_digest("raspberry");

    assert_eq!(gate.authorize(&good, start), Authorization::Granted);

    // Inside the window nothing is processed, not even valid digests.
    assert_eq!(
        gate.authorize(&good, start + COMMAND_RATE_LIMIT / 2),
        Authorization::RateLimited
    );

    // A failed attempt holds the window too.
    assert_eq!(
        gate.authorize(&bad, start + COMMAND_RATE_LIMIT),
        Authorization::Denied
    );
    assert_eq!(
        gate.authorize(&good, start + COMMAND_RATE_LIMIT + Duration::from_secs(30)),
        Authorization::RateLimited
    );

    assert_eq!(
        gate.authorize(&good, start + COMMAND_RATE_LIMIT * 2),
        Authorization::Granted
    );
}

#[test]
fn command_gate_without_a_password_is_off() {
    let gate = CommandGate::new(None);
    let now = Instant::now();

    assert_eq!(
        gate.authorize(&password_digest("anything"), now),
        Authorization::Disabled
    );

    // Disabled attempts do not hold the window either.
    assert_eq!(
        gate.authorize(&password_digest("anything"), now),
        Authorization::Disabled
    );
}

#[test]
fn v4_and_v4_mapped_sources_share_one_admission_budget() {
    let registry = registry(200, 2);
    let now = Instant::now();

    // The dual-stack socket reports v4 peers as v4-mapped v6 addresses.
    registry.route(1, 9, addr("[::ffff:203.0.113.1]:1000"), now, |_| {});
    registry.route(2, 9, addr("[::ffff:203.0.113.1]:1001"), now, |_| {});
    assert!(!registry.route(3, 9, addr("[::ffff:203.0.113.1]:1002"), now, |_| {}));

    assert_eq!(registry.connections_from(addr("203.0.113.1:0").ip()), 2);
}
