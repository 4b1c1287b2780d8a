// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Forwarding engine.
//!
//! The Router matches every inbound message against all compiled rules and
//! fans it out through a [`Transport`]. Matching only looks at the first
//! path segment; all rules with that prefix apply, in declaration order.

use crate::config::{ConfigError, Verbosity};
use crate::osc::{OscMessage, OscPacket};
use crate::registry::DestinationId;
use crate::route::{Route, RouteStatsSnapshot};
use crate::rules::{RuleError, RuleTable};
use crate::transform::path_prefix;
use crate::transport::{Transport, TransportError};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// Router errors.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Rule error: {0}")]
    Rules(#[from] RuleError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Cannot bind listen address {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Router not running")]
    NotRunning,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One outbound send decided by [`Router::route`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery<'a> {
    /// Index of the matching rule.
    pub rule: usize,

    /// Target destination.
    pub destination: DestinationId,

    /// Path to send, after the rule's rewrite.
    pub path: &'a str,
}

/// Outcome of dispatching one or more messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

impl DispatchReport {
    fn merge(&mut self, other: DispatchReport) {
        self.attempted += other.attempted;
        self.delivered += other.delivered;
        self.failed += other.failed;
    }
}

#[derive(Debug, Default)]
struct RouterCounters {
    packets_received: AtomicU64,
    messages_received: AtomicU64,
    messages_unrouted: AtomicU64,
    decode_errors: AtomicU64,
}

/// Snapshot of router-wide and per-route statistics.
#[derive(Debug, Clone)]
pub struct RouterStatsSnapshot {
    pub packets_received: u64,
    pub messages_received: u64,
    /// Messages that produced no delivery.
    pub messages_unrouted: u64,
    pub decode_errors: u64,
    pub uptime_secs: u64,
    pub routes: Vec<RouteStatsSnapshot>,
}

/// Handle to control a running router.
#[derive(Clone)]
pub struct RouterHandle {
    running: Arc<AtomicBool>,
    stats_tx: Option<mpsc::Sender<StatsRequest>>,
    local_addr: SocketAddr,
}

impl RouterHandle {
    /// Check if router is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Request router to stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Address the listen socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get router statistics.
    pub async fn get_stats(&self) -> Result<RouterStatsSnapshot, RouterError> {
        let (tx, mut rx) = mpsc::channel(1);
        if let Some(ref stats_tx) = self.stats_tx {
            stats_tx
                .send(StatsRequest { reply: tx })
                .await
                .map_err(|_| RouterError::NotRunning)?;
            rx.recv().await.ok_or(RouterError::NotRunning)
        } else {
            Err(RouterError::NotRunning)
        }
    }
}

struct StatsRequest {
    reply: mpsc::Sender<RouterStatsSnapshot>,
}

const RECV_POLL_INTERVAL: Duration = Duration::from_millis(100);
const MAX_DATAGRAM: usize = 65_536;

/// OSC forwarding engine.
pub struct Router {
    table: Arc<RuleTable>,
    routes: Vec<Route>,
    by_prefix: HashMap<String, Vec<usize>>,
    verbosity: Verbosity,
    counters: RouterCounters,
    running: Arc<AtomicBool>,
    start_time: Instant,
}

impl Router {
    /// Create a router over a compiled rule table.
    pub fn new(table: RuleTable) -> Self {
        let routes: Vec<Route> = table.rules().iter().map(Route::from_rule).collect();

        // Rules with an empty prefix can never match and are left out.
        let mut by_prefix: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, route) in routes.iter().enumerate() {
            if route.prefix.is_empty() {
                tracing::warn!("{}: rule has an empty prefix and will never match", route.location);
                continue;
            }
            by_prefix.entry(route.prefix.clone()).or_default().push(index);
        }

        Self {
            table: Arc::new(table),
            routes,
            by_prefix,
            verbosity: Verbosity::default(),
            counters: RouterCounters::default(),
            running: Arc::new(AtomicBool::new(false)),
            start_time: Instant::now(),
        }
    }

    /// Set which events are logged at info level.
    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Get the rule table.
    pub fn table(&self) -> &RuleTable {
        &self.table
    }

    /// Get all routes, in declaration order.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Decide where a message with `path` goes.
    ///
    /// Deliveries come in rule declaration order, then target order. Nothing
    /// is deduplicated: two rules naming the same destination send twice.
    pub fn route<'a>(&self, path: &'a str) -> Vec<Delivery<'a>> {
        let prefix = path_prefix(path);
        let Some(indices) = self.by_prefix.get(prefix) else {
            return Vec::new();
        };

        let mut deliveries = Vec::new();
        for &index in indices {
            let route = &self.routes[index];
            route.record_match();

            match route.outgoing_path(path) {
                Some(outgoing) => {
                    deliveries.extend(route.targets.iter().map(|destination| Delivery {
                        rule: index,
                        destination: *destination,
                        path: outgoing,
                    }));
                }
                None => {
                    route.record_dropped();
                    tracing::debug!(
                        "{}: {} has nothing left after truncation, not forwarded",
                        route.location,
                        path
                    );
                }
            }
        }
        deliveries
    }

    /// Route a message and send it to every matched destination.
    ///
    /// A failed send is logged and counted; the remaining destinations are
    /// still attempted.
    pub fn dispatch<T: Transport + ?Sized>(
        &self,
        message: &OscMessage,
        transport: &T,
    ) -> DispatchReport {
        self.counters
            .messages_received
            .fetch_add(1, Ordering::Relaxed);

        let deliveries = self.route(&message.path);
        if deliveries.is_empty() {
            self.counters
                .messages_unrouted
                .fetch_add(1, Ordering::Relaxed);
            tracing::trace!("No rule forwards {}", message.path);
            return DispatchReport::default();
        }

        let mut report = DispatchReport::default();
        for delivery in deliveries {
            report.attempted += 1;
            let route = &self.routes[delivery.rule];

            match transport.send(delivery.destination, delivery.path, &message.args) {
                Ok(bytes) => {
                    route.record_delivery(bytes as u64);
                    report.delivered += 1;
                    if self.verbosity.outgoing {
                        tracing::info!(
                            "-> {} {} {:?}",
                            self.destination_label(delivery.destination),
                            delivery.path,
                            message.args
                        );
                    } else {
                        tracing::trace!(
                            "-> {} {} {:?}",
                            self.destination_label(delivery.destination),
                            delivery.path,
                            message.args
                        );
                    }
                }
                Err(err) => {
                    route.record_error();
                    report.failed += 1;
                    tracing::warn!(
                        "{}: forwarding {} to {} failed: {}",
                        route.location,
                        delivery.path,
                        self.destination_label(delivery.destination),
                        err
                    );
                }
            }
        }
        report
    }

    /// Decode one datagram and dispatch every message in it.
    ///
    /// Undecodable datagrams are counted and dropped.
    pub fn handle_datagram<T: Transport + ?Sized>(
        &self,
        datagram: &[u8],
        peer: SocketAddr,
        transport: &T,
    ) -> DispatchReport {
        self.counters
            .packets_received
            .fetch_add(1, Ordering::Relaxed);

        let packet = match OscPacket::decode(datagram) {
            Ok(packet) => packet,
            Err(err) => {
                self.counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Dropping undecodable packet from {}: {}", peer, err);
                return DispatchReport::default();
            }
        };

        let mut report = DispatchReport::default();
        for message in packet.into_messages() {
            if self.verbosity.incoming {
                tracing::info!(
                    "<- {} {} {} {:?}",
                    peer,
                    message.path,
                    message.type_tags(),
                    message.args
                );
            } else {
                tracing::trace!(
                    "<- {} {} {} {:?}",
                    peer,
                    message.path,
                    message.type_tags(),
                    message.args
                );
            }
            report.merge(self.dispatch(&message, transport));
        }
        report
    }

    /// Get router statistics.
    pub fn stats(&self) -> RouterStatsSnapshot {
        RouterStatsSnapshot {
            packets_received: self.counters.packets_received.load(Ordering::Relaxed),
            messages_received: self.counters.messages_received.load(Ordering::Relaxed),
            messages_unrouted: self.counters.messages_unrouted.load(Ordering::Relaxed),
            decode_errors: self.counters.decode_errors.load(Ordering::Relaxed),
            uptime_secs: self.start_time.elapsed().as_secs(),
            routes: self.routes.iter().map(|r| r.stats.snapshot()).collect(),
        }
    }

    /// Bind `listen_port` on all IPv4 interfaces and start forwarding.
    pub async fn run<T: Transport + 'static>(
        self,
        listen_port: u16,
        transport: T,
    ) -> Result<RouterHandle, RouterError> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), listen_port);
        self.run_on(addr, transport).await
    }

    /// Bind `addr` and start forwarding.
    ///
    /// Messages are handled one at a time in arrival order, so each
    /// destination sees them in the order they were received.
    pub async fn run_on<T: Transport + 'static>(
        self,
        addr: SocketAddr,
        transport: T,
    ) -> Result<RouterHandle, RouterError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| RouterError::Bind { addr, source })?;
        let local_addr = socket.local_addr()?;

        self.running.store(true, Ordering::Relaxed);

        tracing::info!(
            "Router started with {} rules, {} destinations",
            self.routes.len(),
            self.table.destinations().len()
        );

        for route in &self.routes {
            tracing::debug!(
                "  Route: /{} ({} prefix) -> {} destination(s)",
                route.prefix,
                if route.transform.is_truncating() {
                    "strip"
                } else {
                    "keep"
                },
                route.targets.len()
            );
        }

        let router = Arc::new(self);

        // Create stats channel
        let (stats_tx, mut stats_rx) = mpsc::channel::<StatsRequest>(10);
        let stats_router = Arc::clone(&router);

        // Spawn stats handler
        tokio::spawn(async move {
            while let Some(req) = stats_rx.recv().await {
                let _ = req.reply.send(stats_router.stats()).await;
            }
        });

        let running = Arc::clone(&router.running);
        tokio::spawn(async move {
            run_listener(router, socket, transport).await;
        });

        Ok(RouterHandle {
            running,
            stats_tx: Some(stats_tx),
            local_addr,
        })
    }

    fn destination_label(&self, id: DestinationId) -> String {
        match self.table.destinations().get(id) {
            Some(entry) => entry.destination.to_string(),
            None => id.to_string(),
        }
    }
}

async fn run_listener<T: Transport>(router: Arc<Router>, socket: UdpSocket, transport: T) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    while router.running.load(Ordering::Relaxed) {
        match tokio::time::timeout(RECV_POLL_INTERVAL, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, peer))) => {
                router.handle_datagram(&buf[..len], peer, &transport);
            }
            Ok(Err(err)) => {
                tracing::warn!("Receive failed: {}", err);
            }
            Err(_) => {} // poll timeout, re-check running flag
        }
    }

    tracing::info!("Router stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osc::{OscArg, OscBundle, IMMEDIATE};
    use crate::rules::{compile_rules, RuleSource};
    use std::sync::Mutex;

    type Sent = (DestinationId, String, Vec<OscArg>);

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Sent>>,
        failing: Vec<DestinationId>,
    }

    impl RecordingTransport {
        fn failing(ids: &[usize]) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                failing: ids.iter().map(|i| DestinationId(*i)).collect(),
            }
        }

        fn sent(&self) -> Vec<Sent> {
            self.sent.lock().expect("lock").clone()
        }
    }

    impl Transport for RecordingTransport {
        fn send(
            &self,
            destination: DestinationId,
            path: &str,
            args: &[OscArg],
        ) -> Result<usize, TransportError> {
            if self.failing.contains(&destination) {
                return Err(TransportError::UnknownDestination(destination));
            }
            self.sent
                .lock()
                .expect("lock")
                .push((destination, path.to_string(), args.to_vec()));
            Ok(path.len())
        }
    }

    fn router(text: &str) -> Router {
        let table = compile_rules(&[RuleSource::inline("test.otw", text)]).expect("compile");
        Router::new(table)
    }

    fn id(router: &Router, token: &str) -> DestinationId {
        router
            .table()
            .destinations()
            .lookup(&crate::registry::Destination::parse(token))
            .expect("registered")
    }

    fn paths(deliveries: &[Delivery<'_>]) -> Vec<String> {
        deliveries.iter().map(|d| d.path.to_string()).collect()
    }

    #[test]
    fn test_prefix_exactness() {
        let router = router("fo + a:1\n/ + a:3\nFoo + a:4\nfoo + a:5\n");

        let deliveries = router.route("/foo/bar");
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].destination, id(&router, "a:5"));
    }

    #[test]
    fn test_slashed_prefix_matches_segment() {
        let router = router("foo/ + a:1\n/bar/ - b:2\n");

        let routes: Vec<&str> = router.routes().iter().map(|r| r.prefix.as_str()).collect();
        assert_eq!(routes, vec!["foo", "bar"]);

        assert_eq!(paths(&router.route("/foo/x")), vec!["/foo/x"]);
        assert_eq!(paths(&router.route("/bar/x")), vec!["/x"]);
    }

    #[test]
    fn test_empty_path_never_matches() {
        let router = router("/ + a:1\n");
        assert!(router.route("/").is_empty());
        assert!(router.route("").is_empty());
        assert!(router.route("//x").is_empty());
    }

    #[test]
    fn test_truncation() {
        let truncating = router("foo - A:1\n");
        assert_eq!(paths(&truncating.route("/foo/bar/baz")), vec!["/bar/baz"]);

        let keeping = router("foo + A:1\n");
        assert_eq!(paths(&keeping.route("/foo/bar/baz")), vec!["/foo/bar/baz"]);
    }

    #[test]
    fn test_truncation_to_empty_is_dropped() {
        let router = router("foo - A:1\nfoo + B:2\n");

        let deliveries = router.route("/foo");
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].destination, id(&router, "B:2"));
        assert_eq!(deliveries[0].path, "/foo");

        let stats = router.stats();
        assert_eq!(stats.routes[0].messages_matched, 1);
        assert_eq!(stats.routes[0].messages_dropped, 1);

        assert_eq!(paths(&router.route("/foo/")), vec!["/", "/foo/"]);
    }

    #[test]
    fn test_fan_out_independence() {
        let router = router("foo - A:1\nfoo + B:2\n");
        let transport = RecordingTransport::default();

        let report = router.dispatch(&OscMessage::new("/foo/x", vec![OscArg::Int(1)]), &transport);
        assert_eq!(report.attempted, 2);
        assert_eq!(report.delivered, 2);

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, id(&router, "A:1"));
        assert_eq!(sent[0].1, "/x");
        assert_eq!(sent[1].0, id(&router, "B:2"));
        assert_eq!(sent[1].1, "/foo/x");
        assert_eq!(sent[1].2, vec![OscArg::Int(1)]);
    }

    #[test]
    fn test_no_cross_prefix_leakage() {
        let router = router("foo + A:1\nbar - B:2\n");
        let transport = RecordingTransport::default();

        let report = router.dispatch(&OscMessage::new("/other/x", Vec::new()), &transport);
        assert_eq!(report, DispatchReport::default());
        assert!(transport.sent().is_empty());
        assert_eq!(router.stats().messages_unrouted, 1);
    }

    #[test]
    fn test_order_and_duplicates() {
        let router = router("foo + a:1 b:2 a:1\nbar + c:3\nfoo - b:2\n");

        let deliveries = router.route("/foo/x");
        let targets: Vec<usize> = deliveries.iter().map(|d| d.destination.index()).collect();
        assert_eq!(targets, vec![0, 1, 0, 1]);
        assert_eq!(paths(&deliveries), vec!["/foo/x", "/foo/x", "/foo/x", "/x"]);
        assert_eq!(deliveries[3].rule, 2);
    }

    #[test]
    fn test_partial_failure_isolation() {
        let router = router("foo + a:1 b:2 c:3\n");
        let transport = RecordingTransport::failing(&[1]);

        let report = router.dispatch(&OscMessage::new("/foo", Vec::new()), &transport);
        assert_eq!(
            report,
            DispatchReport {
                attempted: 3,
                delivered: 2,
                failed: 1
            }
        );

        let delivered: Vec<usize> = transport.sent().iter().map(|s| s.0.index()).collect();
        assert_eq!(delivered, vec![0, 2]);

        let stats = router.stats();
        assert_eq!(stats.routes[0].deliveries, 2);
        assert_eq!(stats.routes[0].errors, 1);
    }

    #[test]
    fn test_handle_datagram_bundle() {
        let router = router("foo - a:1\n");
        let transport = RecordingTransport::default();
        let peer: SocketAddr = "127.0.0.1:5000".parse().expect("addr");

        let bundle = OscBundle {
            timetag: IMMEDIATE,
            content: vec![
                OscPacket::Message(OscMessage::new("/foo/one", Vec::new())),
                OscPacket::Message(OscMessage::new("/skip", Vec::new())),
                OscPacket::Message(OscMessage::new("/foo/two", Vec::new())),
            ],
        };

        let report = router.handle_datagram(&bundle.encode(), peer, &transport);
        assert_eq!(report.delivered, 2);

        let sent: Vec<String> = transport.sent().into_iter().map(|s| s.1).collect();
        assert_eq!(sent, vec!["/one", "/two"]);

        let stats = router.stats();
        assert_eq!(stats.packets_received, 1);
        assert_eq!(stats.messages_received, 3);
        assert_eq!(stats.messages_unrouted, 1);
    }

    #[test]
    fn test_handle_datagram_garbage() {
        let router = router("foo - a:1\n");
        let transport = RecordingTransport::default();
        let peer: SocketAddr = "127.0.0.1:5000".parse().expect("addr");

        let report = router.handle_datagram(b"not osc", peer, &transport);
        assert_eq!(report, DispatchReport::default());
        assert_eq!(router.stats().decode_errors, 1);
    }

    #[tokio::test]
    async fn test_router_run_stop() {
        let router = router("foo - a:1\n");
        let transport = Arc::new(RecordingTransport::default());

        let handle = router
            .run(0, Arc::clone(&transport))
            .await
            .expect("run");
        assert!(handle.is_running());

        let client = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        let target: SocketAddr = format!("127.0.0.1:{}", handle.local_addr().port())
            .parse()
            .expect("addr");
        let datagram = OscMessage::new("/foo/bar", vec![OscArg::Float(0.5)]).encode();
        client.send_to(&datagram, target).await.expect("send");

        let mut waited = Duration::ZERO;
        while transport.sent().is_empty() && waited < Duration::from_secs(2) {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += Duration::from_millis(10);
        }

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "/bar");
        assert_eq!(sent[0].2, vec![OscArg::Float(0.5)]);

        let stats = handle.get_stats().await.expect("stats");
        assert_eq!(stats.packets_received, 1);
        assert_eq!(stats.routes[0].deliveries, 1);

        handle.stop();
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn test_run_on_address() {
        let addr: SocketAddr = "127.0.0.1:0".parse().expect("addr");
        let handle = router("foo - a:1\n")
            .run_on(addr, RecordingTransport::default())
            .await
            .expect("run");

        assert_eq!(handle.local_addr().ip(), addr.ip());
        assert_ne!(handle.local_addr().port(), 0);
        handle.stop();
    }

    #[tokio::test]
    async fn test_bind_failure_names_port() {
        let taken = UdpSocket::bind("0.0.0.0:0").await.expect("bind");
        let port = taken.local_addr().expect("addr").port();

        let err = router("foo - a:1\n")
            .run(port, RecordingTransport::default())
            .await
            .err()
            .expect("should fail");
        assert!(matches!(err, RouterError::Bind { .. }));
        assert!(err.to_string().contains(&port.to_string()));
    }
}
