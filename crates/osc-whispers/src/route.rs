// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Runtime routes and statistics.

use crate::registry::DestinationId;
use crate::rules::{ForwardingRule, SourceLocation};
use crate::transform::PathTransform;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A compiled forwarding rule ready for matching.
#[derive(Debug)]
pub struct Route {
    /// Path segment this route matches.
    pub prefix: String,

    /// Path rewrite.
    pub transform: PathTransform,

    /// Fan-out targets.
    pub targets: Vec<DestinationId>,

    /// Declaring rule line.
    pub location: SourceLocation,

    /// Route statistics.
    pub stats: Arc<RouteStats>,
}

impl Route {
    /// Create a route from a compiled rule.
    pub fn from_rule(rule: &ForwardingRule) -> Self {
        Self {
            prefix: rule.prefix.clone(),
            transform: PathTransform::from_truncate(rule.truncate),
            targets: rule.targets.clone(),
            location: rule.location.clone(),
            stats: Arc::new(RouteStats::new(rule.prefix.clone())),
        }
    }

    /// Outgoing path for a matched message.
    pub fn outgoing_path<'a>(&self, path: &'a str) -> Option<&'a str> {
        self.transform.apply(path)
    }

    /// Record a matched message.
    pub fn record_match(&self) {
        self.stats.messages_matched.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a delivery handed to the transport.
    pub fn record_delivery(&self, bytes: u64) {
        self.stats.deliveries.fetch_add(1, Ordering::Relaxed);
        self.stats.bytes_forwarded.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a message dropped because its rewritten path was empty.
    pub fn record_dropped(&self) {
        self.stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed send.
    pub fn record_error(&self) {
        self.stats.errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// Statistics for a route.
#[derive(Debug)]
pub struct RouteStats {
    /// Matched prefix.
    pub prefix: String,

    /// Messages whose prefix matched.
    pub messages_matched: AtomicU64,

    /// Sends accepted by the transport.
    pub deliveries: AtomicU64,

    /// Encoded bytes sent.
    pub bytes_forwarded: AtomicU64,

    /// Matched messages not forwarded (empty truncated path).
    pub messages_dropped: AtomicU64,

    /// Sends rejected by the transport.
    pub errors: AtomicU64,

    /// Route creation time.
    pub created: Instant,
}

impl RouteStats {
    /// Create new stats.
    pub fn new(prefix: String) -> Self {
        Self {
            prefix,
            messages_matched: AtomicU64::new(0),
            deliveries: AtomicU64::new(0),
            bytes_forwarded: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> RouteStatsSnapshot {
        RouteStatsSnapshot {
            prefix: self.prefix.clone(),
            messages_matched: self.messages_matched.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            bytes_forwarded: self.bytes_forwarded.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            uptime_secs: self.created.elapsed().as_secs(),
        }
    }
}

/// Snapshot of route statistics.
#[derive(Debug, Clone)]
pub struct RouteStatsSnapshot {
    pub prefix: String,
    pub messages_matched: u64,
    pub deliveries: u64,
    pub bytes_forwarded: u64,
    pub messages_dropped: u64,
    pub errors: u64,
    pub uptime_secs: u64,
}

impl RouteStatsSnapshot {
    /// Calculate deliveries per second.
    pub fn deliveries_per_second(&self) -> f64 {
        if self.uptime_secs > 0 {
            self.deliveries as f64 / self.uptime_secs as f64
        } else {
            0.0
        }
    }
}
