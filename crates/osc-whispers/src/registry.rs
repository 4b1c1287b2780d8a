// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Destination registry.
//!
//! Every `HOST:PORT` token found in target position of a rule line is
//! collected here exactly once. Identities are dense indices assigned in
//! first-seen order (file, then line, then token), so an unchanged rule file
//! always yields the same identity-to-destination mapping.

use crate::rules::{RuleSource, SourceLocation, TARGETS_START};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// A forwarding target as written in a rule file.
///
/// Host and port are kept as opaque text; they are only interpreted when the
/// transport resolves them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Destination {
    /// Host part (name or address literal).
    pub host: String,

    /// Port part, unparsed. `None` when the token has no colon, which is
    /// distinct from an empty port (`host:`).
    pub port: Option<String>,
}

impl Destination {
    /// Create a destination from its parts.
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: Some(port.into()),
        }
    }

    /// Split a `HOST:PORT` token at its last colon, so bracketed IPv6
    /// literals (`[::1]:9000`) keep their host intact.
    ///
    /// A token without a colon has no port; it is still registered and will
    /// fail at resolution time.
    pub fn parse(token: &str) -> Self {
        match token.rsplit_once(':') {
            Some((host, port)) => Self::new(host, port),
            None => Self {
                host: token.to_string(),
                port: None,
            },
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(ref port) => write!(f, "{}:{}", self.host, port),
            None => f.write_str(&self.host),
        }
    }
}

/// Dense, zero-based destination identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DestinationId(pub usize);

impl DestinationId {
    /// Position of this destination in the registry.
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A registered destination together with where it was first seen.
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredDestination {
    pub id: DestinationId,
    pub destination: Destination,
    pub first_seen: SourceLocation,
}

/// Deduplicated, identity-assigned destination list.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DestinationRegistry {
    entries: Vec<RegisteredDestination>,
    #[serde(skip)]
    index: HashMap<Destination, DestinationId>,
}

impl DestinationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect every destination token of every rule line, in scan order.
    ///
    /// Lines are not validated here; a line too short to carry targets simply
    /// contributes none.
    pub fn scan(sources: &[RuleSource]) -> Self {
        let mut registry = Self::new();
        for source in sources {
            for line in source.lines() {
                for token in line.fields.iter().skip(TARGETS_START) {
                    registry.insert(Destination::parse(token), &line.location);
                }
            }
        }
        registry
    }

    /// Register a destination, returning the identity of the existing entry
    /// when an equal one is already present.
    pub fn insert(&mut self, destination: Destination, seen_at: &SourceLocation) -> DestinationId {
        if let Some(id) = self.index.get(&destination) {
            return *id;
        }

        let id = DestinationId(self.entries.len());
        self.index.insert(destination.clone(), id);
        self.entries.push(RegisteredDestination {
            id,
            destination,
            first_seen: seen_at.clone(),
        });
        id
    }

    /// Find the identity of a destination.
    pub fn lookup(&self, destination: &Destination) -> Option<DestinationId> {
        self.index.get(destination).copied()
    }

    /// Get a destination by identity.
    pub fn get(&self, id: DestinationId) -> Option<&RegisteredDestination> {
        self.entries.get(id.index())
    }

    /// Iterate entries in identity order.
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredDestination> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(line: usize) -> SourceLocation {
        SourceLocation::new("test.otw", line)
    }

    #[test]
    fn test_destination_parse() {
        assert_eq!(
            Destination::parse("127.0.0.1:9001"),
            Destination::new("127.0.0.1", "9001")
        );
        assert_eq!(Destination::parse("host").port, None);
        assert_eq!(Destination::parse("host:"), Destination::new("host", ""));
        assert_eq!(Destination::parse("[::1]:9000"), Destination::new("[::1]", "9000"));
    }

    #[test]
    fn test_destination_display() {
        assert_eq!(Destination::new("mixer.local", "7000").to_string(), "mixer.local:7000");
    }

    #[test]
    fn test_insert_dedup() {
        let mut registry = DestinationRegistry::new();
        let a = registry.insert(Destination::parse("a:1"), &at(1));
        let b = registry.insert(Destination::parse("b:2"), &at(1));
        let a_again = registry.insert(Destination::parse("a:1"), &at(3));

        assert_eq!(a, DestinationId(0));
        assert_eq!(b, DestinationId(1));
        assert_eq!(a_again, a);
        assert_eq!(registry.len(), 2);

        // First sighting is kept.
        let entry = registry.get(a).expect("entry");
        assert_eq!(entry.first_seen.line, 1);
    }

    #[test]
    fn test_missing_and_empty_port_distinct() {
        let mut registry = DestinationRegistry::new();
        let bare = registry.insert(Destination::parse("a"), &at(1));
        let empty = registry.insert(Destination::parse("a:"), &at(1));
        assert_ne!(bare, empty);
        assert_eq!(registry.len(), 2);

        let shown: Vec<String> = registry.iter().map(|e| e.destination.to_string()).collect();
        assert_eq!(shown, vec!["a", "a:"]);
    }

    #[test]
    fn test_same_host_different_port() {
        let mut registry = DestinationRegistry::new();
        let a = registry.insert(Destination::parse("a:1"), &at(1));
        let b = registry.insert(Destination::parse("a:2"), &at(1));
        assert_ne!(a, b);
    }

    #[test]
    fn test_scan_order_across_files() {
        let sources = vec![
            RuleSource::inline("one.otw", "foo - a:1 b:2\nbar + b:2 c:3\n"),
            RuleSource::inline("two.otw", "baz - c:3 a:1 d:4\n"),
        ];
        let registry = DestinationRegistry::scan(&sources);

        let tokens: Vec<String> = registry.iter().map(|e| e.destination.to_string()).collect();
        assert_eq!(tokens, vec!["a:1", "b:2", "c:3", "d:4"]);

        let d = registry.lookup(&Destination::parse("d:4")).expect("d");
        assert_eq!(d, DestinationId(3));
        assert_eq!(registry.get(d).expect("d").first_seen.file, "two.otw");
    }

    #[test]
    fn test_scan_skips_comments_and_short_lines() {
        let sources = vec![RuleSource::inline(
            "c.otw",
            "# x - ignored:1\n\nfoo\nfoo -\nfoo - a:1 # b:2\n",
        )];
        let registry = DestinationRegistry::scan(&sources);
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup(&Destination::parse("b:2")).is_none());
    }

    #[test]
    fn test_empty_registry() {
        let registry = DestinationRegistry::scan(&[]);
        assert!(registry.is_empty());
        assert!(registry.get(DestinationId(0)).is_none());
    }
}
