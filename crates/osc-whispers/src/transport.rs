// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound transport.
//!
//! The router hands every delivery to a [`Transport`]. [`UdpTransport`]
//! resolves each registered destination once at startup and sends OSC
//! datagrams on non-blocking sockets: a full socket buffer is a failed send,
//! not a stall of the dispatch loop.

use crate::osc::{self, OscArg};
use crate::registry::{DestinationId, DestinationRegistry, RegisteredDestination};
use crate::rules::SourceLocation;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{location}: destination {destination} has an invalid port")]
    InvalidPort {
        destination: String,
        location: SourceLocation,
    },

    #[error("{location}: cannot resolve destination {destination}: {source}")]
    Resolve {
        destination: String,
        location: SourceLocation,
        #[source]
        source: std::io::Error,
    },

    #[error("{location}: destination {destination} resolved to no address")]
    NoAddress {
        destination: String,
        location: SourceLocation,
    },

    #[error("cannot bind send socket: {0}")]
    Bind(#[source] std::io::Error),

    #[error("unknown destination {0}")]
    UnknownDestination(DestinationId),

    #[error("send to {target} failed: {source}")]
    Send {
        target: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Outbound send primitive.
///
/// Implementations must not block for long: the router calls `send` inline
/// for every matched destination, in order.
pub trait Transport: Send + Sync {
    /// Send one message to a destination. Returns the number of bytes sent.
    fn send(
        &self,
        destination: DestinationId,
        path: &str,
        args: &[OscArg],
    ) -> Result<usize, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(
        &self,
        destination: DestinationId,
        path: &str,
        args: &[OscArg],
    ) -> Result<usize, TransportError> {
        (**self).send(destination, path, args)
    }
}

/// UDP transport with one resolved address per destination identity.
#[derive(Debug)]
pub struct UdpTransport {
    v4: Option<UdpSocket>,
    v6: Option<UdpSocket>,
    targets: Vec<SocketAddr>,
}

impl UdpTransport {
    /// Resolve every destination and bind the send socket(s).
    ///
    /// Any destination that cannot be resolved is fatal; the error names the
    /// token and the rule line that introduced it.
    pub async fn connect(registry: &DestinationRegistry) -> Result<Self, TransportError> {
        let mut targets = Vec::with_capacity(registry.len());
        for entry in registry.iter() {
            let destination = &entry.destination;

            let port = destination_port(entry)?;

            let host = destination
                .host
                .trim_start_matches('[')
                .trim_end_matches(']');

            let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
                .await
                .map_err(|source| TransportError::Resolve {
                    destination: destination.to_string(),
                    location: entry.first_seen.clone(),
                    source,
                })?
                .collect();

            let addr = addrs
                .iter()
                .find(|a| a.is_ipv4())
                .or_else(|| addrs.first())
                .copied()
                .ok_or_else(|| TransportError::NoAddress {
                    destination: destination.to_string(),
                    location: entry.first_seen.clone(),
                })?;

            tracing::debug!("Destination {} {} -> {}", entry.id, destination, addr);
            targets.push(addr);
        }

        Self::with_targets(targets)
    }

    /// Build a transport over already-resolved addresses, indexed by
    /// destination identity.
    pub fn with_targets(targets: Vec<SocketAddr>) -> Result<Self, TransportError> {
        let v4 = if targets.iter().any(SocketAddr::is_ipv4) {
            Some(bind_sender("0.0.0.0:0")?)
        } else {
            None
        };

        let v6 = if targets.iter().any(SocketAddr::is_ipv6) {
            Some(bind_sender("[::]:0")?)
        } else {
            None
        };

        Ok(Self { v4, v6, targets })
    }

    /// Resolved address of a destination.
    pub fn target(&self, destination: DestinationId) -> Option<SocketAddr> {
        self.targets.get(destination.index()).copied()
    }

    pub fn targets(&self) -> &[SocketAddr] {
        &self.targets
    }
}

impl Transport for UdpTransport {
    fn send(
        &self,
        destination: DestinationId,
        path: &str,
        args: &[OscArg],
    ) -> Result<usize, TransportError> {
        let target = self
            .target(destination)
            .ok_or(TransportError::UnknownDestination(destination))?;

        let socket = if target.is_ipv4() {
            self.v4.as_ref()
        } else {
            self.v6.as_ref()
        }
        .ok_or(TransportError::UnknownDestination(destination))?;

        let datagram = osc::encode_message(path, args);
        socket
            .send_to(&datagram, target)
            .map_err(|source| TransportError::Send { target, source })
    }
}

/// Parse a registered destination's port.
///
/// A missing or non-numeric port is an error naming the rule line that
/// introduced the destination.
pub fn destination_port(entry: &RegisteredDestination) -> Result<u16, TransportError> {
    entry
        .destination
        .port
        .as_deref()
        .and_then(|port| port.parse().ok())
        .ok_or_else(|| TransportError::InvalidPort {
            destination: entry.destination.to_string(),
            location: entry.first_seen.clone(),
        })
}

/// Check every registered port without resolving hosts.
pub fn check_destinations(registry: &DestinationRegistry) -> Result<(), TransportError> {
    registry.iter().try_for_each(|entry| destination_port(entry).map(|_| ()))
}

fn bind_sender(addr: &str) -> Result<UdpSocket, TransportError> {
    let socket = UdpSocket::bind(addr).map_err(TransportError::Bind)?;
    socket.set_nonblocking(true).map_err(TransportError::Bind)?;
    Ok(socket)
}
