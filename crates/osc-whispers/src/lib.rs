// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OSC Whispers forwarding agent
//!
//! Receives OSC messages on one UDP port and forwards each one to the
//! destinations whose rule matches the first segment of its address,
//! optionally stripping that segment.
//!
//! # Quick Start
//!
//! ```bash
//! # Forward with the rules in main.otw, listening on port 9000
//! oscwhispers -f main.otw
//!
//! # Check rule files without starting
//! oscwhispers check -f main.otw other.otw
//! ```
//!
//! # Rule Files
//!
//! ```text
//! # prefix  indicator  destinations...
//! synth     -          127.0.0.1:9001 127.0.0.1:9002   # /synth/freq -> /freq
//! lights    +          10.0.0.5:7000                   # path kept as is
//! ```
//!
//! `+` keeps the address unchanged; `-` removes the prefix segment.
//!
//! # Library Use
//!
//! ```no_run
//! use osc_whispers::{Router, RuleTable, UdpTransport};
//!
//! # async fn start() -> Result<(), osc_whispers::RouterError> {
//! let table = RuleTable::from_files(&["main.otw"])?;
//! let transport = UdpTransport::connect(table.destinations()).await?;
//! let handle = Router::new(table).run(9000, transport).await?;
//! # handle.stop();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod osc;
pub mod registry;
pub mod route;
pub mod router;
pub mod rules;
pub mod transform;
pub mod transport;

pub use config::{VerboseChannel, Verbosity, VerbosityOverride, WhispersConfig};
pub use osc::{OscArg, OscMessage, OscPacket};
pub use registry::{Destination, DestinationId, DestinationRegistry};
pub use route::{Route, RouteStats, RouteStatsSnapshot};
pub use router::{DispatchReport, Router, RouterError, RouterHandle, RouterStatsSnapshot};
pub use rules::{compile_rules, ForwardingRule, RuleError, RuleSource, RuleTable};
pub use transform::PathTransform;
pub use transport::{Transport, TransportError, UdpTransport};
