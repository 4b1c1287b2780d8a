// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Rule file compiler.
//!
//! A rule file (OTW file) is line oriented:
//!
//! ```text
//! # prefix  indicator  destinations...
//! mixer     -          127.0.0.1:9001 10.0.0.2:9001
//! lights    +          127.0.0.1:7700
//! ```
//!
//! `+` forwards the path unchanged, `-` strips the matched prefix first.
//! Everything after `#` is a comment.

use crate::registry::{Destination, DestinationId, DestinationRegistry};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Comment marker; the rest of the line is ignored.
pub const COMMENT_MARKER: char = '#';

/// Indicator for "forward the path unchanged".
pub const KEEP_INDICATOR: &str = "+";

/// Indicator for "strip the matched prefix".
pub const TRUNCATE_INDICATOR: &str = "-";

pub(crate) const PREFIX_FIELD: usize = 0;
pub(crate) const INDICATOR_FIELD: usize = 1;
pub(crate) const TARGETS_START: usize = 2;

/// Rule compilation errors.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("cannot read rule file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{location}: invalid truncation indicator '{indicator}' (expected '+' or '-')")]
    InvalidIndicator {
        location: SourceLocation,
        indicator: String,
    },

    #[error("{location}: missing {field}")]
    MissingField {
        location: SourceLocation,
        field: &'static str,
    },

    #[error("{location}: prefix '{prefix}' must be a single path segment")]
    InvalidPrefix {
        location: SourceLocation,
        prefix: String,
    },

    #[error("{location}: destination {token} was not registered")]
    Unregistered {
        location: SourceLocation,
        token: String,
    },
}

/// File name and 1-based line number of a rule line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: usize,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: usize) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Text of one rule file.
#[derive(Debug, Clone)]
pub struct RuleSource {
    name: String,
    text: String,
}

impl RuleSource {
    /// Read a rule file from disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, RuleError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| RuleError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            name: path.display().to_string(),
            text,
        })
    }

    /// Rule text that did not come from disk.
    pub fn inline(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }

    /// Read several rule files, keeping their order. Fails on the first
    /// unreadable file.
    pub fn load_all<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<Self>, RuleError> {
        paths.iter().map(Self::from_file).collect()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Non-empty lines with comments stripped, split on whitespace.
    pub fn lines(&self) -> impl Iterator<Item = RuleLine<'_>> {
        self.text.lines().enumerate().filter_map(move |(idx, raw)| {
            let content = raw.split(COMMENT_MARKER).next().unwrap_or_default();
            let fields: Vec<&str> = content.split_whitespace().collect();
            if fields.is_empty() {
                None
            } else {
                Some(RuleLine {
                    location: SourceLocation::new(self.name.as_str(), idx + 1),
                    fields,
                })
            }
        })
    }
}

/// A tokenized rule line.
#[derive(Debug, Clone)]
pub struct RuleLine<'a> {
    pub location: SourceLocation,
    pub fields: Vec<&'a str>,
}

/// Parse a truncation indicator; `Some(true)` means truncate.
pub fn parse_indicator(indicator: &str) -> Option<bool> {
    match indicator {
        KEEP_INDICATOR => Some(false),
        TRUNCATE_INDICATOR => Some(true),
        _ => None,
    }
}

/// One forwarding rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForwardingRule {
    /// First path segment to match, without leading `/`.
    pub prefix: String,

    /// Strip the matched segment before forwarding.
    pub truncate: bool,

    /// Fan-out targets, in declaration order.
    pub targets: Vec<DestinationId>,

    /// Where the rule was declared.
    pub location: SourceLocation,
}

impl ForwardingRule {
    fn compile(line: &RuleLine<'_>, registry: &DestinationRegistry) -> Result<Self, RuleError> {
        let prefix = line.fields[PREFIX_FIELD].trim_matches('/');
        if prefix.contains('/') {
            return Err(RuleError::InvalidPrefix {
                location: line.location.clone(),
                prefix: line.fields[PREFIX_FIELD].to_string(),
            });
        }
        let prefix = prefix.to_string();

        let indicator =
            line.fields
                .get(INDICATOR_FIELD)
                .ok_or_else(|| RuleError::MissingField {
                    location: line.location.clone(),
                    field: "truncation indicator",
                })?;

        let truncate = parse_indicator(indicator).ok_or_else(|| RuleError::InvalidIndicator {
            location: line.location.clone(),
            indicator: indicator.to_string(),
        })?;

        let tokens = line.fields.get(TARGETS_START..).unwrap_or_default();
        if tokens.is_empty() {
            return Err(RuleError::MissingField {
                location: line.location.clone(),
                field: "destination",
            });
        }

        let targets = tokens
            .iter()
            .map(|token| {
                registry
                    .lookup(&Destination::parse(token))
                    .ok_or_else(|| RuleError::Unregistered {
                        location: line.location.clone(),
                        token: token.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            prefix,
            truncate,
            targets,
            location: line.location.clone(),
        })
    }
}

/// Compiled rules plus the registry their targets refer to.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RuleTable {
    destinations: DestinationRegistry,
    rules: Vec<ForwardingRule>,
}

impl RuleTable {
    /// Compile rule sources: registry pre-scan, then rule lines in order.
    pub fn compile(sources: &[RuleSource]) -> Result<Self, RuleError> {
        let destinations = DestinationRegistry::scan(sources);

        let mut rules = Vec::new();
        for source in sources {
            tracing::trace!("Compiling rules from {}", source.name());
            for line in source.lines() {
                rules.push(ForwardingRule::compile(&line, &destinations)?);
            }
        }

        tracing::debug!(
            "Compiled {} rules, {} destinations from {} file(s)",
            rules.len(),
            destinations.len(),
            sources.len()
        );

        Ok(Self {
            destinations,
            rules,
        })
    }

    /// Load and compile rule files in the given order.
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self, RuleError> {
        Self::compile(&RuleSource::load_all(paths)?)
    }

    pub fn rules(&self) -> &[ForwardingRule] {
        &self.rules
    }

    pub fn destinations(&self) -> &DestinationRegistry {
        &self.destinations
    }

    /// Human-readable summary of one rule.
    pub fn describe(&self, rule: &ForwardingRule) -> String {
        let targets: Vec<String> = rule
            .targets
            .iter()
            .map(|id| match self.destinations.get(*id) {
                Some(entry) => entry.destination.to_string(),
                None => id.to_string(),
            })
            .collect();

        format!(
            "/{} ({}) -> {}",
            rule.prefix,
            if rule.truncate {
                "truncate prefix"
            } else {
                "keep prefix"
            },
            targets.join(", ")
        )
    }
}

/// Compile rule sources into a [`RuleTable`].
pub fn compile_rules(sources: &[RuleSource]) -> Result<RuleTable, RuleError> {
    RuleTable::compile(sources)
}
