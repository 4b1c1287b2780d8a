// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Runtime settings.
//!
//! Settings come from an optional TOML file and are then overridden by
//! command-line flags. The resolved value is built once at startup and
//! passed by reference.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Settings file name searched for in the default locations.
pub const CONFIG_FILE_NAME: &str = "osctoolkit.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read settings file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Settings for the forwarding agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhispersConfig {
    /// Instance name (for identification in logs).
    #[serde(default = "default_name")]
    pub name: String,

    /// Address to receive OSC messages on (`::` for IPv6).
    #[serde(default = "default_listen_address")]
    pub listen_address: IpAddr,

    /// UDP port to receive OSC messages on.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Log level or `EnvFilter` directive.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Statistics reporting interval (seconds, 0 disables).
    #[serde(default)]
    pub stats_interval_secs: u64,

    /// Rule files used when none are given on the command line.
    #[serde(default)]
    pub rule_files: Vec<PathBuf>,

    /// Which events are logged at info level.
    #[serde(default)]
    pub verbose: Verbosity,
}

fn default_name() -> String {
    "oscwhispers".to_string()
}

fn default_listen_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_listen_port() -> u16 {
    9000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for WhispersConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            listen_address: default_listen_address(),
            listen_port: default_listen_port(),
            log_level: default_log_level(),
            stats_interval_secs: 0,
            rule_files: Vec::new(),
            verbose: Verbosity::default(),
        }
    }
}

impl WhispersConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the first existing file among `candidates`.
    ///
    /// Falls back to defaults when none exists. Returns the path that was
    /// loaded, if any.
    pub fn discover<P: AsRef<Path>>(candidates: &[P]) -> Result<(Self, Option<PathBuf>), ConfigError> {
        for candidate in candidates {
            let path = candidate.as_ref();
            if path.is_file() {
                return Ok((Self::from_file(path)?, Some(path.to_path_buf())));
            }
        }
        Ok((Self::default(), None))
    }

    /// Default settings locations, most specific first.
    pub fn default_locations() -> Vec<PathBuf> {
        let mut locations = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(home) = std::env::var_os("HOME") {
            locations.push(
                PathBuf::from(home)
                    .join(".config")
                    .join("osctoolkit")
                    .join(CONFIG_FILE_NAME),
            );
        }
        locations.push(PathBuf::from("/etc/osctoolkit").join(CONFIG_FILE_NAME));
        locations
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::Invalid("log_level is empty".into()));
        }

        for (i, path) in self.rule_files.iter().enumerate() {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!("rule_files[{}] is empty", i)));
            }
        }

        Ok(())
    }

    /// Example settings, as written by `gen-config`.
    pub fn example() -> Self {
        Self {
            name: "oscwhispers".into(),
            listen_address: default_listen_address(),
            listen_port: 9000,
            log_level: "info".into(),
            stats_interval_secs: 30,
            rule_files: vec![PathBuf::from("/etc/osctoolkit/whispers.otw")],
            verbose: Verbosity {
                listen_port: true,
                forwarding_rules: true,
                ..Verbosity::default()
            },
        }
    }
}

/// Events that can be promoted to info level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Verbosity {
    /// Listen address at startup.
    pub listen_port: bool,

    /// Every received message.
    pub incoming: bool,

    /// Every forwarded message.
    pub outgoing: bool,

    /// The compiled rule table at startup.
    pub forwarding_rules: bool,
}

impl Verbosity {
    pub fn all() -> Self {
        Self {
            listen_port: true,
            incoming: true,
            outgoing: true,
            forwarding_rules: true,
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    /// Turn one channel on or off.
    pub fn set(&mut self, channel: VerboseChannel, enabled: bool) {
        match channel {
            VerboseChannel::Incoming => self.incoming = enabled,
            VerboseChannel::Outgoing => self.outgoing = enabled,
            VerboseChannel::ListenPort => self.listen_port = enabled,
            VerboseChannel::ForwardingRules => self.forwarding_rules = enabled,
        }
    }

    /// Apply a command-line override on top of file settings.
    pub fn apply(&mut self, over: &VerbosityOverride) {
        match over {
            VerbosityOverride::All => *self = Self::all(),
            VerbosityOverride::Quiet => *self = Self::none(),
            VerbosityOverride::Enable(channels) => {
                for channel in channels {
                    self.set(*channel, true);
                }
            }
        }
    }
}

/// A single verbosity channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerboseChannel {
    Incoming,
    Outgoing,
    ListenPort,
    ForwardingRules,
}

impl FromStr for VerboseChannel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" => Ok(Self::Incoming),
            "out" => Ok(Self::Outgoing),
            "listen" => Ok(Self::ListenPort),
            "forward" => Ok(Self::ForwardingRules),
            other => Err(ConfigError::Invalid(format!(
                "unknown verbosity channel '{}' (expected in, out, listen or forward)",
                other
            ))),
        }
    }
}

/// Verbosity requested on the command line. The variants are mutually
/// exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerbosityOverride {
    /// Everything on.
    All,

    /// Turn on the listed channels, keep the rest from the settings file.
    Enable(Vec<VerboseChannel>),

    /// Everything off, regardless of the settings file.
    Quiet,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = WhispersConfig::default();
        assert_eq!(config.listen_port, 9000);
        assert_eq!(config.listen_address, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.log_level, "info");
        assert!(config.rule_files.is_empty());
        assert_eq!(config.verbose, Verbosity::none());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = WhispersConfig::from_toml(
            r#"
listen_port = 9100
rule_files = ["a.otw", "b.otw"]

[verbose]
incoming = true
"#,
        )
        .expect("parse");

        assert_eq!(config.listen_port, 9100);
        assert_eq!(config.name, "oscwhispers");
        assert_eq!(config.rule_files, vec![PathBuf::from("a.otw"), PathBuf::from("b.otw")]);
        assert!(config.verbose.incoming);
        // A [verbose] table replaces the whole struct; unset fields are off.
        assert!(!config.verbose.listen_port);
    }

    #[test]
    fn test_listen_address_ipv6() {
        let config = WhispersConfig::from_toml("listen_address = \"::\"").expect("parse");
        assert!(config.listen_address.is_ipv6());
        assert!(config.listen_address.is_unspecified());

        assert!(WhispersConfig::from_toml("listen_address = \"nowhere\"").is_err());
    }

    #[test]
    fn test_from_toml_invalid() {
        assert!(matches!(
            WhispersConfig::from_toml("listen_port = \"nine\""),
            Err(ConfigError::Toml(_))
        ));
        assert!(matches!(
            WhispersConfig::from_toml("log_level = \"\""),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_validate_rule_files() {
        let config = WhispersConfig {
            rule_files: vec![PathBuf::new()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_example_serialization() {
        let toml_str = toml::to_string_pretty(&WhispersConfig::example()).expect("serialize");
        assert!(toml_str.contains("listen_port = 9000"));
        assert!(toml_str.contains("[verbose]"));

        let back = WhispersConfig::from_toml(&toml_str).expect("parse");
        assert_eq!(back, WhispersConfig::example());
    }

    #[test]
    fn test_discover_first_existing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("missing.toml");
        let present = dir.path().join("present.toml");
        let mut file = std::fs::File::create(&present).expect("create");
        writeln!(file, "listen_port = 9200").expect("write");

        let (config, loaded) = WhispersConfig::discover(&[&missing, &present]).expect("discover");
        assert_eq!(config.listen_port, 9200);
        assert_eq!(loaded.as_deref(), Some(present.as_path()));
    }

    #[test]
    fn test_discover_none_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (config, loaded) =
            WhispersConfig::discover(&[dir.path().join("nope.toml")]).expect("discover");
        assert_eq!(config, WhispersConfig::default());
        assert!(loaded.is_none());
    }

    #[test]
    fn test_from_file_missing_named() {
        let err = WhispersConfig::from_file("/nonexistent/osctoolkit.toml").expect_err("missing");
        assert!(err.to_string().contains("/nonexistent/osctoolkit.toml"));
    }

    #[test]
    fn test_default_locations() {
        let locations = WhispersConfig::default_locations();
        assert_eq!(locations[0], PathBuf::from(CONFIG_FILE_NAME));
        assert!(locations
            .last()
            .expect("non-empty")
            .starts_with("/etc/osctoolkit"));
    }

    #[test]
    fn test_verbosity_overrides() {
        let base = Verbosity {
            listen_port: true,
            ..Verbosity::default()
        };

        let mut all = base;
        all.apply(&VerbosityOverride::All);
        assert_eq!(all, Verbosity::all());

        let mut quiet = base;
        quiet.apply(&VerbosityOverride::Quiet);
        assert_eq!(quiet, Verbosity::none());

        let mut some = base;
        some.apply(&VerbosityOverride::Enable(vec![
            VerboseChannel::Incoming,
            VerboseChannel::ForwardingRules,
        ]));
        assert!(some.listen_port);
        assert!(some.incoming);
        assert!(!some.outgoing);
        assert!(some.forwarding_rules);
    }

    #[test]
    fn test_verbose_channel_parse() {
        assert_eq!("in".parse::<VerboseChannel>().expect("in"), VerboseChannel::Incoming);
        assert_eq!(
            "forward".parse::<VerboseChannel>().expect("forward"),
            VerboseChannel::ForwardingRules
        );
        assert!("command".parse::<VerboseChannel>().is_err());
    }
}
