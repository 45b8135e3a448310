// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Loader configuration.
//!
//! Loaded from a TOML file and overridden from the command line:
//!
//! ```toml
//! log_level = "info"
//!
//! [loader]
//! database = "benchmark"
//! workers = 4
//! batch_size = 10000
//!
//! [target]
//! urls = ["http://localhost:8902"]
//! gzip = true
//! backpressure = "cnosdb"
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backpressure::{BackpressureProfile, ProfileError};
use crate::batch::{BatchConfig, ConstantIndexer, PointIndexer, TagHashIndexer};
use crate::codec::{BinaryFormat, LineProtocolFormat, PointFormat};
use crate::worker::{Dispatch, WorkerSettings};
use crate::writer::{Consistency, DbSetup, DEFAULT_SUCCESS_STATUSES};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid backpressure profile: {0}")]
    Profile(#[from] ProfileError),
}

/// What to do with a record that fails to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParseErrorPolicy {
    /// Log, count and continue.
    #[default]
    Skip,
    /// Stop the run at the first bad record.
    Abort,
}

/// Encoding of batch bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    #[default]
    Binary,
    LineProtocol,
}

/// Full loader configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Log level filter (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub loader: LoaderSection,

    #[serde(default)]
    pub target: TargetSection,

    /// Extra backpressure profiles, looked up by name before the builtins.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backpressure_profiles: Vec<BackpressureProfile>,
}

/// Input side: parsing, batching and workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderSection {
    /// Target database.
    #[serde(default = "default_database")]
    pub database: String,

    /// Number of write workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Points per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Encoded bytes per batch.
    #[serde(default = "default_batch_bytes")]
    pub batch_bytes: usize,

    /// Seal partial batches after this many milliseconds (0 = only on size).
    #[serde(default)]
    pub flush_interval_ms: u64,

    /// Sealed batches queued per worker.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Number of batch partitions. Above 1, each partition sticks to one worker.
    #[serde(default = "default_partitions")]
    pub partitions: usize,

    /// Tag whose value selects the partition. Unset hashes the series key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_tag: Option<String>,

    #[serde(default)]
    pub on_parse_error: ParseErrorPolicy,

    /// Send batches. When false, batches are built and counted only.
    #[serde(default = "default_true")]
    pub do_load: bool,

    #[serde(default)]
    pub format: OutputFormat,

    /// Input read size.
    #[serde(default = "default_read_chunk_bytes")]
    pub read_chunk_bytes: usize,

    /// Batch buffers kept for reuse.
    #[serde(default = "default_pool_buffers")]
    pub pool_buffers: usize,
}

/// Output side: where and how batches are written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSection {
    /// Backend base URLs. Worker `i` writes to `urls[i % urls.len()]`.
    #[serde(default = "default_urls")]
    pub urls: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Gzip request bodies.
    #[serde(default = "default_true")]
    pub gzip: bool,

    /// Pause between attempts while the backend asks to back off.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Backpressure profile name.
    #[serde(default = "default_backpressure")]
    pub backpressure: String,

    /// Statuses treated as a committed write.
    #[serde(default = "default_success_status")]
    pub success_status: Vec<u16>,

    /// Per-request timeout (seconds).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Create the database on the first URL before loading.
    #[serde(default = "default_true")]
    pub create_db: bool,

    /// Fail the run when the database already exists.
    #[serde(default)]
    pub abort_on_exist: bool,

    /// Drop and recreate an existing database.
    #[serde(default = "default_true")]
    pub drop_existing: bool,

    /// Replica count of a created database.
    #[serde(default = "default_replication_factor")]
    pub replication_factor: u32,

    /// Write consistency (any, one, quorum, all); omitted from requests when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistency: Option<Consistency>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_database() -> String {
    "benchmark".to_string()
}

fn default_workers() -> usize {
    1
}

fn default_batch_size() -> usize {
    10_000
}

fn default_batch_bytes() -> usize {
    4 * 1024 * 1024
}

fn default_queue_capacity() -> usize {
    2
}

fn default_partitions() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_read_chunk_bytes() -> usize {
    1024 * 1024
}

fn default_pool_buffers() -> usize {
    64
}

fn default_urls() -> Vec<String> {
    vec!["http://localhost:8902".to_string()]
}

fn default_backoff_ms() -> u64 {
    1000
}

fn default_backpressure() -> String {
    "cnosdb".to_string()
}

fn default_success_status() -> Vec<u16> {
    DEFAULT_SUCCESS_STATUSES.to_vec()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_replication_factor() -> u32 {
    1
}

impl Default for LoaderSection {
    fn default() -> Self {
        Self {
            database: default_database(),
            workers: default_workers(),
            batch_size: default_batch_size(),
            batch_bytes: default_batch_bytes(),
            flush_interval_ms: 0,
            queue_capacity: default_queue_capacity(),
            partitions: default_partitions(),
            partition_tag: None,
            on_parse_error: ParseErrorPolicy::Skip,
            do_load: true,
            format: OutputFormat::Binary,
            read_chunk_bytes: default_read_chunk_bytes(),
            pool_buffers: default_pool_buffers(),
        }
    }
}

impl Default for TargetSection {
    fn default() -> Self {
        Self {
            urls: default_urls(),
            username: None,
            password: None,
            gzip: true,
            backoff_ms: default_backoff_ms(),
            backpressure: default_backpressure(),
            success_status: default_success_status(),
            timeout_secs: default_timeout_secs(),
            create_db: true,
            abort_on_exist: false,
            drop_existing: true,
            replication_factor: default_replication_factor(),
            consistency: None,
        }
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            loader: LoaderSection::default(),
            target: TargetSection::default(),
            backpressure_profiles: Vec::new(),
        }
    }
}

impl LoadConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Example configuration written by `gen-config`.
    pub fn example() -> Self {
        let mut config = Self::default();
        config.loader.workers = 4;
        config.loader.flush_interval_ms = 1000;
        config.loader.partitions = 4;
        config.loader.partition_tag = Some("hostname".into());
        config.target.urls = vec![
            "http://10.0.0.1:8902".into(),
            "http://10.0.0.2:8902".into(),
        ];
        config.target.username = Some("root".into());
        config.target.backpressure = "mydb".into();

        let mut profile = BackpressureProfile::cnosdb();
        profile.name = "mydb".into();
        profile.status_codes = vec![500, 503];
        config.backpressure_profiles.push(profile);
        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let loader = &self.loader;
        if loader.database.is_empty() {
            return Err(ConfigError::Invalid("database name cannot be empty".into()));
        }
        if loader.database.len() > u16::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "database name is {} bytes, limit is {}",
                loader.database.len(),
                u16::MAX
            )));
        }
        for (name, value) in [
            ("workers", loader.workers),
            ("batch_size", loader.batch_size),
            ("batch_bytes", loader.batch_bytes),
            ("queue_capacity", loader.queue_capacity),
            ("partitions", loader.partitions),
            ("read_chunk_bytes", loader.read_chunk_bytes),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be at least 1", name)));
            }
        }
        if loader.batch_size > u32::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "batch_size {} exceeds {}",
                loader.batch_size,
                u32::MAX
            )));
        }
        if matches!(&loader.partition_tag, Some(tag) if tag.is_empty()) {
            return Err(ConfigError::Invalid("partition_tag cannot be empty".into()));
        }

        let target = &self.target;
        if loader.do_load && target.urls.is_empty() {
            return Err(ConfigError::Invalid("No target urls configured".into()));
        }
        for url in &target.urls {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!(
                    "url '{}' must start with http:// or https://",
                    url
                )));
            }
        }
        if target.success_status.is_empty() {
            return Err(ConfigError::Invalid("success_status cannot be empty".into()));
        }
        if target.password.is_some() && target.username.is_none() {
            return Err(ConfigError::Invalid("password given without username".into()));
        }
        if target.replication_factor == 0 {
            return Err(ConfigError::Invalid("replication_factor must be at least 1".into()));
        }

        for profile in &self.backpressure_profiles {
            profile.validate()?;
        }
        self.resolve_backpressure()?;
        Ok(())
    }

    /// The profile named by `target.backpressure`.
    pub fn resolve_backpressure(&self) -> Result<BackpressureProfile, ConfigError> {
        let name = &self.target.backpressure;
        self.backpressure_profiles
            .iter()
            .find(|p| &p.name == name)
            .cloned()
            .or_else(|| BackpressureProfile::builtin(name))
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "unknown backpressure profile '{}' (builtin: {})",
                    name,
                    BackpressureProfile::BUILTIN.join(", ")
                ))
            })
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            max_points: self.loader.batch_size,
            max_bytes: self.loader.batch_bytes,
            flush_interval: match self.loader.flush_interval_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
        }
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            backoff: Duration::from_millis(self.target.backoff_ms),
            gzip: self.target.gzip,
            do_load: self.loader.do_load,
        }
    }

    pub fn point_format(&self) -> Arc<dyn PointFormat> {
        match self.loader.format {
            OutputFormat::Binary => Arc::new(BinaryFormat),
            OutputFormat::LineProtocol => Arc::new(LineProtocolFormat),
        }
    }

    pub fn indexer(&self) -> Box<dyn PointIndexer> {
        if self.loader.partitions <= 1 {
            return Box::new(ConstantIndexer);
        }
        let tag = self.loader.partition_tag.clone().unwrap_or_default();
        Box::new(TagHashIndexer::new(tag, self.loader.partitions))
    }

    pub fn dispatch(&self) -> Dispatch {
        if self.loader.partitions > 1 {
            Dispatch::ByPartition
        } else {
            Dispatch::RoundRobin
        }
    }

    /// Base URL of worker `worker`.
    pub fn url_for(&self, worker: usize) -> Option<&str> {
        if self.target.urls.is_empty() {
            return None;
        }
        Some(self.target.urls[worker % self.target.urls.len()].as_str())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.target.timeout_secs)
    }

    /// Database preparation for this run. Dry runs never touch the backend.
    pub fn db_setup(&self) -> DbSetup {
        DbSetup {
            create: self.target.create_db && self.loader.do_load,
            abort_on_exist: self.target.abort_on_exist,
            drop_existing: self.target.drop_existing,
            replication_factor: self.target.replication_factor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = LoadConfig::from_toml_str("").expect("empty config is valid");
        assert_eq!(config, LoadConfig::default());
        assert_eq!(config.loader.batch_size, 10_000);
        assert_eq!(config.target.backpressure, "cnosdb");
        assert_eq!(config.batch_config().flush_interval, None);
        assert_eq!(config.dispatch(), Dispatch::RoundRobin);
    }

    #[test]
    fn test_sections() {
        let config = LoadConfig::from_toml_str(
            r#"
            log_level = "debug"

            [loader]
            database = "metrics"
            workers = 3
            batch_size = 500
            flush_interval_ms = 250
            on_parse_error = "abort"
            format = "line-protocol"

            [target]
            urls = ["http://a:8902", "http://b:8902"]
            gzip = false
            backoff_ms = 10
            "#,
        )
        .expect("valid config");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.loader.database, "metrics");
        assert_eq!(config.loader.on_parse_error, ParseErrorPolicy::Abort);
        assert_eq!(config.loader.format, OutputFormat::LineProtocol);
        assert_eq!(config.point_format().content_type(), "text/plain; charset=utf-8");
        assert_eq!(
            config.batch_config().flush_interval,
            Some(Duration::from_millis(250))
        );
        let settings = config.worker_settings();
        assert!(!settings.gzip);
        assert_eq!(settings.backoff, Duration::from_millis(10));
        assert_eq!(config.url_for(0), Some("http://a:8902"));
        assert_eq!(config.url_for(1), Some("http://b:8902"));
        assert_eq!(config.url_for(2), Some("http://a:8902"));
    }

    #[test]
    fn test_database_setup_keys() {
        let config = LoadConfig::default();
        assert_eq!(config.db_setup(), DbSetup::default());
        assert_eq!(config.target.consistency, None);

        let mut config = LoadConfig::from_toml_str(
            r#"
            [target]
            abort_on_exist = true
            drop_existing = false
            replication_factor = 3
            consistency = "quorum"
            "#,
        )
        .expect("valid config");
        let setup = config.db_setup();
        assert!(setup.create);
        assert!(setup.abort_on_exist);
        assert!(!setup.drop_existing);
        assert_eq!(setup.replication_factor, 3);
        assert_eq!(config.target.consistency, Some(Consistency::Quorum));

        config.loader.do_load = false;
        assert!(!config.db_setup().create);

        assert!(LoadConfig::from_toml_str("[target]\nconsistency = \"most\"\n").is_err());
        assert!(LoadConfig::from_toml_str("[target]\nreplication_factor = 0\n").is_err());
    }

    #[test]
    fn test_custom_backpressure_profile() {
        let config = LoadConfig::from_toml_str(
            r#"
            [target]
            backpressure = "slowdb"

            [[backpressure_profiles]]
            name = "slowdb"
            status_codes = [429]

            [[backpressure_profiles.signatures]]
            all_of = ["slow down"]
            "#,
        )
        .expect("valid config");
        let profile = config.resolve_backpressure().expect("profile");
        assert_eq!(profile.name, "slowdb");
        assert_eq!(profile.status_codes, vec![429]);
    }

    #[test]
    fn test_invalid_custom_profile() {
        let err = LoadConfig::from_toml_str(
            r#"
            [[backpressure_profiles]]
            name = "slowdb"

            [[backpressure_profiles.signatures]]
            all_of = ["slow", ""]
            "#,
        )
        .expect_err("empty pattern");
        assert!(matches!(
            err,
            ConfigError::Profile(ProfileError::EmptyPattern { index: 0, .. })
        ));
        assert!(err.to_string().contains("slowdb"));
    }

    #[test]
    fn test_unknown_backpressure_profile() {
        let err = LoadConfig::from_toml_str("[target]\nbackpressure = \"nope\"\n")
            .expect_err("unknown profile");
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_validation_errors() {
        let mut config = LoadConfig::default();
        config.loader.workers = 0;
        assert!(config.validate().is_err());

        let mut config = LoadConfig::default();
        config.target.urls = vec!["localhost:8902".into()];
        assert!(config.validate().is_err());

        let mut config = LoadConfig::default();
        config.target.urls.clear();
        assert!(config.validate().is_err());
        config.loader.do_load = false;
        assert!(config.validate().is_ok());

        let mut config = LoadConfig::default();
        config.loader.partition_tag = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partitioning() {
        let mut config = LoadConfig::default();
        config.loader.partitions = 4;
        config.loader.partition_tag = Some("host".into());
        assert_eq!(config.indexer().partitions(), 4);
        assert_eq!(config.dispatch(), Dispatch::ByPartition);
    }

    #[test]
    fn test_example_round_trips() {
        let example = LoadConfig::example();
        example.validate().expect("example is valid");
        let text = toml::to_string_pretty(&example).expect("serialize");
        let parsed = LoadConfig::from_toml_str(&text).expect("parse back");
        assert_eq!(parsed, example);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "[loader]\nworkers = 8").expect("write");
        let config = LoadConfig::from_file(file.path()).expect("load");
        assert_eq!(config.loader.workers, 8);

        assert!(matches!(
            LoadConfig::from_file("/nonexistent/tsload.toml"),
            Err(ConfigError::Io(_))
        ));
    }
}
