// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Resilient batch writer.
//!
//! Sends one batch over one connection and classifies the response:
//!
//! | Response                                   | Result                 |
//! |--------------------------------------------|------------------------|
//! | success status                             | `Ok(latency)`          |
//! | overload status + known overload message   | `Err(Backoff)`         |
//! | any other status                           | `Err(Fatal { .. })`    |
//! | connection / protocol failure              | `Err(Transport { .. })`|
//!
//! Retrying on backoff is the worker's job.
//!
//! The same HTTP connection also carries the administrative SQL that
//! prepares the target database before a run (see [`DbManager`]).

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::backpressure::BackpressurePredicate;

/// Raw response of one write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Transport-level failure: nothing usable came back.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

/// One write connection to the backend.
pub trait Transport: Send {
    /// Send a batch body and wait for the response.
    fn send(
        &mut self,
        body: &[u8],
        compressed: bool,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send;

    /// Human-readable destination, used in error text.
    fn endpoint(&self) -> &str;
}

/// Write consistency requested from clustered backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Consistency {
    Any,
    One,
    Quorum,
    #[default]
    All,
}

impl Consistency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::One => "one",
            Self::Quorum => "quorum",
            Self::All => "all",
        }
    }
}

impl std::str::FromStr for Consistency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "any" => Ok(Self::Any),
            "one" => Ok(Self::One),
            "quorum" => Ok(Self::Quorum),
            "all" => Ok(Self::All),
            other => Err(format!(
                "invalid consistency '{}', expected any, one, quorum or all",
                other
            )),
        }
    }
}

/// Settings of an [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Base URL, e.g. `http://localhost:8902`.
    pub url: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub content_type: &'static str,
    pub timeout: Duration,
    /// Appended to the write URL when set.
    pub consistency: Option<Consistency>,
}

/// HTTP POST to `{url}/api/v1/write?db={database}`, and SQL statements to
/// `{url}/api/v1/sql`.
pub struct HttpTransport {
    client: reqwest::Client,
    write_url: String,
    sql_url: String,
    endpoint: String,
    username: Option<String>,
    password: Option<String>,
    content_type: &'static str,
}

impl HttpTransport {
    pub fn new(config: &HttpTransportConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        let base = config.url.trim_end_matches('/');
        let mut write_url = format!("{}/api/v1/write?db={}", base, config.database);
        if let Some(consistency) = config.consistency {
            write_url.push_str("&consistency=");
            write_url.push_str(consistency.as_str());
        }
        Ok(Self {
            client,
            write_url,
            sql_url: format!("{}/api/v1/sql", base),
            endpoint: base.to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            content_type: config.content_type,
        })
    }

    pub fn write_url(&self) -> &str {
        &self.write_url
    }

    pub fn sql_url(&self) -> &str {
        &self.sql_url
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.username {
            Some(user) => request.basic_auth(user, self.password.as_ref()),
            None => request,
        }
    }
}

async fn exchange(request: reqwest::RequestBuilder) -> Result<TransportResponse, TransportError> {
    let response = request.send().await?;
    let status = response.status().as_u16();
    let body = response.bytes().await?.to_vec();
    Ok(TransportResponse { status, body })
}

impl Transport for HttpTransport {
    fn send(
        &mut self,
        body: &[u8],
        compressed: bool,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send {
        let mut request = self.authorize(
            self.client
                .post(&self.write_url)
                .header(reqwest::header::CONTENT_TYPE, self.content_type)
                .body(body.to_vec()),
        );
        if compressed {
            request = request.header(reqwest::header::CONTENT_ENCODING, "gzip");
        }
        exchange(request)
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Connection that runs administrative SQL statements.
pub trait SqlExecutor: Send {
    fn execute_sql(
        &mut self,
        statement: &str,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send;
}

impl SqlExecutor for HttpTransport {
    fn execute_sql(
        &mut self,
        statement: &str,
    ) -> impl Future<Output = Result<TransportResponse, TransportError>> + Send {
        let request = self.authorize(
            self.client
                .post(&self.sql_url)
                .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
                .body(statement.to_string()),
        );
        exchange(request)
    }
}

/// Database preparation failed.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("[{endpoint}] {action} error: {source}")]
    Transport {
        endpoint: String,
        action: &'static str,
        #[source]
        source: TransportError,
    },

    #[error("{action} returned non-200 code: {status}: {body}")]
    Status {
        action: &'static str,
        status: u16,
        body: String,
    },

    #[error("cannot parse database listing: {0}")]
    Listing(#[from] serde_json::Error),

    #[error("database '{0}' exists and abort_on_exist is set")]
    Exists(String),
}

/// What to do with the target database before loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbSetup {
    /// Create the database when it is missing.
    pub create: bool,
    /// Fail when the database already exists.
    pub abort_on_exist: bool,
    /// Drop and recreate an existing database instead of writing into it.
    pub drop_existing: bool,
    pub replication_factor: u32,
}

impl Default for DbSetup {
    fn default() -> Self {
        Self {
            create: true,
            abort_on_exist: false,
            drop_existing: true,
            replication_factor: 1,
        }
    }
}

/// What [`DbManager::prepare`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbAction {
    Skipped,
    Created,
    Recreated,
    KeptExisting,
}

#[derive(Deserialize)]
struct DatabaseEntry {
    #[serde(rename = "Database")]
    database: String,
}

/// Pause after DROP and CREATE so the backend settles before writes.
pub const DB_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Lists, drops and creates databases over one [`SqlExecutor`].
pub struct DbManager<C: SqlExecutor> {
    client: C,
    endpoint: String,
    settle: Duration,
}

impl<C: SqlExecutor> DbManager<C> {
    pub fn new(client: C, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            settle: DB_SETTLE_DELAY,
        }
    }

    pub fn with_settle_delay(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    async fn execute(&mut self, action: &'static str, statement: &str) -> Result<Vec<u8>, DbError> {
        debug!("[{}] {}", self.endpoint, statement);
        let response = self
            .client
            .execute_sql(statement)
            .await
            .map_err(|source| DbError::Transport {
                endpoint: self.endpoint.clone(),
                action,
                source,
            })?;
        if response.status != 200 {
            return Err(DbError::Status {
                action,
                status: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }
        Ok(response.body)
    }

    /// Names returned by `SHOW DATABASES`, e.g. `[{"Database":"public"}]`.
    pub async fn list_databases(&mut self) -> Result<Vec<String>, DbError> {
        let body = self.execute("list databases", "SHOW DATABASES").await?;
        let listing: Vec<DatabaseEntry> = serde_json::from_slice(&body)?;
        Ok(listing.into_iter().map(|entry| entry.database).collect())
    }

    pub async fn exists(&mut self, name: &str) -> Result<bool, DbError> {
        Ok(self.list_databases().await?.iter().any(|db| db == name))
    }

    pub async fn drop_database(&mut self, name: &str) -> Result<(), DbError> {
        self.execute("drop db", &format!("DROP DATABASE IF EXISTS {}", name))
            .await?;
        tokio::time::sleep(self.settle).await;
        Ok(())
    }

    pub async fn create_database(&mut self, name: &str, replication_factor: u32) -> Result<(), DbError> {
        let statement = if replication_factor > 1 {
            format!("CREATE DATABASE {} WITH REPLICA {}", name, replication_factor)
        } else {
            format!("CREATE DATABASE {}", name)
        };
        self.execute("create db", &statement).await?;
        tokio::time::sleep(self.settle).await;
        Ok(())
    }

    /// Bring `name` into the state `setup` asks for.
    pub async fn prepare(&mut self, name: &str, setup: &DbSetup) -> Result<DbAction, DbError> {
        if !setup.create {
            return Ok(DbAction::Skipped);
        }
        if !self.exists(name).await? {
            self.create_database(name, setup.replication_factor).await?;
            info!("created database '{}'", name);
            return Ok(DbAction::Created);
        }
        if setup.abort_on_exist {
            return Err(DbError::Exists(name.to_string()));
        }
        if !setup.drop_existing {
            info!("database '{}' exists, writing into it", name);
            return Ok(DbAction::KeptExisting);
        }
        self.drop_database(name).await?;
        self.create_database(name, setup.replication_factor).await?;
        info!("recreated database '{}'", name);
        Ok(DbAction::Recreated)
    }
}

/// Why a write did not commit.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("backpressure is needed")]
    Backoff,

    #[error("[{debug}] invalid write response (status {status}): {body}")]
    Fatal {
        debug: String,
        status: u16,
        body: String,
    },

    #[error("[{debug}] transport failure: {source}")]
    Transport {
        debug: String,
        #[source]
        source: TransportError,
    },

    #[error("compression failed: {0}")]
    Compression(#[from] io::Error),

    #[error("shutdown requested before the batch committed")]
    Shutdown,
}

impl WriteError {
    pub fn is_backoff(&self) -> bool {
        matches!(self, Self::Backoff)
    }
}

/// Outcome class of a completed exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Success,
    Backoff,
    Fatal,
}

/// Classify a response.
pub fn classify(
    predicate: &dyn BackpressurePredicate,
    success_statuses: &[u16],
    status: u16,
    body: &[u8],
) -> Classification {
    if success_statuses.contains(&status) {
        Classification::Success
    } else if predicate.is_backpressure(status, body) {
        Classification::Backoff
    } else {
        Classification::Fatal
    }
}

/// Statuses treated as a committed write.
pub const DEFAULT_SUCCESS_STATUSES: [u16; 2] = [200, 204];

/// Writes batches over one [`Transport`] and classifies the outcome.
pub struct ResilientWriter<T: Transport> {
    transport: T,
    predicate: Arc<dyn BackpressurePredicate>,
    success_statuses: Vec<u16>,
    debug_info: String,
}

impl<T: Transport> ResilientWriter<T> {
    pub fn new(transport: T, predicate: Arc<dyn BackpressurePredicate>, debug_info: String) -> Self {
        Self {
            transport,
            predicate,
            success_statuses: DEFAULT_SUCCESS_STATUSES.to_vec(),
            debug_info,
        }
    }

    pub fn with_success_statuses(mut self, statuses: Vec<u16>) -> Self {
        self.success_statuses = statuses;
        self
    }

    pub fn debug_info(&self) -> &str {
        &self.debug_info
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send one batch body once. Returns the round-trip latency on success.
    pub async fn write_batch(&mut self, body: &[u8], compressed: bool) -> Result<Duration, WriteError> {
        let start = Instant::now();
        let result = self.transport.send(body, compressed).await;
        let latency = start.elapsed();

        let response = result.map_err(|source| WriteError::Transport {
            debug: self.debug_info.clone(),
            source,
        })?;

        match classify(
            self.predicate.as_ref(),
            &self.success_statuses,
            response.status,
            &response.body,
        ) {
            Classification::Success => Ok(latency),
            Classification::Backoff => Err(WriteError::Backoff),
            Classification::Fatal => Err(WriteError::Fatal {
                debug: self.debug_info.clone(),
                status: response.status,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            }),
        }
    }
}
