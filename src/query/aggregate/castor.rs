//! Castor delegation
//!
//! `castor(field, algorithm, config, process_type)` is not computed
//! locally. Each (tag group, window) batch is sent to an external worker
//! which returns the output series. The wire format is one JSON object per
//! line in each direction:
//!
//! ```text
//! -> {"algorithm":"...","config":"...","process_type":"detect","series":[{"time":0,"value":1.5}]}
//! <- {"series":[{"time":0,"value":0.0}],"error":null}
//! ```

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::CastorConfig;
use crate::query::chunk::ChunkTags;
use crate::query::error::QueryError;

// ============================================================================
// Jobs and wire messages
// ============================================================================

/// One window waiting for the worker
#[derive(Debug, Clone, PartialEq)]
pub struct CastorJob {
    /// Tag group of the window
    pub tags: ChunkTags,
    /// Window bounds `[start, end)`
    pub window: (i64, i64),
    /// Non-null `(time, value)` rows of the window, in stream order
    pub series: Vec<(i64, f64)>,
    /// Worker algorithm
    pub algorithm: String,
    /// Worker configuration file
    pub config: String,
    /// Processing type
    pub process_type: String,
}

impl CastorJob {
    /// Wire request for this job
    pub fn request(&self) -> CastorRequest {
        CastorRequest {
            algorithm: self.algorithm.clone(),
            config: self.config.clone(),
            process_type: self.process_type.clone(),
            series: self
                .series
                .iter()
                .map(|&(time, value)| CastorPoint { time, value })
                .collect(),
        }
    }
}

/// One `(time, value)` pair on the wire
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CastorPoint {
    /// Timestamp in nanoseconds
    pub time: i64,
    /// Value
    pub value: f64,
}

/// Request sent to the worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastorRequest {
    /// Algorithm name
    pub algorithm: String,
    /// Worker configuration file
    pub config: String,
    /// Processing type
    pub process_type: String,
    /// Input batch
    pub series: Vec<CastorPoint>,
}

/// Worker reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CastorResponse {
    /// Output series
    #[serde(default)]
    pub series: Vec<CastorPoint>,
    /// Worker-side failure
    #[serde(default)]
    pub error: Option<String>,
}

impl CastorResponse {
    /// Output series as `(time, value)` pairs
    pub fn points(&self) -> Vec<(i64, f64)> {
        self.series.iter().map(|p| (p.time, p.value)).collect()
    }
}

/// Anything able to run a castor request
#[async_trait]
pub trait CastorClient: Send + Sync {
    /// Run `request` and return the worker's output series
    ///
    /// Worker failures and timeouts are `External` errors.
    async fn detect(&self, request: &CastorRequest) -> Result<CastorResponse, QueryError>;
}

// ============================================================================
// TCP client
// ============================================================================

type Connection = BufReader<TcpStream>;

/// Castor client over pooled TCP connections
pub struct TcpCastorClient {
    address: String,
    timeout: Duration,
    pool_size: usize,
    max_batch_rows: usize,
    idle: Mutex<Vec<Connection>>,
}

impl TcpCastorClient {
    /// Client for the worker at `address`
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
            pool_size: 4,
            max_batch_rows: 0,
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Client configured from the `[castor]` section
    pub fn from_config(config: &CastorConfig) -> Self {
        Self::new(config.address.clone(), Duration::from_millis(config.timeout_ms))
            .with_pool_size(config.pool_size)
            .with_max_batch_rows(config.max_batch_rows)
    }

    /// Idle connections kept for reuse
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Largest batch accepted (0 = unlimited)
    pub fn with_max_batch_rows(mut self, rows: usize) -> Self {
        self.max_batch_rows = rows;
        self
    }

    /// Number of idle pooled connections
    pub fn idle_connections(&self) -> usize {
        self.idle.lock().len()
    }

    async fn checkout(&self) -> Result<Connection, QueryError> {
        let pooled = self.idle.lock().pop();
        if let Some(conn) = pooled {
            return Ok(conn);
        }
        let stream = timeout(self.timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| {
                QueryError::external(format!(
                    "connecting to castor worker {} timed out",
                    self.address
                ))
            })?
            .map_err(|e| {
                QueryError::external(format!("cannot reach castor worker {}", self.address))
                    .with_source(e)
            })?;
        tracing::debug!(address = %self.address, "Castor connection opened");
        Ok(BufReader::new(stream))
    }

    fn checkin(&self, conn: Connection) {
        let mut idle = self.idle.lock();
        if idle.len() < self.pool_size {
            idle.push(conn);
        }
    }
}

#[async_trait]
impl CastorClient for TcpCastorClient {
    async fn detect(&self, request: &CastorRequest) -> Result<CastorResponse, QueryError> {
        if self.max_batch_rows > 0 && request.series.len() > self.max_batch_rows {
            return Err(QueryError::resource_limit(format!(
                "castor batch of {} rows exceeds {}",
                request.series.len(),
                self.max_batch_rows
            )));
        }

        let mut line = serde_json::to_string(request).map_err(|e| {
            QueryError::internal("cannot encode castor request").with_source(e)
        })?;
        line.push('\n');

        let mut conn = self.checkout().await?;
        let exchange = async {
            conn.get_mut().write_all(line.as_bytes()).await?;
            let mut reply = String::new();
            let n = conn.read_line(&mut reply).await?;
            Ok::<_, std::io::Error>((n, reply))
        };

        let reply = match timeout(self.timeout, exchange).await {
            Err(_) => {
                return Err(QueryError::external(format!(
                    "castor worker did not answer within {} ms",
                    self.timeout.as_millis()
                )))
            }
            Ok(Err(e)) => {
                return Err(QueryError::external("castor worker connection failed").with_source(e))
            }
            Ok(Ok((0, _))) => {
                return Err(QueryError::external("castor worker closed the connection"))
            }
            Ok(Ok((_, reply))) => reply,
        };

        let response: CastorResponse = serde_json::from_str(reply.trim()).map_err(|e| {
            QueryError::external("malformed castor response").with_source(e)
        })?;
        self.checkin(conn);

        if let Some(error) = response.error {
            return Err(QueryError::external(format!("castor worker: {}", error)));
        }
        tracing::debug!(
            algorithm = %request.algorithm,
            rows_in = request.series.len(),
            rows_out = response.series.len(),
            "Castor batch processed"
        );
        Ok(response)
    }
}
