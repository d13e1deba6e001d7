//! Redis Manager - Centralized Redis connection and operations
//!
//! This module handles all Redis-related operations including:
//! - Worker ID allocation and lease management
//! - Job queue operations (BLPOP)
//! - Result storage, publishing and reply lists

use std::time::Duration;

use anyhow::{Context, Result};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::jobs::WorkerJob;

/// Redis key constants
pub mod keys {
    /// Worker lease key prefix for distributed worker ID allocation
    pub const WORKER_LEASE_PREFIX: &str = "tutor:worker:lease:";

    /// Job queue key
    pub const QUEUE: &str = "tutor:queue";

    /// Submission/preview result key prefix (for polling)
    pub const RESULT_PREFIX: &str = "tutor:result:";

    /// Submission/preview result channel (for pub/sub)
    pub const RESULT_CHANNEL: &str = "tutor:results";

    /// Reply list prefix for request/response jobs (client BLPOPs it)
    pub const REPLY_PREFIX: &str = "tutor:reply:";

    pub fn result_key(request_id: &str) -> String {
        format!("{}{}", RESULT_PREFIX, request_id)
    }

    pub fn reply_key(request_id: &str) -> String {
        format!("{}{}", REPLY_PREFIX, request_id)
    }

    pub fn worker_lease_key(worker_id: u32) -> String {
        format!("{}{}", WORKER_LEASE_PREFIX, worker_id)
    }
}

/// Configuration constants
const MAX_WORKERS: u32 = 10;
const WORKER_LEASE_TTL_SECS: u64 = 120;
const RESULT_EXPIRY_SECS: u64 = 3600; // 1 hour
const REPLY_EXPIRY_SECS: i64 = 300; // 5 minutes

/// Owns the queue connection and the worker lease
pub struct RedisManager {
    worker_id: u32,
    client: redis::Client,
    conn: MultiplexedConnection,
    lease_handle: JoinHandle<()>,
}

impl RedisManager {
    /// Connect, claim a worker ID (0 to MAX_WORKERS-1) and keep its lease alive
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

        let conn = get_connection_with_retry(&client).await?;
        info!(url = %redis_url, "connected to Redis");

        let worker_id = allocate_worker_id(&client).await?;
        info!(
            worker_id,
            lease_secs = WORKER_LEASE_TTL_SECS,
            "allocated worker id"
        );

        let lease_handle = spawn_lease_heartbeat(client.clone(), worker_id);

        Ok(Self {
            worker_id,
            client,
            conn,
            lease_handle,
        })
    }

    pub fn worker_id(&self) -> u32 {
        self.worker_id
    }

    /// Separate connection for results, so BLPOP never delays them
    pub async fn publisher(&self) -> Result<ResultPublisher> {
        let conn = get_connection_with_retry(&self.client).await?;
        Ok(ResultPublisher {
            client: self.client.clone(),
            conn,
        })
    }

    /// Block and wait for the next job from the queue.
    ///
    /// Malformed payloads are logged and skipped. Reconnects on failure.
    pub async fn pop_job(&mut self) -> Result<WorkerJob> {
        loop {
            let result: Option<(String, String)> =
                match self.conn.blpop(keys::QUEUE, 0.0).await {
                    Ok(res) => res,
                    Err(e) => {
                        warn!(error = %e, "Redis BLPOP failed, reconnecting");
                        self.reconnect().await?;
                        continue;
                    }
                };

            if let Some((_, job_data)) = result {
                match serde_json::from_str::<WorkerJob>(&job_data) {
                    Ok(job) => return Ok(job),
                    Err(e) => {
                        warn!(error = %e, bytes = job_data.len(), "failed to parse job data");
                        continue;
                    }
                }
            }
        }
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.conn = get_connection_with_retry(&self.client).await?;
        Ok(())
    }
}

impl Drop for RedisManager {
    fn drop(&mut self) {
        self.lease_handle.abort();
    }
}

/// Cloneable handle for writing job results from worker tasks
#[derive(Clone)]
pub struct ResultPublisher {
    client: redis::Client,
    conn: MultiplexedConnection,
}

impl ResultPublisher {
    /// Store a result with a 1-hour expiration and publish it on the results
    /// channel for real-time subscribers.
    pub async fn store_result<T: Serialize>(&mut self, request_id: &str, result: &T) -> Result<()> {
        let key = keys::result_key(request_id);
        let json = serde_json::to_string(result)?;

        // Try to store, reconnect on failure
        if let Err(e) = self
            .conn
            .set_ex::<_, _, ()>(&key, &json, RESULT_EXPIRY_SECS)
            .await
        {
            warn!(error = %e, "failed to store result, reconnecting");
            self.reconnect().await?;
            self.conn
                .set_ex::<_, _, ()>(&key, &json, RESULT_EXPIRY_SECS)
                .await
                .with_context(|| format!("Failed to store result {}", key))?;
        }

        // Publish to channel (ignore errors as there may be no subscribers)
        let _ = self
            .conn
            .publish::<_, _, ()>(keys::RESULT_CHANNEL, &json)
            .await;

        Ok(())
    }

    /// Push a reply for a client blocked on `tutor:reply:<request_id>`.
    /// The list expires so it does not linger if the client went away.
    pub async fn push_reply<T: Serialize>(&mut self, request_id: &str, reply: &T) -> Result<()> {
        let key = keys::reply_key(request_id);
        let json = serde_json::to_string(reply)?;

        if let Err(e) = self.conn.rpush::<_, _, ()>(&key, &json).await {
            warn!(error = %e, "failed to push reply, reconnecting");
            self.reconnect().await?;
            self.conn
                .rpush::<_, _, ()>(&key, &json)
                .await
                .with_context(|| format!("Failed to push reply {}", key))?;
        }

        let _ = self.conn.expire::<_, ()>(&key, REPLY_EXPIRY_SECS).await;

        Ok(())
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.conn = get_connection_with_retry(&self.client).await?;
        Ok(())
    }
}

/// Get a Redis connection with retry logic
async fn get_connection_with_retry(client: &redis::Client) -> Result<MultiplexedConnection> {
    loop {
        match client.get_multiplexed_async_connection().await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                warn!(error = %e, "failed to connect to Redis, retrying in 3 seconds");
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
        }
    }
}

/// Allocate a unique worker ID using Redis SET NX with expiration
async fn allocate_worker_id(client: &redis::Client) -> Result<u32> {
    loop {
        let mut conn = get_connection_with_retry(client).await?;

        for worker_id in 0..MAX_WORKERS {
            let claimed: Option<String> = redis::cmd("SET")
                .arg(keys::worker_lease_key(worker_id))
                .arg("claimed")
                .arg("NX")
                .arg("EX")
                .arg(WORKER_LEASE_TTL_SECS as usize)
                .query_async(&mut conn)
                .await?;

            if claimed.is_some() {
                return Ok(worker_id);
            }
        }

        warn!(max = MAX_WORKERS - 1, "no free worker id, retrying in 1 second");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

/// Spawn a background task to keep the worker lease alive
fn spawn_lease_heartbeat(client: redis::Client, worker_id: u32) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_secs(WORKER_LEASE_TTL_SECS / 2);

        loop {
            tokio::time::sleep(interval).await;

            match get_connection_with_retry(&client).await {
                Ok(mut conn) => {
                    if let Err(e) = redis::cmd("EXPIRE")
                        .arg(keys::worker_lease_key(worker_id))
                        .arg(WORKER_LEASE_TTL_SECS as usize)
                        .query_async::<()>(&mut conn)
                        .await
                    {
                        warn!(worker_id, error = %e, "failed to refresh worker lease");
                    }
                }
                Err(e) => {
                    warn!(worker_id, error = %e, "failed to refresh worker lease (connection)");
                }
            }
        }
    })
}
