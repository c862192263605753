// ==============================================================================
// queue.rs - Redis Job Queue Management (Worker Side)
// ==============================================================================
// Description: Reliable-queue consumption: receive, acknowledge, retry and
//              recovery of in-flight messages
// Author: Matt Barham
// Created: 2025-11-06
// Modified: 2026-10-18
// Version: 1.1.0
// ==============================================================================

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Direction};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use tracing::{debug, info};

/// Blocking receive timeout, seconds
const RECEIVE_TIMEOUT: f64 = 1.0;

/// Envelope pushed by producers (must match the export service)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMessage {
    pub message_id: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// One received payload
///
/// `raw` is kept verbatim: acknowledgement removes exactly this payload.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub raw: String,
    pub message: std::result::Result<JobMessage, String>,
}

impl Delivery {
    pub fn new(raw: String) -> Self {
        let message = serde_json::from_str::<JobMessage>(&raw).map_err(|e| e.to_string());
        Self { raw, message }
    }

    /// Message id for logs, even when the envelope did not parse
    pub fn label(&self) -> String {
        match &self.message {
            Ok(message) => message.message_id.clone(),
            Err(_) => "<unparseable>".to_string(),
        }
    }
}

/// Queue seam
pub trait JobQueue: Send {
    /// At most one message, or `None` when nothing arrived in time
    fn receive(&mut self) -> impl Future<Output = Result<Option<Delivery>>> + Send;

    /// Remove for good
    fn acknowledge(&mut self, delivery: &Delivery) -> impl Future<Output = Result<()>> + Send;

    /// Make the message visible again for a later receive
    fn retry(&mut self, delivery: &Delivery) -> impl Future<Output = Result<()>> + Send;

    /// Return messages left in flight by a previous run; returns how many
    fn recover(&mut self) -> impl Future<Output = Result<usize>> + Send;
}

/// Redis lists: `{name}:pending` and `{name}:processing:{worker}`
pub struct RedisJobQueue {
    conn: ConnectionManager,
    pending_key: String,
    processing_key: String,
}

impl RedisJobQueue {
    pub fn new(conn: ConnectionManager, queue_name: &str, worker_id: &str) -> Self {
        Self {
            conn,
            pending_key: format!("{}:pending", queue_name),
            processing_key: format!("{}:processing:{}", queue_name, worker_id),
        }
    }
}

impl JobQueue for RedisJobQueue {
    async fn receive(&mut self) -> Result<Option<Delivery>> {
        // Producers LPUSH, so the oldest payload is on the right
        let raw: Option<String> = self
            .conn
            .blmove(
                &self.pending_key,
                &self.processing_key,
                Direction::Right,
                Direction::Left,
                RECEIVE_TIMEOUT,
            )
            .await
            .context("Failed to receive from queue")?;

        Ok(raw.map(Delivery::new))
    }

    async fn acknowledge(&mut self, delivery: &Delivery) -> Result<()> {
        let removed: usize = self
            .conn
            .lrem(&self.processing_key, 1, &delivery.raw)
            .await
            .context("Failed to acknowledge message")?;

        debug!("Acknowledged {} ({} removed)", delivery.label(), removed);
        Ok(())
    }

    async fn retry(&mut self, delivery: &Delivery) -> Result<()> {
        let _: () = redis::pipe()
            .atomic()
            .lrem(&self.processing_key, 1, &delivery.raw)
            .ignore()
            .lpush(&self.pending_key, &delivery.raw)
            .ignore()
            .query_async(&mut self.conn)
            .await
            .context("Failed to requeue message")?;

        debug!("Requeued {}", delivery.label());
        Ok(())
    }

    async fn recover(&mut self) -> Result<usize> {
        let mut recovered = 0;
        loop {
            // Oldest in-flight payload ends up first in line
            let moved: Option<String> = self
                .conn
                .lmove(
                    &self.processing_key,
                    &self.pending_key,
                    Direction::Left,
                    Direction::Right,
                )
                .await
                .context("Failed to recover in-flight messages")?;

            match moved {
                Some(_) => recovered += 1,
                None => break,
            }
        }

        if recovered > 0 {
            info!("Recovered {} in-flight message(s) from {}", recovered, self.processing_key);
        }
        Ok(recovered)
    }
}
