//! Periodic publishing of output batches
//!
//! The delivery transport is left to the caller: [`spawn_publisher`] takes a
//! sink closure and hands it one [`OutMessage`] per interval in which at
//! least one session produced values.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::aggregator::{OutputAggregator, OutputBatch};

/// Envelope around the batches taken in one publish cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutMessage {
    pub publish_timestamp: String,
    pub content: Vec<OutputBatch>,
}

/// Take every non-empty batch; `None` when nothing was collected
pub fn collect_out_message(outputs: &[Arc<OutputAggregator>]) -> Option<OutMessage> {
    let content: Vec<OutputBatch> = outputs.iter().filter_map(|o| o.take()).collect();
    if content.is_empty() {
        return None;
    }

    Some(OutMessage {
        publish_timestamp: Local::now().format(crate::SOURCE_TIMESTAMP_FORMAT).to_string(),
        content,
    })
}

/// Collect and hand over a message every `interval` until `stop` turns true
pub fn spawn_publisher<F>(
    outputs: Vec<Arc<OutputAggregator>>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
    mut sink: F,
) -> JoinHandle<()>
where
    F: FnMut(OutMessage) + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(message) = collect_out_message(&outputs) {
                        debug!("Publishing {} batch(es)", message.content.len());
                        sink(message);
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        // Flush what arrived since the last tick
        if let Some(message) = collect_out_message(&outputs) {
            sink(message);
        }
    })
}
