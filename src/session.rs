//! # Session Engine
//!
//! A [`ModbusSlaveSession`] binds the read operations of one slave to one
//! transport and polls each operation on its own tokio task:
//!
//! ```text
//!            ┌──────────── ModbusSlaveSession ────────────┐
//!  op 1 ──►  │ task: encode once, then send ► decode ► sleep │
//!  op 2 ──►  │ task: ...                                   │ ──► OutputAggregator
//!  op n ──►  │ task: ...                                   │
//!            └──────── Arc<Mutex<transport>> ──────────────┘
//! ```
//!
//! - Every send goes through one `tokio::sync::Mutex` around the transport,
//!   so operations sharing a serial line or socket never interleave frames.
//! - Each task owns its descriptor (request and response buffers) and hands
//!   it back when it exits, so a stopped session can be started again.
//! - Transport errors, exception responses and unrelated responses only cost
//!   the current cycle. The loop keeps its schedule.
//! - [`ModbusSlaveSession::shutdown`] flips a `watch` flag, wakes sleeping
//!   loops and waits for all of them. An in-flight send is allowed to
//!   finish; no loop starts a send after it has seen the flag.
//!
//! ## Lifecycle
//!
//! ```rust,no_run
//! use edge_modbus::config::ModbusSlaveConfig;
//! use edge_modbus::operation::ReadOperationConfig;
//! use edge_modbus::session::ModbusSlaveSession;
//!
//! # async fn example() -> edge_modbus::ModbusResult<()> {
//! let config = ModbusSlaveConfig::new("PowerMeter-01", "192.168.0.10")
//!     .with_operation("Op01", ReadOperationConfig::new("400001", 2, "Voltage"));
//! let transport = config.build_transport()?;
//!
//! let mut session = ModbusSlaveSession::new(&config, transport)?;
//! session.init_session().await?;
//! session.process_operations()?;
//!
//! // ... later, from a publisher
//! let batch = session.output().take();
//!
//! session.shutdown().await;
//! session.release_session().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use futures::future::join_all;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::aggregator::OutputAggregator;
use crate::codec::{self, DecodeOutcome};
use crate::config::ModbusSlaveConfig;
use crate::error::{ModbusError, ModbusResult};
use crate::operation::{ReadOperation, WriteOperation};
use crate::protocol::UnitId;
use crate::transport::ModbusTransport;
use crate::utils::{OperationTimer, PollStatistics};

type SharedStats = Arc<StdMutex<HashMap<String, PollStatistics>>>;

/// Everything a polling task shares with its session
struct PollContext<T> {
    hardware_id: String,
    transport: Arc<Mutex<T>>,
    output: Arc<OutputAggregator>,
    stats: SharedStats,
    running: watch::Receiver<bool>,
}

/// Polling session for one slave device
#[derive(Debug)]
pub struct ModbusSlaveSession<T: ModbusTransport + 'static> {
    hardware_id: String,
    unit_id: UnitId,
    /// Descriptors not currently owned by a polling task
    operations: Vec<ReadOperation>,
    writes: Vec<(String, WriteOperation)>,
    transport: Arc<Mutex<T>>,
    output: Arc<OutputAggregator>,
    stats: SharedStats,
    running: watch::Sender<bool>,
    tasks: Vec<JoinHandle<ReadOperation>>,
    initialized: bool,
}

impl<T: ModbusTransport + 'static> ModbusSlaveSession<T> {
    /// Build and validate every descriptor of `config`
    pub fn new(config: &ModbusSlaveConfig, transport: T) -> ModbusResult<Self> {
        config.validate()?;
        let operations = config.read_operations()?;

        let stats = operations
            .iter()
            .map(|op| (op.id().to_string(), PollStatistics::new()))
            .collect();
        let (running, _) = watch::channel(false);

        Ok(Self {
            hardware_id: config.hw_id.clone(),
            unit_id: config.unit_id,
            operations,
            writes: config
                .writes
                .iter()
                .map(|(id, w)| (id.clone(), w.clone()))
                .collect(),
            transport: Arc::new(Mutex::new(transport)),
            output: Arc::new(OutputAggregator::new()),
            stats: Arc::new(StdMutex::new(stats)),
            running,
            tasks: Vec::new(),
            initialized: false,
        })
    }

    pub fn hardware_id(&self) -> &str {
        &self.hardware_id
    }

    /// Slave-level unit id, used when an operation does not set its own
    pub fn unit_id(&self) -> UnitId {
        self.unit_id
    }

    /// Configured one-shot writes, by id
    pub fn write_operations(&self) -> &[(String, WriteOperation)] {
        &self.writes
    }

    /// Shared batch of decoded values
    pub fn output(&self) -> Arc<OutputAggregator> {
        self.output.clone()
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Number of polling tasks currently alive
    pub fn active_operations(&self) -> usize {
        self.tasks.len()
    }

    pub fn poll_stats(&self) -> HashMap<String, PollStatistics> {
        self.stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Connect the transport and encode every read request once
    pub async fn init_session(&mut self) -> ModbusResult<()> {
        let mut transport = self.transport.lock().await;

        transport.connect().await.map_err(|e| match e {
            ModbusError::Connection { .. } => e,
            other => ModbusError::connection(format!(
                "Slave '{}' connect failed: {}",
                self.hardware_id, other
            )),
        })?;

        for op in self.operations.iter_mut() {
            codec::encode_read(op, &mut *transport)?;
            debug!(
                "Encoded {} for '{}': {}",
                op.id(),
                self.hardware_id,
                hex::encode_upper(op.request())
            );
        }

        self.initialized = true;
        info!(
            "Session '{}' initialised with {} read operation(s)",
            self.hardware_id,
            self.operations.len()
        );
        Ok(())
    }

    /// Start one polling task per read operation
    pub fn process_operations(&mut self) -> ModbusResult<()> {
        if !self.initialized {
            return Err(ModbusError::configuration(format!(
                "Session '{}' must be initialised before polling",
                self.hardware_id
            )));
        }
        if self.is_running() {
            warn!("Session '{}' is already polling", self.hardware_id);
            return Ok(());
        }

        self.running.send_replace(true);

        for op in self.operations.drain(..) {
            let ctx = PollContext {
                hardware_id: self.hardware_id.clone(),
                transport: self.transport.clone(),
                output: self.output.clone(),
                stats: self.stats.clone(),
                running: self.running.subscribe(),
            };
            self.tasks.push(tokio::spawn(poll_operation(op, ctx)));
        }

        info!(
            "Session '{}' started {} polling task(s)",
            self.hardware_id,
            self.tasks.len()
        );
        Ok(())
    }

    /// Encode and send a write, without checking the slave's reply
    ///
    /// Only configuration errors are returned. Transport failures are logged;
    /// confirmation requires a later read.
    pub async fn write_on_demand(
        &self,
        unit_id: UnitId,
        op: &WriteOperation,
        value: f32,
    ) -> ModbusResult<()> {
        let mut transport = self.transport.lock().await;
        let frame = codec::encode_write(op, unit_id, value, &mut *transport)?;

        match transport.send(&frame).await {
            Ok(response) => debug!(
                "Write {}={} on '{}' answered: {}",
                op.start_address,
                value,
                self.hardware_id,
                hex::encode_upper(&response)
            ),
            Err(e) => warn!(
                "Write {}={} on '{}' failed: {}",
                op.start_address, value, self.hardware_id, e
            ),
        }
        Ok(())
    }

    /// Stop polling and wait until every task has exited
    pub async fn shutdown(&mut self) {
        self.running.send_replace(false);

        for result in join_all(self.tasks.drain(..)).await {
            match result {
                Ok(op) => self.operations.push(op),
                Err(e) => error!("Polling task of '{}' failed: {}", self.hardware_id, e),
            }
        }
        self.operations.sort_by(|a, b| a.id().cmp(b.id()));

        info!("Session '{}' stopped", self.hardware_id);
    }

    /// Shut down if still polling, then close the transport
    pub async fn release_session(mut self) -> ModbusResult<()> {
        if self.is_running() || !self.tasks.is_empty() {
            self.shutdown().await;
        }
        self.transport.lock().await.close().await
    }
}

fn record_stats(stats: &SharedStats, id: &str, update: impl FnOnce(&mut PollStatistics)) {
    let mut guard = stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    update(guard.entry(id.to_string()).or_default());
}

async fn poll_operation<T: ModbusTransport>(mut op: ReadOperation, ctx: PollContext<T>) -> ReadOperation {
    let PollContext {
        hardware_id,
        transport,
        output,
        stats,
        mut running,
    } = ctx;

    debug!("Polling {} on '{}' every {:?}", op.id(), hardware_id, op.polling_interval());

    while *running.borrow() {
        op.clear_response();
        let timer = OperationTimer::start(op.id());

        let (result, body_offset, silent_interval) = {
            let mut transport = transport.lock().await;
            // Shutdown may have happened while waiting for the connection
            if !*running.borrow() {
                break;
            }
            let result = transport.send(op.request()).await;
            (result, transport.body_offset(), transport.silent_interval())
        };

        let outcome = match result {
            Ok(response) => {
                op.set_response(response);
                let response = op.response().unwrap_or_default();
                Ok(codec::decode(&op, op.request(), response, body_offset))
            }
            Err(e) => Err(e),
        };
        let elapsed = timer.stop();

        match outcome {
            Ok(DecodeOutcome::Values(values)) => {
                let count = values.len();
                for value in &values {
                    debug!("{}: {}", value.address_label, value.value_text);
                }
                if !values.is_empty() {
                    output.contribute(&hardware_id, op.correlation_id(), values);
                }
                record_stats(&stats, op.id(), |s| s.record_success(elapsed, count));
            }
            Ok(DecodeOutcome::Exception { function, code }) => {
                let exception = ModbusError::exception(function, code);
                // Acknowledge and busy clear up by themselves
                if exception.is_recoverable() {
                    debug!("{} on '{}': {}", op.id(), hardware_id, exception);
                } else {
                    warn!("{} on '{}': {}", op.id(), hardware_id, exception);
                }
                record_stats(&stats, op.id(), |s| s.record_exception(elapsed, code));
            }
            Ok(DecodeOutcome::NoMatch) => {
                debug!("{} on '{}': no response matched", op.id(), hardware_id);
                record_stats(&stats, op.id(), |s| s.record_mismatch(elapsed));
            }
            Err(e) => {
                if e.is_protocol_error() {
                    warn!("{} on '{}': bad response: {}", op.id(), hardware_id, e);
                } else {
                    warn!("{} on '{}': {}", op.id(), hardware_id, e);
                }
                record_stats(&stats, op.id(), |s| s.record_error(elapsed, &e));
            }
        }

        let delay = op.polling_interval().saturating_sub(silent_interval);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = running.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    debug!("Polling {} on '{}' stopped", op.id(), hardware_id);
    op
}
