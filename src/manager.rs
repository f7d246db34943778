//! Multi-slave session management
//!
//! Owns one [`ModbusSlaveSession`] per configured slave, starts and stops
//! them together and routes write commands to the session whose hardware id
//! matches.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::aggregator::OutputAggregator;
use crate::config::ModuleConfig;
use crate::error::{ModbusError, ModbusResult};
use crate::operation::WriteOperation;
use crate::session::ModbusSlaveSession;
use crate::transport::ModbusTransport;

pub struct SessionManager<T: ModbusTransport + 'static = Box<dyn ModbusTransport>> {
    sessions: Vec<ModbusSlaveSession<T>>,
}

impl SessionManager<Box<dyn ModbusTransport>> {
    /// One session per slave, each with the transport its connection string selects
    pub fn from_config(config: &ModuleConfig) -> ModbusResult<Self> {
        let sessions = config
            .slave_configs
            .values()
            .map(|slave| ModbusSlaveSession::new(slave, slave.build_transport()?))
            .collect::<ModbusResult<Vec<_>>>()?;

        Ok(Self { sessions })
    }
}

impl<T: ModbusTransport + 'static> SessionManager<T> {
    pub fn with_sessions(sessions: Vec<ModbusSlaveSession<T>>) -> Self {
        Self { sessions }
    }

    pub fn sessions(&self) -> &[ModbusSlaveSession<T>] {
        &self.sessions
    }

    pub fn session(&self, hardware_id: &str) -> Option<&ModbusSlaveSession<T>> {
        self.sessions.iter().find(|s| s.hardware_id() == hardware_id)
    }

    /// Initialise and start every session
    ///
    /// A slave that cannot be reached is logged and skipped so the others keep
    /// polling. Returns the number of sessions started.
    pub async fn start_all(&mut self) -> usize {
        let mut started = 0;
        for session in self.sessions.iter_mut() {
            let result = match session.init_session().await {
                Ok(()) => session.process_operations(),
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => started += 1,
                Err(e) => error!("Session '{}' not started: {}", session.hardware_id(), e),
            }
        }
        info!("Started {}/{} session(s)", started, self.sessions.len());
        started
    }

    /// Send `op` to the session whose hardware id equals `op.hw_id`
    pub async fn write(&self, op: &WriteOperation) -> ModbusResult<()> {
        let session = self.session(&op.hw_id).ok_or_else(|| {
            ModbusError::configuration(format!("No session for hardware id '{}'", op.hw_id))
        })?;
        let unit_id = op.unit_id.unwrap_or_else(|| session.unit_id());
        session.write_on_demand(unit_id, op, op.value).await
    }

    /// Run every write listed in the slave configurations once
    pub async fn run_configured_writes(&self) {
        for session in &self.sessions {
            for (id, op) in session.write_operations() {
                if let Err(e) = self.write(op).await {
                    warn!("Write '{}' of '{}' rejected: {}", id, session.hardware_id(), e);
                }
            }
        }
    }

    pub fn outputs(&self) -> Vec<Arc<OutputAggregator>> {
        self.sessions.iter().map(|s| s.output()).collect()
    }

    pub async fn shutdown_all(&mut self) {
        for session in self.sessions.iter_mut() {
            session.shutdown().await;
        }
    }

    /// Shut down and close every session
    pub async fn release_all(self) {
        for session in self.sessions {
            let hardware_id = session.hardware_id().to_string();
            if let Err(e) = session.release_session().await {
                warn!("Releasing session '{}' failed: {}", hardware_id, e);
            }
        }
    }
}
