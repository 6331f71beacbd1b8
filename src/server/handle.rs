//! Handle for controlling a running background job server.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use super::status::{ServerStatus, StatusSnapshot};
use super::types::{ServerCommand, TickReport, ZooKeeperError};

/// Buffer size for the command channel between ServerHandle and the server loop.
pub(crate) const COMMAND_CHANNEL_BUFFER: usize = 32;

/// Handle for controlling the server loop.
#[derive(Clone)]
pub struct ServerHandle {
    pub(crate) command_tx: mpsc::Sender<ServerCommand>,
    pub(crate) status: Arc<ServerStatus>,
}

impl ServerHandle {
    async fn send_result_command<T>(
        &self,
        build_command: impl FnOnce(oneshot::Sender<Result<T, ZooKeeperError>>) -> ServerCommand,
        operation: &str,
    ) -> Result<T, ZooKeeperError>
    where
        T: Send + 'static,
    {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(build_command(response_tx))
            .await
            .map_err(|_| {
                ZooKeeperError::ChannelError(format!("failed to send {} command", operation))
            })?;

        response_rx.await.map_err(|_| {
            ZooKeeperError::ChannelError(format!("failed to receive {} response", operation))
        })?
    }

    async fn send_unit_command(
        &self,
        build_command: impl FnOnce(oneshot::Sender<()>) -> ServerCommand,
        operation: &str,
    ) -> Result<(), ZooKeeperError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(build_command(response_tx))
            .await
            .map_err(|_| {
                ZooKeeperError::ChannelError(format!("failed to send {} command", operation))
            })?;

        response_rx.await.map_err(|_| {
            ZooKeeperError::ChannelError(format!("failed to receive {} response", operation))
        })
    }

    /// Run a heartbeat and one zookeeper tick now, outside the poll interval.
    pub async fn tick(&self) -> Result<TickReport, ZooKeeperError> {
        self.send_result_command(|response| ServerCommand::Tick { response }, "tick")
            .await
    }

    /// Pause maintenance. Running jobs are not interrupted.
    pub async fn pause(&self) -> Result<(), ZooKeeperError> {
        self.send_unit_command(|response| ServerCommand::Pause { response }, "pause")
            .await
    }

    /// Resume maintenance after a pause.
    pub async fn resume(&self) -> Result<(), ZooKeeperError> {
        self.send_unit_command(|response| ServerCommand::Resume { response }, "resume")
            .await
    }

    /// Stop the server, waiting for running jobs up to the shutdown timeout.
    pub async fn shutdown(&self) -> Result<(), ZooKeeperError> {
        self.send_unit_command(|response| ServerCommand::Shutdown { response }, "shutdown")
            .await
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    pub fn is_leader(&self) -> bool {
        self.status.is_leader()
    }

    pub fn is_paused(&self) -> bool {
        self.status.is_paused()
    }
}
