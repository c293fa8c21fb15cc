use crate::backup::result_error::result::Result;
use derive_more::Display;
use std::sync::mpsc::Sender;
use uuid::Uuid;

/// Events emitted to the UI layer.
#[derive(Clone, Debug, Display, PartialEq, Eq)]
pub enum BackupEvent {
    /// A new backup of the save game was created.
    #[display("saveUpdated {id}")]
    SaveUpdated { id: Uuid },
}

pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: &BackupEvent) -> Result<()>;
}

/// Writes events to the log only.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogPublisher;

impl EventPublisher for LogPublisher {
    fn publish(&self, event: &BackupEvent) -> Result<()> {
        tracing::info!("Event: {event}");
        Ok(())
    }
}

/// Forwards events over a channel to whoever listens.
#[derive(Debug)]
pub struct ChannelPublisher {
    tx: Sender<BackupEvent>,
}

impl ChannelPublisher {
    pub fn new(tx: Sender<BackupEvent>) -> Self {
        Self { tx }
    }
}

impl EventPublisher for ChannelPublisher {
    fn publish(&self, event: &BackupEvent) -> Result<()> {
        Ok(self.tx.send(event.clone())?)
    }
}
