//! The two ends of the sync channel.
//!
//! A pair of unbounded crossbeam channels, FIFO in each direction. The
//! transport end never blocks; the generator end blocks with a timeout so
//! its loop can keep ticking.

use super::messages::{FromGenerator, ToGenerator};
use crate::error::{Error, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

/// Create a connected pair of channel ends.
pub fn sync_channel() -> (TransportEnd, GeneratorEnd) {
    let (to_generator_tx, to_generator_rx) = unbounded();
    let (from_generator_tx, from_generator_rx) = unbounded();
    (
        TransportEnd {
            tx: to_generator_tx,
            rx: from_generator_rx,
        },
        GeneratorEnd {
            rx: to_generator_rx,
            tx: from_generator_tx,
        },
    )
}

/// The playback side: sends requests, drains replies without waiting.
#[derive(Debug)]
pub struct TransportEnd {
    tx: Sender<ToGenerator>,
    rx: Receiver<FromGenerator>,
}

impl TransportEnd {
    pub fn send(&self, msg: ToGenerator) -> Result<()> {
        log::trace!("[SYNC] -> {}", msg.kind());
        self.tx.send(msg).map_err(|_| Error::Disconnected)
    }

    /// Next pending reply, if any.
    pub fn try_recv(&self) -> Result<Option<FromGenerator>> {
        match self.rx.try_recv() {
            Ok(msg) => Ok(Some(msg)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::Disconnected),
        }
    }

    /// All replies received so far, in arrival order.
    pub fn drain(&self) -> Vec<FromGenerator> {
        self.rx.try_iter().collect()
    }

    /// Block for the next reply. Meant for tests and shutdown paths only.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<FromGenerator>> {
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => Ok(Some(msg)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::Disconnected),
        }
    }
}

/// The generator side.
#[derive(Debug)]
pub struct GeneratorEnd {
    rx: Receiver<ToGenerator>,
    tx: Sender<FromGenerator>,
}

impl GeneratorEnd {
    pub fn send(&self, msg: FromGenerator) -> Result<()> {
        self.tx.send(msg).map_err(|_| Error::Disconnected)
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<ToGenerator>> {
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => Ok(Some(msg)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::Disconnected),
        }
    }

    pub fn try_recv(&self) -> Result<Option<ToGenerator>> {
        match self.rx.try_recv() {
            Ok(msg) => Ok(Some(msg)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::Disconnected),
        }
    }
}
