//! The generator's own thread.

use super::Generator;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::sync::{sync_channel, FromGenerator, GeneratorEnd, ToGenerator, TransportEnd};
use crate::timing::Step;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Settings for a [`GeneratorWorker`].
#[derive(Clone, Debug, PartialEq)]
pub struct GeneratorConfig {
    pub lookahead: Step,
    /// Period of the `TICK` pulse while running.
    pub tick_interval: Duration,
    pub worker_logging: bool,
}

impl GeneratorConfig {
    pub fn from_engine(config: &EngineConfig) -> Result<Self> {
        Ok(Self {
            lookahead: config.lookahead_steps,
            tick_interval: config.tick_interval()?,
            worker_logging: config.worker_logging,
        })
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            lookahead: 64,
            tick_interval: Duration::from_millis(25),
            worker_logging: false,
        }
    }
}

/// Owns the generator thread. Dropping it shuts the thread down.
pub struct GeneratorWorker {
    shutdown: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl GeneratorWorker {
    /// Start the thread. Returns the worker and the transport's end of the
    /// sync channel.
    pub fn spawn(config: GeneratorConfig) -> Result<(Self, TransportEnd)> {
        let (transport, generator_end) = sync_channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = shutdown.clone();

        let thread_handle = thread::Builder::new()
            .name("ensemble-generator".to_string())
            .spawn(move || {
                let mut worker = WorkerThread::new(config, generator_end);
                worker.run(thread_shutdown);
            })
            .map_err(|e| Error::Thread(e.to_string()))?;

        log::info!("[GENERATOR] worker started");
        Ok((
            Self {
                shutdown,
                thread_handle: Some(thread_handle),
            },
            transport,
        ))
    }

    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the thread and wait for it to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                log::error!("[GENERATOR] worker panicked");
            } else {
                log::info!("[GENERATOR] worker stopped");
            }
        }
    }
}

impl Drop for GeneratorWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for GeneratorWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorWorker")
            .field("running", &self.is_running())
            .finish()
    }
}

struct WorkerThread {
    generator: Generator,
    channel: GeneratorEnd,
    tick_interval: Duration,
}

impl WorkerThread {
    fn new(config: GeneratorConfig, channel: GeneratorEnd) -> Self {
        Self {
            generator: Generator::new(config.lookahead, config.worker_logging),
            channel,
            tick_interval: config.tick_interval,
        }
    }

    fn run(&mut self, shutdown: Arc<AtomicBool>) {
        let mut next_tick = Instant::now() + self.tick_interval;

        while !shutdown.load(Ordering::Relaxed) {
            let wait = next_tick.saturating_duration_since(Instant::now());
            match self.channel.recv_timeout(wait) {
                Ok(Some(ToGenerator::Shutdown)) => break,
                Ok(Some(msg)) => {
                    if let Some(reply) = self.generator.handle(msg) {
                        if self.channel.send(reply).is_err() {
                            break;
                        }
                    }
                }
                Ok(None) => {}
                Err(_) => {
                    log::debug!("[GENERATOR] transport hung up");
                    break;
                }
            }

            let now = Instant::now();
            if now >= next_tick {
                next_tick = now + self.tick_interval;
                if self.generator.is_running() && self.channel.send(FromGenerator::Tick).is_err() {
                    break;
                }
            }
        }
    }
}
