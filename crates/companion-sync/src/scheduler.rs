//! Periodic sync scheduling.
//!
//! Runs one sync round immediately, then one per interval. A handle lets
//! embedders force a round (after a sign-in, on popup open) or shut the
//! loop down. Overlap control lives in the registry, so a manual trigger
//! racing the timer costs nothing.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub sync_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sync_interval: DEFAULT_SYNC_INTERVAL,
        }
    }
}

impl SchedulerConfig {
    pub fn new(sync_interval: Duration) -> Self {
        Self { sync_interval }
    }
}

#[derive(Debug)]
enum SchedulerCommand {
    SyncNow,
    Stop,
}

/// Handle for nudging or stopping a running scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Requests an immediate sync round.
    pub async fn sync_now(&self) {
        let _ = self.command_tx.send(SchedulerCommand::SyncNow).await;
    }

    /// Stops the scheduler loop.
    pub async fn stop(&self) {
        let _ = self.command_tx.send(SchedulerCommand::Stop).await;
    }
}

pub struct SyncScheduler {
    config: SchedulerConfig,
    command_tx: mpsc::Sender<SchedulerCommand>,
    command_rx: Option<mpsc::Receiver<SchedulerCommand>>,
}

impl SyncScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let (command_tx, command_rx) = mpsc::channel(8);
        Self {
            config,
            command_tx,
            command_rx: Some(command_rx),
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            command_tx: self.command_tx.clone(),
        }
    }

    /// Runs the scheduler loop until stopped.
    ///
    /// `sync_fn` is called once up front and then once per tick or manual
    /// trigger. Consumes the receiver; a scheduler runs once.
    pub async fn run<F, Fut>(mut self, sync_fn: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let mut command_rx = match self.command_rx.take() {
            Some(rx) => rx,
            None => return,
        };
        let interval = self.config.sync_interval;
        // Holding our own sender would keep the channel open forever.
        drop(self);

        info!(interval_secs = interval.as_secs(), "scheduler started");
        sync_fn().await;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    debug!("periodic sync");
                    sync_fn().await;
                }
                command = command_rx.recv() => match command {
                    Some(SchedulerCommand::SyncNow) => {
                        debug!("manual sync");
                        sync_fn().await;
                    }
                    Some(SchedulerCommand::Stop) | None => {
                        info!("scheduler stopped");
                        break;
                    }
                },
            }
        }
    }
}
