//! # Cleaner
//!
//! Periodically reaps runs that reached the terminal `Compacted` state:
//! first out of the registry, then off the disk. Only full batches are
//! reaped, mirroring the compactor's batch size. A failed unlink leaves an
//! orphan file behind, which is harmless, nothing references it anymore.

use crate::cfg::Config;
use crate::err::Error;
use crate::registry::SstRegistry;
use crate::sst::SstState;
use std::sync::Arc;
use tokio::sync::broadcast;

pub struct Cleaner {
    registry: Arc<SstRegistry>,
    config: Config,
}

impl Cleaner {
    pub fn new(registry: Arc<SstRegistry>, config: Config) -> Self {
        Self { registry, config }
    }

    /// Spawns the periodic cleaning loop
    pub fn start(self, mut shutdown_rx: broadcast::Receiver<()>) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.cleaner_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.run_once().await {
                            log::error!("error cleaning compacted ssts: {}", err);
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            log::info!("cleaner stopped");
        });
    }

    /// One cleaning pass over every tracked level
    pub(crate) async fn run_once(&self) -> Result<(), Error> {
        let batch_size = self.config.max_ssts_per_level;
        for level in self.registry.levels() {
            let batch = self.registry.list(level, &[SstState::Compacted], batch_size);
            if batch.len() < batch_size {
                continue;
            }

            self.registry.remove(level, &batch)?;
            for sst in &batch {
                if let Err(error) = tokio::fs::remove_file(&sst.path).await {
                    log::error!(
                        "{}",
                        Error::FileRemoveError {
                            path: sst.path.clone(),
                            error,
                        }
                    );
                }
            }
            log::info!("cleaned {} compacted ssts from level {}", batch.len(), level);
        }
        Ok(())
    }
}
