//! Periodic auto-mining driver.
//!
//! A background thread calls [`ChainService::mine_block`] once per period
//! until stopped. Stopping is race-free against an in-flight tick: the
//! flag is checked right before each mine, an in-flight call runs to
//! completion, and at most one more tick can fire after `stop` returns.
//! Mining failures are logged and the loop keeps going, mirroring how an
//! interval timer shrugs off a bad tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use crate::node::ChainService;
use crate::wallet::AddressProvider;

/// One block every ten seconds unless configured otherwise.
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(10);

pub struct MiningScheduler {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MiningScheduler {
    /// Spawn the mining thread. The first block lands one period after
    /// start, not immediately.
    pub fn start<P, R>(service: Arc<ChainService<P, R>>, period: Duration) -> Self
    where
        P: AddressProvider + Send + 'static,
        R: Rng + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = thread::spawn(move || {
            info!(period_ms = period.as_millis() as u64, "auto-mining started");
            loop {
                thread::sleep(period);
                if !flag.load(Ordering::SeqCst) {
                    break;
                }
                match service.mine_block() {
                    Ok(block) => {
                        info!(height = block.height, validator = %block.validator, "auto-mined")
                    }
                    Err(err) => warn!(%err, "auto-mining tick failed"),
                }
            }
            info!("auto-mining stopped");
        });
        Self {
            running,
            handle: Some(handle),
        }
    }

    /// Request the loop to end. Returns immediately; the thread exits at
    /// its next wakeup.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop and wait for the thread to wind down (up to one period plus an
    /// in-flight mine).
    pub fn shutdown(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MiningScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::tempdir;

    use crate::producer::SystemClock;
    use crate::store::LedgerStore;
    use crate::wallet::Ed25519AddressProvider;

    #[test]
    fn scheduler_mines_until_stopped() {
        let dir = tempdir().unwrap();
        let service = Arc::new(ChainService::with_parts(
            LedgerStore::new(dir.path()),
            Ed25519AddressProvider::with_rng(StdRng::seed_from_u64(1)),
            StdRng::seed_from_u64(2),
            SystemClock,
        ));
        service.initialize().unwrap();
        assert_eq!(service.status().latest_height, 0);

        let scheduler = MiningScheduler::start(Arc::clone(&service), Duration::from_millis(10));
        assert!(scheduler.is_running());
        while service.status().latest_height < 2 {
            thread::sleep(Duration::from_millis(5));
        }
        scheduler.shutdown();

        let height = service.status().latest_height;
        assert!(height >= 2);
        // No further ticks after shutdown.
        thread::sleep(Duration::from_millis(40));
        assert_eq!(service.status().latest_height, height);
    }
}
