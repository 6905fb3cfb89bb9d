//! Background sweeper that evicts long-idle resources

use std::io;
use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use tracing::{debug, trace, warn};

use crate::errors::{PoolError, PoolResult};
use crate::pool::PoolInner;
use crate::resource::PooledResource;

enum SweepCommand {
    Reschedule(Duration),
    Stop,
}

/// Handle to the sweeper thread of one pool.
///
/// Commands and sweeps are processed by the same thread, so a reschedule
/// never overlaps a running sweep.
pub(crate) struct Sweeper {
    commands: Sender<SweepCommand>,
    worker: Option<JoinHandle<()>>,
}

impl Sweeper {
    pub(crate) fn spawn<T: PooledResource>(pool: Weak<PoolInner<T>>, period: Duration) -> io::Result<Self> {
        let (commands, receiver) = channel::unbounded();
        let worker = thread::Builder::new()
            .name("resourcepool-sweeper".to_string())
            .spawn(move || run(pool, receiver, period))?;

        Ok(Self {
            commands,
            worker: Some(worker),
        })
    }

    /// Change the sweep period. The next sweep is due one new period after
    /// the previous sweep.
    ///
    /// Fails when the worker has exited.
    pub(crate) fn reschedule(&self, period: Duration) -> PoolResult<()> {
        self.commands
            .send(SweepCommand::Reschedule(period))
            .map_err(|_| PoolError::SweeperStopped)
    }

    pub(crate) fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = self.commands.send(SweepCommand::Stop);
        if worker.join().is_err() {
            warn!("resource pool sweeper panicked");
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<T: PooledResource>(pool: Weak<PoolInner<T>>, commands: channel::Receiver<SweepCommand>, mut period: Duration) {
    debug!(?period, "sweeper started");
    let mut last_sweep = Instant::now();
    loop {
        // A period too long to represent as a deadline never elapses.
        let received = match last_sweep.checked_add(period) {
            Some(deadline) => commands.recv_deadline(deadline),
            None => commands.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match received {
            Ok(SweepCommand::Reschedule(new_period)) => {
                debug!(?new_period, "sweeper rescheduled");
                period = new_period;
            }
            Ok(SweepCommand::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                let evicted = pool.sweep(period);
                drop(pool);
                last_sweep = Instant::now();
                trace!(evicted, "sweep finished");
            }
        }
    }
    debug!("sweeper stopped");
}
