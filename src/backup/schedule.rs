//! One recurring timer per tracked save game.
//!
//! Each timer is a small thread waiting on a stop channel with a timeout; on
//! every timeout it hands `on_tick(id)` to the shared rayon pool. Stopping a
//! timer only prevents future ticks, a tick already handed to the pool runs
//! to completion.

use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithMsg;
use parking_lot::Mutex;
use rayon::ThreadPool;
use std::collections::HashMap;
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use uuid::Uuid;

pub type TickFn = Arc<dyn Fn(Uuid) + Send + Sync>;

struct Timer {
    period: Duration,
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl Timer {
    fn stop(self, id: Uuid) {
        let _ = self.stop_tx.send(());
        if self.handle.join().is_err() {
            tracing::error!("Timer thread of {id} panicked");
        }
    }
}

pub struct ScheduleManager {
    pool: Arc<ThreadPool>,
    on_tick: TickFn,
    timers: Mutex<HashMap<Uuid, Timer>>,
}

impl ScheduleManager {
    pub fn new<F: Fn(Uuid) + Send + Sync + 'static>(pool: Arc<ThreadPool>, on_tick: F) -> Self {
        Self {
            pool,
            on_tick: Arc::new(on_tick),
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Start ticking `id` every `period`. An existing timer for `id` is replaced.
    pub fn schedule(&self, id: Uuid, period: Duration) -> Result<()> {
        let (stop_tx, stop_rx) = channel::<()>();
        let pool = self.pool.clone();
        let on_tick = self.on_tick.clone();

        let handle = std::thread::Builder::new()
            .name(format!("timer-{id}"))
            .spawn(move || loop {
                match stop_rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {
                        tracing::trace!("Tick for {id}");
                        let on_tick = on_tick.clone();
                        pool.spawn(move || on_tick(id));
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(Error::from)
            .with_msg(format!("Spawn timer for {id} failed"))?;

        let previous = self.timers.lock().insert(
            id,
            Timer {
                period,
                stop_tx,
                handle,
            },
        );
        if let Some(previous) = previous {
            previous.stop(id);
        }
        tracing::info!("Scheduled {id} every {:?}", period);
        Ok(())
    }

    /// Stop-and-replace; `enabled == false` leaves `id` unscheduled.
    ///
    /// The old timer leaves the map in the same step the new one enters it.
    pub fn reschedule(&self, id: Uuid, period: Duration, enabled: bool) -> Result<()> {
        if enabled {
            self.schedule(id, period)
        } else {
            self.unschedule(id);
            Ok(())
        }
    }

    /// Stop the timer of `id`; no-op when there is none.
    pub fn unschedule(&self, id: Uuid) -> bool {
        let timer = self.timers.lock().remove(&id);
        match timer {
            Some(timer) => {
                let period = timer.period;
                timer.stop(id);
                tracing::info!("Unscheduled {id}, was every {:?}", period);
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, id: Uuid) -> bool {
        self.timers.lock().contains_key(&id)
    }
}

#[cfg(test)]
impl ScheduleManager {
    fn period(&self, id: Uuid) -> Option<Duration> {
        self.timers.lock().get(&id).map(|t| t.period)
    }

    fn scheduled_ids(&self) -> Vec<Uuid> {
        self.timers.lock().keys().copied().collect()
    }
}

impl Drop for ScheduleManager {
    fn drop(&mut self) {
        let timers: Vec<_> = self.timers.lock().drain().collect();
        for (id, timer) in timers {
            timer.stop(id);
        }
    }
}
