//! Run state reporting and health aggregation for the stack's workers.

use std::collections::HashMap;
use std::sync::{
    Condvar,
    Mutex,
    MutexGuard,
};
use std::time::{
    Duration,
    Instant,
};

use crossbeam::channel::{
    Receiver,
    Sender,
};

use crate::core::worker::Signal;
use crate::{
    Error,
    Result,
};

/// Run state of a worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Unknown,
    Running,
    Stopped,
    Error,
}

/// A run state report from a worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Health {
    pub worker: String,
    pub state: RunState,
}

/// Aggregated status of all registered workers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// Every worker is running.
    Green,
    /// Some worker is starting up or has stopped.
    Yellow,
    /// Some worker failed.
    Red,
}

/// Sends run state reports of one worker to the monitor.
#[derive(Clone, Debug)]
pub struct Reporter {
    worker: String,
    health_tx: Sender<Health>,
}

impl Reporter {
    const SEND_TIMEOUT: Duration = Duration::from_millis(100);

    pub fn new(worker: &str, health_tx: Sender<Health>) -> Reporter {
        Reporter {
            worker: worker.to_string(),
            health_tx,
        }
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    pub fn report(&self, state: RunState) {
        let health = Health {
            worker: self.worker.clone(),
            state,
        };

        if self
            .health_tx
            .send_timeout(health, Self::SEND_TIMEOUT)
            .is_err()
        {
            warn!("Lost {:?} report of worker {}.", state, self.worker);
        }
    }
}

/// Tracks the latest run state of each worker.
#[derive(Default)]
pub struct Monitor {
    states: Mutex<HashMap<String, RunState>>,
    changed: Condvar,
}

impl Monitor {
    pub fn new() -> Monitor {
        Monitor::default()
    }

    fn states(&self) -> MutexGuard<'_, HashMap<String, RunState>> {
        match self.states.lock() {
            Ok(states) => states,
            Err(err) => err.into_inner(),
        }
    }

    /// Registers a worker whose state counts toward the status.
    pub fn register(&self, worker: &str) {
        self.states()
            .entry(worker.to_string())
            .or_insert(RunState::Unknown);
    }

    /// Records a report. Reports from unregistered workers register them.
    pub fn update(&self, health: Health) {
        let mut states = self.states();

        match health.state {
            RunState::Error => error!("Worker {} failed.", health.worker),
            state => debug!("Worker {} is {:?}.", health.worker, state),
        }

        states.insert(health.worker, health.state);
        self.changed.notify_all();
    }

    pub fn state(&self, worker: &str) -> RunState {
        self.states()
            .get(worker)
            .cloned()
            .unwrap_or(RunState::Unknown)
    }

    pub fn status(&self) -> Status {
        Self::aggregate(&self.states())
    }

    fn aggregate(states: &HashMap<String, RunState>) -> Status {
        if states.values().any(|state| *state == RunState::Error) {
            Status::Red
        } else if !states.is_empty() && states.values().all(|state| *state == RunState::Running) {
            Status::Green
        } else {
            Status::Yellow
        }
    }

    /// Blocks until the status is green. Fails early if the status turns red
    /// and with `Error::Timeout` once timeout passes.
    pub fn wait_green(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut states = self.states();

        loop {
            match Self::aggregate(&states) {
                Status::Green => return Ok(()),
                Status::Red => return Err(Error::WorkerFailed),
                Status::Yellow => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout);
            }

            states = match self.changed.wait_timeout(states, deadline - now) {
                Ok((states, _)) => states,
                Err(err) => err.into_inner().0,
            };
        }
    }
}

/// Feeds reports from the health queue into the monitor until stopped.
///
/// Reports still queued when the stop arrives are recorded before returning.
pub fn run(monitor: &Monitor, health_rx: Receiver<Health>, signal: &Signal) -> Result<()> {
    loop {
        select! {
            recv(signal.receiver()) -> _ => {
                health_rx.try_iter().for_each(|health| monitor.update(health));
                return Ok(());
            },
            recv(health_rx) -> health => match health {
                Ok(health) => monitor.update(health),
                Err(_) => return Err(Error::ChannelClosed),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::thread;

    fn health(worker: &str, state: RunState) -> Health {
        Health {
            worker: worker.to_string(),
            state,
        }
    }

    #[test]
    fn test_status() {
        let monitor = Monitor::new();
        assert_eq!(monitor.status(), Status::Yellow);

        monitor.register("arp");
        monitor.register("ip");
        assert_eq!(monitor.status(), Status::Yellow);
        assert_eq!(monitor.state("arp"), RunState::Unknown);

        monitor.update(health("arp", RunState::Running));
        assert_eq!(monitor.status(), Status::Yellow);

        monitor.update(health("ip", RunState::Running));
        assert_eq!(monitor.status(), Status::Green);

        monitor.update(health("ip", RunState::Stopped));
        assert_eq!(monitor.status(), Status::Yellow);

        monitor.update(health("arp", RunState::Error));
        assert_eq!(monitor.status(), Status::Red);
    }

    #[test]
    fn test_wait_green_times_out() {
        let monitor = Monitor::new();
        monitor.register("arp");
        assert_matches!(
            monitor.wait_green(Duration::from_millis(10)),
            Err(Error::Timeout)
        );
    }

    #[test]
    fn test_wait_green_fails_on_red() {
        let monitor = Monitor::new();
        monitor.register("arp");
        monitor.update(health("arp", RunState::Error));
        assert_matches!(
            monitor.wait_green(Duration::from_secs(10)),
            Err(Error::WorkerFailed)
        );
    }

    #[test]
    fn test_wait_green_wakes_on_update() {
        let monitor = Arc::new(Monitor::new());
        monitor.register("arp");

        let handle = {
            let monitor = monitor.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                monitor.update(health("arp", RunState::Running));
            })
        };

        assert_matches!(monitor.wait_green(Duration::from_secs(10)), Ok(()));
        handle.join().unwrap();
    }
}
