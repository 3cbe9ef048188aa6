//! Worker threads with cooperative shutdown.
//!
//! Every worker of a `Supervisor` shares one stop queue. Stopping pushes a
//! message and then closes the queue, so each worker observes the stop at its
//! next check point, whether or not another worker consumed the message.

use std::thread::{
    self,
    JoinHandle,
};

use crossbeam::channel::{
    self,
    Receiver,
    Sender,
    TryRecvError,
};
use crossbeam::sync::WaitGroup;

use crate::core::monitor::{
    Reporter,
    RunState,
};
use crate::Result;

/// Receiving end of a stop queue.
#[derive(Clone, Debug)]
pub struct Signal {
    rx: Receiver<()>,
}

impl Signal {
    /// Checks, without blocking, if the worker should stop.
    pub fn is_stopped(&self) -> bool {
        match self.rx.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => true,
            Err(TryRecvError::Empty) => false,
        }
    }

    /// The stop queue, for use in `select!` next to work queues.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

struct Worker {
    name: String,
    thread: Option<JoinHandle<()>>,
}

/// Spawns named worker threads and stops them together.
pub struct Supervisor {
    workers: Vec<Worker>,
    stop_tx: Option<Sender<()>>,
    stop_rx: Receiver<()>,
    wait_group: Option<WaitGroup>,
}

impl Supervisor {
    pub fn new() -> Supervisor {
        let (stop_tx, stop_rx) = channel::bounded(1);

        Supervisor {
            workers: Vec::new(),
            stop_tx: Some(stop_tx),
            stop_rx,
            wait_group: Some(WaitGroup::new()),
        }
    }

    /// Creates a stop signal tied to this supervisor without a thread, for
    /// loops driven by the caller.
    pub fn signal(&self) -> Signal {
        Signal {
            rx: self.stop_rx.clone(),
        }
    }

    /// Spawns a worker running f(signal).
    ///
    /// The worker reports `Running` before f starts, then `Stopped` or
    /// `Error` depending on how f returns.
    pub fn spawn<F>(&mut self, reporter: Reporter, f: F) -> Result<()>
    where
        F: FnOnce(Signal) -> Result<()> + Send + 'static,
    {
        let signal = self.signal();
        let wait_group = match self.wait_group {
            Some(ref wait_group) => wait_group.clone(),
            None => WaitGroup::new(),
        };
        let name = reporter.worker().to_string();

        let thread = thread::Builder::new().name(name.clone()).spawn(move || {
            reporter.report(RunState::Running);

            match f(signal) {
                Ok(()) => {
                    debug!("Worker {} stopped.", reporter.worker());
                    reporter.report(RunState::Stopped);
                }
                Err(err) => {
                    error!("Worker {} exited with {}.", reporter.worker(), err);
                    reporter.report(RunState::Error);
                }
            }

            drop(wait_group);
        })?;

        self.workers.push(Worker {
            name,
            thread: Some(thread),
        });

        Ok(())
    }

    /// Names of the spawned workers.
    pub fn workers(&self) -> Vec<String> {
        self.workers.iter().map(|worker| worker.name.clone()).collect()
    }

    /// Signals every worker to stop and waits for all of them to return.
    ///
    /// A worker which never checks its signal blocks this call.
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.try_send(());
        }

        if let Some(wait_group) = self.wait_group.take() {
            wait_group.wait();
        }

        for worker in self.workers.iter_mut() {
            if let Some(thread) = worker.thread.take() {
                if thread.join().is_err() {
                    error!("Worker {} panicked.", worker.name);
                }
            }
        }
    }
}

impl Default for Supervisor {
    fn default() -> Supervisor {
        Supervisor::new()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{
        AtomicUsize,
        Ordering,
    };
    use std::sync::Arc;
    use std::time::Duration;

    use crate::core::monitor::Health;
    use crate::Error;

    #[test]
    fn test_workers_report_and_stop() {
        let (health_tx, health_rx) = channel::bounded(16);
        let mut supervisor = Supervisor::new();
        let loops = Arc::new(AtomicUsize::new(0));

        for name in ["a", "b"].iter() {
            let loops = loops.clone();
            supervisor
                .spawn(Reporter::new(name, health_tx.clone()), move |signal| {
                    while !signal.is_stopped() {
                        loops.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(1));
                    }
                    Ok(())
                })
                .unwrap();
        }

        assert_eq!(supervisor.workers(), vec!["a".to_string(), "b".to_string()]);
        supervisor.stop();

        let reports: Vec<Health> = health_rx.try_iter().collect();
        assert_eq!(reports.len(), 4);
        assert_eq!(
            reports
                .iter()
                .filter(|health| health.state == RunState::Stopped)
                .count(),
            2
        );
    }

    #[test]
    fn test_worker_error_is_reported() {
        let (health_tx, health_rx) = channel::bounded(16);
        let mut supervisor = Supervisor::new();

        supervisor
            .spawn(Reporter::new("failing", health_tx), |_| Err(Error::ChannelClosed))
            .unwrap();
        supervisor.stop();

        let states: Vec<RunState> = health_rx.try_iter().map(|health| health.state).collect();
        assert_eq!(states, vec![RunState::Running, RunState::Error]);
    }

    #[test]
    fn test_select_on_signal() {
        let (health_tx, _health_rx) = channel::bounded(16);
        let (work_tx, work_rx) = channel::bounded::<u32>(1);
        let mut supervisor = Supervisor::new();

        supervisor
            .spawn(Reporter::new("select", health_tx), move |signal| loop {
                select! {
                    recv(signal.receiver()) -> _ => return Ok(()),
                    recv(work_rx) -> work => {
                        work.map_err(|_| Error::ChannelClosed)?;
                    }
                }
            })
            .unwrap();

        work_tx.send(1).unwrap();
        supervisor.stop();
        assert!(supervisor.signal().is_stopped());
    }
}
