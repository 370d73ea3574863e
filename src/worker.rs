//! Single-threaded command loop on a dedicated worker thread.
//!
//! Both the segment manager and the delivery queue serialize all mutation of
//! their state through one of these loops: callers enqueue commands and
//! return immediately, the loop thread owns the state. Delayed commands are
//! kept in a timer heap on the loop thread itself, so cancellation and
//! rescheduling never touch cross-thread state.

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

enum Envelope<C> {
    Now(C),
    Delayed(Duration, C),
    Shutdown,
}

/// Cloneable handle for enqueueing commands onto a worker loop.
pub struct Scheduler<C> {
    tx: Sender<Envelope<C>>,
}

impl<C> Clone for Scheduler<C> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<C> Scheduler<C> {
    /// Enqueue a command for immediate processing. Never blocks; commands
    /// sent after shutdown are silently dropped.
    pub fn send(&self, command: C) {
        if self.tx.send(Envelope::Now(command)).is_err() {
            log::debug!("worker loop is gone, command dropped");
        }
    }

    /// Enqueue a command to be processed after `delay`.
    pub fn send_delayed(&self, command: C, delay: Duration) {
        if self.tx.send(Envelope::Delayed(delay, command)).is_err() {
            log::debug!("worker loop is gone, delayed command dropped");
        }
    }
}

struct Timer<C> {
    due: Instant,
    seq: u64,
    command: C,
}

impl<C> PartialEq for Timer<C> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl<C> Eq for Timer<C> {}

impl<C> PartialOrd for Timer<C> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<C> Ord for Timer<C> {
    // BinaryHeap is a max-heap; invert so the earliest deadline pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A dedicated thread running a FIFO command loop with delayed scheduling.
///
/// A panicking handler invocation is caught and logged; the loop keeps
/// processing subsequent commands.
pub struct Worker<C: Send + 'static> {
    scheduler: Scheduler<C>,
    handle: Option<JoinHandle<()>>,
}

impl<C: Send + 'static> Worker<C> {
    /// Spawn the loop thread. The handler runs every command in arrival
    /// order (delayed commands in due order) and may schedule follow-ups
    /// through the provided [`Scheduler`].
    pub fn spawn<F>(name: &str, mut handler: F) -> Self
    where
        F: FnMut(C, &Scheduler<C>) + Send + 'static,
    {
        let (tx, rx) = unbounded::<Envelope<C>>();
        let scheduler = Scheduler { tx };
        let loop_scheduler = scheduler.clone();
        let thread_name = name.to_owned();
        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let mut timers: BinaryHeap<Timer<C>> = BinaryHeap::new();
                let mut next_seq: u64 = 0;
                let mut dispatch = |command: C| {
                    let result = catch_unwind(AssertUnwindSafe(|| {
                        handler(command, &loop_scheduler)
                    }));
                    if result.is_err() {
                        log::error!("{thread_name}: command handler panicked, command dropped");
                    }
                };
                loop {
                    let now = Instant::now();
                    while timers.peek().map_or(false, |timer| timer.due <= now) {
                        if let Some(timer) = timers.pop() {
                            dispatch(timer.command);
                        }
                    }
                    let received = match timers.peek() {
                        Some(timer) => {
                            let wait = timer.due.saturating_duration_since(Instant::now());
                            match rx.recv_timeout(wait) {
                                Ok(envelope) => envelope,
                                Err(RecvTimeoutError::Timeout) => continue,
                                Err(RecvTimeoutError::Disconnected) => break,
                            }
                        }
                        None => match rx.recv() {
                            Ok(envelope) => envelope,
                            Err(_) => break,
                        },
                    };
                    match received {
                        Envelope::Now(command) => dispatch(command),
                        Envelope::Delayed(delay, command) => {
                            timers.push(Timer {
                                due: Instant::now() + delay,
                                seq: next_seq,
                                command,
                            });
                            next_seq += 1;
                        }
                        Envelope::Shutdown => break,
                    }
                }
            })
            .unwrap_or_else(|e| panic!("failed to spawn worker thread: {e}"));
        Self {
            scheduler,
            handle: Some(handle),
        }
    }

    pub fn scheduler(&self) -> Scheduler<C> {
        self.scheduler.clone()
    }

    /// Stop the loop after the commands already queued ahead of the shutdown
    /// marker, discarding pending timers, and join the thread.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.scheduler.tx.send(Envelope::Shutdown);
            if handle.join().is_err() {
                log::error!("worker thread terminated abnormally");
            }
        }
    }
}

impl<C: Send + 'static> Drop for Worker<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_commands_run_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut worker = Worker::spawn("test-order", move |n: u32, _| {
            sink.lock().unwrap().push(n);
        });
        let scheduler = worker.scheduler();
        for n in 0..100 {
            scheduler.send(n);
        }
        worker.shutdown();
        assert_eq!(*seen.lock().unwrap(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_delayed_commands_fire_in_due_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut worker = Worker::spawn("test-delay", move |n: u32, _| {
            sink.lock().unwrap().push(n);
        });
        let scheduler = worker.scheduler();
        scheduler.send_delayed(2, Duration::from_millis(60));
        scheduler.send_delayed(1, Duration::from_millis(20));
        thread::sleep(Duration::from_millis(150));
        worker.shutdown();
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_handler_can_reschedule_itself() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let mut worker = Worker::spawn("test-resched", move |n: u32, scheduler| {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
            if n < 3 {
                scheduler.send_delayed(n + 1, Duration::from_millis(10));
            }
        });
        worker.scheduler().send(1);
        thread::sleep(Duration::from_millis(200));
        worker.shutdown();
        assert_eq!(count.load(AtomicOrdering::SeqCst), 3);
    }

    #[test]
    fn test_panic_does_not_kill_the_loop() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let mut worker = Worker::spawn("test-panic", move |n: u32, _| {
            if n == 0 {
                panic!("boom");
            }
            counter.fetch_add(1, AtomicOrdering::SeqCst);
        });
        let scheduler = worker.scheduler();
        scheduler.send(0);
        scheduler.send(1);
        worker.shutdown();
        assert_eq!(count.load(AtomicOrdering::SeqCst), 1);
    }
}
