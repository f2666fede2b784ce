//! Debounces change events into resync signals
//!
//! [`Coalescer`] is a plain state machine driven by explicit instants so it
//! can be exercised without a runtime. [`Coalescer::run`] drives it from a
//! channel of change events inside the session.

use inbox_store::ChangeEvent;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug)]
pub struct Coalescer {
    debounce: Duration,
    min_interval: Duration,
    deadline: Option<Instant>,
    last_fired: Option<Instant>,
    absorbed: u64,
    fired: u64,
    deferred: u64,
}

impl Coalescer {
    pub fn new(debounce: Duration, min_interval: Duration) -> Self {
        Self {
            debounce,
            min_interval,
            deadline: None,
            last_fired: None,
            absorbed: 0,
            fired: 0,
            deferred: 0,
        }
    }

    /// Record an event; restarts the debounce window
    pub fn on_event(&mut self, now: Instant) {
        self.absorbed += 1;
        self.deadline = Some(now + self.debounce);
    }

    /// When the next tick is due, if anything is pending
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns true when a resync should run now.
    ///
    /// A request that lands inside the minimum interval is dropped. Only a
    /// single trailing deadline stays armed at the interval boundary, so a
    /// burst that arrives mid-pass leads to exactly one more pass.
    pub fn on_tick(&mut self, now: Instant) -> bool {
        let Some(deadline) = self.deadline else {
            return false;
        };
        if now < deadline {
            return false;
        }

        if let Some(last) = self.last_fired {
            let earliest = last + self.min_interval;
            if now < earliest {
                self.deferred += 1;
                self.deadline = Some(earliest);
                return false;
            }
        }

        self.deadline = None;
        self.last_fired = Some(now);
        self.fired += 1;
        true
    }

    pub fn fired(&self) -> u64 {
        self.fired
    }

    pub fn absorbed(&self) -> u64 {
        self.absorbed
    }

    /// Requests dropped by the minimum-interval guard
    pub fn deferred(&self) -> u64 {
        self.deferred
    }

    /// Drive the coalescer until cancelled or the event channel closes.
    ///
    /// `on_event` sees every event as it arrives. Each fired tick sends one
    /// signal on `resync`; if a signal is already waiting there the tick
    /// folds into it.
    pub async fn run<F>(
        mut self,
        mut events: mpsc::UnboundedReceiver<ChangeEvent>,
        resync: mpsc::Sender<()>,
        on_event: F,
        cancel: CancellationToken,
    ) where
        F: Fn(&ChangeEvent) + Send,
    {
        loop {
            let deadline = self.deadline;
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        on_event(&event);
                        self.on_event(Instant::now());
                    }
                    None => break,
                },
                _ = wait_until(deadline) => {
                    if !self.on_tick(Instant::now()) {
                        continue;
                    }
                    match resync.try_send(()) {
                        Ok(()) => debug!("Resync requested after {} events", self.absorbed),
                        Err(mpsc::error::TrySendError::Full(())) => {
                            debug!("Resync already pending, coalesced");
                        }
                        Err(mpsc::error::TrySendError::Closed(())) => break,
                    }
                }
            }
        }

        info!(
            "Coalescer stopped: {} events, {} resyncs, {} deferred",
            self.absorbed, self.fired, self.deferred
        );
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
