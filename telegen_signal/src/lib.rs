//! Shutdown signal for telegen.
//!
//! telegen runs a single generation loop that stops on one event: an interrupt
//! from the operator or the end of a timed run. This crate carries that event
//! from the task watching for it to the loop.
//!
//! The mechanism has two halves, a `Broadcaster` and a `Watcher`. There is
//! exactly one `Broadcaster` and any number of `Watcher` instances, created by
//! cloning. The signal is a one-time event; once sent it stays sent, and a
//! `Watcher` created or polled afterwards observes it immediately.
//!
//! A `Broadcaster` that is dropped without signaling is treated as having
//! signaled. Nothing can wait on a signal that will never come.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(missing_docs)]
#![deny(missing_debug_implementations)]

use tokio::sync::watch;
use tracing::info;

/// Construct a `Watcher` and `Broadcaster` pair.
#[must_use]
pub fn signal() -> (Watcher, Broadcaster) {
    let (sender, receiver) = watch::channel(false);
    (Watcher { receiver }, Broadcaster { sender })
}

#[derive(Debug)]
/// Sends the shutdown signal to every `Watcher` derived from the same pair.
pub struct Broadcaster {
    sender: watch::Sender<bool>,
}

impl Broadcaster {
    /// Send the signal to all `Watcher` instances.
    ///
    /// Function will NOT block until the watchers have observed the signal.
    pub fn signal(self) {
        // `send_replace` succeeds with zero receivers, unlike `send`.
        self.sender.send_replace(true);
    }

    /// Send the signal to all `Watcher` instances.
    ///
    /// Function WILL block until every `Watcher` has been dropped, that is
    /// until every party holding one has finished its shutdown work.
    pub async fn signal_and_wait(self) {
        self.sender.send_replace(true);

        let peers = self.sender.receiver_count();
        if peers > 0 {
            info!("Waiting for {peers} peers");
        }
        self.sender.closed().await;
    }

    /// The number of live `Watcher` instances.
    #[must_use]
    pub fn peers(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[derive(Debug, Clone)]
/// Observes the shutdown signal.
///
/// Dropping a `Watcher` tells the `Broadcaster` this party is done, see
/// [`Broadcaster::signal_and_wait`].
pub struct Watcher {
    receiver: watch::Receiver<bool>,
}

impl Watcher {
    /// Wait for the shutdown signal, consuming this `Watcher`.
    ///
    /// Returns immediately if the signal has already been sent.
    pub async fn recv(mut self) {
        // An error here means the `Broadcaster` is gone, which is as final as
        // the signal itself.
        let _ = self.receiver.wait_for(|fired| *fired).await;
    }

    /// Check whether the shutdown signal has been sent, without blocking.
    pub fn try_recv(&mut self) -> bool {
        if *self.receiver.borrow_and_update() {
            return true;
        }
        self.receiver.has_changed().is_err()
    }
}
