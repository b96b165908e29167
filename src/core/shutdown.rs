//! Cancellation shared by the supervisor and its agents.
//!
//! Nothing is ever sent through the channel: dropping the only sender disconnects
//! every receiver clone at once, which wakes up all the waiting agents.

use crossbeam_channel::{RecvTimeoutError, TryRecvError};

use crate::prelude::*;

/// Creates a connected trigger and signal pair.
pub fn channel() -> (Trigger, Signal) {
    let (tx, rx) = crossbeam_channel::bounded::<()>(0);
    (
        Trigger {
            tx: Arc::new(Mutex::new(Some(tx))),
        },
        Signal { rx },
    )
}

/// Fires the shutdown. Cloneable so that it can be moved into a signal handler.
#[derive(Clone)]
pub struct Trigger {
    tx: Arc<Mutex<Option<Sender<()>>>>,
}

impl Trigger {
    /// Triggers the shutdown. Repeated calls do nothing.
    pub fn trigger(&self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
    }
}

/// Observes the shutdown.
#[derive(Clone, Debug)]
pub struct Signal {
    rx: Receiver<()>,
}

impl Signal {
    pub fn is_triggered(&self) -> bool {
        !matches!(self.rx.try_recv(), Err(TryRecvError::Empty))
    }

    /// Sleeps for the timeout unless the shutdown comes earlier.
    ///
    /// Returns `true` if the shutdown has been triggered.
    pub fn wait(&self, timeout: Duration) -> bool {
        !matches!(self.rx.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
    }
}
