//! Session-wide close signal for readers and blocked emitters.

use crossbeam::channel::{bounded, Receiver, Sender, TryRecvError};

/// Creates a connected close handle and signal.
pub fn shutdown() -> (Shutdown, ShutdownSignal) {
    let (tx, rx) = bounded(0);
    (Shutdown { _tx: tx }, ShutdownSignal { rx })
}

/// Owning side of the signal. Closing (or dropping) it closes every clone of
/// the paired `ShutdownSignal` at once.
#[derive(Debug)]
pub struct Shutdown {
    _tx: Sender<()>,
}

impl Shutdown {
    pub fn close(self) {}
}

/// Observing side of the signal. Nothing is ever sent on the channel; it only
/// ever becomes disconnected.
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    rx: Receiver<()>,
}

impl ShutdownSignal {
    pub fn is_closed(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Receiver that becomes ready once the signal closes, for use in
    /// `crossbeam::channel::select!`.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}
