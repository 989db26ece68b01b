use crate::time::Clock;
use tokio::sync::watch;
use tokio::time::Instant;

/// Create a cancellation pair. The handle side cancels; every clone of the signal side observes it.
/// Dropping the handle without calling `cancel()` never cancels.
pub fn new() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);

    (CancelHandle { sender: tx }, CancelSignal { receiver: Some(rx) })
}

pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // Err only means all signals are gone, and then nobody is left to cancel.
        let _ = self.sender.send(true);
    }
}

#[derive(Clone, Debug)]
pub struct CancelSignal {
    receiver: Option<watch::Receiver<bool>>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct Cancelled;

impl CancelSignal {
    /// A signal that is never cancelled.
    pub fn never() -> Self {
        CancelSignal { receiver: None }
    }

    pub fn is_cancelled(&self) -> bool {
        match &self.receiver {
            Some(rx) => *rx.borrow(),
            None => false,
        }
    }

    async fn cancelled(&mut self) {
        let rx = match self.receiver.as_mut() {
            Some(rx) => rx,
            None => return std::future::pending().await,
        };

        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Handle dropped without cancelling.
                return std::future::pending().await;
            }
        }
    }

    /// Sleep on `clock` until `deadline`, returning early with `Err(Cancelled)` if cancelled.
    pub(crate) async fn sleep_until<C: Clock>(&mut self, clock: &mut C, deadline: Instant) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            return Err(Cancelled);
        }

        tokio::select! {
            biased;
            _ = self.cancelled() => Err(Cancelled),
            _ = clock.sleep_until(deadline) => Ok(()),
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        CancelSignal::never()
    }
}
