//! coordination primitives: cancellation flags, one-shot completion gates and
//! per-channel pending-operation tokens

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};

use crate::error::{PatienceError, Result};

/// cooperative cancellation, checked at iteration and pre-action boundaries
#[derive(Clone, Debug, Default)]
pub struct CancelFlag {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// sleep for `duration`; returns false if cancelled before or during the wait
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_cancelled(),
            _ = self.cancelled() => false,
        }
    }
}

/// release side of a one-shot completion gate
#[derive(Debug)]
pub struct CompletionSignal<T> {
    tx: oneshot::Sender<T>,
}

impl<T> CompletionSignal<T> {
    pub fn release(self, value: T) {
        let _ = self.tx.send(value);
    }
}

/// waiting side of a one-shot completion gate
#[derive(Debug)]
pub struct CompletionGate<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> CompletionGate<T> {
    /// waits for the release; a signal dropped without releasing counts as cancellation
    pub async fn wait(self) -> Result<T> {
        self.rx.await.map_err(|_| PatienceError::Cancelled)
    }
}

/// create a gate at request time, release it from the completion path
pub fn completion_gate<T>() -> (CompletionSignal<T>, CompletionGate<T>) {
    let (tx, rx) = oneshot::channel();
    (CompletionSignal { tx }, CompletionGate { rx })
}

/// mutation channels that must never have two requests in flight
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    Shuffle,
    Flip,
    Place,
}

impl Channel {
    pub fn name(self) -> &'static str {
        match self {
            Channel::Shuffle => "shuffle",
            Channel::Flip => "flip",
            Channel::Place => "place",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// one in-flight guard per channel
#[derive(Clone, Debug, Default)]
pub struct PendingOps {
    slots: Arc<[AtomicBool; 3]>,
}

impl PendingOps {
    pub fn new() -> Self {
        Self::default()
    }

    /// claim the channel; fails while another request of the same kind is outstanding
    pub fn begin(&self, channel: Channel) -> Result<PendingToken> {
        if self.slots[channel.slot()].swap(true, Ordering::SeqCst) {
            return Err(PatienceError::Busy(channel.name().into()));
        }
        Ok(PendingToken {
            slots: Arc::clone(&self.slots),
            channel,
        })
    }

    pub fn is_pending(&self, channel: Channel) -> bool {
        self.slots[channel.slot()].load(Ordering::SeqCst)
    }
}

/// clears its channel when dropped, on success and error paths alike
#[derive(Debug)]
pub struct PendingToken {
    slots: Arc<[AtomicBool; 3]>,
    channel: Channel,
}

impl PendingToken {
    pub fn channel(&self) -> Channel {
        self.channel
    }
}

impl Drop for PendingToken {
    fn drop(&mut self) {
        self.slots[self.channel.slot()].store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_token_serializes_channel() {
        let pending = PendingOps::new();
        let token = pending.begin(Channel::Flip).unwrap();
        assert!(pending.is_pending(Channel::Flip));
        assert!(matches!(pending.begin(Channel::Flip), Err(PatienceError::Busy(_))));

        // other channels are independent
        let place = pending.begin(Channel::Place).unwrap();
        assert_eq!(place.channel(), Channel::Place);

        drop(token);
        assert!(!pending.is_pending(Channel::Flip));
        assert!(pending.begin(Channel::Flip).is_ok());
    }

    #[test]
    fn test_pending_token_cleared_on_error_path() {
        fn failing(pending: &PendingOps) -> Result<()> {
            let _token = pending.begin(Channel::Shuffle)?;
            Err(PatienceError::Transport("boom".into()))
        }

        let pending = PendingOps::new();
        assert!(failing(&pending).is_err());
        assert!(!pending.is_pending(Channel::Shuffle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let flag = CancelFlag::new();
        let waiter = flag.clone();
        let handle = tokio::spawn(async move { waiter.sleep(Duration::from_secs(60)).await });

        tokio::task::yield_now().await;
        flag.cancel();
        assert!(!handle.await.unwrap());
        assert!(!flag.sleep(Duration::from_millis(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_when_not_cancelled() {
        let flag = CancelFlag::new();
        assert!(flag.sleep(Duration::from_millis(500)).await);
    }

    #[tokio::test]
    async fn test_completion_gate() {
        let (signal, gate) = completion_gate();
        signal.release(7u32);
        assert_eq!(gate.wait().await.unwrap(), 7);

        let (signal, gate) = completion_gate::<()>();
        drop(signal);
        assert_eq!(gate.wait().await, Err(PatienceError::Cancelled));
    }
}
