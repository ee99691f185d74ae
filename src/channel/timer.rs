//! Cancellable timer tasks.
//!
//! Each timer is a spawned tokio task that sleeps and then posts an event
//! into the client's event channel. The timer never touches client state
//! itself, so firing is just another event for the loop to dispatch.
//!
//! A [`TimerHandle`] aborts its task when cancelled *or dropped*; replacing
//! the `Option<TimerHandle>` that holds it is enough to stop a timer.

use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Handle to a spawned one-shot or repeating timer.
#[derive(Debug)]
pub struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Post `event` once, after `delay`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn after<T>(delay: Duration, tx: UnboundedSender<T>, event: T) -> Self
    where
        T: Send + 'static,
    {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event);
        });
        Self { task }
    }

    /// Post a clone of `event` every `period`, first one `period` from now.
    ///
    /// Stops by itself if the receiver is gone. Must be called from within
    /// a tokio runtime.
    pub fn every<T>(period: Duration, tx: UnboundedSender<T>, event: T) -> Self
    where
        T: Clone + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tx.send(event.clone()).is_err() {
                    break;
                }
            }
        });
        Self { task }
    }

    /// Stop the timer. Pending or future firings are discarded.
    pub fn cancel(self) {
        // Drop aborts the task.
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn test_after_fires_once_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _timer = TimerHandle::after(Duration::from_secs(1), tx, "due");

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(rx.try_recv().unwrap(), "due");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_waits_one_period_before_first_tick() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _timer = TimerHandle::every(Duration::from_secs(30), tx, "tick");

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.try_recv().unwrap(), "tick");
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(rx.try_recv().unwrap(), "tick");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_discards_pending_firing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timer = TimerHandle::after(Duration::from_secs(1), tx, "due");
        timer.cancel();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_repeating_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timer = TimerHandle::every(Duration::from_secs(1), tx, 7u8);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(rx.try_recv().unwrap(), 7);

        drop(timer);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }
}
