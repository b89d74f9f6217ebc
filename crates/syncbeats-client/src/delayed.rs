use std::time::Duration;

use tokio::time::Instant;

/// A single cancellable deadline carrying a value.
///
/// Arming replaces whatever was armed before. [`DelayedTask::expired`] stays
/// pending while nothing is armed, so it can sit in a `select!` loop
/// unconditionally.
#[derive(Debug)]
pub struct DelayedTask<T> {
    armed: Option<(Instant, T)>,
}

impl<T> Default for DelayedTask<T> {
    fn default() -> Self {
        Self { armed: None }
    }
}

impl<T> DelayedTask<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm to fire after `delay`, returning the value it displaced.
    pub fn arm(&mut self, delay: Duration, value: T) -> Option<T> {
        self.arm_at(Instant::now() + delay, value)
    }

    pub fn arm_at(&mut self, deadline: Instant, value: T) -> Option<T> {
        self.armed
            .replace((deadline, value))
            .map(|(_, previous)| previous)
    }

    pub fn cancel(&mut self) -> Option<T> {
        self.armed.take().map(|(_, value)| value)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.armed.as_ref().map(|(deadline, _)| *deadline)
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Wait for the deadline and disarm, yielding the value.
    ///
    /// Cancel-safe: dropping the future before it completes leaves the task
    /// armed.
    pub async fn expired(&mut self) -> T {
        loop {
            match self.armed.as_ref() {
                Some((deadline, _)) => tokio::time::sleep_until(*deadline).await,
                None => std::future::pending::<()>().await,
            }
            if let Some((_, value)) = self.armed.take() {
                return value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let mut task = DelayedTask::new();
        let start = Instant::now();
        task.arm(Duration::from_millis(500), "go");
        assert_eq!(task.expired().await, "go");
        assert_eq!(start.elapsed(), Duration::from_millis(500));
        assert!(!task.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_replaces_previous() {
        let mut task = DelayedTask::new();
        assert_eq!(task.arm(Duration::from_millis(100), 1), None);
        assert_eq!(task.arm(Duration::from_millis(300), 2), Some(1));
        let start = Instant::now();
        assert_eq!(task.expired().await, 2);
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_task_never_fires() {
        let mut task = DelayedTask::new();
        task.arm(Duration::from_millis(100), ());
        assert_eq!(task.cancel(), Some(()));
        assert!(task.deadline().is_none());
        let fired = tokio::time::timeout(Duration::from_secs(60), task.expired()).await;
        assert!(fired.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_wait_keeps_task_armed() {
        let mut task = DelayedTask::new();
        task.arm(Duration::from_secs(10), 7);
        let early = tokio::time::timeout(Duration::from_secs(1), task.expired()).await;
        assert!(early.is_err());
        assert!(task.is_armed());
        assert_eq!(task.expired().await, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delay_fires_immediately() {
        let mut task = DelayedTask::new();
        let start = Instant::now();
        task.arm(Duration::ZERO, "now");
        assert_eq!(task.expired().await, "now");
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
