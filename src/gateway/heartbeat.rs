use std::future;
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

/// What to do when the heartbeat timer fires.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beat {
    /// Send a heartbeat now
    Send,
    /// The previous heartbeat was never acknowledged; the connection is a zombie
    Missed,
}

/// Owns the heartbeat timer of one transport.
///
/// The timer lives in a single field, so starting a new one always drops the
/// previous one first. Ticks are consumed by the connection task through
/// [`HeartbeatScheduler::tick`], which keeps every state change on that task.
#[derive(Debug, Default)]
pub struct HeartbeatScheduler {
    timer: Option<Interval>,
    period: Option<Duration>,
    ack_pending: bool,
    last_sent: Option<Instant>,
    latency: Option<Duration>,
}

impl HeartbeatScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace any running timer with one ticking every `period`, first tick one period from now.
    pub fn start(&mut self, period: Duration) {
        self.stop();

        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.timer = Some(timer);
        self.period = Some(period);

        #[cfg(feature = "tracing")]
        tracing::debug!(?period, "Heartbeat started");
    }

    /// Cancel the timer. A no-op when nothing is running.
    pub fn stop(&mut self) {
        #[cfg(feature = "tracing")]
        if self.timer.is_some() {
            tracing::debug!("Heartbeat stopped");
        }

        self.timer = None;
        self.ack_pending = false;
        self.last_sent = None;
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.timer.is_some()
    }

    #[must_use]
    pub fn period(&self) -> Option<Duration> {
        self.period
    }

    #[must_use]
    pub fn ack_pending(&self) -> bool {
        self.ack_pending
    }

    /// Round trip of the last acknowledged heartbeat.
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }

    /// Wait for the next tick. Never resolves while stopped.
    pub async fn tick(&mut self) {
        match self.timer.as_mut() {
            Some(timer) => {
                timer.tick().await;
            }
            None => future::pending::<()>().await,
        }
    }

    /// Decide what a tick means. A tick that finds the previous beat unacknowledged stops the timer.
    pub fn on_tick(&mut self) -> Beat {
        if self.ack_pending {
            #[cfg(feature = "tracing")]
            tracing::warn!(period = ?self.period, "Heartbeat not acknowledged within one interval");
            self.stop();
            return Beat::Missed;
        }

        self.mark_sent();
        self.ack_pending = true;
        Beat::Send
    }

    /// Record a beat sent outside the timer, at the server's request.
    pub fn mark_sent(&mut self) {
        self.last_sent = Some(Instant::now());
    }

    /// Clear the pending flag. Ignored when no heartbeat has been sent yet.
    pub fn acknowledge(&mut self) -> Option<Duration> {
        let Some(sent) = self.last_sent else {
            #[cfg(feature = "tracing")]
            tracing::debug!("Ignoring heartbeat ack with no heartbeat in flight");
            return None;
        };

        self.ack_pending = false;
        let latency = sent.elapsed();
        self.latency = Some(latency);

        #[cfg(feature = "tracing")]
        tracing::trace!(?latency, "Heartbeat acknowledged");

        Some(latency)
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::timeout;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_one_full_period() {
        let mut scheduler = HeartbeatScheduler::new();
        let started = Instant::now();

        scheduler.start(Duration::from_millis(100));
        scheduler.tick().await;

        assert_eq!(started.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_previous_timer() {
        let mut scheduler = HeartbeatScheduler::new();
        let started = Instant::now();

        scheduler.start(Duration::from_millis(100));
        scheduler.start(Duration::from_millis(300));
        scheduler.tick().await;

        assert_eq!(started.elapsed(), Duration::from_millis(300));
        assert_eq!(scheduler.period(), Some(Duration::from_millis(300)));
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_scheduler_never_ticks() {
        let mut scheduler = HeartbeatScheduler::new();
        scheduler.start(Duration::from_millis(100));
        scheduler.stop();
        scheduler.stop();

        let result = timeout(Duration::from_secs(10), scheduler.tick()).await;

        assert!(result.is_err(), "stopped scheduler ticked");
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn unacknowledged_beat_is_missed_on_next_tick() {
        let mut scheduler = HeartbeatScheduler::new();
        scheduler.start(Duration::from_millis(100));

        scheduler.tick().await;
        assert_eq!(scheduler.on_tick(), Beat::Send);
        assert!(scheduler.ack_pending());

        scheduler.tick().await;
        assert_eq!(scheduler.on_tick(), Beat::Missed);
        assert!(!scheduler.is_running(), "missed beat must stop the timer");
    }

    #[tokio::test(start_paused = true)]
    async fn acknowledged_beats_keep_ticking() {
        let mut scheduler = HeartbeatScheduler::new();
        scheduler.start(Duration::from_millis(100));

        for _ in 0..5 {
            scheduler.tick().await;
            assert_eq!(scheduler.on_tick(), Beat::Send);
            tokio::time::advance(Duration::from_millis(20)).await;
            assert_eq!(scheduler.acknowledge(), Some(Duration::from_millis(20)));
        }

        assert!(scheduler.is_running());
        assert_eq!(scheduler.latency(), Some(Duration::from_millis(20)));
    }

    #[test]
    fn ack_without_heartbeat_is_ignored() {
        let mut scheduler = HeartbeatScheduler::new();

        assert_eq!(scheduler.acknowledge(), None);
        assert_eq!(scheduler.latency(), None);
    }
}
