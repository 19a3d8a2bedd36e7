//! Backpressure governor: fixed delay between full batches.

use std::time::Duration;

use crate::obs;

/// Suspends the pipeline for a fixed delay and counts how often it did.
#[derive(Debug)]
pub struct Governor {
    delay: Duration,
    pauses: u64,
    paused_for: Duration,
}

impl Governor {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pauses: 0,
            paused_for: Duration::ZERO,
        }
    }

    /// Pause after `batch` was dispatched.
    pub async fn pause(&mut self, batch: u64) {
        if self.delay.is_zero() {
            return;
        }
        obs::emit_paused(batch, self.delay.as_millis() as u64);
        tokio::time::sleep(self.delay).await;
        self.pauses += 1;
        self.paused_for += self.delay;
    }

    pub fn pauses(&self) -> u64 {
        self.pauses
    }

    /// Total time spent paused.
    pub fn paused_for(&self) -> Duration {
        self.paused_for
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn pause_sleeps_for_the_delay() {
        let mut governor = Governor::new(Duration::from_millis(50));
        let start = tokio::time::Instant::now();
        governor.pause(1).await;
        governor.pause(2).await;

        assert_eq!(start.elapsed(), Duration::from_millis(100));
        assert_eq!(governor.pauses(), 2);
        assert_eq!(governor.paused_for(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delay_does_not_count() {
        let mut governor = Governor::new(Duration::ZERO);
        governor.pause(1).await;
        assert_eq!(governor.pauses(), 0);
    }
}
