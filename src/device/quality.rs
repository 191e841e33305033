use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use super::cache::{publish, Slot};
use super::types::QualityBatch;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_info;

const QUALITY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Write half for signal-quality reports.
#[derive(Clone)]
pub struct QualityFeed {
    tx: Arc<watch::Sender<Slot<QualityBatch>>>,
}

impl QualityFeed {
    pub fn push(&self, batch: QualityBatch) {
        publish(&self.tx, batch);
    }
}

/// Number of electrodes in `batch` whose contact is not good or great.
pub fn count_fails(batch: &QualityBatch) -> usize {
    batch.iter().filter(|c| !c.status.is_acceptable()).count()
}

/// Blocks startup until the headband reports acceptable contact.
pub struct QualityGate {
    rx: watch::Receiver<Slot<QualityBatch>>,
    required_passes: u32,
    poll_interval: Duration,
}

impl QualityGate {
    pub fn new(required_passes: u32) -> (QualityFeed, Self) {
        let (tx, rx) = watch::channel(None);
        let gate = Self {
            rx,
            required_passes: required_passes.max(1),
            poll_interval: QUALITY_POLL_INTERVAL,
        };
        (QualityFeed { tx: Arc::new(tx) }, gate)
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Polls the latest report until `required_passes` consecutive fresh
    /// batches each have at most `max_fails` failing electrodes.
    ///
    /// There is no timeout here: if the headband never reports acceptable
    /// contact this never returns. Wrap it in `tokio::time::timeout` when
    /// startup latency must be bounded.
    pub async fn ensure_quality(&self, max_fails: usize) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_version = 0;
        let mut passes = 0;

        loop {
            ticker.tick().await;

            let (version, fails) = match self.rx.borrow().as_ref() {
                Some(stamped) => (stamped.version, count_fails(&stamped.value)),
                None => continue,
            };
            if version == last_version {
                continue;
            }
            last_version = version;

            if fails > max_fails {
                log_info!("Signal quality still not good enough ({fails} fails)");
                passes = 0;
                continue;
            }

            passes += 1;
            if passes >= self.required_passes {
                log_info!("Signal quality ensured ({fails} fails, {passes} passing reports)");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::types::{ChannelQuality, ContactQuality};

    fn batch(bad: usize) -> QualityBatch {
        (0..8)
            .map(|i| ChannelQuality {
                status: if i < bad {
                    ContactQuality::Bad
                } else {
                    ContactQuality::Good
                },
                standard_deviation: 1.5,
            })
            .collect()
    }

    #[test]
    fn test_count_fails() {
        assert_eq!(count_fails(&batch(0)), 0);
        assert_eq!(count_fails(&batch(5)), 5);

        let mixed = vec![
            ChannelQuality { status: ContactQuality::Great, standard_deviation: 1.0 },
            ChannelQuality { status: ContactQuality::NoContact, standard_deviation: 0.0 },
        ];
        assert_eq!(count_fails(&mixed), 1);
    }

    #[tokio::test]
    async fn test_gate_passes_when_fails_within_limit() {
        let (feed, gate) = QualityGate::new(1);
        let gate = gate.with_poll_interval(Duration::from_millis(5));
        feed.push(batch(3));

        tokio::time::timeout(Duration::from_secs(1), gate.ensure_quality(3))
            .await
            .expect("gate should open with 3 fails allowed");
    }

    #[tokio::test]
    async fn test_gate_blocks_until_quality_improves() {
        let (feed, gate) = QualityGate::new(1);
        let gate = gate.with_poll_interval(Duration::from_millis(5));
        feed.push(batch(6));

        let blocked = tokio::time::timeout(Duration::from_millis(50), gate.ensure_quality(3)).await;
        assert!(blocked.is_err());

        feed.push(batch(1));
        tokio::time::timeout(Duration::from_secs(1), gate.ensure_quality(3))
            .await
            .expect("gate should open once contact improves");
    }

    #[tokio::test]
    async fn test_gate_requires_fresh_consecutive_reports() {
        let (feed, gate) = QualityGate::new(2);
        let gate = gate.with_poll_interval(Duration::from_millis(5));
        feed.push(batch(0));

        // The same report seen twice only counts once.
        let blocked = tokio::time::timeout(Duration::from_millis(50), gate.ensure_quality(0)).await;
        assert!(blocked.is_err());

        let pusher = tokio::spawn(async move {
            for _ in 0..20 {
                feed.push(batch(0));
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });
        tokio::time::timeout(Duration::from_secs(1), gate.ensure_quality(0))
            .await
            .expect("two fresh passing reports should open the gate");
        pusher.abort();
    }
}
