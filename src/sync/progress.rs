//! Progress fan-out: one producer (the run), any number of consumers, each
//! seeing the latest value. The HTTP layer subscribes and forwards.

use tokio::sync::watch;

use crate::models::{SyncProgress, SyncStage};

#[derive(Debug)]
pub struct ProgressReporter {
    tx: watch::Sender<SyncProgress>,
}

impl ProgressReporter {
    pub fn new() -> (Self, watch::Receiver<SyncProgress>) {
        let (tx, rx) = watch::channel(SyncProgress::default());
        (Self { tx }, rx)
    }

    pub fn report(&self, stage: SyncStage, percentage: u8, operation: impl Into<String>) {
        // Send only fails when every receiver is gone, which is fine: the
        // run does not depend on anyone watching.
        let _ = self.tx.send(SyncProgress::new(stage, percentage, operation));
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncProgress> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> SyncProgress {
        self.tx.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn consumers_see_the_latest_value() {
        let (reporter, rx) = ProgressReporter::new();
        reporter.report(SyncStage::FetchingData, 10, "page 1");
        reporter.report(SyncStage::ProcessingRecords, 40, "record 4/10");

        // A late subscriber still observes the last value.
        let late = reporter.subscribe();
        assert_eq!(late.borrow().stage, SyncStage::ProcessingRecords);
        assert_eq!(late.borrow().percentage, 40);
        assert_eq!(rx.borrow().current_operation, "record 4/10");
    }
}
