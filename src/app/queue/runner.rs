//! Execution contract between the queue and whatever moves the bytes

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::app::progress::{Direction, ProgressTracker};

use super::core::TransferQueue;
use super::types::{TaskOutcome, TransferTask};

/// Executes promoted tasks
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Run one task to an outcome. Must return promptly once the context is
    /// cancelled.
    async fn run(&self, task: TransferTask, ctx: RunContext) -> TaskOutcome;
}

/// Handle a runner uses to report back to the queue
#[derive(Debug, Clone)]
pub struct RunContext {
    id: Uuid,
    run_id: u64,
    direction: Direction,
    cancel: CancellationToken,
    queue: Weak<TransferQueue>,
    tracker: Arc<ProgressTracker>,
}

impl RunContext {
    pub(crate) fn new(
        id: Uuid,
        run_id: u64,
        direction: Direction,
        cancel: CancellationToken,
        queue: Weak<TransferQueue>,
        tracker: Arc<ProgressTracker>,
    ) -> Self {
        Self {
            id,
            run_id,
            direction,
            cancel,
            queue,
            tracker,
        }
    }

    /// Context that reports nowhere, for driving a runner directly
    pub fn detached(id: Uuid, direction: Direction, tracker: Arc<ProgressTracker>) -> Self {
        Self::new(
            id,
            0,
            direction,
            CancellationToken::new(),
            Weak::new(),
            tracker,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// `delta` bytes just moved; the task now stands at `transmitted`
    pub async fn report(&self, delta: u64, transmitted: u64) {
        if delta > 0 {
            self.tracker.record(self.direction, delta);
        }
        if let Some(queue) = self.queue.upgrade() {
            queue
                .record_progress(self.id, self.run_id, transmitted, None)
                .await;
        }
    }

    /// Batch child `index` finished
    pub async fn part_completed(&self, index: usize, transmitted: u64) {
        if let Some(queue) = self.queue.upgrade() {
            queue
                .record_progress(self.id, self.run_id, transmitted, Some(index))
                .await;
        }
    }
}
