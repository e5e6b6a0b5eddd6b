//! Progress tracker
//!
//! Transfers add raw byte counts to per-direction atomic counters. A ticker
//! reads and resets the counters once per interval, turns them into rates,
//! and broadcasts one snapshot per tick no matter how many transfers are
//! running. The ticker only exists while at least one task is working.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use crate::constants::progress;

use super::format::format_rate;

/// Direction of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Download,
    Upload,
}

/// Tracker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Sampling interval
    pub tick_interval: Duration,
    /// How much rate history to keep
    pub history_window: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            tick_interval: progress::TICK_INTERVAL,
            history_window: progress::HISTORY_WINDOW,
        }
    }
}

/// Rates measured over one tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateSnapshot {
    pub download_bps: u64,
    pub upload_bps: u64,
    pub download_rate: String,
    pub upload_rate: String,
    pub total_downloaded: u64,
    pub total_uploaded: u64,
    pub working_tasks: usize,
    pub sampled_at: Option<DateTime<Utc>>,
}

/// One entry of the speed history
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedSample {
    pub at: DateTime<Utc>,
    pub download_bps: u64,
    pub upload_bps: u64,
}

#[derive(Debug, Default)]
struct TickerState {
    working: usize,
    handle: Option<JoinHandle<()>>,
}

/// Process-wide transfer rate accounting
#[derive(Debug)]
pub struct ProgressTracker {
    config: ProgressConfig,
    downloaded: AtomicU64,
    uploaded: AtomicU64,
    total_downloaded: AtomicU64,
    total_uploaded: AtomicU64,
    ticker: Mutex<TickerState>,
    latest: Mutex<RateSnapshot>,
    history: Mutex<VecDeque<SpeedSample>>,
    events: broadcast::Sender<RateSnapshot>,
}

impl ProgressTracker {
    pub fn new(config: ProgressConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(progress::EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            config,
            downloaded: AtomicU64::new(0),
            uploaded: AtomicU64::new(0),
            total_downloaded: AtomicU64::new(0),
            total_uploaded: AtomicU64::new(0),
            ticker: Mutex::new(TickerState::default()),
            latest: Mutex::new(RateSnapshot::default()),
            history: Mutex::new(VecDeque::new()),
            events,
        })
    }

    /// Count bytes moved by a transfer
    pub fn record(&self, direction: Direction, bytes: u64) {
        match direction {
            Direction::Download => {
                self.downloaded.fetch_add(bytes, Ordering::Relaxed);
                self.total_downloaded.fetch_add(bytes, Ordering::Relaxed);
            }
            Direction::Upload => {
                self.uploaded.fetch_add(bytes, Ordering::Relaxed);
                self.total_uploaded.fetch_add(bytes, Ordering::Relaxed);
            }
        }
    }

    /// A task entered `Working`; starts the ticker on the first one
    pub fn task_started(self: &Arc<Self>) {
        let mut ticker = self.ticker.lock().unwrap_or_else(|e| e.into_inner());
        ticker.working += 1;
        if ticker.handle.is_none() {
            debug!("Starting progress ticker");
            ticker.handle = Some(self.spawn_ticker());
        }
    }

    /// A task left `Working`; stops the ticker after the last one
    pub fn task_finished(&self) {
        let stopped = {
            let mut ticker = self.ticker.lock().unwrap_or_else(|e| e.into_inner());
            ticker.working = ticker.working.saturating_sub(1);
            if ticker.working == 0 {
                ticker.handle.take()
            } else {
                None
            }
        };

        if let Some(handle) = stopped {
            debug!("Stopping progress ticker");
            handle.abort();
            // Account for bytes moved since the last tick
            self.tick();
        }
    }

    /// Whether the ticker is currently running
    pub fn is_ticking(&self) -> bool {
        self.ticker
            .lock()
            .map(|ticker| ticker.handle.is_some())
            .unwrap_or(false)
    }

    /// Number of tasks currently working
    pub fn working_tasks(&self) -> usize {
        self.ticker.lock().map(|ticker| ticker.working).unwrap_or(0)
    }

    /// Read and reset the counters, publish a snapshot
    pub fn tick(&self) -> RateSnapshot {
        let seconds = self.config.tick_interval.as_secs_f64().max(0.001);
        let downloaded = self.downloaded.swap(0, Ordering::Relaxed);
        let uploaded = self.uploaded.swap(0, Ordering::Relaxed);
        let download_bps = (downloaded as f64 / seconds) as u64;
        let upload_bps = (uploaded as f64 / seconds) as u64;
        let now = Utc::now();

        let snapshot = RateSnapshot {
            download_bps,
            upload_bps,
            download_rate: format_rate(download_bps),
            upload_rate: format_rate(upload_bps),
            total_downloaded: self.total_downloaded.load(Ordering::Relaxed),
            total_uploaded: self.total_uploaded.load(Ordering::Relaxed),
            working_tasks: self.working_tasks(),
            sampled_at: Some(now),
        };

        {
            let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
            history.push_back(SpeedSample {
                at: now,
                download_bps,
                upload_bps,
            });
            while history.len() > self.history_capacity() {
                history.pop_front();
            }
        }

        if let Ok(mut latest) = self.latest.lock() {
            *latest = snapshot.clone();
        }

        // No subscribers is fine
        let _ = self.events.send(snapshot.clone());
        snapshot
    }

    /// Subscribe to per-tick snapshots
    pub fn subscribe(&self) -> broadcast::Receiver<RateSnapshot> {
        self.events.subscribe()
    }

    /// Most recent snapshot
    pub fn latest(&self) -> RateSnapshot {
        self.latest
            .lock()
            .map(|latest| latest.clone())
            .unwrap_or_default()
    }

    /// Rate history, oldest first
    pub fn history(&self) -> Vec<SpeedSample> {
        self.history
            .lock()
            .map(|history| history.iter().copied().collect())
            .unwrap_or_default()
    }

    fn history_capacity(&self) -> usize {
        let tick = self.config.tick_interval.as_millis().max(1);
        ((self.config.history_window.as_millis() / tick) as usize).max(1)
    }

    fn spawn_ticker(self: &Arc<Self>) -> JoinHandle<()> {
        let tracker: Weak<Self> = Arc::downgrade(self);
        let period = self.config.tick_interval;

        tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match tracker.upgrade() {
                    Some(tracker) => {
                        tracker.tick();
                    }
                    None => break,
                }
            }
        })
    }
}
