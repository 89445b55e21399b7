//! Rolling hourly/daily call budgets.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::QuotaConfig;
use crate::error::{GatewayError, QuotaWindow, Result};

/// Outcome of a quota check. Denial is an expected result, not a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    Allowed,
    Denied {
        window: QuotaWindow,
        retry_after: Duration,
    },
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allowed)
    }

    /// The window that would be violated, when denied.
    pub fn reason(&self) -> Option<QuotaWindow> {
        match self {
            QuotaDecision::Allowed => None,
            QuotaDecision::Denied { window, .. } => Some(*window),
        }
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            QuotaDecision::Allowed => Ok(()),
            QuotaDecision::Denied {
                window,
                retry_after,
            } => Err(GatewayError::QuotaExceeded {
                window,
                retry_after,
            }),
        }
    }
}

/// Point-in-time view of quota consumption.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct QuotaUsage {
    pub hourly_used: u32,
    pub hourly_limit: u32,
    pub hourly_resets_in_secs: u64,
    pub daily_used: u32,
    pub daily_limit: u32,
    pub daily_resets_in_secs: u64,
}

/// Storage seam for quota accounting.
///
/// The in-memory [`QuotaManager`] is the default; a networked store shared
/// between processes can implement the same contract.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    async fn can_proceed(&self) -> Result<QuotaDecision>;

    async fn record_call(&self) -> Result<()>;

    /// Check and record in one atomic step.
    async fn try_acquire(&self) -> Result<QuotaDecision>;

    async fn usage(&self) -> Result<QuotaUsage>;
}

#[derive(Debug, Clone, Copy)]
struct WindowCounter {
    count: u32,
    started_at: Instant,
    length: Duration,
}

impl WindowCounter {
    fn new(length: Duration, now: Instant) -> Self {
        Self {
            count: 0,
            started_at: now,
            length,
        }
    }

    fn roll(&mut self, now: Instant) {
        if now.duration_since(self.started_at) >= self.length {
            self.count = 0;
            self.started_at = now;
        }
    }

    fn remaining(&self, now: Instant) -> Duration {
        (self.started_at + self.length).saturating_duration_since(now)
    }
}

#[derive(Debug)]
struct QuotaState {
    hourly: WindowCounter,
    daily: WindowCounter,
}

impl QuotaState {
    fn check(&mut self, hourly_limit: u32, daily_limit: u32, now: Instant) -> QuotaDecision {
        self.hourly.roll(now);
        self.daily.roll(now);

        if self.hourly.count >= hourly_limit {
            return QuotaDecision::Denied {
                window: QuotaWindow::Hourly,
                retry_after: self.hourly.remaining(now),
            };
        }
        if self.daily.count >= daily_limit {
            return QuotaDecision::Denied {
                window: QuotaWindow::Daily,
                retry_after: self.daily.remaining(now),
            };
        }
        QuotaDecision::Allowed
    }

    fn record(&mut self, now: Instant) {
        self.hourly.roll(now);
        self.daily.roll(now);
        self.hourly.count = self.hourly.count.saturating_add(1);
        self.daily.count = self.daily.count.saturating_add(1);
    }
}

/// In-memory quota accounting for a single process.
///
/// All reads and writes go through one mutex, so a check followed by an
/// increment inside [`QuotaManager::try_acquire`] can never over-admit.
pub struct QuotaManager {
    state: Mutex<QuotaState>,
    hourly_limit: u32,
    daily_limit: u32,
}

impl QuotaManager {
    pub fn new(hourly_limit: u32, daily_limit: u32) -> Self {
        Self::with_windows(
            hourly_limit,
            daily_limit,
            QuotaWindow::Hourly.length(),
            QuotaWindow::Daily.length(),
        )
    }

    pub fn from_config(config: &QuotaConfig) -> Self {
        Self::new(config.hourly, config.daily)
    }

    fn with_windows(
        hourly_limit: u32,
        daily_limit: u32,
        hourly_length: Duration,
        daily_length: Duration,
    ) -> Self {
        let now = Instant::now();
        Self {
            state: Mutex::new(QuotaState {
                hourly: WindowCounter::new(hourly_length, now),
                daily: WindowCounter::new(daily_length, now),
            }),
            hourly_limit,
            daily_limit,
        }
    }

    pub fn can_proceed(&self) -> QuotaDecision {
        self.state
            .lock()
            .check(self.hourly_limit, self.daily_limit, Instant::now())
    }

    /// Count one logical call against both windows.
    pub fn record_call(&self) {
        self.state.lock().record(Instant::now());
    }

    pub fn try_acquire(&self) -> QuotaDecision {
        let now = Instant::now();
        let mut state = self.state.lock();
        let decision = state.check(self.hourly_limit, self.daily_limit, now);
        if decision.is_allowed() {
            state.record(now);
        }
        decision
    }

    pub fn usage(&self) -> QuotaUsage {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.hourly.roll(now);
        state.daily.roll(now);

        QuotaUsage {
            hourly_used: state.hourly.count,
            hourly_limit: self.hourly_limit,
            hourly_resets_in_secs: state.hourly.remaining(now).as_secs(),
            daily_used: state.daily.count,
            daily_limit: self.daily_limit,
            daily_resets_in_secs: state.daily.remaining(now).as_secs(),
        }
    }
}

#[async_trait]
impl QuotaStore for QuotaManager {
    async fn can_proceed(&self) -> Result<QuotaDecision> {
        Ok(QuotaManager::can_proceed(self))
    }

    async fn record_call(&self) -> Result<()> {
        QuotaManager::record_call(self);
        Ok(())
    }

    async fn try_acquire(&self) -> Result<QuotaDecision> {
        Ok(QuotaManager::try_acquire(self))
    }

    async fn usage(&self) -> Result<QuotaUsage> {
        Ok(QuotaManager::usage(self))
    }
}
