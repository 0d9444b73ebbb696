//! Popup liveness polling.
//!
//! Popups give no closure callback, so the driver polls
//! [`WalletWindow::is_closed`] on a fixed interval for its whole lifetime.
//! The first check happens one period after start.

use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::debug;

use xbull_core::transport::WalletWindow;

pub struct Watchdog {
    ticker: Interval,
    period: Duration,
    checks: u64,
}

impl Watchdog {
    /// Start ticking every `period`.
    pub fn start(period: Duration) -> Self {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            ticker,
            period,
            checks: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait for the next tick.
    pub async fn tick(&mut self) {
        self.ticker.tick().await;
        self.checks += 1;
    }

    /// Whether the current target exists and has been closed.
    pub fn target_closed(&self, target: Option<&dyn WalletWindow>) -> bool {
        match target {
            Some(window) if window.is_closed() => {
                debug!(check = self.checks, "wallet window reported closed");
                true
            }
            _ => false,
        }
    }
}
