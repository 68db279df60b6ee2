//! Trailing-window drawdown tracking.
//!
//! Supplies [`RiskState::drawdown`] from a rolling window of NAV snapshots;
//! the window defaults to one week to match the weekly drawdown rail.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use tracing::{info, warn};

use super::RiskState;

/// A single equity snapshot for tracking.
#[derive(Debug, Clone)]
pub struct EquitySnapshot {
    pub timestamp: DateTime<Utc>,
    pub equity: Decimal,
}

/// Tracks drawdown from the peak NAV inside a trailing window.
pub struct DrawdownTracker {
    /// Drawdown that should block new buys (e.g., 0.10 for 10%)
    max_drawdown: Decimal,
    /// Trailing window length
    window: Duration,
    /// Current drawdown from the window peak
    current_drawdown: Decimal,
    /// Worst drawdown ever observed
    session_mdd: Decimal,
    history: VecDeque<EquitySnapshot>,
}

impl DrawdownTracker {
    /// Create a new tracker with a one-week window.
    pub fn new(max_drawdown: Decimal) -> Self {
        Self::with_window(max_drawdown, Duration::days(7))
    }

    pub fn with_window(max_drawdown: Decimal, window: Duration) -> Self {
        Self {
            max_drawdown,
            window,
            current_drawdown: Decimal::ZERO,
            session_mdd: Decimal::ZERO,
            history: VecDeque::new(),
        }
    }

    /// Record NAV at `timestamp`.
    ///
    /// Returns true if drawdown exceeds the configured limit.
    pub fn update(&mut self, timestamp: DateTime<Utc>, equity: Decimal) -> bool {
        self.history.push_back(EquitySnapshot { timestamp, equity });

        // Drop snapshots older than the window
        let cutoff = timestamp - self.window;
        while self
            .history
            .front()
            .is_some_and(|s| s.timestamp < cutoff)
        {
            self.history.pop_front();
        }

        let peak = self.peak_equity();
        self.current_drawdown = if peak > Decimal::ZERO && equity < peak {
            (peak - equity) / peak
        } else {
            Decimal::ZERO
        };

        if self.current_drawdown > self.session_mdd {
            self.session_mdd = self.current_drawdown;
            warn!(
                mdd = %self.session_mdd,
                peak = %peak,
                current = %equity,
                "New maximum drawdown recorded"
            );
        }

        self.current_drawdown > self.max_drawdown
    }

    /// Peak equity inside the window.
    pub fn peak_equity(&self) -> Decimal {
        self.history
            .iter()
            .map(|s| s.equity)
            .max()
            .unwrap_or(Decimal::ZERO)
    }

    /// Get current drawdown as percentage (0.0-1.0).
    pub fn current_drawdown(&self) -> Decimal {
        self.current_drawdown
    }

    /// Get the worst drawdown observed (0.0-1.0).
    pub fn session_mdd(&self) -> Decimal {
        self.session_mdd
    }

    /// Snapshot for the risk engine.
    pub fn risk_state(&self) -> RiskState {
        RiskState {
            drawdown: self.current_drawdown,
        }
    }

    /// Reset the tracker.
    pub fn reset(&mut self) {
        self.current_drawdown = Decimal::ZERO;
        self.session_mdd = Decimal::ZERO;
        self.history.clear();
        info!("Drawdown tracker reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, d, 16, 0, 0).unwrap()
    }

    #[test]
    fn test_drawdown_tracking() {
        let mut tracker = DrawdownTracker::new(dec!(0.05));

        assert!(!tracker.update(day(1), dec!(10000)));
        assert!(!tracker.update(day(2), dec!(10500)));
        assert_eq!(tracker.peak_equity(), dec!(10500));

        // (10500 - 10000) / 10500 ≈ 4.76%
        assert!(!tracker.update(day(3), dec!(10000)));
        assert!(tracker.current_drawdown() > dec!(0.04));

        assert!(tracker.update(day(4), dec!(9900)));
        assert_eq!(tracker.risk_state().drawdown, tracker.current_drawdown());
    }

    #[test]
    fn test_old_peak_leaves_window() {
        let mut tracker = DrawdownTracker::new(dec!(0.05));
        tracker.update(day(1), dec!(12000));
        tracker.update(day(5), dec!(10000));
        assert!(tracker.current_drawdown() > dec!(0.16));

        // Day 1 peak is now older than a week
        tracker.update(day(12), dec!(10000));
        assert_eq!(tracker.current_drawdown(), Decimal::ZERO);
        assert!(tracker.session_mdd() > dec!(0.16));
    }
}
