//! Quota tracker — guards the shared channel against provider throttling.
//! A single rolling window with a fixed cap; the counter resets lazily on
//! access once the window has elapsed, so the cap is never exceeded within
//! any window-length period.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

use reclaim_core::alerts::{make_alert, AlertSeverity, AlertSink};
use reclaim_core::config::QuotaConfig;

use crate::clock::Clock;

const WARN_RATIO: f64 = 0.80;
const EXHAUSTED_RATIO: f64 = 0.95;

struct WindowState {
    count: u64,
    started_at: DateTime<Utc>,
    warned: bool,
    exhausted_alerted: bool,
}

pub struct QuotaTracker {
    cap: u64,
    window: Duration,
    inner: Mutex<WindowState>,
    clock: Arc<dyn Clock>,
    alerts: Arc<dyn AlertSink>,
}

impl QuotaTracker {
    pub fn new(config: &QuotaConfig, clock: Arc<dyn Clock>, alerts: Arc<dyn AlertSink>) -> Self {
        let started_at = clock.now();
        Self {
            cap: config.window_cap,
            window: Duration::seconds(config.window_secs as i64),
            inner: Mutex::new(WindowState {
                count: 0,
                started_at,
                warned: false,
                exhausted_alerted: false,
            }),
            clock,
            alerts,
        }
    }

    /// Atomically reserve one send slot. `false` is backpressure, not an
    /// error: the caller requeues and must not send.
    pub fn try_reserve(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.inner.lock();
        Self::roll_if_expired(&mut state, now, self.window);

        if state.count >= self.cap {
            metrics::counter!("quota.denied").increment(1);
            debug!(count = state.count, cap = self.cap, "quota window full");
            return false;
        }

        state.count += 1;
        metrics::counter!("quota.reserved").increment(1);

        let ratio = state.count as f64 / self.cap as f64;
        if ratio >= EXHAUSTED_RATIO && !state.exhausted_alerted {
            state.exhausted_alerted = true;
            warn!(count = state.count, cap = self.cap, "quota window nearly exhausted");
            self.alerts.raise(make_alert(
                AlertSeverity::Critical,
                "quota",
                format!("send quota at {}/{} for the current window", state.count, self.cap),
            ));
        } else if ratio >= WARN_RATIO && !state.warned {
            state.warned = true;
            self.alerts.raise(make_alert(
                AlertSeverity::Warning,
                "quota",
                format!("send quota at {}/{} for the current window", state.count, self.cap),
            ));
        }
        true
    }

    /// Undo a reservation that never reached the transport, e.g. when the
    /// channel turned out to be disconnected.
    pub fn release(&self) {
        let mut state = self.inner.lock();
        state.count = state.count.saturating_sub(1);
        metrics::counter!("quota.released").increment(1);
    }

    pub fn remaining(&self) -> u64 {
        let now = self.clock.now();
        let mut state = self.inner.lock();
        Self::roll_if_expired(&mut state, now, self.window);
        self.cap.saturating_sub(state.count)
    }

    pub fn usage_ratio(&self) -> f64 {
        let now = self.clock.now();
        let mut state = self.inner.lock();
        Self::roll_if_expired(&mut state, now, self.window);
        state.count as f64 / self.cap as f64
    }

    /// The scan pauses new stage scheduling past the exhaustion threshold.
    pub fn is_exhausted(&self) -> bool {
        self.usage_ratio() >= EXHAUSTED_RATIO
    }

    /// When the current window's capacity runs out, requeued jobs become
    /// due at this instant.
    pub fn next_window_start(&self) -> DateTime<Utc> {
        let now = self.clock.now();
        let mut state = self.inner.lock();
        Self::roll_if_expired(&mut state, now, self.window);
        state.started_at + self.window
    }

    fn roll_if_expired(state: &mut WindowState, now: DateTime<Utc>, window: Duration) {
        if now - state.started_at >= window {
            state.count = 0;
            state.started_at = now;
            state.warned = false;
            state.exhausted_alerted = false;
            debug!("quota window rolled");
        }
    }
}
