//! Bandwidth admission — per-category token buckets with dynamic
//! rebalancing.
//!
//! A `Throttle` accrues credit continuously at its rate, capped at
//! `rate * lookahead` so an idle category can burst but not hoard. Debits
//! happen at commit time and may push the credit negative; the deficit
//! pays itself off on subsequent ticks. A bucket sitting at full lookahead
//! credit admits any send, so a completely idle category never starves a
//! message larger than its instantaneous rate.
//!
//! The `ThrottleGroup` holds one bucket per traffic category and
//! periodically shifts capacity from quiet categories to busy ones, never
//! below a category's floor and never past its cap.
//!
//! Time is an explicit seconds argument throughout; the message substrate
//! owns the clock.

use skein_core::config::{RebalanceConfig, ThrottleConfig};

/// Fixed traffic categories, one throttle each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum ThrottleCategory {
    Resend = 0,
    Land = 1,
    Wind = 2,
    Cloud = 3,
    Task = 4,
    Texture = 5,
    Asset = 6,
}

pub const THROTTLE_CATEGORIES: usize = 7;

impl ThrottleCategory {
    pub const ALL: [ThrottleCategory; THROTTLE_CATEGORIES] = [
        ThrottleCategory::Resend,
        ThrottleCategory::Land,
        ThrottleCategory::Wind,
        ThrottleCategory::Cloud,
        ThrottleCategory::Task,
        ThrottleCategory::Texture,
        ThrottleCategory::Asset,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ThrottleCategory::Resend => "resend",
            ThrottleCategory::Land => "land",
            ThrottleCategory::Wind => "wind",
            ThrottleCategory::Cloud => "cloud",
            ThrottleCategory::Task => "task",
            ThrottleCategory::Texture => "texture",
            ThrottleCategory::Asset => "asset",
        }
    }
}

// ── Single bucket ─────────────────────────────────────────────────────────────

/// One token bucket, in bits.
#[derive(Debug, Clone)]
pub struct Throttle {
    rate: f64,
    available: f64,
    lookahead_secs: f64,
    last_update: f64,
}

impl Throttle {
    /// A new bucket starts with full lookahead credit, so the first sends
    /// after startup are never gated.
    pub fn new(rate_bps: f64, lookahead_secs: f64, now: f64) -> Self {
        let rate = rate_bps.max(0.0);
        Self {
            rate,
            available: rate * lookahead_secs,
            lookahead_secs,
            last_update: now,
        }
    }

    fn burst_ceiling(&self) -> f64 {
        self.rate * self.lookahead_secs
    }

    fn accrue(&mut self, now: f64) {
        let elapsed = (now - self.last_update).max(0.0);
        self.available = (self.available + self.rate * elapsed).min(self.burst_ceiling());
        self.last_update = now;
    }

    /// Change the rate. Credit accrued at the old rate is flushed first —
    /// a rate change neither fabricates nor destroys credit.
    pub fn set_rate(&mut self, rate_bps: f64, now: f64) {
        self.accrue(now);
        self.rate = rate_bps.max(0.0);
        self.available = self.available.min(self.burst_ceiling());
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Credit currently available, in bits. May be negative after an
    /// oversized send.
    pub fn available(&self, now: f64) -> f64 {
        let elapsed = (now - self.last_update).max(0.0);
        (self.available + self.rate * elapsed).min(self.burst_ceiling())
    }

    /// Pure query: would sending `amount` bits now overflow the bucket?
    /// A bucket at full credit never overflows.
    pub fn check_overflow(&self, amount: f64, now: f64) -> bool {
        let credit = self.available(now);
        if credit >= self.burst_ceiling() {
            false
        } else {
            credit <= amount
        }
    }

    /// Commit a send of `amount` bits. The debit happens unconditionally;
    /// the return value says whether the bucket was already over capacity
    /// at commit time (true = overflowed, stop sending).
    pub fn throttle_overflow(&mut self, amount: f64, now: f64) -> bool {
        self.accrue(now);
        let overflowed = if self.available >= self.burst_ceiling() {
            false
        } else {
            self.available <= amount
        };
        self.available -= amount;
        overflowed
    }
}

// ── Group ─────────────────────────────────────────────────────────────────────

/// Per-connection bandwidth accounting: one bucket per category plus the
/// rebalancing state.
#[derive(Debug, Clone)]
pub struct ThrottleGroup {
    throttles: [Throttle; THROTTLE_CATEGORIES],
    nominal_bps: [f64; THROTTLE_CATEGORIES],
    current_bps: [f64; THROTTLE_CATEGORIES],
    bits_sent_this_period: [f64; THROTTLE_CATEGORIES],
    bits_sent_history: [f64; THROTTLE_CATEGORIES],
    last_adjust: f64,
    lookahead_secs: f64,
    rebalance: RebalanceConfig,
}

impl ThrottleGroup {
    pub fn new(throttle: &ThrottleConfig, rebalance: &RebalanceConfig, now: f64) -> Self {
        let nominal = throttle.nominal_bps();
        Self {
            throttles: nominal.map(|bps| Throttle::new(bps, throttle.lookahead_secs, now)),
            nominal_bps: nominal,
            current_bps: nominal,
            bits_sent_this_period: [0.0; THROTTLE_CATEGORIES],
            bits_sent_history: [0.0; THROTTLE_CATEGORIES],
            last_adjust: now,
            lookahead_secs: throttle.lookahead_secs,
            rebalance: rebalance.clone(),
        }
    }

    /// Replace the nominal baselines. If anything actually changed, all
    /// dynamic state resets: current rates snap back to nominal, histories
    /// clear, buckets refill.
    pub fn set_nominal_bps(&mut self, nominal: [f64; THROTTLE_CATEGORIES], now: f64) {
        if nominal == self.nominal_bps {
            return;
        }
        let lookahead = self.lookahead_secs;
        self.nominal_bps = nominal;
        self.current_bps = nominal;
        self.bits_sent_this_period = [0.0; THROTTLE_CATEGORIES];
        self.bits_sent_history = [0.0; THROTTLE_CATEGORIES];
        self.throttles = nominal.map(|bps| Throttle::new(bps, lookahead, now));
        self.last_adjust = now;
    }

    pub fn current_bps(&self, category: ThrottleCategory) -> f64 {
        self.current_bps[category as usize]
    }

    pub fn available(&self, category: ThrottleCategory, now: f64) -> f64 {
        self.throttles[category as usize].available(now)
    }

    pub fn check_overflow(&self, category: ThrottleCategory, amount: f64, now: f64) -> bool {
        self.throttles[category as usize].check_overflow(amount, now)
    }

    /// Commit a send against one category's bucket and the period
    /// accounting.
    pub fn throttle_overflow(&mut self, category: ThrottleCategory, amount: f64, now: f64) -> bool {
        self.bits_sent_this_period[category as usize] += amount;
        self.throttles[category as usize].throttle_overflow(amount, now)
    }

    /// Rebalance current rates between busy and quiet categories. Runs at
    /// most once per configured interval; calling more often is free.
    pub fn dynamic_adjust(&mut self, now: f64) {
        if now - self.last_adjust < self.rebalance.interval_secs {
            return;
        }
        self.last_adjust = now;

        // Fold this period into the exponentially-weighted history.
        for i in 0..THROTTLE_CATEGORIES {
            self.bits_sent_history[i] =
                (self.bits_sent_history[i] + self.bits_sent_this_period[i]) / 2.0;
            self.bits_sent_this_period[i] = 0.0;
        }

        let mut busy = [false; THROTTLE_CATEGORIES];
        let mut idle = [false; THROTTLE_CATEGORIES];
        let mut any_busy = false;
        for i in 0..THROTTLE_CATEGORIES {
            let history = self.bits_sent_history[i];
            let current = self.current_bps[i];
            if history >= self.rebalance.busy_fraction * current {
                busy[i] = true;
                any_busy = true;
            } else if history < self.rebalance.idle_fraction * current
                && self.throttles[i].available(now) > 0.0
            {
                idle[i] = true;
            }
        }

        if any_busy {
            self.borrow_for_busy(&busy, &idle);
        } else {
            self.settle_toward_nominal();
        }

        for i in 0..THROTTLE_CATEGORIES {
            self.throttles[i].set_rate(self.current_bps[i], now);
        }
    }

    /// Someone is saturating their allotment: idle and over-nominal
    /// categories surrender most of their unused capacity into a pool that
    /// busy categories split proportionally to their nominal share.
    fn borrow_for_busy(&mut self, busy: &[bool; THROTTLE_CATEGORIES], idle: &[bool; THROTTLE_CATEGORIES]) {
        let mut pool = 0.0;
        for i in 0..THROTTLE_CATEGORIES {
            if busy[i] {
                continue;
            }
            let over_nominal = self.current_bps[i] > self.nominal_bps[i];
            if !idle[i] && !over_nominal {
                continue;
            }
            let unused = (self.current_bps[i] - self.bits_sent_history[i]).max(0.0);
            let floor = self.rebalance.floor_fraction * self.nominal_bps[i];
            let shrunk =
                (self.current_bps[i] - self.rebalance.surrender_fraction * unused).max(floor);
            pool += self.current_bps[i] - shrunk;
            self.current_bps[i] = shrunk;
        }

        if pool <= 0.0 {
            return;
        }

        let busy_nominal: f64 = (0..THROTTLE_CATEGORIES)
            .filter(|&i| busy[i])
            .map(|i| self.nominal_bps[i])
            .sum();
        if busy_nominal <= 0.0 {
            return;
        }

        let mut overflow = 0.0;
        for i in 0..THROTTLE_CATEGORIES {
            if !busy[i] {
                continue;
            }
            let share = pool * self.nominal_bps[i] / busy_nominal;
            let cap = self.rebalance.cap_multiple * self.nominal_bps[i];
            let grown = self.current_bps[i] + share;
            if grown > cap {
                overflow += grown - cap;
                self.current_bps[i] = cap;
            } else {
                self.current_bps[i] = grown;
            }
        }

        // Capacity nobody can legally hold lands on Task, the catch-all.
        if overflow > 0.0 {
            self.current_bps[ThrottleCategory::Task as usize] += overflow;
            tracing::debug!(
                overflow_bps = overflow,
                "rebalance overflow redirected to task category"
            );
        }
    }

    /// Nobody is busy: categories above nominal drift back down, and the
    /// reclaimed capacity is shared among those below nominal in
    /// proportion to their deficit.
    fn settle_toward_nominal(&mut self) {
        let mut surplus = 0.0;
        for i in 0..THROTTLE_CATEGORIES {
            let excess = self.current_bps[i] - self.nominal_bps[i];
            if excess > 0.0 {
                let give = self.rebalance.giveback_fraction * excess;
                self.current_bps[i] -= give;
                surplus += give;
            }
        }

        if surplus <= 0.0 {
            return;
        }

        let total_deficit: f64 = (0..THROTTLE_CATEGORIES)
            .map(|i| (self.nominal_bps[i] - self.current_bps[i]).max(0.0))
            .sum();
        if total_deficit <= 0.0 {
            return;
        }

        for i in 0..THROTTLE_CATEGORIES {
            let deficit = (self.nominal_bps[i] - self.current_bps[i]).max(0.0);
            if deficit > 0.0 {
                let grant = (surplus * deficit / total_deficit).min(deficit);
                self.current_bps[i] += grant;
            }
        }
    }
}
