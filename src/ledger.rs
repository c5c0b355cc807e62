use std::fmt;

/// Ceiling the host will currently back, learned from refused grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardLimit {
    /// No grant has been refused since the last target change.
    Unknown,
    /// Largest reservation the host granted, in pages.
    Known(u64),
}

impl HardLimit {
    pub fn get(self) -> Option<u64> {
        match self {
            HardLimit::Unknown => None,
            HardLimit::Known(limit) => Some(limit),
        }
    }

    fn as_pages(self) -> u64 {
        self.get().unwrap_or(u64::MAX)
    }
}

impl fmt::Display for HardLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HardLimit::Unknown => write!(f, "unknown"),
            HardLimit::Known(limit) => write!(f, "{limit} pages"),
        }
    }
}

/// Next convergence step computed by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Request this many frames from the host.
    Grow(u64),
    /// Surrender this many pages to the host.
    Shrink(u64),
    Converged,
}

/// Reservation counters of the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Ledger {
    /// Pages currently backed by the host.
    pub(crate) current_pages: u64,
    /// Pages requested by policy.
    pub(crate) target_pages: u64,
    pub(crate) hard_limit: HardLimit,
    /// Frames held by other drivers outside the balloon's accounting.
    pub(crate) driver_pages: i64,
}

impl Ledger {
    pub(crate) fn new(current_pages: u64) -> Self {
        Self {
            current_pages,
            target_pages: current_pages,
            hard_limit: HardLimit::Unknown,
            driver_pages: 0,
        }
    }

    /// The reservation the balloon should aim for now.
    ///
    /// Never more than what the resident pages and the pool can supply.
    pub(crate) fn current_target(&self, pooled: u64) -> u64 {
        let target = self.target_pages.min(self.hard_limit.as_pages());
        target.min(self.current_pages.saturating_add(pooled))
    }

    /// Signed distance between the current target and the reservation.
    #[allow(clippy::as_conversions, clippy::cast_possible_truncation)]
    pub(crate) fn credit(&self, pooled: u64) -> i64 {
        let delta = i128::from(self.current_target(pooled)) - i128::from(self.current_pages);
        delta.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
    }

    pub(crate) fn step(&self, pooled: u64) -> Step {
        let target = self.current_target(pooled);
        match target.cmp(&self.current_pages) {
            std::cmp::Ordering::Greater => Step::Grow(target.saturating_sub(self.current_pages)),
            std::cmp::Ordering::Less => Step::Shrink(self.current_pages.saturating_sub(target)),
            std::cmp::Ordering::Equal => Step::Converged,
        }
    }

    pub(crate) fn is_converged(&self, pooled: u64) -> bool {
        self.current_target(pooled) == self.current_pages
    }

    /// Stores a fresh target; the ceiling must be rediscovered.
    pub(crate) fn set_target(&mut self, target_pages: u64) {
        self.hard_limit = HardLimit::Unknown;
        self.target_pages = target_pages;
    }

    /// Records the ceiling learned from a grant of `granted` frames.
    #[allow(clippy::as_conversions, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub(crate) fn discover_limit(&mut self, granted: u64) -> u64 {
        let limit = i128::from(self.current_pages) + i128::from(granted)
            - i128::from(self.driver_pages);
        let limit = limit.clamp(0, i128::from(u64::MAX)) as u64;
        self.hard_limit = HardLimit::Known(limit);
        limit
    }

    pub(crate) fn adjust_driver_pages(&mut self, delta: i64) {
        self.driver_pages = self.driver_pages.saturating_add(delta);
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;

    #[test]
    fn target_is_clamped_by_supply() {
        let mut ledger = Ledger::new(100);
        ledger.set_target(1000);
        assert_eq!(ledger.current_target(50), 150);
        assert_eq!(ledger.step(50), Step::Grow(50));
        assert_eq!(ledger.credit(50), 50);
    }

    #[test]
    fn hard_limit_caps_target() {
        let mut ledger = Ledger::new(100);
        ledger.set_target(200);
        assert_eq!(ledger.discover_limit(10), 110);
        assert_eq!(ledger.current_target(500), 110);
        assert_eq!(ledger.step(500), Step::Grow(10));
    }

    #[test]
    fn new_target_forgets_hard_limit() {
        let mut ledger = Ledger::new(100);
        let _limit = ledger.discover_limit(0);
        assert_eq!(ledger.hard_limit, HardLimit::Known(100));
        ledger.set_target(300);
        assert_eq!(ledger.hard_limit, HardLimit::Unknown);
        assert_eq!(ledger.step(1000), Step::Grow(200));
    }

    #[test]
    fn driver_headroom_lowers_discovered_limit() {
        let mut ledger = Ledger::new(100);
        ledger.adjust_driver_pages(8);
        assert_eq!(ledger.discover_limit(3), 95);
        ledger.adjust_driver_pages(-8);
        assert_eq!(ledger.driver_pages, 0);
    }

    #[test]
    fn shrink_and_converged_steps() {
        let mut ledger = Ledger::new(100);
        assert_eq!(ledger.step(0), Step::Converged);
        assert!(ledger.is_converged(0));
        ledger.set_target(60);
        assert_eq!(ledger.step(0), Step::Shrink(40));
        assert_eq!(ledger.credit(0), -40);
    }

    #[test]
    fn target_never_exceeds_supply() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..1000 {
            let mut ledger = Ledger::new(rng.gen_range(0..10_000));
            ledger.set_target(rng.gen_range(0..20_000));
            if rng.gen_bool(0.5) {
                ledger.adjust_driver_pages(rng.gen_range(-50..50));
                let _limit = ledger.discover_limit(rng.gen_range(0..100));
            }
            let pooled = rng.gen_range(0..10_000);
            assert!(ledger.current_target(pooled) <= ledger.current_pages + pooled);
        }
    }
}
