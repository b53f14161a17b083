use crate::Duration;

/// A monotonic point in time, used for interval timers and soft timeouts
/// (e.g. the TPIU half-sync timeout, the OFLOW tag staleness window).
#[derive(Copy, Clone, Debug)]
pub struct Instant(std::time::Instant);

impl Instant {
    #[inline]
    pub fn now() -> Self {
        Instant(std::time::Instant::now())
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        Duration::from(self.0.elapsed())
    }

    #[inline]
    pub fn elapsed_since(&self, since: Instant) -> Duration {
        self.saturating_sub(since)
    }

    #[inline]
    pub fn saturating_sub(&self, other: Instant) -> Duration {
        Duration::from(self.0.saturating_duration_since(other.0))
    }
}

impl Default for Instant {
    fn default() -> Self {
        Instant::now()
    }
}

impl PartialEq for Instant {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Instant {}

impl PartialOrd for Instant {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Instant {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl std::ops::Add<Duration> for Instant {
    type Output = Instant;

    fn add(self, rhs: Duration) -> Self::Output {
        Instant(self.0 + std::time::Duration::from(rhs))
    }
}

impl std::ops::Sub<Duration> for Instant {
    type Output = Instant;

    fn sub(self, rhs: Duration) -> Self::Output {
        Instant(self.0 - std::time::Duration::from(rhs))
    }
}

impl std::ops::Sub for Instant {
    type Output = Duration;

    fn sub(self, rhs: Instant) -> Duration {
        self.saturating_sub(rhs)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn elapsed_is_nonnegative() {
        let t = Instant::now();
        std::thread::sleep(std::time::Duration::from_millis(1));
        assert!(t.elapsed() >= Duration::from_millis(1));
    }
}
