use std::{
    fmt,
    ops::{Add, AddAssign, Sub, SubAssign},
    str::FromStr,
    time::SystemTime,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, de};

use crate::Duration;

/// Nanoseconds since the Unix epoch. Good till the year 2554.
///
/// Wire timestamps (OFLOW frame header, ITM global timestamp packets) are
/// carried as this type end to end so that re-sequencing and interval
/// reporting never have to convert back and forth.
#[derive(Copy, Clone, Debug, Default, Serialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[repr(C)]
pub struct Nanos(pub u64);

impl Nanos {
    pub const ZERO: Self = Self(0);
    pub const MAX: Self = Self(u64::MAX);

    #[inline]
    pub fn now() -> Self {
        let dur = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default();
        Nanos(dur.as_nanos() as u64)
    }

    #[inline]
    pub const fn from_secs(secs: u64) -> Self {
        Nanos(secs * 1_000_000_000)
    }

    #[inline]
    pub const fn from_millis(millis: u64) -> Self {
        Nanos(millis * 1_000_000)
    }

    #[inline]
    pub const fn from_micros(micros: u64) -> Self {
        Nanos(micros * 1_000)
    }

    #[inline]
    pub const fn from_nanos(nanos: u64) -> Self {
        Nanos(nanos)
    }

    #[inline]
    pub fn from_secs_f64(secs: f64) -> Self {
        Nanos((secs * 1_000_000_000.0) as u64)
    }

    pub fn from_rfc3339(s: &str) -> Option<Self> {
        let dt = DateTime::parse_from_rfc3339(s).ok()?;
        let nanos = dt.timestamp_nanos_opt()?;
        if nanos < 0 {
            return None;
        }
        Some(Nanos(nanos as u64))
    }

    #[inline]
    pub const fn as_secs(&self) -> u64 {
        self.0 / 1_000_000_000
    }

    #[inline]
    pub const fn as_millis(&self) -> u64 {
        self.0 / 1_000_000
    }

    #[inline]
    pub const fn as_micros(&self) -> u64 {
        self.0 / 1_000
    }

    #[inline]
    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    #[inline]
    pub fn saturating_sub(&self, rhs: Nanos) -> Duration {
        Duration(self.0.saturating_sub(rhs.0))
    }

    #[inline]
    pub fn elapsed(&self) -> Duration {
        Nanos::now().saturating_sub(*self)
    }

    /// UTC `DateTime` for display/logging; wire timestamps themselves stay raw `u64`.
    pub fn to_datetime_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.as_secs() as i64, (self.0 % 1_000_000_000) as u32)
    }

    pub fn to_rfc3339_utc(&self) -> String {
        self.to_datetime_utc()
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default()
    }

    pub fn round_to_secs(&self) -> Self {
        Nanos::from_secs(self.as_secs())
    }
}

impl fmt::Display for Nanos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 < 1_000 {
            write!(f, "{}ns", self.0)
        } else if self.0 < 1_000_000 {
            write!(f, "{:.3}us", self.0 as f64 / 1_000.0)
        } else if self.0 < 1_000_000_000 {
            write!(f, "{:.3}ms", self.0 as f64 / 1_000_000.0)
        } else {
            write!(f, "{}", self.to_rfc3339_utc())
        }
    }
}

impl FromStr for Nanos {
    type Err = humantime::DurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(nanos) = Nanos::from_rfc3339(s) {
            return Ok(nanos);
        }
        let dur: std::time::Duration = humantime::parse_duration(s)?;
        Ok(Nanos(dur.as_nanos() as u64))
    }
}

impl<'de> Deserialize<'de> for Nanos {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct NanosVisitor;

        impl de::Visitor<'_> for NanosVisitor {
            type Value = Nanos;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a u64 nanosecond count, an RFC3339 timestamp, or a humantime duration string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Nanos, E> {
                Ok(Nanos(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Nanos, E> {
                Ok(Nanos(v as u64))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Nanos, E> {
                v.parse().map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_any(NanosVisitor)
    }
}

impl From<std::time::Duration> for Nanos {
    fn from(d: std::time::Duration) -> Self {
        Nanos(d.as_nanos() as u64)
    }
}

impl Add<Duration> for Nanos {
    type Output = Nanos;

    fn add(self, rhs: Duration) -> Self::Output {
        Nanos(self.0 + rhs.0)
    }
}

impl Sub<Duration> for Nanos {
    type Output = Nanos;

    fn sub(self, rhs: Duration) -> Self::Output {
        Nanos(self.0.saturating_sub(rhs.0))
    }
}

impl Sub<Nanos> for Nanos {
    type Output = Duration;

    fn sub(self, rhs: Nanos) -> Self::Output {
        Duration(self.0.saturating_sub(rhs.0))
    }
}

impl AddAssign<Duration> for Nanos {
    fn add_assign(&mut self, rhs: Duration) {
        self.0 += rhs.0;
    }
}

impl SubAssign<Duration> for Nanos {
    fn sub_assign(&mut self, rhs: Duration) {
        self.0 = self.0.saturating_sub(rhs.0);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip_secs() {
        let n = Nanos::from_secs(1_700_000_000);
        assert_eq!(n.as_secs(), 1_700_000_000);
    }

    #[test]
    fn parses_humantime() {
        let n: Nanos = "500ms".parse().unwrap();
        assert_eq!(n, Nanos::from_millis(500));
    }

    #[test]
    fn parses_rfc3339() {
        let n = Nanos::from_rfc3339("2024-01-01T00:00:00Z").unwrap();
        assert_eq!(n.as_secs(), 1_704_067_200);
    }

    #[test]
    fn display_small_units() {
        assert_eq!(Nanos(500).to_string(), "500ns");
        assert_eq!(Nanos::from_micros(500).to_string(), "500.000us");
    }

    #[test]
    fn saturating_sub_never_underflows() {
        let a = Nanos(10);
        let b = Nanos(20);
        assert_eq!(a.saturating_sub(b), Duration::ZERO);
    }
}
