/// Plumo-fetch timestamp.
///
/// Internally i64 microseconds from unix epoch. Announce times, response
/// arrival times, and import deadlines are all instances of this type, so
/// the event loop can compare them directly and turn the difference into a
/// sleep duration.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Construct a new timestamp of "now".
    pub fn now() -> Self {
        std::time::SystemTime::now().into()
    }

    /// Construct a timestamp from i64 microseconds since unix epoch.
    pub fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// Get the i64 microseconds since unix epoch.
    pub fn as_micros(&self) -> i64 {
        self.0
    }

    /// The duration from `earlier` until this timestamp, or
    /// `Duration::ZERO` if this timestamp is not later than `earlier`.
    ///
    /// `deadline.saturating_since(Timestamp::now())` is the remaining wait
    /// for a deadline, zero once it is due.
    pub fn saturating_since(&self, earlier: Timestamp) -> std::time::Duration {
        if self.0 <= earlier.0 {
            std::time::Duration::ZERO
        } else {
            std::time::Duration::from_micros((self.0 - earlier.0) as u64)
        }
    }

    /// This timestamp moved `dur` towards the past, saturating at the
    /// unix epoch.
    pub fn saturating_sub(&self, dur: std::time::Duration) -> Timestamp {
        Timestamp(self.0.saturating_sub(dur.as_micros() as i64).max(0))
    }
}

impl std::ops::Add<std::time::Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: std::time::Duration) -> Self::Output {
        Timestamp(self.0.saturating_add(rhs.as_micros() as i64))
    }
}

impl std::ops::AddAssign<std::time::Duration> for Timestamp {
    fn add_assign(&mut self, rhs: std::time::Duration) {
        *self = *self + rhs;
    }
}

impl From<std::time::SystemTime> for Timestamp {
    fn from(t: std::time::SystemTime) -> Self {
        Self(
            t.duration_since(std::time::SystemTime::UNIX_EPOCH)
                .expect("invalid system time")
                .as_micros() as i64,
        )
    }
}

impl From<Timestamp> for std::time::SystemTime {
    fn from(t: Timestamp) -> Self {
        std::time::SystemTime::UNIX_EPOCH
            + std::time::Duration::from_micros(t.0 as u64)
    }
}
