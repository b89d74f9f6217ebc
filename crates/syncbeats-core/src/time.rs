/// Milliseconds since the Unix epoch from the system wall clock.
pub fn now_millis() -> u64 {
    let dur = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    dur.as_millis() as u64
}

/// Source of wall-clock time. Activation instants are wall-clock values picked
/// by the server, so delays are computed against this clock rather than a
/// monotonic one.
pub trait Clock: Send + Sync + 'static {
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        now_millis()
    }
}
