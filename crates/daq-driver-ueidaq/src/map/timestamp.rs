//! Hardware timestamp extension.

/// Extends the 32-bit wrapping hardware timestamp to a monotonic 64-bit
/// counter.
///
/// A raw value smaller than the previous one counts as one wrap. The first
/// value seen never does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimestampCorrector {
    last_raw: Option<u32>,
    wraps: u64,
}

impl TimestampCorrector {
    /// Corrector that has seen nothing yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next raw timestamp and return its corrected value.
    pub fn correct(&mut self, raw: u32) -> u64 {
        if self.last_raw.is_some_and(|last| raw < last) {
            self.wraps += 1;
        }
        self.last_raw = Some(raw);
        (self.wraps << 32) | u64::from(raw)
    }

    /// Whether `raw` equals the last timestamp fed in.
    pub fn is_repeat(&self, raw: u32) -> bool {
        self.last_raw == Some(raw)
    }

    /// Last raw timestamp fed in.
    pub fn last_raw(&self) -> Option<u32> {
        self.last_raw
    }

    /// Number of wraps counted so far.
    pub fn wraps(&self) -> u64 {
        self.wraps
    }

    /// Corrected value of the last timestamp fed in.
    pub fn current(&self) -> Option<u64> {
        self.last_raw
            .map(|raw| (self.wraps << 32) | u64::from(raw))
    }

    /// Forget all history.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wraparound_sequence() {
        let mut ts = TimestampCorrector::new();
        assert_eq!(ts.correct(0xFFFF_FFF0), 0xFFFF_FFF0);
        assert_eq!(ts.correct(0xFFFF_FFF5), 0xFFFF_FFF5);
        assert_eq!(ts.correct(0x0000_0002), 0x1_0000_0002);
        assert_eq!(ts.correct(0x0000_0010), 0x1_0000_0010);
        assert_eq!(ts.wraps(), 1);
    }

    #[test]
    fn test_first_sample_is_not_a_wrap() {
        let mut ts = TimestampCorrector::new();
        assert_eq!(ts.correct(0), 0);
        assert_eq!(ts.wraps(), 0);
        assert_eq!(ts.current(), Some(0));
    }

    #[test]
    fn test_repeat_and_reset() {
        let mut ts = TimestampCorrector::new();
        assert!(!ts.is_repeat(5));
        ts.correct(5);
        assert!(ts.is_repeat(5));
        ts.reset();
        assert_eq!(ts.last_raw(), None);
        assert_eq!(ts.current(), None);
    }
}
