//! Synthetic sample generation for free-running mode.

use ueidaq_core::driver::{channel_of, is_timestamp_word};

/// Simple LCG so the same tick always produces the same noise.
#[inline]
fn prng(seed: u64) -> u64 {
    seed.wrapping_mul(1103515245).wrapping_add(12345) & 0x7fffffff
}

/// Raw word a free-running layer delivers for channel word `word` at `tick`.
///
/// The timestamp pseudo-channel yields `tick` itself. Data channels yield a
/// slow triangle around the 24-bit mid-scale code with a little noise, which
/// decodes to a few millivolts on a +/-10 V analog layer.
pub fn synthetic_word(word: u32, tick: u32) -> u32 {
    if is_timestamp_word(word) {
        return tick;
    }
    let channel = channel_of(word);
    let phase = (tick / 16).wrapping_add(channel * 64) % 512;
    let triangle = if phase < 256 { phase } else { 511 - phase };
    let noise = (prng(u64::from(tick) ^ (u64::from(channel) << 32)) & 0x7) as u32;
    0x0080_0000 + triangle * 16 + noise
}

#[cfg(test)]
mod tests {
    use super::*;
    use ueidaq_core::driver::{pack_channel, TIMESTAMP_CHANNEL};

    #[test]
    fn test_timestamp_word_returns_tick() {
        assert_eq!(synthetic_word(TIMESTAMP_CHANNEL, 1234), 1234);
    }

    #[test]
    fn test_data_words_stay_near_mid_scale() {
        for tick in (0..10_000).step_by(37) {
            let raw = synthetic_word(pack_channel(3, 0, 0), tick);
            assert!(raw >= 0x0080_0000);
            assert!(raw < 0x0080_0000 + 0x1000);
        }
    }

    #[test]
    fn test_deterministic() {
        let word = pack_channel(1, 0, 0);
        assert_eq!(synthetic_word(word, 99), synthetic_word(word, 99));
    }
}
