//! Failure injection for the simulated IOM.
//!
//! Lets tests make individual driver calls fail with a chosen
//! [`DriverStatus`], either deterministically or at a seeded random rate.

use std::collections::HashMap;
use std::fmt;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use ueidaq_core::{DriverResult, DriverStatus};

/// Driver operation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    /// `open_session`
    OpenSession,
    /// `close_session`
    CloseSession,
    /// `set_scan_rate`
    SetScanRate,
    /// `add_channels`
    AddChannels,
    /// `request_input_size`
    RequestInputSize,
    /// `start`
    Start,
    /// `stop`
    Stop,
    /// `refresh`
    Refresh,
}

impl fmt::Display for MockOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OpenSession => "open_session",
            Self::CloseSession => "close_session",
            Self::SetScanRate => "set_scan_rate",
            Self::AddChannels => "add_channels",
            Self::RequestInputSize => "request_input_size",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Refresh => "refresh",
        };
        write!(f, "{}", name)
    }
}

/// One way of failing.
#[derive(Debug, Clone)]
pub enum FailureScenario {
    /// Fail the next `times` calls of `op`.
    Next {
        /// Operation to fail.
        op: MockOp,
        /// Status returned by the failing calls.
        status: DriverStatus,
        /// Failures left.
        times: u32,
    },
    /// Let `successes` calls of `op` through, then fail every later one.
    After {
        /// Operation to fail.
        op: MockOp,
        /// Calls let through first.
        successes: u32,
        /// Status returned by the failing calls.
        status: DriverStatus,
    },
    /// Fail calls of `op` (any operation when `None`) with probability `rate`.
    Random {
        /// Operation to fail, any when `None`.
        op: Option<MockOp>,
        /// Failure probability per call, 0.0 to 1.0.
        rate: f64,
        /// Status returned by the failing calls.
        status: DriverStatus,
    },
}

/// Ordered set of failure scenarios plus the bookkeeping they need.
#[derive(Debug)]
pub struct FailurePlan {
    scenarios: Vec<FailureScenario>,
    counts: HashMap<MockOp, u32>,
    rng: ChaCha8Rng,
}

impl Default for FailurePlan {
    fn default() -> Self {
        Self::seeded(0)
    }
}

impl FailurePlan {
    /// Empty plan whose random scenarios draw from a fixed seed.
    pub fn seeded(seed: u64) -> Self {
        Self {
            scenarios: Vec::new(),
            counts: HashMap::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Add a scenario. Scenarios are evaluated in insertion order.
    pub fn push(&mut self, scenario: FailureScenario) {
        self.scenarios.push(scenario);
    }

    /// Drop every scenario.
    pub fn clear(&mut self) {
        self.scenarios.clear();
        self.counts.clear();
    }

    /// Decide the outcome of one call of `op`.
    pub fn check(&mut self, op: MockOp) -> DriverResult<()> {
        let seen = {
            let count = self.counts.entry(op).or_insert(0);
            *count += 1;
            *count
        };

        let mut verdict = Ok(());
        let mut exhausted = None;
        for (index, scenario) in self.scenarios.iter_mut().enumerate() {
            match scenario {
                FailureScenario::Next {
                    op: target,
                    status,
                    times,
                } if *target == op && *times > 0 => {
                    *times -= 1;
                    if *times == 0 {
                        exhausted = Some(index);
                    }
                    verdict = Err(*status);
                    break;
                }
                FailureScenario::After {
                    op: target,
                    successes,
                    status,
                } if *target == op && seen > *successes => {
                    verdict = Err(*status);
                    break;
                }
                FailureScenario::Random {
                    op: target,
                    rate,
                    status,
                } if target.map_or(true, |t| t == op) => {
                    if self.rng.gen::<f64>() < *rate {
                        verdict = Err(*status);
                        break;
                    }
                }
                _ => {}
            }
        }

        if let Some(index) = exhausted {
            self.scenarios.remove(index);
        }
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_fails_exact_count() {
        let mut plan = FailurePlan::default();
        plan.push(FailureScenario::Next {
            op: MockOp::Refresh,
            status: DriverStatus::Timeout,
            times: 2,
        });
        assert_eq!(plan.check(MockOp::Refresh), Err(DriverStatus::Timeout));
        assert_eq!(plan.check(MockOp::Start), Ok(()));
        assert_eq!(plan.check(MockOp::Refresh), Err(DriverStatus::Timeout));
        assert_eq!(plan.check(MockOp::Refresh), Ok(()));
    }

    #[test]
    fn test_after_fails_forever() {
        let mut plan = FailurePlan::default();
        plan.push(FailureScenario::After {
            op: MockOp::AddChannels,
            successes: 1,
            status: DriverStatus::BadParameter,
        });
        assert!(plan.check(MockOp::AddChannels).is_ok());
        assert!(plan.check(MockOp::AddChannels).is_err());
        assert!(plan.check(MockOp::AddChannels).is_err());
    }

    #[test]
    fn test_random_is_reproducible() {
        let run = |seed| {
            let mut plan = FailurePlan::seeded(seed);
            plan.push(FailureScenario::Random {
                op: None,
                rate: 0.5,
                status: DriverStatus::RefreshFailed,
            });
            (0..64)
                .map(|_| plan.check(MockOp::Refresh).is_err())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(7), run(7));
        assert!(run(7).iter().any(|failed| *failed));
        assert!(run(7).iter().any(|failed| !*failed));
    }
}
