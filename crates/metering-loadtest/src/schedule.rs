//! Piecewise-linear arrival rate curve
//!
//! Rates are expressed per `time_unit` (the simulated scrape interval). The
//! curve starts at zero and each stage linearly moves the rate from the
//! previous stage's target to its own target over the stage duration.

use std::time::Duration;

const EPSILON: f64 = 1e-9;

/// One segment of the load curve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stage {
    /// Rate reached at the end of the stage, per time unit
    pub target: f64,
    pub duration: Duration,
}

/// Immutable load curve
#[derive(Debug, Clone, PartialEq)]
pub struct ArrivalSchedule {
    time_unit: Duration,
    stages: Vec<Stage>,
}

impl ArrivalSchedule {
    /// Build a schedule from explicit stages, starting at rate zero
    pub fn new(time_unit: Duration, stages: Vec<Stage>) -> Self {
        Self { time_unit, stages }
    }

    /// Ramp up to `target` over `ramp_up`, hold, then ramp down to zero over
    /// `ramp_down`, all within `total`.
    ///
    /// When the ramps do not fit, the steady stage is zero-length.
    pub fn ramping(
        target: f64,
        total: Duration,
        ramp_up: Duration,
        ramp_down: Duration,
        time_unit: Duration,
    ) -> Self {
        let steady = total.saturating_sub(ramp_up.saturating_add(ramp_down));

        Self::new(
            time_unit,
            vec![
                Stage {
                    target,
                    duration: ramp_up,
                },
                Stage {
                    target,
                    duration: steady,
                },
                Stage {
                    target: 0.0,
                    duration: ramp_down,
                },
            ],
        )
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn time_unit(&self) -> Duration {
        self.time_unit
    }

    /// Highest target rate of any stage
    pub fn peak_rate(&self) -> f64 {
        self.stages
            .iter()
            .map(|stage| stage.target)
            .fold(0.0, f64::max)
    }

    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|stage| stage.duration).sum()
    }

    /// Target rate, per time unit, at `elapsed` since the start of the run
    pub fn rate_at(&self, elapsed: Duration) -> f64 {
        let mut from = 0.0;
        let mut stage_start = Duration::ZERO;

        for stage in &self.stages {
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                let progress = (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
                return from + (stage.target - from) * progress;
            }
            from = stage.target;
            stage_start = stage_end;
        }

        from
    }

    /// Index of the stage active at `elapsed`, `None` once the run is over
    pub fn stage_at(&self, elapsed: Duration) -> Option<usize> {
        let mut stage_end = Duration::ZERO;
        for (index, stage) in self.stages.iter().enumerate() {
            stage_end += stage.duration;
            if elapsed < stage_end {
                return Some(index);
            }
        }
        None
    }

    /// Expected number of arrivals between the start and `elapsed`
    pub fn arrivals_until(&self, elapsed: Duration) -> f64 {
        let mut total = 0.0;
        for segment in self.segments() {
            if elapsed <= segment.start {
                break;
            }
            let span = (elapsed - segment.start).min(segment.duration).as_secs_f64();
            let rate_end = segment.rate_at(span);
            total += (segment.from + rate_end) / 2.0 * span;
        }
        total
    }

    /// Whole number of arrivals the schedule produces
    pub fn total_arrivals(&self) -> u64 {
        (self.arrivals_until(self.total_duration()) + EPSILON).floor() as u64
    }

    /// Offset from the start at which the `n`-th arrival (1-based) is due,
    /// `None` if the schedule ends first
    pub fn arrival_offset(&self, n: u64) -> Option<Duration> {
        if n == 0 {
            return Some(Duration::ZERO);
        }

        let mut remaining = n as f64;
        for segment in self.segments() {
            let arrivals = segment.arrivals();
            if remaining <= arrivals + EPSILON {
                let offset = segment.solve(remaining.min(arrivals));
                return Some(segment.start + Duration::from_secs_f64(offset));
            }
            remaining -= arrivals;
        }

        None
    }

    /// Stages as per-second rate segments with absolute start offsets
    fn segments(&self) -> impl Iterator<Item = Segment> + '_ {
        let unit = self.time_unit.as_secs_f64();
        let mut from = 0.0;
        let mut start = Duration::ZERO;

        self.stages.iter().map(move |stage| {
            let segment = Segment {
                start,
                duration: stage.duration,
                from: from / unit,
                to: stage.target / unit,
            };
            from = stage.target;
            start += stage.duration;
            segment
        })
    }
}

/// Linear per-second rate segment
struct Segment {
    start: Duration,
    duration: Duration,
    from: f64,
    to: f64,
}

impl Segment {
    fn rate_at(&self, secs: f64) -> f64 {
        let total = self.duration.as_secs_f64();
        if total <= 0.0 {
            return self.to;
        }
        self.from + (self.to - self.from) * (secs / total)
    }

    fn arrivals(&self) -> f64 {
        (self.from + self.to) / 2.0 * self.duration.as_secs_f64()
    }

    /// Seconds into the segment at which `m` arrivals have accrued
    fn solve(&self, m: f64) -> f64 {
        let total = self.duration.as_secs_f64();
        if m <= 0.0 || total <= 0.0 {
            return 0.0;
        }

        // from * x + slope / 2 * x^2 = m, in the form that stays stable for
        // flat and decreasing segments.
        let half_slope = (self.to - self.from) / (2.0 * total);
        let discriminant = (self.from * self.from + 4.0 * half_slope * m).max(0.0);
        let denominator = self.from + discriminant.sqrt();
        if denominator <= 0.0 {
            return total;
        }

        (2.0 * m / denominator).clamp(0.0, total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn minutes(m: u64) -> Duration {
        Duration::from_secs(m * 60)
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_ramping_curve() {
        let schedule = ArrivalSchedule::ramping(
            100.0,
            minutes(12),
            minutes(2),
            minutes(1),
            Duration::from_secs(30),
        );

        assert_eq!(schedule.total_duration(), minutes(12));
        assert!(approx(schedule.rate_at(Duration::ZERO), 0.0));
        assert!(approx(schedule.rate_at(minutes(1)), 50.0));
        assert!(approx(schedule.rate_at(minutes(2)), 100.0));
        assert!(approx(schedule.rate_at(minutes(6)), 100.0));
        assert!(approx(schedule.rate_at(minutes(11)), 100.0));
        assert!(approx(schedule.rate_at(Duration::from_secs(690)), 50.0));
        assert!(approx(schedule.rate_at(minutes(12)), 0.0));
    }

    #[test]
    fn test_steady_stage_clamped_to_zero() {
        let schedule = ArrivalSchedule::ramping(
            100.0,
            minutes(2),
            minutes(2),
            minutes(1),
            Duration::from_secs(30),
        );

        assert_eq!(schedule.stages()[1].duration, Duration::ZERO);
        assert_eq!(schedule.total_duration(), minutes(3));
        assert!(approx(schedule.rate_at(minutes(2)), 100.0));
    }

    #[test]
    fn test_no_ramps_starts_at_target() {
        let schedule = ArrivalSchedule::ramping(
            10.0,
            minutes(1),
            Duration::ZERO,
            Duration::ZERO,
            Duration::from_secs(1),
        );

        assert!(approx(schedule.rate_at(Duration::ZERO), 10.0));
        assert_eq!(schedule.stage_at(Duration::ZERO), Some(1));
        assert_eq!(schedule.stage_at(minutes(1)), None);
        assert_eq!(schedule.total_arrivals(), 600);
        assert_eq!(
            schedule.arrival_offset(1),
            Some(Duration::from_millis(100))
        );
        assert_eq!(schedule.arrival_offset(601), None);
    }

    #[test]
    fn test_arrivals_follow_ramp() {
        // 0 -> 60/s over 10s, then 60/s for 10s.
        let schedule = ArrivalSchedule::new(
            Duration::from_secs(1),
            vec![
                Stage {
                    target: 60.0,
                    duration: Duration::from_secs(10),
                },
                Stage {
                    target: 60.0,
                    duration: Duration::from_secs(10),
                },
            ],
        );

        assert!(approx(schedule.arrivals_until(Duration::from_secs(10)), 300.0));
        assert!(approx(schedule.arrivals_until(Duration::from_secs(20)), 900.0));
        assert_eq!(schedule.total_arrivals(), 900);

        // Half of the ramp's arrivals land in its last ~29% of time.
        let offset = schedule.arrival_offset(150).unwrap().as_secs_f64();
        assert!((offset - 50f64.sqrt()).abs() < 1e-6);

        let offset = schedule.arrival_offset(360).unwrap().as_secs_f64();
        assert!((offset - 11.0).abs() < 1e-6);
    }

    #[test]
    fn test_ramp_down_arrivals() {
        let schedule = ArrivalSchedule::new(
            Duration::from_secs(1),
            vec![
                Stage {
                    target: 10.0,
                    duration: Duration::ZERO,
                },
                Stage {
                    target: 0.0,
                    duration: Duration::from_secs(10),
                },
            ],
        );

        assert_eq!(schedule.total_arrivals(), 50);
        let last = schedule.arrival_offset(50).unwrap();
        assert!(approx(last.as_secs_f64(), 10.0));
        // First half of the arrivals accrue before the midpoint.
        assert!(schedule.arrival_offset(25).unwrap() < Duration::from_secs(5));
    }

    #[test]
    fn test_time_unit_scales_rate() {
        let schedule = ArrivalSchedule::ramping(
            30.0,
            minutes(1),
            Duration::ZERO,
            Duration::ZERO,
            Duration::from_secs(30),
        );
        // 30 per 30s = 1/s
        assert_eq!(schedule.total_arrivals(), 60);
        assert!(approx(schedule.peak_rate(), 30.0));
    }

    proptest! {
        #[test]
        fn prop_rate_bounded_by_peak(
            target in 1.0f64..1000.0,
            total in 1u64..120,
            up in 0u64..60,
            down in 0u64..60,
            at in 0u64..200,
        ) {
            let schedule = ArrivalSchedule::ramping(
                target,
                Duration::from_secs(total),
                Duration::from_secs(up),
                Duration::from_secs(down),
                Duration::from_secs(1),
            );
            let rate = schedule.rate_at(Duration::from_secs(at));
            prop_assert!(rate >= 0.0);
            prop_assert!(rate <= target + 1e-9);
            prop_assert!(schedule.total_duration() >= Duration::from_secs(total.max(up + down)));
        }

        #[test]
        fn prop_arrival_offsets_monotonic(
            target in 1.0f64..50.0,
            up in 0u64..10,
            steady in 0u64..10,
            down in 0u64..10,
        ) {
            let schedule = ArrivalSchedule::ramping(
                target,
                Duration::from_secs(up + steady + down),
                Duration::from_secs(up),
                Duration::from_secs(down),
                Duration::from_secs(1),
            );
            let total = schedule.total_arrivals();
            let mut previous = Duration::ZERO;
            for n in 1..=total {
                let offset = schedule.arrival_offset(n).unwrap();
                prop_assert!(offset >= previous);
                prop_assert!(offset <= schedule.total_duration());
                previous = offset;
            }
            prop_assert!(schedule.arrival_offset(total + 1).is_none());
        }
    }
}
