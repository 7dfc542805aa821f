use crate::{CardSchedule, Grade, Rating, EF_MIN, INTERVAL_MAX_DAYS};
use chrono::{DateTime, Duration, Utc};

/// A scheduling policy maps (current schedule, grade, now) to the
/// replacement schedule. Pure: no I/O, no ambient clock, total over
/// sanitized input, identical output for identical input.
///
/// Two non-equivalent policies ship and are selected at construction time;
/// their formulas are never merged.
pub trait SchedulingPolicy: Send + Sync {
    fn name(&self) -> &'static str;
    fn review(&self, schedule: &CardSchedule, grade: Grade, now: DateTime<Utc>) -> CardSchedule;
}

/// Ease factors are stored rounded to 4 decimal places.
fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

/// The canonical SM-2-style policy, graded on the 0..5 quality scale.
///
/// Fixed-formula variant: a score below 3 is a lapse (streak reset,
/// interval back to one day); successes walk the 1 / 6 / round(base * EF)
/// ladder, where interval growth uses the ease factor from *before* this
/// review and a zero prior interval falls back to a base of 6.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sm2Policy;

impl SchedulingPolicy for Sm2Policy {
    fn name(&self) -> &'static str {
        "sm2"
    }

    fn review(&self, schedule: &CardSchedule, grade: Grade, now: DateTime<Utc>) -> CardSchedule {
        let prior = schedule.sanitized();
        let q = grade.score();

        let (repetitions, interval_days) = if q < 3 {
            (0, 1)
        } else {
            let reps = prior.repetitions + 1;
            let interval = match reps {
                1 => 1,
                2 => 6,
                _ => {
                    let base = if prior.interval_days == 0 {
                        6
                    } else {
                        prior.interval_days
                    };
                    (base as f64 * prior.ease_factor).round() as u32
                }
            };
            (reps, interval)
        };

        let miss = (5 - q) as f64;
        let ease_factor = round4((prior.ease_factor + 0.1 - miss * (0.08 + miss * 0.02)).max(EF_MIN));

        CardSchedule {
            ease_factor,
            repetitions,
            interval_days,
            due_at: Some(now + Duration::days(i64::from(interval_days))),
            last_reviewed_at: Some(now),
        }
    }
}

/// The four-label ladder used by the card-review UI surface.
///
/// `again` makes the card due immediately; the other three scale the
/// current interval and clamp it into [lower bound, 365]. Ease moves by
/// fixed steps (floor 1.3, no ceiling) instead of the SM-2 formula.
#[derive(Clone, Copy, Debug, Default)]
pub struct StepPolicy;

impl SchedulingPolicy for StepPolicy {
    fn name(&self) -> &'static str {
        "steps"
    }

    fn review(&self, schedule: &CardSchedule, grade: Grade, now: DateTime<Utc>) -> CardSchedule {
        let prior = schedule.sanitized();
        let days = prior.interval_days as f64;

        let (interval_days, ease) = match grade.rating() {
            Rating::Again => (0, prior.ease_factor - 0.2),
            Rating::Hard => (step(days * 1.2, 1), prior.ease_factor - 0.05),
            Rating::Good => (step(days * 2.0, 2), prior.ease_factor),
            Rating::Easy => (step(days * 3.0, 4), prior.ease_factor + 0.1),
        };

        let due_at = if interval_days == 0 {
            now
        } else {
            now + Duration::days(i64::from(interval_days))
        };

        CardSchedule {
            ease_factor: round4(ease.max(EF_MIN)),
            repetitions: prior.repetitions + 1,
            interval_days,
            due_at: Some(due_at),
            last_reviewed_at: Some(now),
        }
    }
}

fn step(scaled: f64, floor: u32) -> u32 {
    let rounded = scaled.round().max(f64::from(floor)) as u32;
    rounded.clamp(floor, INTERVAL_MAX_DAYS)
}

/// Fold a grade sequence through a policy, returning every intermediate
/// schedule. Drives the CLI demo and golden-sequence tests; every grade is
/// applied at the same `now`, like the original demo loop.
pub fn replay(
    policy: &dyn SchedulingPolicy,
    initial: CardSchedule,
    grades: &[Grade],
    now: DateTime<Utc>,
) -> Vec<CardSchedule> {
    let mut states = Vec::with_capacity(grades.len());
    let mut current = initial;
    for grade in grades {
        current = policy.review(&current, *grade, now);
        states.push(current.clone());
    }
    states
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round4_storage_precision() {
        assert_eq!(round4(2.7000000000000002), 2.7);
        assert_eq!(round4(2.48), 2.48);
        assert_eq!(round4(1.2999999), 1.3);
    }

    #[test]
    fn step_respects_floor_and_cap() {
        assert_eq!(step(0.0, 1), 1);
        assert_eq!(step(0.0, 4), 4);
        assert_eq!(step(1.2, 1), 1);
        assert_eq!(step(500.0, 2), 365);
    }
}
