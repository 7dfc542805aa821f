use chrono::{DateTime, Duration, TimeZone, Utc};
use lockin_core::{
    replay, CardSchedule, Grade, Rating, SchedulingPolicy, Sm2Policy, StepPolicy, EF_MIN,
};

fn at(h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, h, 0, 0).unwrap()
}

fn fresh(now: DateTime<Utc>) -> CardSchedule {
    CardSchedule::new_in_pile(now)
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn golden_sequence() {
    // The canonical regression sequence: quality grades [5,5,5,4,2,5]
    // applied stepwise from a brand-new card.
    let now = at(8);
    let grades: Vec<Grade> = [5, 5, 5, 4, 2, 5].into_iter().map(Grade::Score).collect();
    let states = replay(&Sm2Policy, fresh(now), &grades, now);

    let reps: Vec<u32> = states.iter().map(|s| s.repetitions).collect();
    let intervals: Vec<u32> = states.iter().map(|s| s.interval_days).collect();
    let eases: Vec<f64> = states.iter().map(|s| s.ease_factor).collect();

    assert_eq!(reps, vec![1, 2, 3, 4, 0, 1]);
    assert_eq!(intervals, vec![1, 6, 16, 45, 1, 1]);
    let expected = [2.6, 2.7, 2.8, 2.8, 2.48, 2.58];
    for (got, want) in eases.iter().zip(expected) {
        assert!(approx(*got, want), "ease {got} != {want}");
    }
}

#[test]
fn ease_never_drops_below_floor() {
    let now = at(8);
    let mut floor_state = fresh(now);
    floor_state.ease_factor = EF_MIN;

    for q in -3..=9 {
        let out = Sm2Policy.review(&floor_state, Grade::Score(q), now);
        assert!(out.ease_factor >= EF_MIN, "sm2 ease {} at q={q}", out.ease_factor);
    }
    for r in [Rating::Again, Rating::Hard, Rating::Good, Rating::Easy] {
        let sm2 = Sm2Policy.review(&floor_state, Grade::Label(r), now);
        let step = StepPolicy.review(&floor_state, Grade::Label(r), now);
        assert!(sm2.ease_factor >= EF_MIN);
        assert!(step.ease_factor >= EF_MIN);
    }
}

#[test]
fn perfect_streak_progression() {
    let now = at(8);
    let grades = vec![Grade::Score(5); 8];
    let states = replay(&Sm2Policy, fresh(now), &grades, now);

    let reps: Vec<u32> = states.iter().map(|s| s.repetitions).collect();
    assert_eq!(reps, (1..=8).collect::<Vec<u32>>());

    assert_eq!(states[0].interval_days, 1);
    assert_eq!(states[1].interval_days, 6);
    for pair in states[1..].windows(2) {
        assert!(pair[1].interval_days >= pair[0].interval_days);
        assert!(pair[1].interval_days >= 6);
    }
}

#[test]
fn lapse_resets_streak_and_interval() {
    let now = at(8);
    let mut mature = fresh(now);
    mature.repetitions = 7;
    mature.interval_days = 40;
    mature.ease_factor = 2.1;

    for q in [0, 1, 2] {
        let out = Sm2Policy.review(&mature, Grade::Score(q), now);
        assert_eq!(out.repetitions, 0);
        assert_eq!(out.interval_days, 1);
    }
}

#[test]
fn due_date_is_exactly_now_plus_interval() {
    let now = at(8);
    let mut state = fresh(now);
    for q in [5, 5, 5, 4, 2, 3] {
        state = Sm2Policy.review(&state, Grade::Score(q), now);
        assert_eq!(
            state.due_at,
            Some(now + Duration::days(i64::from(state.interval_days)))
        );
        assert_eq!(state.last_reviewed_at, Some(now));
    }
}

#[test]
fn zero_prior_interval_grows_from_base_six() {
    let now = at(8);
    let mut state = fresh(now);
    state.repetitions = 2;
    state.interval_days = 0;

    let out = Sm2Policy.review(&state, Grade::Score(5), now);
    assert_eq!(out.repetitions, 3);
    assert_eq!(out.interval_days, 15); // round(6 * 2.5)
}

#[test]
fn out_of_range_scores_clamp() {
    let now = at(8);
    let state = fresh(now);

    let high = Sm2Policy.review(&state, Grade::Score(11), now);
    let five = Sm2Policy.review(&state, Grade::Score(5), now);
    assert_eq!(high, five);

    let low = Sm2Policy.review(&state, Grade::Score(-4), now);
    let zero = Sm2Policy.review(&state, Grade::Score(0), now);
    assert_eq!(low, zero);
}

#[test]
fn corrupt_ease_is_sanitized_not_fatal() {
    let now = at(8);
    let mut corrupt = fresh(now);
    corrupt.ease_factor = f64::NAN;

    let out = Sm2Policy.review(&corrupt, Grade::Score(5), now);
    assert!(approx(out.ease_factor, 2.6));

    corrupt.ease_factor = -7.5;
    let out = Sm2Policy.review(&corrupt, Grade::Score(5), now);
    assert!(approx(out.ease_factor, 2.6));
}

#[test]
fn review_is_idempotent_for_same_inputs() {
    let now = at(8);
    let mut state = fresh(now);
    state.repetitions = 3;
    state.interval_days = 16;
    state.ease_factor = 2.8;

    let a = Sm2Policy.review(&state, Grade::Score(4), now);
    let b = Sm2Policy.review(&state, Grade::Score(4), now);
    assert_eq!(a, b);

    let c = StepPolicy.review(&state, Grade::Label(Rating::Hard), now);
    let d = StepPolicy.review(&state, Grade::Label(Rating::Hard), now);
    assert_eq!(c, d);
}

#[test]
fn step_again_is_due_immediately() {
    let now = at(8);
    let mut state = fresh(now);
    state.repetitions = 4;
    state.interval_days = 12;

    let out = StepPolicy.review(&state, Grade::Label(Rating::Again), now);
    assert_eq!(out.interval_days, 0);
    assert_eq!(out.due_at, Some(now));
    assert_eq!(out.repetitions, 5);
    assert!(approx(out.ease_factor, 2.3));
}

#[test]
fn step_ladder_scales_and_floors() {
    let now = at(8);
    let mut state = fresh(now);
    state.interval_days = 10;

    let hard = StepPolicy.review(&state, Grade::Label(Rating::Hard), now);
    assert_eq!(hard.interval_days, 12);
    assert!(approx(hard.ease_factor, 2.45));

    let good = StepPolicy.review(&state, Grade::Label(Rating::Good), now);
    assert_eq!(good.interval_days, 20);
    assert!(approx(good.ease_factor, 2.5));

    let easy = StepPolicy.review(&state, Grade::Label(Rating::Easy), now);
    assert_eq!(easy.interval_days, 30);
    assert!(approx(easy.ease_factor, 2.6));
    assert_eq!(easy.due_at, Some(now + Duration::days(30)));

    // A brand-new card still gets the per-label minimums.
    let new = fresh(now);
    assert_eq!(StepPolicy.review(&new, Grade::Label(Rating::Hard), now).interval_days, 1);
    assert_eq!(StepPolicy.review(&new, Grade::Label(Rating::Good), now).interval_days, 2);
    assert_eq!(StepPolicy.review(&new, Grade::Label(Rating::Easy), now).interval_days, 4);
}

#[test]
fn step_interval_caps_at_one_year() {
    let now = at(8);
    let mut state = fresh(now);
    state.interval_days = 300;

    let out = StepPolicy.review(&state, Grade::Label(Rating::Good), now);
    assert_eq!(out.interval_days, 365);
}

#[test]
fn grade_encodings_cross_map() {
    let now = at(8);
    let state = fresh(now);

    // Labels reach the SM-2 formula through the fixed score mapping.
    let by_label = Sm2Policy.review(&state, Grade::Label(Rating::Good), now);
    let by_score = Sm2Policy.review(&state, Grade::Score(4), now);
    assert_eq!(by_label, by_score);

    // Sub-threshold scores reach the step ladder as `again`.
    let by_score = StepPolicy.review(&state, Grade::Score(1), now);
    let by_label = StepPolicy.review(&state, Grade::Label(Rating::Again), now);
    assert_eq!(by_score, by_label);
}

#[test]
fn grade_parses_both_encodings() {
    assert_eq!("4".parse::<Grade>().unwrap(), Grade::Score(4));
    assert_eq!("good".parse::<Grade>().unwrap(), Grade::Label(Rating::Good));
    assert_eq!(" AGAIN ".parse::<Grade>().unwrap(), Grade::Label(Rating::Again));
    assert!("meh".parse::<Grade>().is_err());
}

#[test]
fn grade_serializes_untagged() {
    assert_eq!(serde_json::to_string(&Grade::Score(5)).unwrap(), "5");
    assert_eq!(
        serde_json::to_string(&Grade::Label(Rating::Easy)).unwrap(),
        "\"easy\""
    );
    assert_eq!(serde_json::from_str::<Grade>("3").unwrap(), Grade::Score(3));
    assert_eq!(
        serde_json::from_str::<Grade>("\"hard\"").unwrap(),
        Grade::Label(Rating::Hard)
    );
}
