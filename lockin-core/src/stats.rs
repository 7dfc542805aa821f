use crate::{Card, Grade, Review};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default)]
pub struct Totals {
    pub total: u32,
    pub lapses: u32,
    pub passes: u32,
}

impl Totals {
    pub fn record(&mut self, g: &Grade) {
        self.total += 1;
        if g.score() < 3 {
            self.lapses += 1;
        } else {
            self.passes += 1;
        }
    }

    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            f64::from(self.passes) / f64::from(self.total)
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct StatsSummary {
    pub totals: Totals,
    pub per_day: BTreeMap<NaiveDate, Totals>,
}

pub fn summarize(reviews: &[Review]) -> StatsSummary {
    let mut summary = StatsSummary::default();
    for r in reviews {
        summary.totals.record(&r.grade);
        let d = r.reviewed_at.date_naive();
        summary.per_day.entry(d).or_default().record(&r.grade);
    }
    summary
}

pub fn daily_streak(reviews: &[Review], today: NaiveDate) -> u32 {
    let per_day = summarize(reviews).per_day;
    let mut streak = 0u32;
    let mut day = today;
    loop {
        if per_day.get(&day).map(|t| t.total > 0).unwrap_or(false) {
            streak += 1;
            day -= Duration::days(1);
        } else {
            break;
        }
    }
    streak
}

/// The deck header tiles: total cards, review-pile membership, due now.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeckProgress {
    pub total: u32,
    pub in_review_pile: u32,
    pub due_now: u32,
}

pub fn deck_progress(cards: &[Card], now: DateTime<Utc>) -> DeckProgress {
    let mut p = DeckProgress::default();
    for c in cards {
        p.total += 1;
        if c.schedule.is_in_review_pile() {
            p.in_review_pile += 1;
        }
        if c.schedule.is_due(now) {
            p.due_now += 1;
        }
    }
    p
}
