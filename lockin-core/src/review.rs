use crate::{
    queue, Card, CardId, CardSchedule, Clock, CoreError, DeckId, Grade, Repository, Review,
    SchedulingPolicy, SystemClock,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Applies a graded review end to end: load the card, run the scheduling
/// policy, persist the replacement schedule, append the review log row.
///
/// The persistence step is a compare-and-swap keyed on the schedule the
/// card was loaded with, so two concurrent reviews of the same card cannot
/// silently lose one update: the second write surfaces `Conflict` and is
/// discarded. Recomputing from the fresh pre-state is always safe — the
/// policy is a pure function.
pub struct ReviewService {
    repo: Arc<dyn Repository>,
    policy: Arc<dyn SchedulingPolicy>,
    clock: Box<dyn Clock>,
}

impl ReviewService {
    pub fn new(repo: Arc<dyn Repository>, policy: Arc<dyn SchedulingPolicy>) -> Self {
        Self::with_clock(repo, policy, Box::new(SystemClock))
    }

    pub fn with_clock(
        repo: Arc<dyn Repository>,
        policy: Arc<dyn SchedulingPolicy>,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self { repo, policy, clock }
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Grade one card. `now` falls back to the injected clock when omitted.
    pub async fn review_card(
        &self,
        card_id: CardId,
        grade: Grade,
        now: Option<DateTime<Utc>>,
    ) -> Result<CardSchedule, CoreError> {
        let now = now.unwrap_or_else(|| self.clock.now());
        let card = self.repo.get_card(card_id).await?;
        let next = self.policy.review(&card.schedule, grade, now);
        let updated = self
            .repo
            .update_schedule(card_id, card.schedule.last_reviewed_at, &next)
            .await?;
        let review = Review::new(card_id, grade, now, next.interval_days, next.ease_factor);
        self.repo.insert_review(&review).await?;
        Ok(updated.schedule)
    }

    /// Due cards for a session, earliest first, optionally capped.
    pub async fn due_queue(
        &self,
        deck_id: Option<DeckId>,
        now: Option<DateTime<Utc>>,
        max: Option<usize>,
    ) -> Result<Vec<Card>, CoreError> {
        let now = now.unwrap_or_else(|| self.clock.now());
        let cards = self.repo.list_cards(deck_id).await?;
        let mut due = queue::due_queue(&cards, now);
        if let Some(m) = max {
            due.truncate(m);
        }
        Ok(due)
    }
}
