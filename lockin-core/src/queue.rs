use crate::Card;
use chrono::{DateTime, Utc};

/// Cards ready for a review session: in the pile with `due_at <= now`,
/// earliest due first. The sort is stable, so equal due dates keep their
/// arrival order.
pub fn due_queue(cards: &[Card], now: DateTime<Utc>) -> Vec<Card> {
    let mut queue: Vec<Card> = cards
        .iter()
        .filter(|c| c.schedule.is_due(now))
        .cloned()
        .collect();
    queue.sort_by_key(|c| c.schedule.due_at);
    queue
}

pub fn filter_by_text(cards: &[Card], query: &str) -> Vec<Card> {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return cards.to_vec();
    }
    cards
        .iter()
        .filter(|c| {
            c.front.to_lowercase().contains(&q)
                || c.back.to_lowercase().contains(&q)
                || c.tags.iter().any(|t| t.to_lowercase().contains(&q))
        })
        .cloned()
        .collect()
}

pub fn filter_by_tag(cards: &[Card], tag: &str) -> Vec<Card> {
    let q = tag.trim().to_lowercase();
    cards
        .iter()
        .filter(|c| c.tags.iter().any(|t| t.to_lowercase() == q))
        .cloned()
        .collect()
}

pub fn filter_in_pile(cards: &[Card]) -> Vec<Card> {
    cards
        .iter()
        .filter(|c| c.schedule.is_in_review_pile())
        .cloned()
        .collect()
}
