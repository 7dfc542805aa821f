use chrono::{DateTime, Utc};
use lockin_core::{Card, CardSchedule, Deck, Grade};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Serialize)]
pub struct DeckOut {
    pub id: Uuid,
    pub name: String,
    pub subject: Option<String>,
    pub course: Option<String>,
    pub instructor: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Deck> for DeckOut {
    fn from(d: Deck) -> Self {
        Self {
            id: d.id,
            name: d.name,
            subject: d.subject,
            course: d.course,
            instructor: d.instructor,
            created_at: d.created_at,
        }
    }
}

#[derive(Deserialize)]
pub struct DeckIn {
    pub name: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub course: Option<String>,
    #[serde(default)]
    pub instructor: Option<String>,
}

#[derive(Serialize)]
pub struct CardOut {
    pub id: Uuid,
    pub deck_id: Uuid,
    pub front: String,
    pub back: String,
    pub tags: Vec<String>,
    pub in_review_pile: bool,
    pub due_at: Option<DateTime<Utc>>,
    pub interval_days: u32,
}

impl From<Card> for CardOut {
    fn from(c: Card) -> Self {
        Self {
            id: c.id,
            deck_id: c.deck_id,
            front: c.front,
            back: c.back,
            tags: c.tags,
            in_review_pile: c.schedule.is_in_review_pile(),
            due_at: c.schedule.due_at,
            interval_days: c.schedule.interval_days,
        }
    }
}

#[derive(Deserialize)]
pub struct CardIn {
    /// Deck id or name
    pub deck: String,
    pub front: String,
    pub back: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// `grade` is a bare integer 0..5 or one of "again"/"hard"/"good"/"easy".
#[derive(Deserialize)]
pub struct ReviewIn {
    pub card_id: Uuid,
    pub grade: Grade,
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct ScheduleOut {
    pub ease_factor: f64,
    pub repetitions: u32,
    pub interval_days: u32,
    pub due_at: Option<DateTime<Utc>>,
    pub last_reviewed_at: Option<DateTime<Utc>>,
    pub in_review_pile: bool,
}

impl From<CardSchedule> for ScheduleOut {
    fn from(s: CardSchedule) -> Self {
        Self {
            in_review_pile: s.is_in_review_pile(),
            ease_factor: s.ease_factor,
            repetitions: s.repetitions,
            interval_days: s.interval_days,
            due_at: s.due_at,
            last_reviewed_at: s.last_reviewed_at,
        }
    }
}

#[derive(Serialize)]
pub struct StatsOut {
    pub total_cards: u32,
    pub in_review_pile: u32,
    pub due_now: u32,
    pub total_reviews: u32,
    pub passes: u32,
    pub lapses: u32,
    pub accuracy: f64,
    pub streak_days: u32,
}
