use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

pub type DeckId = Uuid;
pub type CardId = Uuid;
pub type ReviewId = Uuid;

pub const EF_MIN: f64 = 1.3;
pub const EF_DEFAULT: f64 = 2.5;
/// Upper interval bound applied by the four-label policy.
pub const INTERVAL_MAX_DAYS: u32 = 365;

/// A reviewer's self-assessed recall quality for one card.
///
/// Two encodings coexist in the product: the backend grades on the SM-2
/// quality scale 0..5, the review UI grades with four buttons. A `Grade`
/// carries either; each policy converts the foreign encoding through a
/// fixed mapping (`score`/`rating`). Serializes untagged, so JSON payloads
/// are a bare integer or a lowercase label.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Grade {
    Score(i32),
    Label(Rating),
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Again,
    Hard,
    Good,
    Easy,
}

impl Grade {
    /// SM-2 quality score in 0..=5. Out-of-range scores clamp silently.
    pub fn score(&self) -> i32 {
        match self {
            Grade::Score(q) => (*q).clamp(0, 5),
            Grade::Label(r) => r.as_score(),
        }
    }

    /// Four-label rating; scores map across the lapse threshold.
    pub fn rating(&self) -> Rating {
        match self {
            Grade::Label(r) => *r,
            Grade::Score(q) => Rating::from_score((*q).clamp(0, 5)),
        }
    }
}

impl Rating {
    pub fn as_score(&self) -> i32 {
        match self {
            Rating::Again => 0,
            Rating::Hard => 3,
            Rating::Good => 4,
            Rating::Easy => 5,
        }
    }

    pub fn from_score(q: i32) -> Rating {
        match q {
            i32::MIN..=2 => Rating::Again,
            3 => Rating::Hard,
            4 => Rating::Good,
            _ => Rating::Easy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Rating::Again => "again",
            Rating::Hard => "hard",
            Rating::Good => "good",
            Rating::Easy => "easy",
        }
    }
}

impl FromStr for Grade {
    type Err = crate::CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "again" | "a" => Ok(Grade::Label(Rating::Again)),
            "hard" | "h" => Ok(Grade::Label(Rating::Hard)),
            "good" | "g" => Ok(Grade::Label(Rating::Good)),
            "easy" | "e" => Ok(Grade::Label(Rating::Easy)),
            other => other
                .parse::<i32>()
                .map(Grade::Score)
                .map_err(|_| crate::CoreError::Invalid("grade")),
        }
    }
}

/// The scheduling subset of a card, replaced wholesale on every review.
///
/// `due_at = None` means the card is parked outside the review pile; pile
/// membership is derived from the due date, never stored as its own flag.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CardSchedule {
    pub ease_factor: f64,
    pub repetitions: u32,
    pub interval_days: u32,
    pub due_at: Option<DateTime<Utc>>,
    pub last_reviewed_at: Option<DateTime<Utc>>,
}

impl CardSchedule {
    /// Fresh schedule for a card entering the review pile at `now`.
    pub fn new_in_pile(now: DateTime<Utc>) -> Self {
        Self {
            ease_factor: EF_DEFAULT,
            repetitions: 0,
            interval_days: 0,
            due_at: Some(now),
            last_reviewed_at: None,
        }
    }

    /// Fresh schedule for a card created outside the review pile.
    pub fn parked() -> Self {
        Self {
            ease_factor: EF_DEFAULT,
            repetitions: 0,
            interval_days: 0,
            due_at: None,
            last_reviewed_at: None,
        }
    }

    pub fn is_in_review_pile(&self) -> bool {
        self.due_at.is_some()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        matches!(self.due_at, Some(due) if due <= now)
    }

    /// Copy with corrupt numeric fields replaced by defaults, so the
    /// scheduling formulas stay total over whatever storage hands back.
    pub fn sanitized(&self) -> CardSchedule {
        let mut s = self.clone();
        if !s.ease_factor.is_finite() || s.ease_factor < 0.0 {
            s.ease_factor = EF_DEFAULT;
        }
        s
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Deck {
    pub id: DeckId,
    pub name: String,
    pub subject: Option<String>,
    pub course: Option<String>,
    pub instructor: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Deck {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            subject: None,
            course: None,
            instructor: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Card {
    pub id: CardId,
    pub deck_id: DeckId,
    pub front: String,
    pub back: String,
    pub tags: Vec<String>,
    pub schedule: CardSchedule,
    pub created_at: DateTime<Utc>,
}

impl Card {
    /// New cards land in the review pile due immediately, matching the
    /// deck UI's add behavior.
    pub fn new(deck_id: DeckId, front: impl Into<String>, back: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            deck_id,
            front: front.into(),
            back: back.into(),
            tags: Vec::new(),
            schedule: CardSchedule::new_in_pile(now),
            created_at: now,
        }
    }

    pub fn is_new(&self) -> bool {
        self.schedule.repetitions == 0 && self.schedule.last_reviewed_at.is_none()
    }
}

/// Append-only log row for one graded review. The scheduler never reads
/// these; they feed the stats surfaces.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Review {
    pub id: ReviewId,
    pub card_id: CardId,
    pub grade: Grade,
    pub reviewed_at: DateTime<Utc>,
    pub interval_applied: u32,
    pub ease_after: f64,
}

impl Review {
    pub fn new(
        card_id: CardId,
        grade: Grade,
        reviewed_at: DateTime<Utc>,
        interval_applied: u32,
        ease_after: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            card_id,
            grade,
            reviewed_at,
            interval_applied,
            ease_after,
        }
    }
}
