use crate::{Card, CardId, CardSchedule, CoreError, Deck, DeckId, Review};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod memory;

pub use memory::MemoryRepo;

/// New-deck fields beyond the name; all optional deck metadata.
#[derive(Clone, Debug, Default)]
pub struct DeckMeta {
    pub subject: Option<String>,
    pub course: Option<String>,
    pub instructor: Option<String>,
}

#[async_trait]
pub trait Repository: Send + Sync {
    // Decks
    async fn create_deck(&self, name: &str, meta: DeckMeta) -> Result<Deck, CoreError>;
    async fn get_deck(&self, id: DeckId) -> Result<Deck, CoreError>;
    async fn list_decks(&self) -> Result<Vec<Deck>, CoreError>;
    async fn delete_deck(&self, id: DeckId) -> Result<(), CoreError>;

    // Cards
    async fn add_card(
        &self,
        deck_id: DeckId,
        front: &str,
        back: &str,
        tags: &[String],
    ) -> Result<Card, CoreError>;

    async fn get_card(&self, id: CardId) -> Result<Card, CoreError>;
    async fn list_cards(&self, deck_id: Option<DeckId>) -> Result<Vec<Card>, CoreError>;
    async fn update_card(&self, card: &Card) -> Result<Card, CoreError>;
    async fn delete_card(&self, id: CardId) -> Result<(), CoreError>;

    /// Park a card out of the review pile (`None`) or queue it back in
    /// with the given due date.
    async fn set_review_pile(
        &self,
        id: CardId,
        due_at: Option<DateTime<Utc>>,
    ) -> Result<(), CoreError>;

    /// Atomically replace all scheduling fields of one card.
    ///
    /// The write succeeds only while the stored `last_reviewed_at` still
    /// equals `expected_last_review` — the value the caller read before
    /// computing `next`. A mismatch means another review landed in between;
    /// the call returns `Conflict` and writes nothing.
    async fn update_schedule(
        &self,
        id: CardId,
        expected_last_review: Option<DateTime<Utc>>,
        next: &CardSchedule,
    ) -> Result<Card, CoreError>;

    // Reviews
    async fn insert_review(&self, review: &Review) -> Result<(), CoreError>;
    async fn list_reviews_for_card(&self, card_id: CardId) -> Result<Vec<Review>, CoreError>;
}
