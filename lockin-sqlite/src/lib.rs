use chrono::{DateTime, Utc};
use lockin_core::{
    repo::Repository, Card, CardId, CardSchedule, CoreError, Deck, DeckId, DeckMeta, Grade, Review,
};
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};
use std::path::Path;

pub struct SqliteRepo {
    pool: SqlitePool,
}

impl SqliteRepo {
    pub async fn open_file(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let url = format!("sqlite://{}?mode=rwc", path.as_ref().to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|_| CoreError::Storage("sqlite connect"))?;
        let repo = Self { pool };
        repo.ensure_schema().await?;
        Ok(repo)
    }

    /// In-memory database; a single connection, or every pool checkout
    /// would see its own empty database.
    pub async fn open_memory() -> Result<Self, CoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|_| CoreError::Storage("sqlite connect"))?;
        let repo = Self { pool };
        repo.ensure_schema().await?;
        Ok(repo)
    }

    async fn ensure_schema(&self) -> Result<(), CoreError> {
        // Create tables/indexes if they do not exist (mirrors migrations).
        const STMT: &str = r#"
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS decks (
          id          TEXT PRIMARY KEY,
          name        TEXT NOT NULL UNIQUE,
          subject     TEXT,
          course      TEXT,
          instructor  TEXT,
          created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cards (
          id                TEXT PRIMARY KEY,
          deck_id           TEXT NOT NULL,
          front             TEXT NOT NULL,
          back              TEXT NOT NULL,
          tags              TEXT NOT NULL,
          ease_factor       REAL    NOT NULL DEFAULT 2.5,
          repetitions       INTEGER NOT NULL DEFAULT 0,
          interval_days     INTEGER NOT NULL DEFAULT 0,
          due_at            TEXT,
          last_reviewed_at  TEXT,
          created_at        TEXT NOT NULL,
          FOREIGN KEY(deck_id) REFERENCES decks(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS reviews (
          id               TEXT PRIMARY KEY,
          card_id          TEXT NOT NULL,
          grade            TEXT NOT NULL,
          reviewed_at      TEXT NOT NULL,
          interval_applied INTEGER NOT NULL,
          ease_after       REAL NOT NULL,
          FOREIGN KEY(card_id) REFERENCES cards(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_cards_deck_due ON cards (deck_id, due_at);
        CREATE INDEX IF NOT EXISTS idx_reviews_card_time ON reviews (card_id, reviewed_at);
        "#;

        // Execute statements one by one for compatibility.
        for chunk in STMT.split(';') {
            let sql = chunk.trim();
            if sql.is_empty() {
                continue;
            }
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|_| CoreError::Storage("sqlite schema"))?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Repository for SqliteRepo {
    // ===== Decks =====
    async fn create_deck(&self, name: &str, meta: DeckMeta) -> Result<Deck, CoreError> {
        // Pre-check for unique name
        let exists = sqlx::query("SELECT 1 FROM decks WHERE lower(name)=lower(?) LIMIT 1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|_| CoreError::Storage("read deck"))?
            .is_some();
        if exists {
            return Err(CoreError::Conflict("deck name already exists"));
        }

        let mut deck = Deck::new(name);
        deck.subject = meta.subject;
        deck.course = meta.course;
        deck.instructor = meta.instructor;
        sqlx::query(
            "INSERT INTO decks (id,name,subject,course,instructor,created_at) VALUES (?,?,?,?,?,?)",
        )
        .bind(deck.id.to_string())
        .bind(&deck.name)
        .bind(deck.subject.clone())
        .bind(deck.course.clone())
        .bind(deck.instructor.clone())
        .bind(dt_to_str(deck.created_at))
        .execute(&self.pool)
        .await
        .map_err(|_| CoreError::Storage("insert deck"))?;
        Ok(deck)
    }

    async fn get_deck(&self, id: DeckId) -> Result<Deck, CoreError> {
        let row = sqlx::query(
            "SELECT id,name,subject,course,instructor,created_at FROM decks WHERE id=?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|_| CoreError::Storage("read deck"))?;
        let row = row.ok_or(CoreError::NotFound("deck"))?;
        row_into_deck(row)
    }

    async fn list_decks(&self) -> Result<Vec<Deck>, CoreError> {
        let rows = sqlx::query(
            "SELECT id,name,subject,course,instructor,created_at FROM decks ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|_| CoreError::Storage("list decks"))?;
        let mut v = Vec::with_capacity(rows.len());
        for row in rows {
            v.push(row_into_deck(row)?);
        }
        Ok(v)
    }

    async fn delete_deck(&self, id: DeckId) -> Result<(), CoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|_| CoreError::Storage("tx"))?;

        // Manual cascade (robust even if PRAGMA foreign_keys is off)
        sqlx::query("DELETE FROM reviews WHERE card_id IN (SELECT id FROM cards WHERE deck_id=?)")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|_| CoreError::Storage("del reviews"))?;

        sqlx::query("DELETE FROM cards WHERE deck_id=?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|_| CoreError::Storage("del cards"))?;

        let res = sqlx::query("DELETE FROM decks WHERE id=?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|_| CoreError::Storage("del deck"))?;
        if res.rows_affected() == 0 {
            tx.rollback().await.ok();
            return Err(CoreError::NotFound("deck"));
        }

        tx.commit()
            .await
            .map_err(|_| CoreError::Storage("tx commit"))
    }

    // ===== Cards =====
    async fn add_card(
        &self,
        deck_id: DeckId,
        front: &str,
        back: &str,
        tags: &[String],
    ) -> Result<Card, CoreError> {
        // Ensure deck exists
        let exists = sqlx::query("SELECT 1 FROM decks WHERE id=? LIMIT 1")
            .bind(deck_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|_| CoreError::Storage("read deck"))?
            .is_some();
        if !exists {
            return Err(CoreError::NotFound("deck"));
        }

        let mut card = Card::new(deck_id, front, back);
        card.tags = tags.to_vec();

        sqlx::query(
            r#"
            INSERT INTO cards (
              id, deck_id, front, back, tags, ease_factor, repetitions, interval_days,
              due_at, last_reviewed_at, created_at
            )
            VALUES (?,?,?,?,?,?,?,?,?,?,?)
            "#,
        )
        .bind(card.id.to_string())
        .bind(card.deck_id.to_string())
        .bind(&card.front)
        .bind(&card.back)
        .bind(tags_to_json(&card.tags))
        .bind(card.schedule.ease_factor)
        .bind(i64::from(card.schedule.repetitions))
        .bind(i64::from(card.schedule.interval_days))
        .bind(card.schedule.due_at.map(dt_to_str))
        .bind(card.schedule.last_reviewed_at.map(dt_to_str))
        .bind(dt_to_str(card.created_at))
        .execute(&self.pool)
        .await
        .map_err(|_| CoreError::Storage("insert card"))?;

        Ok(card)
    }

    async fn get_card(&self, id: CardId) -> Result<Card, CoreError> {
        let row = sqlx::query(
            r#"SELECT id,deck_id,front,back,tags,ease_factor,repetitions,interval_days,
                       due_at,last_reviewed_at,created_at
               FROM cards WHERE id=?"#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|_| CoreError::Storage("read card"))?;
        let row = row.ok_or(CoreError::NotFound("card"))?;
        row_into_card(row)
    }

    async fn list_cards(&self, deck_id: Option<DeckId>) -> Result<Vec<Card>, CoreError> {
        let rows = if let Some(did) = deck_id {
            sqlx::query(
                r#"SELECT id,deck_id,front,back,tags,ease_factor,repetitions,interval_days,
                          due_at,last_reviewed_at,created_at
                   FROM cards WHERE deck_id=? ORDER BY created_at ASC"#,
            )
            .bind(did.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(|_| CoreError::Storage("list cards"))?
        } else {
            sqlx::query(
                r#"SELECT id,deck_id,front,back,tags,ease_factor,repetitions,interval_days,
                          due_at,last_reviewed_at,created_at
                   FROM cards ORDER BY created_at ASC"#,
            )
            .fetch_all(&self.pool)
            .await
            .map_err(|_| CoreError::Storage("list cards"))?
        };
        let mut v = Vec::with_capacity(rows.len());
        for row in rows {
            v.push(row_into_card(row)?);
        }
        Ok(v)
    }

    async fn update_card(&self, card: &Card) -> Result<Card, CoreError> {
        let res = sqlx::query(
            r#"
            UPDATE cards SET
              deck_id=?, front=?, back=?, tags=?, ease_factor=?, repetitions=?,
              interval_days=?, due_at=?, last_reviewed_at=?
            WHERE id=?
            "#,
        )
        .bind(card.deck_id.to_string())
        .bind(&card.front)
        .bind(&card.back)
        .bind(tags_to_json(&card.tags))
        .bind(card.schedule.ease_factor)
        .bind(i64::from(card.schedule.repetitions))
        .bind(i64::from(card.schedule.interval_days))
        .bind(card.schedule.due_at.map(dt_to_str))
        .bind(card.schedule.last_reviewed_at.map(dt_to_str))
        .bind(card.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|_| CoreError::Storage("update card"))?;
        if res.rows_affected() == 0 {
            return Err(CoreError::NotFound("card"));
        }
        Ok(card.clone())
    }

    async fn delete_card(&self, id: CardId) -> Result<(), CoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|_| CoreError::Storage("tx"))?;
        sqlx::query("DELETE FROM reviews WHERE card_id=?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|_| CoreError::Storage("del reviews"))?;
        let res = sqlx::query("DELETE FROM cards WHERE id=?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|_| CoreError::Storage("del card"))?;
        if res.rows_affected() == 0 {
            tx.rollback().await.ok();
            return Err(CoreError::NotFound("card"));
        }
        tx.commit()
            .await
            .map_err(|_| CoreError::Storage("tx commit"))
    }

    async fn set_review_pile(
        &self,
        id: CardId,
        due_at: Option<DateTime<Utc>>,
    ) -> Result<(), CoreError> {
        let res = sqlx::query("UPDATE cards SET due_at=? WHERE id=?")
            .bind(due_at.map(dt_to_str))
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|_| CoreError::Storage("set pile"))?;
        if res.rows_affected() == 0 {
            return Err(CoreError::NotFound("card"));
        }
        Ok(())
    }

    async fn update_schedule(
        &self,
        id: CardId,
        expected_last_review: Option<DateTime<Utc>>,
        next: &CardSchedule,
    ) -> Result<Card, CoreError> {
        // Probe first so a lost race reads as Conflict, not NotFound.
        let exists = sqlx::query("SELECT 1 FROM cards WHERE id=? LIMIT 1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|_| CoreError::Storage("read card"))?
            .is_some();
        if !exists {
            return Err(CoreError::NotFound("card"));
        }

        // Guarded write: only applies while the stored review token still
        // matches what the caller computed from. `IS` also matches NULL.
        let res = sqlx::query(
            r#"
            UPDATE cards SET
              ease_factor=?, repetitions=?, interval_days=?, due_at=?, last_reviewed_at=?
            WHERE id=? AND last_reviewed_at IS ?
            "#,
        )
        .bind(next.ease_factor)
        .bind(i64::from(next.repetitions))
        .bind(i64::from(next.interval_days))
        .bind(next.due_at.map(dt_to_str))
        .bind(next.last_reviewed_at.map(dt_to_str))
        .bind(id.to_string())
        .bind(expected_last_review.map(dt_to_str))
        .execute(&self.pool)
        .await
        .map_err(|_| CoreError::Storage("update schedule"))?;

        if res.rows_affected() == 0 {
            return Err(CoreError::Conflict("card was reviewed concurrently"));
        }
        self.get_card(id).await
    }

    // ===== Reviews =====
    async fn insert_review(&self, review: &Review) -> Result<(), CoreError> {
        sqlx::query(
            r#"INSERT INTO reviews (id,card_id,grade,reviewed_at,interval_applied,ease_after)
               VALUES (?,?,?,?,?,?)"#,
        )
        .bind(review.id.to_string())
        .bind(review.card_id.to_string())
        .bind(grade_to_json(&review.grade))
        .bind(dt_to_str(review.reviewed_at))
        .bind(i64::from(review.interval_applied))
        .bind(review.ease_after)
        .execute(&self.pool)
        .await
        .map_err(|_| CoreError::Storage("insert review"))?;
        Ok(())
    }

    async fn list_reviews_for_card(&self, card_id: CardId) -> Result<Vec<Review>, CoreError> {
        let rows = sqlx::query(
            r#"SELECT id,card_id,grade,reviewed_at,interval_applied,ease_after
               FROM reviews WHERE card_id=? ORDER BY reviewed_at ASC"#,
        )
        .bind(card_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|_| CoreError::Storage("list reviews"))?;
        let mut v = Vec::with_capacity(rows.len());
        for row in rows {
            v.push(Review {
                id: uuid_from_str(row.get::<String, _>("id"))?,
                card_id: uuid_from_str(row.get::<String, _>("card_id"))?,
                grade: grade_from_json(&row.get::<String, _>("grade"))?,
                reviewed_at: dt_from_str(row.get::<String, _>("reviewed_at"))?,
                interval_applied: row.get::<i64, _>("interval_applied").max(0) as u32,
                ease_after: row.get::<f64, _>("ease_after"),
            });
        }
        Ok(v)
    }
}

// ===== Helpers =====
fn uuid_from_str(s: String) -> Result<uuid::Uuid, CoreError> {
    uuid::Uuid::parse_str(&s).map_err(|_| CoreError::Invalid("uuid"))
}

fn dt_to_str(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn dt_from_str(s: String) -> Result<DateTime<Utc>, CoreError> {
    chrono::DateTime::parse_from_rfc3339(&s)
        .map_err(|_| CoreError::Invalid("datetime"))
        .map(|dt| dt.with_timezone(&Utc))
}

fn tags_to_json(tags: &[String]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}

fn grade_to_json(g: &Grade) -> String {
    serde_json::to_string(g).unwrap_or_else(|_| "0".to_string())
}

fn grade_from_json(s: &str) -> Result<Grade, CoreError> {
    serde_json::from_str(s).map_err(|_| CoreError::Invalid("grade"))
}

fn row_into_deck(row: sqlx::sqlite::SqliteRow) -> Result<Deck, CoreError> {
    Ok(Deck {
        id: uuid_from_str(row.get::<String, _>("id"))?,
        name: row.get::<String, _>("name"),
        subject: row.get::<Option<String>, _>("subject"),
        course: row.get::<Option<String>, _>("course"),
        instructor: row.get::<Option<String>, _>("instructor"),
        created_at: dt_from_str(row.get::<String, _>("created_at"))?,
    })
}

fn row_into_card(row: sqlx::sqlite::SqliteRow) -> Result<Card, CoreError> {
    let tags_json: String = row.get("tags");
    let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();

    // Signed storage values clamp to the unsigned domain on the way in.
    let schedule = CardSchedule {
        ease_factor: row.get::<f64, _>("ease_factor"),
        repetitions: row.get::<i64, _>("repetitions").max(0) as u32,
        interval_days: row.get::<i64, _>("interval_days").max(0) as u32,
        due_at: row
            .get::<Option<String>, _>("due_at")
            .map(dt_from_str)
            .transpose()?,
        last_reviewed_at: row
            .get::<Option<String>, _>("last_reviewed_at")
            .map(dt_from_str)
            .transpose()?,
    };

    Ok(Card {
        id: uuid_from_str(row.get::<String, _>("id"))?,
        deck_id: uuid_from_str(row.get::<String, _>("deck_id"))?,
        front: row.get::<String, _>("front"),
        back: row.get::<String, _>("back"),
        tags,
        schedule,
        created_at: dt_from_str(row.get::<String, _>("created_at"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use lockin_core::{FixedClock, ReviewService, Sm2Policy};
    use std::sync::Arc;

    #[tokio::test]
    async fn round_trips_cards_and_schedules() {
        let repo = SqliteRepo::open_memory().await.unwrap();
        let deck = repo
            .create_deck(
                "CSCE 120",
                DeckMeta {
                    subject: Some("Data Structures".into()),
                    course: Some("CSCE 120".into()),
                    instructor: None,
                },
            )
            .await
            .unwrap();
        let card = repo
            .add_card(deck.id, "What is a pointer?", "An address.", &["basics".into()])
            .await
            .unwrap();

        let loaded = repo.get_card(card.id).await.unwrap();
        assert_eq!(loaded.front, "What is a pointer?");
        assert_eq!(loaded.tags, vec!["basics".to_string()]);
        assert!(loaded.schedule.is_in_review_pile());
        assert_eq!(loaded.schedule.repetitions, 0);

        let fetched_deck = repo.get_deck(deck.id).await.unwrap();
        assert_eq!(fetched_deck.subject.as_deref(), Some("Data Structures"));
    }

    #[tokio::test]
    async fn review_through_service_persists() {
        let repo = Arc::new(SqliteRepo::open_memory().await.unwrap());
        let deck = repo.create_deck("Lang", DeckMeta::default()).await.unwrap();
        let card = repo.add_card(deck.id, "hola", "hello", &[]).await.unwrap();

        let now = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let svc = ReviewService::with_clock(repo.clone(), Arc::new(Sm2Policy), Box::new(FixedClock(now)));

        let schedule = svc.review_card(card.id, Grade::Score(5), None).await.unwrap();
        assert_eq!(schedule.repetitions, 1);

        let stored = repo.get_card(card.id).await.unwrap();
        assert_eq!(stored.schedule, schedule);
        assert_eq!(repo.list_reviews_for_card(card.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn guarded_update_rejects_stale_token() {
        let repo = SqliteRepo::open_memory().await.unwrap();
        let deck = repo.create_deck("Lang", DeckMeta::default()).await.unwrap();
        let card = repo.add_card(deck.id, "hola", "hello", &[]).await.unwrap();

        let mut next = card.schedule.clone();
        next.repetitions = 1;
        next.last_reviewed_at = Some(Utc::now());
        repo.update_schedule(card.id, None, &next).await.unwrap();

        let err = repo.update_schedule(card.id, None, &next).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn deck_delete_cascades() {
        let repo = SqliteRepo::open_memory().await.unwrap();
        let deck = repo.create_deck("Lang", DeckMeta::default()).await.unwrap();
        let card = repo.add_card(deck.id, "hola", "hello", &[]).await.unwrap();
        repo.insert_review(&Review::new(card.id, Grade::Score(5), Utc::now(), 1, 2.6))
            .await
            .unwrap();

        repo.delete_deck(deck.id).await.unwrap();
        assert!(matches!(
            repo.get_card(card.id).await.unwrap_err(),
            CoreError::NotFound(_)
        ));
        assert!(repo.list_reviews_for_card(card.id).await.unwrap().is_empty());
    }
}
