use chrono::{DateTime, Utc};
use lockin_core::{
    repo::Repository, Card, CardId, CardSchedule, CoreError, Deck, DeckId, DeckMeta, Grade, Review,
};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

pub struct PostgresRepo {
    pool: PgPool,
}

impl PostgresRepo {
    pub async fn connect(url: &str) -> Result<Self, CoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(|_| CoreError::Storage("pg connect"))?;
        let repo = Self { pool };
        repo.ensure_schema().await?;
        Ok(repo)
    }

    async fn ensure_schema(&self) -> Result<(), CoreError> {
        // Mirrors migrations (id generation done in app; DB defaults still helpful)
        const STMT: &str = r#"
        CREATE TABLE IF NOT EXISTS decks (
          id          uuid PRIMARY KEY,
          name        text NOT NULL UNIQUE,
          subject     text,
          course      text,
          instructor  text,
          created_at  timestamptz NOT NULL
        );

        CREATE TABLE IF NOT EXISTS cards (
          id                uuid PRIMARY KEY,
          deck_id           uuid NOT NULL REFERENCES decks(id) ON DELETE CASCADE,
          front             text NOT NULL,
          back              text NOT NULL,
          tags              text[] NOT NULL DEFAULT '{}',
          ease_factor       double precision NOT NULL DEFAULT 2.5,
          repetitions       integer NOT NULL DEFAULT 0,
          interval_days     integer NOT NULL DEFAULT 0,
          due_at            timestamptz,
          last_reviewed_at  timestamptz,
          created_at        timestamptz NOT NULL
        );

        CREATE TABLE IF NOT EXISTS reviews (
          id               uuid PRIMARY KEY,
          card_id          uuid NOT NULL REFERENCES cards(id) ON DELETE CASCADE,
          grade            text NOT NULL,
          reviewed_at      timestamptz NOT NULL,
          interval_applied integer NOT NULL,
          ease_after       double precision NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_cards_deck_due ON cards (deck_id, due_at);
        CREATE INDEX IF NOT EXISTS idx_reviews_card_time ON reviews (card_id, reviewed_at);
        "#;

        for chunk in STMT.split(';') {
            let sql = chunk.trim();
            if sql.is_empty() {
                continue;
            }
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|_| CoreError::Storage("pg schema"))?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Repository for PostgresRepo {
    // ===== Decks =====
    async fn create_deck(&self, name: &str, meta: DeckMeta) -> Result<Deck, CoreError> {
        // unique name pre-check
        let exists =
            sqlx::query_scalar::<_, i32>("SELECT 1 FROM decks WHERE lower(name)=lower($1) LIMIT 1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|_| CoreError::Storage("pg read deck"))?
                .is_some();
        if exists {
            return Err(CoreError::Conflict("deck name already exists"));
        }

        let mut deck = Deck::new(name);
        deck.subject = meta.subject;
        deck.course = meta.course;
        deck.instructor = meta.instructor;
        sqlx::query(
            "INSERT INTO decks (id,name,subject,course,instructor,created_at) VALUES ($1,$2,$3,$4,$5,$6)",
        )
        .bind(deck.id)
        .bind(&deck.name)
        .bind(deck.subject.clone())
        .bind(deck.course.clone())
        .bind(deck.instructor.clone())
        .bind(deck.created_at)
        .execute(&self.pool)
        .await
        .map_err(|_| CoreError::Storage("pg insert deck"))?;
        Ok(deck)
    }

    async fn get_deck(&self, id: DeckId) -> Result<Deck, CoreError> {
        let row =
            sqlx::query("SELECT id,name,subject,course,instructor,created_at FROM decks WHERE id=$1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|_| CoreError::Storage("pg read deck"))?;
        let row = row.ok_or(CoreError::NotFound("deck"))?;
        Ok(row_into_deck(row))
    }

    async fn list_decks(&self) -> Result<Vec<Deck>, CoreError> {
        let rows = sqlx::query(
            "SELECT id,name,subject,course,instructor,created_at FROM decks ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|_| CoreError::Storage("pg list decks"))?;
        Ok(rows.into_iter().map(row_into_deck).collect())
    }

    async fn delete_deck(&self, id: DeckId) -> Result<(), CoreError> {
        let res = sqlx::query("DELETE FROM decks WHERE id=$1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|_| CoreError::Storage("pg del deck"))?;
        if res.rows_affected() == 0 {
            return Err(CoreError::NotFound("deck"));
        }
        Ok(())
    }

    // ===== Cards =====
    async fn add_card(
        &self,
        deck_id: DeckId,
        front: &str,
        back: &str,
        tags: &[String],
    ) -> Result<Card, CoreError> {
        // ensure deck exists
        let exists = sqlx::query_scalar::<_, i32>("SELECT 1 FROM decks WHERE id=$1 LIMIT 1")
            .bind(deck_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|_| CoreError::Storage("pg read deck"))?
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
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
            "#,
        )
        .bind(card.id)
        .bind(card.deck_id)
        .bind(&card.front)
        .bind(&card.back)
        .bind(&card.tags) // text[]
        .bind(card.schedule.ease_factor)
        .bind(card.schedule.repetitions as i32)
        .bind(card.schedule.interval_days as i32)
        .bind(card.schedule.due_at)
        .bind(card.schedule.last_reviewed_at)
        .bind(card.created_at)
        .execute(&self.pool)
        .await
        .map_err(|_| CoreError::Storage("pg insert card"))?;

        Ok(card)
    }

    async fn get_card(&self, id: CardId) -> Result<Card, CoreError> {
        let row = sqlx::query(
            r#"SELECT id,deck_id,front,back,tags,ease_factor,repetitions,interval_days,
                       due_at,last_reviewed_at,created_at
               FROM cards WHERE id=$1"#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|_| CoreError::Storage("pg read card"))?;
        let row = row.ok_or(CoreError::NotFound("card"))?;
        row_into_card(row)
    }

    async fn list_cards(&self, deck_id: Option<DeckId>) -> Result<Vec<Card>, CoreError> {
        let rows = if let Some(did) = deck_id {
            sqlx::query(
                r#"SELECT id,deck_id,front,back,tags,ease_factor,repetitions,interval_days,
                          due_at,last_reviewed_at,created_at
                   FROM cards WHERE deck_id=$1 ORDER BY created_at ASC"#,
            )
            .bind(did)
            .fetch_all(&self.pool)
            .await
            .map_err(|_| CoreError::Storage("pg list cards"))?
        } else {
            sqlx::query(
                r#"SELECT id,deck_id,front,back,tags,ease_factor,repetitions,interval_days,
                          due_at,last_reviewed_at,created_at
                   FROM cards ORDER BY created_at ASC"#,
            )
            .fetch_all(&self.pool)
            .await
            .map_err(|_| CoreError::Storage("pg list cards"))?
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
              deck_id=$1, front=$2, back=$3, tags=$4, ease_factor=$5, repetitions=$6,
              interval_days=$7, due_at=$8, last_reviewed_at=$9
            WHERE id=$10
            "#,
        )
        .bind(card.deck_id)
        .bind(&card.front)
        .bind(&card.back)
        .bind(&card.tags)
        .bind(card.schedule.ease_factor)
        .bind(card.schedule.repetitions as i32)
        .bind(card.schedule.interval_days as i32)
        .bind(card.schedule.due_at)
        .bind(card.schedule.last_reviewed_at)
        .bind(card.id)
        .execute(&self.pool)
        .await
        .map_err(|_| CoreError::Storage("pg update card"))?;
        if res.rows_affected() == 0 {
            return Err(CoreError::NotFound("card"));
        }
        Ok(card.clone())
    }

    async fn delete_card(&self, id: CardId) -> Result<(), CoreError> {
        let res = sqlx::query("DELETE FROM cards WHERE id=$1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|_| CoreError::Storage("pg del card"))?;
        if res.rows_affected() == 0 {
            return Err(CoreError::NotFound("card"));
        }
        Ok(())
    }

    async fn set_review_pile(
        &self,
        id: CardId,
        due_at: Option<DateTime<Utc>>,
    ) -> Result<(), CoreError> {
        let res = sqlx::query("UPDATE cards SET due_at=$1 WHERE id=$2")
            .bind(due_at)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|_| CoreError::Storage("pg set pile"))?;
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
        // Row-locked read-modify-write: the lock serializes concurrent
        // reviews of the same card, the token check rejects the stale one.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|_| CoreError::Storage("pg tx"))?;

        let row = sqlx::query("SELECT last_reviewed_at FROM cards WHERE id=$1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|_| CoreError::Storage("pg read card"))?;
        let row = row.ok_or(CoreError::NotFound("card"))?;
        let stored: Option<DateTime<Utc>> = row.get("last_reviewed_at");
        if stored != expected_last_review {
            tx.rollback().await.ok();
            return Err(CoreError::Conflict("card was reviewed concurrently"));
        }

        sqlx::query(
            r#"
            UPDATE cards SET
              ease_factor=$1, repetitions=$2, interval_days=$3, due_at=$4, last_reviewed_at=$5
            WHERE id=$6
            "#,
        )
        .bind(next.ease_factor)
        .bind(next.repetitions as i32)
        .bind(next.interval_days as i32)
        .bind(next.due_at)
        .bind(next.last_reviewed_at)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|_| CoreError::Storage("pg update schedule"))?;

        tx.commit()
            .await
            .map_err(|_| CoreError::Storage("pg tx commit"))?;

        self.get_card(id).await
    }

    // ===== Reviews =====
    async fn insert_review(&self, review: &Review) -> Result<(), CoreError> {
        sqlx::query(
            r#"INSERT INTO reviews (id,card_id,grade,reviewed_at,interval_applied,ease_after)
               VALUES ($1,$2,$3,$4,$5,$6)"#,
        )
        .bind(review.id)
        .bind(review.card_id)
        .bind(grade_to_json(&review.grade))
        .bind(review.reviewed_at)
        .bind(review.interval_applied as i32)
        .bind(review.ease_after)
        .execute(&self.pool)
        .await
        .map_err(|_| CoreError::Storage("pg insert review"))?;
        Ok(())
    }

    async fn list_reviews_for_card(&self, card_id: CardId) -> Result<Vec<Review>, CoreError> {
        let rows = sqlx::query(
            r#"SELECT id,card_id,grade,reviewed_at,interval_applied,ease_after
               FROM reviews WHERE card_id=$1 ORDER BY reviewed_at ASC"#,
        )
        .bind(card_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|_| CoreError::Storage("pg list reviews"))?;
        let mut v = Vec::with_capacity(rows.len());
        for row in rows {
            v.push(Review {
                id: row.get::<uuid::Uuid, _>("id"),
                card_id: row.get::<uuid::Uuid, _>("card_id"),
                grade: grade_from_json(&row.get::<String, _>("grade"))?,
                reviewed_at: row.get::<DateTime<Utc>, _>("reviewed_at"),
                interval_applied: row.get::<i32, _>("interval_applied").max(0) as u32,
                ease_after: row.get::<f64, _>("ease_after"),
            });
        }
        Ok(v)
    }
}

// ===== helpers =====
fn grade_to_json(g: &Grade) -> String {
    serde_json::to_string(g).unwrap_or_else(|_| "0".to_string())
}

fn grade_from_json(s: &str) -> Result<Grade, CoreError> {
    serde_json::from_str(s).map_err(|_| CoreError::Invalid("grade"))
}

fn row_into_deck(row: sqlx::postgres::PgRow) -> Deck {
    Deck {
        id: row.get::<uuid::Uuid, _>("id"),
        name: row.get::<String, _>("name"),
        subject: row.get::<Option<String>, _>("subject"),
        course: row.get::<Option<String>, _>("course"),
        instructor: row.get::<Option<String>, _>("instructor"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    }
}

fn row_into_card(row: sqlx::postgres::PgRow) -> Result<Card, CoreError> {
    let schedule = CardSchedule {
        ease_factor: row.get::<f64, _>("ease_factor"),
        repetitions: row.get::<i32, _>("repetitions").max(0) as u32,
        interval_days: row.get::<i32, _>("interval_days").max(0) as u32,
        due_at: row.get::<Option<DateTime<Utc>>, _>("due_at"),
        last_reviewed_at: row.get::<Option<DateTime<Utc>>, _>("last_reviewed_at"),
    };

    Ok(Card {
        id: row.get::<uuid::Uuid, _>("id"),
        deck_id: row.get::<uuid::Uuid, _>("deck_id"),
        front: row.get::<String, _>("front"),
        back: row.get::<String, _>("back"),
        tags: row.get::<Vec<String>, _>("tags"),
        schedule,
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    })
}
