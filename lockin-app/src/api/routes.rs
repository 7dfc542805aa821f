use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use lockin_core::{stats, CoreError, DeckMeta, ReviewService};

use crate::api::dto::{CardIn, CardOut, DeckIn, DeckOut, ReviewIn, ScheduleOut, StatsOut};

pub struct AppState {
    pub repo: Arc<dyn lockin_core::Repository>,
    pub service: ReviewService,
}

fn status(e: &CoreError) -> StatusCode {
    match e {
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::Conflict(_) => StatusCode::CONFLICT,
        CoreError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CoreError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Deserialize)]
pub struct DueQuery {
    deck: Option<String>,
    max: Option<usize>,
}

#[derive(Deserialize)]
pub struct StatsQuery {
    deck: Option<String>,
}

pub async fn list_decks(State(st): State<Arc<AppState>>) -> Result<Json<Vec<DeckOut>>, StatusCode> {
    let mut decks = st.repo.list_decks().await.map_err(|e| status(&e))?;
    decks.sort_by_key(|d| d.created_at);
    Ok(Json(decks.into_iter().map(DeckOut::from).collect()))
}

pub async fn create_deck(
    State(st): State<Arc<AppState>>,
    Json(body): Json<DeckIn>,
) -> Result<(StatusCode, Json<DeckOut>), StatusCode> {
    let meta = DeckMeta {
        subject: body.subject,
        course: body.course,
        instructor: body.instructor,
    };
    let deck = st
        .repo
        .create_deck(&body.name, meta)
        .await
        .map_err(|e| status(&e))?;
    Ok((StatusCode::CREATED, Json(DeckOut::from(deck))))
}

pub async fn add_card(
    State(st): State<Arc<AppState>>,
    Json(body): Json<CardIn>,
) -> Result<(StatusCode, Json<CardOut>), StatusCode> {
    let deck = super::server::resolve_deck(&*st.repo, &body.deck)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    let card = st
        .repo
        .add_card(deck.id, &body.front, &body.back, &body.tags)
        .await
        .map_err(|e| status(&e))?;
    Ok((StatusCode::CREATED, Json(CardOut::from(card))))
}

pub async fn due_cards(
    State(st): State<Arc<AppState>>,
    Query(q): Query<DueQuery>,
) -> Result<Json<Vec<CardOut>>, StatusCode> {
    let deck_id = if let Some(sel) = q.deck {
        let deck = super::server::resolve_deck(&*st.repo, &sel)
            .await
            .map_err(|_| StatusCode::BAD_REQUEST)?;
        Some(deck.id)
    } else {
        None
    };

    let queue = st
        .service
        .due_queue(deck_id, None, q.max)
        .await
        .map_err(|e| status(&e))?;
    Ok(Json(queue.into_iter().map(CardOut::from).collect()))
}

pub async fn post_review(
    State(st): State<Arc<AppState>>,
    Json(body): Json<ReviewIn>,
) -> Result<Json<ScheduleOut>, StatusCode> {
    let schedule = st
        .service
        .review_card(body.card_id, body.grade, body.now)
        .await
        .map_err(|e| status(&e))?;
    Ok(Json(ScheduleOut::from(schedule)))
}

pub async fn get_stats(
    State(st): State<Arc<AppState>>,
    Query(q): Query<StatsQuery>,
) -> Result<Json<StatsOut>, StatusCode> {
    let now = chrono::Utc::now();
    let deck_id = if let Some(sel) = q.deck {
        let deck = super::server::resolve_deck(&*st.repo, &sel)
            .await
            .map_err(|_| StatusCode::BAD_REQUEST)?;
        Some(deck.id)
    } else {
        None
    };

    let cards = st.repo.list_cards(deck_id).await.map_err(|e| status(&e))?;
    let progress = stats::deck_progress(&cards, now);

    let mut reviews = Vec::new();
    for c in &cards {
        reviews.extend(
            st.repo
                .list_reviews_for_card(c.id)
                .await
                .map_err(|e| status(&e))?,
        );
    }
    let summary = stats::summarize(&reviews);

    Ok(Json(StatsOut {
        total_cards: progress.total,
        in_review_pile: progress.in_review_pile,
        due_now: progress.due_now,
        total_reviews: summary.totals.total,
        passes: summary.totals.passes,
        lapses: summary.totals.lapses,
        accuracy: summary.totals.accuracy(),
        streak_days: stats::daily_streak(&reviews, now.date_naive()),
    }))
}
