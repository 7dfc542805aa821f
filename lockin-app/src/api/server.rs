use axum::{
    routing::{get, post},
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::api::routes::{
    add_card, create_deck, due_cards, get_stats, list_decks, post_review, AppState,
};
use lockin_core::{Deck, Repository, ReviewService, SchedulingPolicy};

pub async fn run(
    repo: Arc<dyn Repository>,
    policy: Arc<dyn SchedulingPolicy>,
    addr: SocketAddr,
) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .try_init()
        .ok();

    let service = ReviewService::new(repo.clone(), policy.clone());
    let state = Arc::new(AppState { repo, service });

    let app = Router::new()
        .route("/decks", get(list_decks).post(create_deck))
        .route("/cards", post(add_card))
        .route("/due", get(due_cards))
        .route("/review", post(post_review))
        .route("/stats", get(get_stats))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, policy = policy.name(), "lockin api listening");
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

pub async fn resolve_deck<R: Repository + ?Sized>(repo: &R, sel: &str) -> anyhow::Result<Deck> {
    if let Ok(id) = uuid::Uuid::parse_str(sel) {
        if let Ok(d) = repo.get_deck(id).await {
            return Ok(d);
        }
    }
    let decks = repo.list_decks().await?;
    if let Some(d) = decks.into_iter().find(|d| d.name.eq_ignore_ascii_case(sel)) {
        return Ok(d);
    }
    anyhow::bail!("deck not found")
}
