use chrono::{DateTime, Duration, TimeZone, Utc};
use lockin_core::{
    CoreError, DeckMeta, FixedClock, Grade, MemoryRepo, Rating, Repository, ReviewService,
    SchedulingPolicy, Sm2Policy, StepPolicy,
};
use std::sync::Arc;

fn morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

fn service(repo: Arc<MemoryRepo>) -> ReviewService {
    ReviewService::with_clock(repo, Arc::new(Sm2Policy), Box::new(FixedClock(morning())))
}

#[tokio::test]
async fn review_persists_schedule_and_logs() {
    let repo = Arc::new(MemoryRepo::new());
    let deck = repo.create_deck("Lang", DeckMeta::default()).await.unwrap();
    let card = repo.add_card(deck.id, "hola", "hello", &[]).await.unwrap();

    let svc = service(repo.clone());
    let now = morning();
    let schedule = svc.review_card(card.id, Grade::Score(5), None).await.unwrap();

    assert_eq!(schedule.repetitions, 1);
    assert_eq!(schedule.interval_days, 1);
    assert_eq!(schedule.due_at, Some(now + Duration::days(1)));
    assert_eq!(schedule.last_reviewed_at, Some(now));

    // The stored card carries the same replacement schedule.
    let stored = repo.get_card(card.id).await.unwrap();
    assert_eq!(stored.schedule, schedule);

    let log = repo.list_reviews_for_card(card.id).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].interval_applied, 1);
    assert_eq!(log[0].grade, Grade::Score(5));
}

#[tokio::test]
async fn explicit_now_overrides_the_clock() {
    let repo = Arc::new(MemoryRepo::new());
    let deck = repo.create_deck("Lang", DeckMeta::default()).await.unwrap();
    let card = repo.add_card(deck.id, "hola", "hello", &[]).await.unwrap();

    let svc = service(repo.clone());
    let later = morning() + Duration::days(10);
    let schedule = svc
        .review_card(card.id, Grade::Score(4), Some(later))
        .await
        .unwrap();
    assert_eq!(schedule.due_at, Some(later + Duration::days(1)));
}

#[tokio::test]
async fn stale_writer_gets_conflict() {
    let repo = Arc::new(MemoryRepo::new());
    let deck = repo.create_deck("Lang", DeckMeta::default()).await.unwrap();
    let card = repo.add_card(deck.id, "hola", "hello", &[]).await.unwrap();

    // Two sessions load the same pre-state; the first review lands.
    let pre = repo.get_card(card.id).await.unwrap();
    let svc = service(repo.clone());
    svc.review_card(card.id, Grade::Score(5), None).await.unwrap();

    // The second write-back carries the stale token and must not apply.
    let stale = Sm2Policy.review(&pre.schedule, Grade::Score(2), morning());
    let err = repo
        .update_schedule(card.id, pre.schedule.last_reviewed_at, &stale)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));

    let stored = repo.get_card(card.id).await.unwrap();
    assert_eq!(stored.schedule.repetitions, 1);
}

#[tokio::test]
async fn missing_card_is_not_found() {
    let repo = Arc::new(MemoryRepo::new());
    let svc = service(repo);
    let err = svc
        .review_card(uuid::Uuid::new_v4(), Grade::Score(5), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));
}

#[tokio::test]
async fn parked_cards_leave_the_queue_and_come_back() {
    let repo = Arc::new(MemoryRepo::new());
    let deck = repo.create_deck("Lang", DeckMeta::default()).await.unwrap();
    let card = repo.add_card(deck.id, "hola", "hello", &[]).await.unwrap();
    // Pin the due date to the test clock instead of the creation wall clock.
    repo.set_review_pile(card.id, Some(morning())).await.unwrap();

    let svc = service(repo.clone());
    assert_eq!(svc.due_queue(None, None, None).await.unwrap().len(), 1);

    repo.set_review_pile(card.id, None).await.unwrap();
    assert!(svc.due_queue(None, None, None).await.unwrap().is_empty());
    assert!(!repo.get_card(card.id).await.unwrap().schedule.is_in_review_pile());

    repo.set_review_pile(card.id, Some(morning())).await.unwrap();
    assert_eq!(svc.due_queue(None, None, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn step_policy_again_is_immediately_due() {
    let repo = Arc::new(MemoryRepo::new());
    let deck = repo.create_deck("Lang", DeckMeta::default()).await.unwrap();
    let card = repo.add_card(deck.id, "hola", "hello", &[]).await.unwrap();

    let svc = ReviewService::with_clock(
        repo.clone(),
        Arc::new(StepPolicy),
        Box::new(FixedClock(morning())),
    );
    let schedule = svc
        .review_card(card.id, Grade::Label(Rating::Again), None)
        .await
        .unwrap();
    assert_eq!(schedule.interval_days, 0);
    assert_eq!(schedule.due_at, Some(morning()));

    // Still due right away.
    assert_eq!(svc.due_queue(None, None, None).await.unwrap().len(), 1);
}
