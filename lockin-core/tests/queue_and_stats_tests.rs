use chrono::{DateTime, Duration, TimeZone, Utc};
use lockin_core::{
    daily_streak, deck_progress, due_queue, filter_by_tag, filter_by_text, summarize, Card,
    CardSchedule, Deck, Grade, Rating, Review,
};

fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

fn card(deck: &Deck, front: &str, due: Option<DateTime<Utc>>) -> Card {
    let mut c = Card::new(deck.id, front, "back");
    c.schedule.due_at = due;
    c
}

#[test]
fn due_queue_picks_exactly_due_cards_sorted() {
    let now = noon();
    let deck = Deck::new("Lang");

    let mut parked = Card::new(deck.id, "parked", "back");
    parked.schedule = CardSchedule::parked();
    let overdue = card(&deck, "overdue", Some(now - Duration::days(2)));
    let due_now = card(&deck, "due_now", Some(now));
    let future = card(&deck, "future", Some(now + Duration::days(3)));

    let all = vec![
        parked.clone(),
        due_now.clone(),
        future.clone(),
        overdue.clone(),
    ];
    let queue = due_queue(&all, now);

    let fronts: Vec<&str> = queue.iter().map(|c| c.front.as_str()).collect();
    assert_eq!(fronts, vec!["overdue", "due_now"]);
}

#[test]
fn due_queue_keeps_arrival_order_on_ties() {
    let now = noon();
    let deck = Deck::new("Lang");
    let due = Some(now - Duration::hours(1));

    let first = card(&deck, "first", due);
    let second = card(&deck, "second", due);
    let third = card(&deck, "third", due);

    let queue = due_queue(&[first, second, third], now);
    let fronts: Vec<&str> = queue.iter().map(|c| c.front.as_str()).collect();
    assert_eq!(fronts, vec!["first", "second", "third"]);
}

#[test]
fn text_and_tag_filters() {
    let deck = Deck::new("Lang");
    let mut hola = Card::new(deck.id, "hola", "hello");
    hola.tags = vec!["greeting".into(), "spanish".into()];
    let adios = Card::new(deck.id, "adios", "goodbye");

    let v = vec![hola.clone(), adios.clone()];

    let by_text = filter_by_text(&v, "hol");
    assert_eq!(by_text.len(), 1);
    assert_eq!(by_text[0].front, "hola");

    let by_tag = filter_by_tag(&v, "spanish");
    assert_eq!(by_tag.len(), 1);
    assert_eq!(by_tag[0].front, "hola");

    assert_eq!(filter_by_text(&v, "  ").len(), 2);
}

#[test]
fn deck_progress_tiles() {
    let now = noon();
    let deck = Deck::new("Lang");

    let cards = vec![
        card(&deck, "parked", None),
        card(&deck, "due", Some(now)),
        card(&deck, "future", Some(now + Duration::days(1))),
    ];

    let p = deck_progress(&cards, now);
    assert_eq!(p.total, 3);
    assert_eq!(p.in_review_pile, 2);
    assert_eq!(p.due_now, 1);
}

#[test]
fn stats_totals_accuracy_and_streak() {
    let now = noon();
    let deck = Deck::new("Lang");
    let c = Card::new(deck.id, "hola", "hello");

    let reviews = vec![
        Review::new(c.id, Grade::Score(5), now - Duration::days(2), 1, 2.6),
        Review::new(c.id, Grade::Label(Rating::Good), now - Duration::days(1), 6, 2.6),
        Review::new(c.id, Grade::Score(2), now, 1, 2.46),
    ];

    let s = summarize(&reviews);
    assert_eq!(s.totals.total, 3);
    assert_eq!(s.totals.passes, 2);
    assert_eq!(s.totals.lapses, 1);
    assert!((s.totals.accuracy() - 2.0 / 3.0).abs() < 1e-9);
    assert_eq!(s.per_day.len(), 3);

    assert_eq!(daily_streak(&reviews, now.date_naive()), 3);
    assert_eq!(daily_streak(&reviews[..2], now.date_naive()), 0);
}
