use crate::api::server as api_server;
use crate::cli::opts::*;

use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use lockin_core::{
    queue::{due_queue, filter_by_tag, filter_by_text},
    replay, stats, Card, CardSchedule, Deck, DeckMeta, Grade, Repository, ReviewService,
    SchedulingPolicy, Sm2Policy, StepPolicy,
};
use std::io::{stdin, stdout, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

pub async fn run_cli(args: Cli) -> Result<()> {
    match &args.cmd {
        Command::Api(api) => {
            let repo = open_repo(&args.store, args.db_path.clone(), args.db_url.clone()).await?;
            let addr: std::net::SocketAddr = api.addr.parse()?;
            api_server::run(repo, policy(&args.policy), addr).await
        }
        _ => {
            let repo = open_repo(&args.store, args.db_path.clone(), args.db_url.clone()).await?;
            let pol = policy(&args.policy);
            match args.cmd.clone() {
                Command::Deck(cmd) => deck_cmd(repo, cmd).await,
                Command::Card(cmd) => card_cmd(repo, cmd).await,
                Command::Due(cmd) => due_cmd(repo, cmd).await,
                Command::Review(cmd) => review_cmd(repo, pol, cmd).await,
                Command::Stats { deck } => stats_cmd(repo, deck).await,
                Command::Demo(cmd) => demo_cmd(pol, cmd),
                Command::Export(cmd) => export_cmd(repo, cmd).await,
                Command::Import(cmd) => import_cmd(repo, cmd).await,
                Command::Api(_) => unreachable!(),
            }
        }
    }
}

pub async fn open_repo(
    store: &StoreKind,
    db_path: Option<PathBuf>,
    db_url: Option<String>,
) -> Result<Arc<dyn Repository>> {
    match store {
        StoreKind::Json => {
            let s = lockin_json::JsonStore::open_default().await?;
            Ok(Arc::new(s))
        }
        StoreKind::Sqlite => {
            let p = db_path.unwrap_or_else(|| lockin_json::paths::data_root().join("lockin.sqlite3"));
            if let Some(parent) = p.parent() {
                std::fs::create_dir_all(parent).ok();
            }
            let s = lockin_sqlite::SqliteRepo::open_file(&p).await?;
            Ok(Arc::new(s))
        }
        StoreKind::Postgres => {
            let url = db_url.ok_or_else(|| anyhow!("--db-url required for --store postgres"))?;
            let s = lockin_pg::PostgresRepo::connect(&url).await?;
            Ok(Arc::new(s))
        }
    }
}

pub fn policy(kind: &PolicyKind) -> Arc<dyn SchedulingPolicy> {
    match kind {
        PolicyKind::Sm2 => Arc::new(Sm2Policy),
        PolicyKind::Steps => Arc::new(StepPolicy),
    }
}

async fn deck_cmd(repo: Arc<dyn Repository>, cmd: DeckCmd) -> Result<()> {
    match cmd {
        DeckCmd::Add(a) => {
            let meta = DeckMeta {
                subject: a.subject,
                course: a.course,
                instructor: a.instructor,
            };
            let d = repo.create_deck(&a.name, meta).await?;
            println!("{}", d.id);
        }
        DeckCmd::List => {
            let mut v = repo.list_decks().await?;
            v.sort_by_key(|d| d.created_at);
            for d in v {
                let subject = d.subject.as_deref().unwrap_or("-");
                let course = d.course.as_deref().unwrap_or("-");
                println!("{}\t{}\t{}\t{}", d.id, d.name, subject, course);
            }
        }
        DeckCmd::Rm { deck } => {
            let d = resolve_deck(&*repo, &deck).await?;
            repo.delete_deck(d.id).await?;
            println!("ok");
        }
    }
    Ok(())
}

async fn card_cmd(repo: Arc<dyn Repository>, cmd: CardCmd) -> Result<()> {
    match cmd {
        CardCmd::Add(a) => {
            let deck = resolve_deck(&*repo, &a.deck).await?;
            let c = repo.add_card(deck.id, &a.front, &a.back, &a.tags).await?;
            println!("{}", c.id);
        }
        CardCmd::List { deck, search, tag } => {
            let deck_id = if let Some(sel) = deck {
                Some(resolve_deck(&*repo, &sel).await?.id)
            } else {
                None
            };
            let mut cards = repo.list_cards(deck_id).await?;
            if let Some(q) = search {
                cards = filter_by_text(&cards, &q);
            }
            if let Some(t) = tag {
                cards = filter_by_tag(&cards, &t);
            }
            for c in cards {
                let tags = if c.tags.is_empty() { "-".to_string() } else { c.tags.join(";") };
                let pile = if c.schedule.is_in_review_pile() { "in-pile" } else { "parked" };
                println!(
                    "{}\t{}\t{}\tdeck={}\ttags={}\t{}\tinterval={}d",
                    c.id, c.front, c.back, c.deck_id, tags, pile, c.schedule.interval_days
                );
            }
        }
        CardCmd::Rm { card_id } => {
            let id = parse_uuid(&card_id)?;
            repo.delete_card(id).await?;
            println!("ok");
        }
        CardCmd::Edit(e) => {
            if e.park && e.queue {
                bail!("cannot use --park and --queue together");
            }
            let id = parse_uuid(&e.card_id)?;
            let mut card = repo.get_card(id).await?;

            if let Some(f) = e.front { card.front = f; }
            if let Some(b) = e.back { card.back = b; }

            if !e.add_tags.is_empty() || !e.rm_tags.is_empty() {
                let mut tags = card.tags.clone();
                for t in e.add_tags { if !tags.iter().any(|x| x.eq_ignore_ascii_case(&t)) { tags.push(t); } }
                if !e.rm_tags.is_empty() {
                    tags.retain(|x| !e.rm_tags.iter().any(|r| x.eq_ignore_ascii_case(r)));
                }
                card.tags = tags;
            }

            let _ = repo.update_card(&card).await?;

            if e.park {
                repo.set_review_pile(id, None).await?;
            } else if e.queue {
                repo.set_review_pile(id, Some(Utc::now())).await?;
            }
            println!("ok");
        }
    }
    Ok(())
}

async fn due_cmd(repo: Arc<dyn Repository>, cmd: DueCmd) -> Result<()> {
    let now = Utc::now();
    let deck_id = if let Some(sel) = cmd.deck {
        Some(resolve_deck(&*repo, &sel).await?.id)
    } else {
        None
    };
    let cards = repo.list_cards(deck_id).await?;
    let queue = due_queue(&cards, now);
    for c in queue.into_iter().take(cmd.max) {
        let due = c.schedule.due_at.map(|d| d.to_rfc3339()).unwrap_or_default();
        println!("{}\t{}\tdue={}", c.id, c.front, due);
    }
    Ok(())
}

async fn review_cmd(
    repo: Arc<dyn Repository>,
    policy: Arc<dyn SchedulingPolicy>,
    cmd: ReviewCmd,
) -> Result<()> {
    let deck_id = if let Some(sel) = cmd.deck {
        Some(resolve_deck(&*repo, &sel).await?.id)
    } else {
        None
    };

    let svc = ReviewService::new(repo, policy);
    let pool = svc.due_queue(deck_id, None, Some(cmd.max)).await?;
    if pool.is_empty() {
        println!("no cards due");
        return Ok(());
    }

    let total = pool.len();
    let mut count = 0usize;
    for card in pool {
        count += 1;
        println!("\n[{}/{}] {}", count, total, card.id);
        println!("Q: {}", card.front);
        prompt_enter("[enter=show]")?;
        println!("A: {}", card.back);
        println!("[0-5 or again/hard/good/easy, s=skip, q=quit]");
        let grade = loop {
            let line = read_line("grade> ")?;
            match line.trim().to_lowercase().as_str() {
                "s" | "skip" => break None,
                "q" | "quit" => return Ok(()),
                other => match Grade::from_str(other) {
                    Ok(g) => break Some(g),
                    Err(_) => println!("enter 0-5, again/hard/good/easy, s, or q"),
                },
            }
        };

        if let Some(g) = grade {
            let schedule = svc.review_card(card.id, g, None).await?;
            if schedule.interval_days == 0 {
                println!("→ due again now");
            } else {
                println!("→ next due in {} day(s)", schedule.interval_days);
            }
        }
    }

    println!("\nreviewed {}", count);
    Ok(())
}

async fn stats_cmd(repo: Arc<dyn Repository>, deck: Option<String>) -> Result<()> {
    let now = Utc::now();
    let deck_id = if let Some(sel) = deck {
        Some(resolve_deck(&*repo, &sel).await?.id)
    } else {
        None
    };

    let cards = repo.list_cards(deck_id).await?;
    let progress = stats::deck_progress(&cards, now);
    println!(
        "cards: {} total, {} in review pile, {} due now",
        progress.total, progress.in_review_pile, progress.due_now
    );

    let mut reviews = Vec::new();
    for c in &cards {
        reviews.extend(repo.list_reviews_for_card(c.id).await?);
    }
    let summary = stats::summarize(&reviews);
    println!(
        "reviews: {} total ({} passes / {} lapses), accuracy {:.0}%",
        summary.totals.total,
        summary.totals.passes,
        summary.totals.lapses,
        summary.totals.accuracy() * 100.0
    );
    println!("streak: {} day(s)", stats::daily_streak(&reviews, now.date_naive()));
    Ok(())
}

fn demo_cmd(policy: Arc<dyn SchedulingPolicy>, cmd: DemoCmd) -> Result<()> {
    let grades = cmd
        .grades
        .split(',')
        .map(|s| Grade::from_str(s).map_err(|_| anyhow!("bad grade: {s}")))
        .collect::<Result<Vec<_>>>()?;

    let now = Utc::now();
    let initial = CardSchedule::new_in_pile(now);
    println!(
        "policy={} start: ef={} reps={} interval={}d",
        policy.name(),
        initial.ease_factor,
        initial.repetitions,
        initial.interval_days
    );

    let states = replay(&*policy, initial, &grades, now);
    for (grade, s) in grades.iter().zip(&states) {
        let g = match grade {
            Grade::Score(q) => q.to_string(),
            Grade::Label(r) => r.as_str().to_string(),
        };
        println!(
            "grade={g} -> reps={} interval={}d ef={} due=+{}d",
            s.repetitions, s.interval_days, s.ease_factor, s.interval_days
        );
    }
    Ok(())
}

async fn export_cmd(repo: Arc<dyn Repository>, cmd: ExportCmd) -> Result<()> {
    match cmd {
        ExportCmd::Json { path } => {
            let decks = repo.list_decks().await?;
            let mut cards = repo.list_cards(None).await?;
            cards.sort_by_key(|c| c.created_at);
            let bundle = ExportBundle { version: 1, decks, cards };
            let s = serde_json::to_string_pretty(&bundle)?;
            std::fs::write(&path, s)?;
            println!("wrote {}", path.display());
        }
        ExportCmd::Csv { path, deck } => {
            let deck_id = if let Some(sel) = deck {
                Some(resolve_deck(&*repo, &sel).await?.id)
            } else { None };
            let mut cards = repo.list_cards(deck_id).await?;
            cards.sort_by_key(|c| c.created_at);

            let decks = repo.list_decks().await?;
            let mut deck_name: std::collections::HashMap<Uuid, String> =
                decks.into_iter().map(|d| (d.id, d.name)).collect();

            let mut wtr = csv::Writer::from_path(&path)?;
            wtr.write_record(["deck", "front", "back", "tags", "in_pile"])?;
            for c in cards {
                let dn = deck_name.remove(&c.deck_id).unwrap_or_else(|| c.deck_id.to_string());
                let tags = if c.tags.is_empty() { "".to_string() } else { c.tags.join(";") };
                wtr.write_record([
                    dn,
                    c.front,
                    c.back,
                    tags,
                    if c.schedule.is_in_review_pile() { "1".to_string() } else { "0".to_string() },
                ])?;
            }
            wtr.flush()?;
            println!("wrote {}", path.display());
        }
    }
    Ok(())
}

async fn import_cmd(repo: Arc<dyn Repository>, cmd: ImportCmd) -> Result<()> {
    match cmd {
        ImportCmd::Json { path } => {
            let data = std::fs::read_to_string(&path)?;
            let bundle: ExportBundle = serde_json::from_str(&data)?;

            let mut deck_names: std::collections::HashMap<Uuid, String> = std::collections::HashMap::new();
            for d in bundle.decks {
                deck_names.insert(d.id, d.name.clone());
                let meta = DeckMeta {
                    subject: d.subject,
                    course: d.course,
                    instructor: d.instructor,
                };
                let _ = repo.create_deck(&d.name, meta).await;
            }

            for c in bundle.cards {
                let name = deck_names
                    .get(&c.deck_id)
                    .cloned()
                    .unwrap_or_else(|| c.deck_id.to_string());
                let deck = ensure_deck_by_name(&*repo, &name).await?;
                let added = repo.add_card(deck.id, &c.front, &c.back, &c.tags).await?;
                // Carry the scheduling state over; a fresh card holds no token yet.
                repo.update_schedule(added.id, None, &c.schedule).await?;
            }
            println!("imported");
        }
        ImportCmd::Csv { path, deck } => {
            let mut rdr = csv::Reader::from_path(&path)?;
            let mut target_deck = None;
            if let Some(sel) = deck { target_deck = Some(resolve_deck(&*repo, &sel).await?); }
            for rec in rdr.records() {
                let rec = rec?;
                let deck_name = rec.get(0).unwrap_or("").trim();
                let front = rec.get(1).unwrap_or("").to_string();
                let back = rec.get(2).unwrap_or("").to_string();
                let tags = rec.get(3).unwrap_or("").split(';').filter(|s| !s.is_empty()).map(|s| s.to_string()).collect::<Vec<_>>();
                let in_pile = rec.get(4).unwrap_or("1").trim() != "0";

                let deck_obj = if let Some(d) = &target_deck { d.clone() } else { ensure_deck_by_name(&*repo, deck_name).await? };
                let card = repo.add_card(deck_obj.id, &front, &back, &tags).await?;
                if !in_pile { repo.set_review_pile(card.id, None).await?; }
            }
            println!("imported");
        }
    }
    Ok(())
}

// ===== Helpers =====
fn parse_uuid(s: &str) -> Result<Uuid> { Uuid::parse_str(s).map_err(|_| anyhow!("invalid uuid")) }

async fn resolve_deck<R: Repository + ?Sized>(repo: &R, sel: &str) -> Result<Deck> {
    if let Ok(id) = Uuid::parse_str(sel) { if let Ok(d) = repo.get_deck(id).await { return Ok(d); } }
    let decks = repo.list_decks().await?;
    if let Some(d) = decks.into_iter().find(|d| d.name.eq_ignore_ascii_case(sel)) { return Ok(d); }
    bail!("deck not found: {}", sel)
}

async fn ensure_deck_by_name<R: Repository + ?Sized>(repo: &R, name: &str) -> Result<Deck> {
    let decks = repo.list_decks().await?;
    if let Some(d) = decks.into_iter().find(|d| d.name.eq_ignore_ascii_case(name)) { return Ok(d); }
    let d = repo.create_deck(name, DeckMeta::default()).await?;
    Ok(d)
}

fn prompt_enter(label: &str) -> Result<()> { print!("{label}"); stdout().flush().ok(); let mut s = String::new(); stdin().read_line(&mut s)?; Ok(()) }
fn read_line(prompt: &str) -> Result<String> { print!("{prompt}"); stdout().flush().ok(); let mut s = String::new(); stdin().read_line(&mut s)?; Ok(s) }

#[derive(serde::Serialize, serde::Deserialize)]
struct ExportBundle { version: u32, decks: Vec<Deck>, cards: Vec<Card> }
