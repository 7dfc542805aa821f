use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, ValueEnum)]
pub enum StoreKind {
    Json,
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum PolicyKind {
    /// Integer-grade SM-2 formula (canonical)
    Sm2,
    /// Four-label again/hard/good/easy ladder
    Steps,
}

#[derive(Debug, Parser, Clone)]
#[command(name = "lockin", version, about = "LockIN flashcard scheduler CLI/API")]
pub struct Cli {
    /// Storage backend (applies to CLI/API unless overridden)
    #[arg(long, value_enum, default_value_t = StoreKind::Json)]
    pub store: StoreKind,

    /// SQLite DB path when --store sqlite (defaults to app data dir)
    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Postgres connection URL when --store postgres
    #[arg(long)]
    pub db_url: Option<String>,

    /// Scheduling policy used for reviews
    #[arg(long, value_enum, default_value_t = PolicyKind::Sm2)]
    pub policy: PolicyKind,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Deck operations (CLI)
    #[command(subcommand)]
    Deck(DeckCmd),
    /// Card operations (CLI)
    #[command(subcommand)]
    Card(CardCmd),
    /// List cards currently due for review
    Due(DueCmd),
    /// Interactive review loop (CLI)
    Review(ReviewCmd),
    /// Review and deck statistics
    Stats { #[arg(long)] deck: Option<String> },
    /// Replay a grade sequence through a policy from a fresh card
    Demo(DemoCmd),
    /// Export data (CLI)
    #[command(subcommand)]
    Export(ExportCmd),
    /// Import data (CLI)
    #[command(subcommand)]
    Import(ImportCmd),
    /// Launch Axum HTTP API
    Api(ApiCmd),
}

#[derive(Debug, Subcommand, Clone)]
pub enum DeckCmd {
    Add(DeckAdd),
    List,
    Rm { deck: String },
}

#[derive(Debug, Args, Clone)]
pub struct DeckAdd {
    pub name: String,
    #[arg(long)]
    pub subject: Option<String>,
    #[arg(long)]
    pub course: Option<String>,
    #[arg(long)]
    pub instructor: Option<String>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CardCmd {
    Add(CardAdd),
    List {
        #[arg(long)]
        deck: Option<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        tag: Option<String>,
    },
    Rm { card_id: String },
    Edit(CardEdit),
}

#[derive(Debug, Args, Clone)]
pub struct CardAdd {
    #[arg(long)]
    pub deck: String,
    #[arg(long)]
    pub front: String,
    #[arg(long)]
    pub back: String,
    #[arg(long = "tag")]
    pub tags: Vec<String>,
}

#[derive(Debug, Args, Clone)]
pub struct CardEdit {
    pub card_id: String,
    #[arg(long)]
    pub front: Option<String>,
    #[arg(long)]
    pub back: Option<String>,
    #[arg(long = "add-tag")]
    pub add_tags: Vec<String>,
    #[arg(long = "rm-tag")]
    pub rm_tags: Vec<String>,
    /// Park the card outside the review pile
    #[arg(long)]
    pub park: bool,
    /// Put the card back in the review pile, due now
    #[arg(long)]
    pub queue: bool,
}

#[derive(Debug, Args, Clone)]
pub struct DueCmd {
    #[arg(long)]
    pub deck: Option<String>,
    #[arg(long, default_value_t = 50)]
    pub max: usize,
}

#[derive(Debug, Args, Clone)]
pub struct ReviewCmd {
    #[arg(long)]
    pub deck: Option<String>,
    #[arg(long, default_value_t = 50)]
    pub max: usize,
}

#[derive(Debug, Args, Clone)]
pub struct DemoCmd {
    /// Comma-separated grades, e.g. "5,5,5,4,2,5" or "good,again,easy"
    #[arg(long, default_value = "5,5,5,4,2,5")]
    pub grades: String,
}

#[derive(Debug, Subcommand, Clone)]
pub enum ExportCmd {
    Json { path: PathBuf },
    Csv { path: PathBuf, #[arg(long)] deck: Option<String> },
}

#[derive(Debug, Subcommand, Clone)]
pub enum ImportCmd {
    Json { path: PathBuf },
    Csv { path: PathBuf, #[arg(long)] deck: Option<String> },
}

#[derive(Debug, Args, Clone)]
pub struct ApiCmd {
    /// Bind address (host:port)
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub addr: String,
}
