use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use hntldr::PROJECT_NAME;
use hntldr::context::BotContext;
use hntldr::hn::{ContentFetcher as _, HnClient, HnError, extract_item_id};
use hntldr::notifier::AdminNotifier;
use hntldr::poll::{PollConfig, derive_hook, run_poll_scheduler};
use hntldr::publisher::{DisplayContent, PublishError};
use hntldr::render::render_message;
use hntldr::synth::{LlmClient, LlmConfig, LlmError, LlmProvider, LlmSynthesizer};
use hntldr::telegram::TelegramBot;
use hntldr::topic::{ScoreThreshold, ScoreThresholds};
use hntldr::worker::{UpdateWorker, WorkerConfig};
use hntldr_db::{Database, DbError, UpdateSchedule};
use snafu::{ResultExt, Snafu};
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::level_filters::LevelFilter;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub const LOG_TARGET: &str = "hntldr::main";

#[derive(Debug, Snafu)]
pub enum BotError {
    #[snafu(display("Invalid configuration:\n  {}", problems.join("\n  ")))]
    Config { problems: Vec<String> },
    #[snafu(display("Failed to create data dir"))]
    DataDir { source: io::Error },
    #[snafu(display("Database error"))]
    Database { source: DbError },
    #[snafu(display("Hacker News client error"))]
    Hn { source: HnError },
    #[snafu(display("LLM client error"))]
    Llm { source: LlmError },
    #[snafu(display("Telegram client error"))]
    Telegram { source: PublishError },
    #[snafu(display("Failed to wait for shutdown signal"))]
    Signal { source: io::Error },
    #[snafu(display("Background task failed"))]
    Join { source: JoinError },
    #[snafu(display("Logging initialization failed"))]
    Logging,
}

pub type BotResult<T> = std::result::Result<T, BotError>;

/// hntldr - posts short summaries of top Hacker News stories to a Telegram
/// channel and keeps their scores fresh
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Opts {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Telegram bot token
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub telegram_bot_token: Option<String>,

    /// Channel to publish to (`@name` or numeric id); without it only
    /// already published messages are kept up to date
    #[arg(long, env = "TELEGRAM_CHANNEL_ID")]
    pub telegram_channel_id: Option<String>,

    /// Telegram user ids that receive error reports (comma separated)
    #[arg(long, env = "ADMIN_USER_ID", value_delimiter = ',')]
    pub admin_user_id: Vec<i64>,

    #[arg(long, env = "LLM_PROVIDER", value_enum, default_value = "claude")]
    pub llm_provider: LlmProvider,

    #[arg(long, env = "LLM_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,

    #[arg(long, env = "LLM_MODEL", default_value = "claude-haiku-4-5-20251001")]
    pub llm_model: String,

    #[arg(long, env = "LLM_MAX_TOKENS", default_value = "300")]
    pub llm_max_tokens: u32,

    /// Base url of an OpenAI-compatible API
    #[arg(long, env = "OPENAI_BASE_URL")]
    pub openai_base_url: Option<String>,

    /// Interval between poll cycles in minutes
    #[arg(long, env = "POLL_INTERVAL_MINUTES", default_value = "60")]
    pub poll_interval_minutes: u64,

    /// Maximum stories to publish per poll cycle
    #[arg(long, env = "STORIES_PER_POLL", default_value = "3")]
    pub stories_per_poll: usize,

    /// How many top stories to consider per poll cycle
    #[arg(long, env = "CANDIDATES_PER_POLL", default_value = "50")]
    pub candidates_per_poll: usize,

    /// Minimum score for regular stories (`-1` or `off` disables)
    #[arg(long, env = "MIN_SCORE_DEFAULT", default_value = "100", allow_hyphen_values = true)]
    pub min_score_default: ScoreThreshold,

    #[arg(long, env = "MIN_SCORE_SHOW_HN", default_value = "50", allow_hyphen_values = true)]
    pub min_score_show_hn: ScoreThreshold,

    #[arg(long, env = "MIN_SCORE_ASK_HN", default_value = "100", allow_hyphen_values = true)]
    pub min_score_ask_hn: ScoreThreshold,

    #[arg(long, env = "MIN_SCORE_LAUNCH_HN", default_value = "75", allow_hyphen_values = true)]
    pub min_score_launch_hn: ScoreThreshold,

    #[arg(long, env = "MIN_SCORE_TELL_HN", default_value = "100", allow_hyphen_values = true)]
    pub min_score_tell_hn: ScoreThreshold,

    #[arg(long, env = "MIN_SCORE_JOBS", default_value = "-1", allow_hyphen_values = true)]
    pub min_score_jobs: ScoreThreshold,

    /// Article text sent to the LLM is truncated to this many characters
    #[arg(long, env = "MAX_ARTICLE_CHARS", default_value = "4000")]
    pub max_article_chars: usize,

    /// Timeout of each outbound HTTP request in seconds
    #[arg(long, env = "REQUEST_TIMEOUT", default_value = "15")]
    pub request_timeout: u64,

    /// Data dir to store the database in
    #[arg(long, env = "DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    #[arg(long, env = "UPDATE_FAST_INTERVAL_MINUTES", default_value = "10")]
    pub update_fast_interval_minutes: u64,

    #[arg(long, env = "UPDATE_SLOW_INTERVAL_MINUTES", default_value = "30")]
    pub update_slow_interval_minutes: u64,

    /// How long a published message keeps being updated
    #[arg(long, env = "UPDATE_LIFETIME_MINUTES", default_value = "180")]
    pub update_lifetime_minutes: u64,
}

#[derive(Debug, Parser)]
pub enum Command {
    /// Run the poller and the update worker (default)
    Run,
    /// Summarize a single item and print the message, without publishing
    /// or recording anything
    Summarize {
        /// HN item link or id
        item: String,
    },
    /// Development commands
    Dev {
        #[command(subcommand)]
        dev_command: DevCommand,
    },
}

#[derive(Debug, Parser)]
pub enum DevCommand {
    /// Print the persisted update tasks, earliest due first
    Tasks,
}

const fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * 60)
}

impl Opts {
    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    fn update_schedule(&self) -> UpdateSchedule {
        UpdateSchedule {
            fast_interval: minutes(self.update_fast_interval_minutes),
            slow_interval: minutes(self.update_slow_interval_minutes),
            lifetime: minutes(self.update_lifetime_minutes),
            ..UpdateSchedule::default()
        }
    }

    fn score_thresholds(&self) -> ScoreThresholds {
        ScoreThresholds {
            default: self.min_score_default,
            show_hn: self.min_score_show_hn,
            ask_hn: self.min_score_ask_hn,
            launch_hn: self.min_score_launch_hn,
            tell_hn: self.min_score_tell_hn,
            jobs: self.min_score_jobs,
        }
    }

    fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: minutes(self.poll_interval_minutes),
            candidates_per_poll: self.candidates_per_poll,
            max_per_cycle: self.stories_per_poll,
            thresholds: self.score_thresholds(),
            max_article_chars: self.max_article_chars,
            ..PollConfig::default()
        }
    }

    fn llm_config(&self) -> LlmConfig {
        LlmConfig {
            provider: self.llm_provider,
            api_key: self.llm_api_key.clone().unwrap_or_default(),
            model: self.llm_model.clone(),
            max_tokens: self.llm_max_tokens,
            openai_base_url: self.openai_base_url.clone(),
            request_timeout: self.request_timeout(),
        }
    }

    fn validate_common(&self, problems: &mut Vec<String>) {
        let mut check = |ok: bool, problem: &str| {
            if !ok {
                problems.push(problem.to_owned());
            }
        };
        check(0 < self.max_article_chars, "MAX_ARTICLE_CHARS must be > 0");
        check(0 < self.request_timeout, "REQUEST_TIMEOUT must be > 0");
    }

    fn validate_llm(&self, problems: &mut Vec<String>) {
        if self.llm_api_key.as_deref().is_none_or(str::is_empty) {
            problems.push("LLM_API_KEY is not set".into());
        }
        if self.llm_model.trim().is_empty() {
            problems.push("LLM_MODEL is not set".into());
        }
        if self.llm_max_tokens == 0 {
            problems.push("LLM_MAX_TOKENS must be > 0".into());
        }
    }

    /// Everything `run` needs, checked before anything is scheduled
    fn validate_run(&self) -> BotResult<()> {
        let mut problems = vec![];
        self.validate_common(&mut problems);
        self.validate_llm(&mut problems);

        if self.telegram_bot_token.as_deref().is_none_or(str::is_empty) {
            problems.push("TELEGRAM_BOT_TOKEN is not set".into());
        }
        if self.poll_interval_minutes == 0 {
            problems.push("POLL_INTERVAL_MINUTES must be > 0".into());
        }
        if self.stories_per_poll == 0 {
            problems.push("STORIES_PER_POLL must be > 0".into());
        }
        if self.candidates_per_poll == 0 {
            problems.push("CANDIDATES_PER_POLL must be > 0".into());
        }
        if self.update_fast_interval_minutes == 0 {
            problems.push("UPDATE_FAST_INTERVAL_MINUTES must be > 0".into());
        }
        if self.update_slow_interval_minutes < self.update_fast_interval_minutes {
            problems.push(
                "UPDATE_SLOW_INTERVAL_MINUTES must not be shorter than UPDATE_FAST_INTERVAL_MINUTES"
                    .into(),
            );
        }
        if self.update_lifetime_minutes <= self.update_fast_interval_minutes {
            problems.push(
                "UPDATE_LIFETIME_MINUTES must be longer than UPDATE_FAST_INTERVAL_MINUTES".into(),
            );
        }

        if problems.is_empty() {
            Ok(())
        } else {
            ConfigSnafu { problems }.fail()
        }
    }
}

#[snafu::report]
#[tokio::main]
async fn main() -> BotResult<()> {
    init_logging()?;

    let mut opts = Opts::parse();

    match opts.command.take() {
        Some(Command::Summarize { item }) => summarize(&opts, &item).await,
        Some(Command::Dev {
            dev_command: DevCommand::Tasks,
        }) => print_tasks(&opts).await,
        Some(Command::Run) | None => {
            opts.validate_run()?;
            run_bot(opts).await
        }
    }
}

async fn open_db(opts: &Opts) -> BotResult<Database> {
    let db_path = Database::mk_db_path(&opts.data_dir)
        .await
        .context(DataDirSnafu)?;
    Database::open(db_path, opts.update_schedule())
        .await
        .context(DatabaseSnafu)
}

async fn run_bot(opts: Opts) -> BotResult<()> {
    info!(
        target: LOG_TARGET,
        project = PROJECT_NAME,
        version = env!("CARGO_PKG_VERSION"),
        channel = opts.telegram_channel_id.as_deref().unwrap_or("none"),
        admins = opts.admin_user_id.len(),
        llm_provider = %opts.llm_provider,
        llm_model = %opts.llm_model,
        poll_interval_minutes = opts.poll_interval_minutes,
        stories_per_poll = opts.stories_per_poll,
        "Bot configuration"
    );

    let db = Arc::new(open_db(&opts).await?);
    let hn = Arc::new(
        HnClient::new(opts.request_timeout(), opts.max_article_chars).context(HnSnafu)?,
    );
    let llm = LlmClient::new(opts.llm_config()).context(LlmSnafu)?;
    let telegram = Arc::new(
        TelegramBot::new(
            opts.telegram_bot_token.as_deref().unwrap_or_default(),
            opts.telegram_channel_id.clone(),
            opts.request_timeout(),
        )
        .context(TelegramSnafu)?,
    );

    let ctx = BotContext {
        db,
        candidates: hn.clone(),
        fetcher: hn,
        synthesizer: Arc::new(LlmSynthesizer::new(llm)),
        publisher: telegram.clone(),
        notifier: Arc::new(AdminNotifier::new(
            telegram.clone(),
            opts.admin_user_id.clone(),
        )),
    };

    let (cancel_tx, cancel_rx) = watch::channel(false);

    let worker = tokio::spawn(
        UpdateWorker::new(ctx.clone(), WorkerConfig::default()).run(cancel_rx.clone()),
    );
    let poller = if telegram.channel_id().is_some() {
        Some(tokio::spawn(run_poll_scheduler(
            ctx,
            opts.poll_config(),
            cancel_rx,
        )))
    } else {
        warn!(target: LOG_TARGET, "No channel configured, only updating existing messages");
        None
    };

    info!(target: LOG_TARGET, "Bot is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await.context(SignalSnafu)?;

    info!(target: LOG_TARGET, "Shutting down");
    let _ = cancel_tx.send(true);
    worker.await.context(JoinSnafu)?;
    if let Some(poller) = poller {
        poller.await.context(JoinSnafu)?;
    }
    Ok(())
}

/// Ad-hoc lookup. Deliberately independent of the ledger and update queue.
async fn summarize(opts: &Opts, item: &str) -> BotResult<()> {
    let mut problems = vec![];
    opts.validate_common(&mut problems);
    opts.validate_llm(&mut problems);
    if !problems.is_empty() {
        return ConfigSnafu { problems }.fail();
    }

    let item_id = extract_item_id(item).context(HnSnafu)?;
    let hn = HnClient::new(opts.request_timeout(), opts.max_article_chars).context(HnSnafu)?;
    let synthesizer = LlmSynthesizer::new(LlmClient::new(opts.llm_config()).context(LlmSnafu)?);

    let item = hn.fetch_item(&item_id).await.context(HnSnafu)?;
    let hook = derive_hook(&hn, &synthesizer, &item, opts.max_article_chars).await;

    let msg = render_message(
        &DisplayContent {
            item_id: item.id.clone(),
            title: item.title.clone(),
            url: item.url.clone(),
            hook,
        },
        item.score,
        item.comment_count,
    );

    println!("{}", msg.text);
    println!();
    for button in &msg.buttons {
        println!("[{}] {}", button.text, button.url);
    }
    Ok(())
}

async fn print_tasks(opts: &Opts) -> BotResult<()> {
    let db = open_db(opts).await?;
    let tasks = db.list_update_tasks().await.context(DatabaseSnafu)?;

    println!("{} update tasks", tasks.len());
    for task in tasks {
        println!();
        println!("  ID: {}", task.id);
        println!("  Title: {}", task.title);
        println!("  Message: {}", task.message_ref);
        println!("  Score: {}, comments: {}", task.score, task.comment_count);
        println!("  Phase: {}, updates: {}", task.phase, task.update_count);
        println!("  Next update: {}", task.next_update_at);
        println!("  Expires: {}", task.expires_at);
    }
    Ok(())
}

pub fn init_logging() -> BotResult<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init()
        .map_err(|_| BotError::Logging)?;

    Ok(())
}
