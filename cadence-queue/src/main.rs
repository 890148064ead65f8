//! cadence-queue - Manage scheduled posts
//!
//! Unix-style tool for adding, inspecting, and cancelling posts in the
//! Cadence queue.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use libcadence::scheduling::{format_relative, parse_schedule};
use libcadence::{
    CadenceError, Config, Database, MetricsSnapshot, PostStatus, Result, ScheduledPost,
    StaleClaimReaper, TargetPlatform,
};
use serde_json::json;

const DEFAULT_LIST_LIMIT: usize = 100;
const CANCEL_REASON: &str = "cancelled by operator";

#[derive(Parser, Debug)]
#[command(name = "cadence-queue")]
#[command(version)]
#[command(about = "Manage scheduled posts")]
#[command(long_about = "\
cadence-queue - Manage scheduled posts

DESCRIPTION:
    cadence-queue is a Unix-style tool for managing the Cadence post queue.
    Posts added here are published by cadence-send when they come due.

COMMANDS:
    schedule    Add a post to the queue
    list        List posts, optionally by status
    show        Show one post and its metrics snapshots
    cancel      Cancel a pending or retrying post
    stats       Count posts per status
    reap        Recover publish attempts abandoned by a crashed worker

USAGE EXAMPLES:
    # Schedule a TikTok post in two hours
    cadence-queue schedule \"New drop tonight\" --platform tiktok --at 2h \\
        --media https://cdn.example.com/clip.mp4

    # List posts waiting for a retry, as JSON
    cadence-queue list --status retrying --format json

    # Cancel a post
    cadence-queue cancel <POST_ID>

CONFIGURATION:
    Configuration file: ~/.config/cadence/config.toml
    Database location: ~/.local/share/cadence/posts.db

    Override with environment variables:
        CADENCE_CONFIG    - Path to config file
        CADENCE_DB_PATH   - Path to database file

EXIT CODES:
    0 - Success
    1 - Operation failed
    2 - Database or configuration error
    3 - Invalid input (bad post ID, time format, etc.)
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Add a post to the queue
    Schedule {
        /// Caption or body text
        content: String,

        /// Target platform (tiktok, instagram, youtube, twitter, ...)
        #[arg(short, long)]
        platform: String,

        /// When to publish (e.g., "now", "30m", "tomorrow 9am", RFC 3339)
        #[arg(short, long, default_value = "now")]
        at: String,

        /// Media URL to attach; repeat for several
        #[arg(short, long = "media", value_name = "URL")]
        media: Vec<String>,
    },

    /// List posts
    List {
        /// Only posts in this status
        #[arg(short, long)]
        status: Option<String>,

        /// Maximum posts to show
        #[arg(short, long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: usize,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show a post and its metrics snapshots
    Show {
        post_id: String,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Cancel a pending or retrying post
    Cancel { post_id: String },

    /// Count posts per status
    Stats {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Recover publish attempts abandoned by a crashed worker
    Reap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = CadenceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(CadenceError::InvalidInput(format!(
                "Invalid format '{}'. Must be 'text' or 'json'",
                other
            ))),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Quiet by default; stdout carries command output
    if cli.verbose {
        libcadence::logging::init_default(true);
    } else {
        libcadence::logging::LoggingConfig::new(
            libcadence::logging::LogFormat::Text,
            "error".to_string(),
            false,
        )
        .init();
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Validate arguments before touching config or the database
    let format = match &cli.command {
        Commands::List { format, .. }
        | Commands::Show { format, .. }
        | Commands::Stats { format } => format.parse()?,
        _ => OutputFormat::Text,
    };

    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;

    match cli.command {
        Commands::Schedule {
            content,
            platform,
            at,
            media,
        } => cmd_schedule(&db, &content, &platform, &at, media).await,
        Commands::List { status, limit, .. } => {
            cmd_list(&db, status.as_deref(), limit, format).await
        }
        Commands::Show { post_id, .. } => cmd_show(&db, &post_id, format).await,
        Commands::Cancel { post_id } => cmd_cancel(&db, &post_id).await,
        Commands::Stats { .. } => cmd_stats(&db, format).await,
        Commands::Reap => cmd_reap(&db, &config).await,
    }
}

/// Add a post; prints the new post id on stdout
async fn cmd_schedule(
    db: &Database,
    content: &str,
    platform: &str,
    at: &str,
    media: Vec<String>,
) -> Result<()> {
    if content.trim().is_empty() {
        return Err(CadenceError::InvalidInput("Content cannot be empty".to_string()));
    }
    let platform: TargetPlatform = platform.parse()?;
    for url in &media {
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(CadenceError::InvalidInput(format!(
                "Media must be an http(s) URL: {}",
                url
            )));
        }
    }
    let scheduled_at = parse_schedule(at, Utc::now())?;

    let post = ScheduledPost::new(content.to_string(), platform, scheduled_at.timestamp())
        .with_media(media);
    db.create_post(&post).await?;

    println!("{}", post.id);
    Ok(())
}

async fn cmd_list(
    db: &Database,
    status: Option<&str>,
    limit: usize,
    format: OutputFormat,
) -> Result<()> {
    let status = status.map(str::parse::<PostStatus>).transpose()?;
    let posts = db.list_posts(status, limit).await?;

    match format {
        OutputFormat::Json => {
            let list: Vec<serde_json::Value> = posts.iter().map(post_json).collect();
            println!("{:#}", serde_json::Value::Array(list));
        }
        OutputFormat::Text => {
            let now = Utc::now().timestamp();
            for post in &posts {
                println!(
                    "{} | {} | {} | {} | {}",
                    post.id,
                    post.platform,
                    post.status,
                    format_relative(post.next_retry_at.unwrap_or(post.scheduled_at), now),
                    truncate_content(&post.content, 50)
                );
            }
        }
    }
    Ok(())
}

async fn cmd_show(db: &Database, post_id: &str, format: OutputFormat) -> Result<()> {
    validate_post_id(post_id)?;
    let post = db
        .get_post(post_id)
        .await?
        .ok_or_else(|| CadenceError::NotFound(format!("post {}", post_id)))?;
    let snapshots = db.snapshots_for_post(post_id).await?;

    match format {
        OutputFormat::Json => {
            let mut value = post_json(&post);
            value["snapshots"] =
                serde_json::Value::Array(snapshots.iter().map(snapshot_json).collect());
            println!("{:#}", value);
        }
        OutputFormat::Text => {
            println!("id:           {}", post.id);
            println!("platform:     {}", post.platform);
            println!("status:       {}", post.status);
            println!("scheduled_at: {}", format_timestamp(post.scheduled_at));
            println!("retry_count:  {}", post.retry_count);
            if let Some(at) = post.next_retry_at {
                println!("next_retry:   {}", format_timestamp(at));
            }
            if let Some(id) = &post.external_post_id {
                println!("external_id:  {}", id);
            }
            if let Some(at) = post.published_at {
                println!("published_at: {}", format_timestamp(at));
            }
            if let Some(error) = &post.last_error {
                println!("last_error:   {}", error);
            }
            for url in &post.media_urls {
                println!("media:        {}", url);
            }
            println!("content:      {}", post.content);
            for snapshot in &snapshots {
                println!(
                    "metrics {:>4}: views={} likes={} comments={} shares={}",
                    snapshot.checkback.label(),
                    snapshot.metrics.views,
                    snapshot.metrics.likes,
                    snapshot.metrics.comments,
                    snapshot.metrics.shares
                );
            }
        }
    }
    Ok(())
}

async fn cmd_cancel(db: &Database, post_id: &str) -> Result<()> {
    validate_post_id(post_id)?;
    let post = db
        .get_post(post_id)
        .await?
        .ok_or_else(|| CadenceError::NotFound(format!("post {}", post_id)))?;

    if !db.cancel_post(post_id, CANCEL_REASON, Utc::now().timestamp()).await? {
        return Err(CadenceError::InvalidInput(format!(
            "Post {} is {} and can no longer be cancelled",
            post_id, post.status
        )));
    }

    println!("Cancelled {}", post_id);
    Ok(())
}

async fn cmd_stats(db: &Database, format: OutputFormat) -> Result<()> {
    let counts = db.status_counts().await?;
    match format {
        OutputFormat::Json => println!("{:#}", json!(counts)),
        OutputFormat::Text => {
            for (status, count) in &counts {
                println!("{:<10} {}", status, count);
            }
            println!("{:<10} {}", "total", counts.values().sum::<i64>());
        }
    }
    Ok(())
}

async fn cmd_reap(db: &Database, config: &Config) -> Result<()> {
    let reaper = StaleClaimReaper::new(
        db.clone(),
        config.scheduling.retry_policy(),
        config.scheduling.stale_claim_timeout(),
    );
    let report = reaper.run_cycle().await?;
    println!("{}", report);
    Ok(())
}

fn validate_post_id(post_id: &str) -> Result<()> {
    uuid::Uuid::parse_str(post_id)
        .map(|_| ())
        .map_err(|_| CadenceError::InvalidInput(format!("Invalid post ID: {}", post_id)))
}

fn post_json(post: &ScheduledPost) -> serde_json::Value {
    json!({
        "id": post.id,
        "content": post.content,
        "media_urls": post.media_urls,
        "platform": post.platform.as_str(),
        "status": post.status.as_str(),
        "scheduled_at": post.scheduled_at,
        "retry_count": post.retry_count,
        "next_retry_at": post.next_retry_at,
        "last_error": post.last_error,
        "external_post_id": post.external_post_id,
        "published_at": post.published_at,
        "next_checkback_at": post.next_checkback_at,
        "created_at": post.created_at,
    })
}

fn snapshot_json(snapshot: &MetricsSnapshot) -> serde_json::Value {
    json!({
        "checkback": snapshot.checkback.label(),
        "captured_at": snapshot.captured_at,
        "views": snapshot.metrics.views,
        "likes": snapshot.metrics.likes,
        "comments": snapshot.metrics.comments,
        "shares": snapshot.metrics.shares,
    })
}

fn format_timestamp(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

/// Truncate content to max characters with ellipsis
fn truncate_content(content: &str, max_chars: usize) -> String {
    let single_line = content.replace('\n', " ");
    if single_line.chars().count() <= max_chars {
        single_line
    } else {
        let kept: String = single_line.chars().take(max_chars).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_content() {
        assert_eq!(truncate_content("short", 50), "short");
        assert_eq!(truncate_content("line one\nline two", 50), "line one line two");
        assert_eq!(truncate_content(&"é".repeat(60), 50), format!("{}...", "é".repeat(50)));
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_validate_post_id() {
        assert!(validate_post_id("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(validate_post_id("not-a-uuid").is_err());
    }
}
