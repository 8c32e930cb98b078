use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use course_core::model::{
    ContentKind, CourseId, EnrollmentId, ItemProgressEvent, QuizSubmission, UserId,
};
use serde::Serialize;
use services::{
    Clock, CourseOutline, EnrollmentService, EnrollmentServiceError, ServiceConfig, StaticCatalog,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
enum ArgsError {
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

#[derive(Parser)]
#[command(name = "course", about = "Track course enrollments and learner progress")]
struct Cli {
    /// SQLite database URL or file path (defaults to COURSE_DB_URL, then course.sqlite3)
    #[arg(long, global = true)]
    db: Option<String>,

    /// Number of content items in the course the command targets
    #[arg(long, global = true, default_value_t = 0)]
    items: u32,

    /// Number of chapters in the course the command targets
    #[arg(long, global = true, default_value_t = 0)]
    chapters: u32,

    /// Read-reconcile-save attempts before an update reports a conflict
    #[arg(long, global = true)]
    max_save_attempts: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a user in a course
    Enroll {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        course: CourseId,
    },
    /// Show a user's progress in a course
    Show {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        course: CourseId,
    },
    /// Record progress on one content item
    Item {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        course: CourseId,
        /// Position of the item in the course sequence
        #[arg(long, allow_negative_numbers = true)]
        index: i64,
        /// chapter, video or quiz
        #[arg(long = "type")]
        kind: ContentKind,
        #[arg(long)]
        completed: bool,
        #[arg(long)]
        watched: Option<u32>,
        #[arg(long)]
        total: Option<u32>,
        #[arg(long)]
        score: Option<u32>,
        #[arg(long)]
        passed: Option<bool>,
        #[arg(long)]
        attempts: Option<u32>,
    },
    /// Record navigation to a chapter
    Navigate {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        course: CourseId,
        #[arg(long, allow_negative_numbers = true)]
        chapter: i64,
    },
    /// Record a chapter quiz result
    Quiz {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        course: CourseId,
        #[arg(long, allow_negative_numbers = true)]
        chapter: i64,
        #[arg(long)]
        score: u32,
        #[arg(long)]
        passed: bool,
    },
    /// Add minutes spent in a course
    Time {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        course: CourseId,
        #[arg(long)]
        minutes: u32,
    },
    /// Mark the certificate of a completed enrollment as issued
    Certificate {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        course: CourseId,
        #[arg(long = "id")]
        certificate_id: String,
    },
    /// Delete an enrollment by id
    Remove { id: EnrollmentId },
    /// List the enrollments of a course, newest first
    ListCourse {
        #[arg(long)]
        course: CourseId,
    },
    /// List the enrollments of a user, newest first
    ListUser {
        #[arg(long)]
        user: UserId,
    },
}

impl Commands {
    /// Course the command is about, if any; the catalog is built around it.
    fn course(&self) -> Option<&CourseId> {
        match self {
            Commands::Enroll { course, .. }
            | Commands::Show { course, .. }
            | Commands::Item { course, .. }
            | Commands::Navigate { course, .. }
            | Commands::Quiz { course, .. }
            | Commands::Time { course, .. }
            | Commands::Certificate { course, .. }
            | Commands::ListCourse { course } => Some(course),
            Commands::Remove { .. } | Commands::ListUser { .. } => None,
        }
    }
}

#[derive(Serialize)]
struct Removed {
    removed: bool,
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), ArgsError> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let invalid = || ArgsError::InvalidDbUrl {
        raw: db_url.to_string(),
    };
    let path = db_url.strip_prefix("sqlite://").ok_or_else(invalid)?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(invalid());
    }

    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|_| invalid())?;
    }
    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|_| invalid())?;
    }

    Ok(())
}

fn service_config(cli: &Cli) -> anyhow::Result<ServiceConfig> {
    let mut config = ServiceConfig::from_env()?;
    if let Some(db) = &cli.db {
        if db.trim().is_empty() {
            return Err(ArgsError::InvalidDbUrl { raw: db.clone() }.into());
        }
        config.db_url = db.clone();
    }
    if let Some(attempts) = cli.max_save_attempts {
        config.max_save_attempts = attempts;
    }
    config.db_url = normalize_sqlite_url(config.db_url);
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = service_config(&cli)?;
    prepare_sqlite_file(&config.db_url)?;

    let mut catalog = StaticCatalog::new();
    if let Some(course) = cli.command.course() {
        catalog.insert(
            course.clone(),
            CourseOutline {
                content_items: cli.items,
                chapters: cli.chapters,
            },
        );
    }

    let service =
        EnrollmentService::new_sqlite(&config, Clock::default_clock(), Arc::new(catalog)).await?;
    tracing::debug!(db_url = %config.db_url, "storage ready");

    match cli.command {
        Commands::Enroll { user, course } => print_json(&service.enroll(user, course).await?),
        Commands::Show { user, course } => {
            print_json(&service.progress_view(&user, &course).await?)
        }
        Commands::Item {
            user,
            course,
            index,
            kind,
            completed,
            watched,
            total,
            score,
            passed,
            attempts,
        } => {
            let event = ItemProgressEvent {
                watched_seconds: watched,
                total_seconds: total,
                score,
                passed,
                attempts,
                ..ItemProgressEvent::new(index, kind, completed)
            };
            print_json(&service.record_item_progress(&user, &course, &event).await?)
        }
        Commands::Navigate {
            user,
            course,
            chapter,
        } => print_json(
            &service
                .record_chapter_navigation(&user, &course, chapter)
                .await?,
        ),
        Commands::Quiz {
            user,
            course,
            chapter,
            score,
            passed,
        } => {
            let submission = QuizSubmission {
                chapter_index: chapter,
                score,
                passed,
            };
            print_json(
                &service
                    .record_quiz_result(&user, &course, submission)
                    .await?,
            )
        }
        Commands::Time {
            user,
            course,
            minutes,
        } => print_json(&service.add_time_spent(&user, &course, minutes).await?),
        Commands::Certificate {
            user,
            course,
            certificate_id,
        } => print_json(
            &service
                .issue_certificate(&user, &course, &certificate_id)
                .await?,
        ),
        Commands::Remove { id } => print_json(&Removed {
            removed: service.remove(id).await?,
        }),
        Commands::ListCourse { course } => print_json(&service.list_for_course(&course).await?),
        Commands::ListUser { user } => print_json(&service.list_for_user(&user).await?),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        match err.downcast_ref::<EnrollmentServiceError>() {
            Some(rejection) => eprintln!("{}: {rejection}", rejection.reason_code()),
            None => eprintln!("{err}"),
        }
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn item_command_parses_event_fields() {
        let cli = Cli::try_parse_from([
            "course", "--items", "3", "item", "--user", "u1", "--course", "c1", "--index", "1",
            "--type", "video", "--watched", "45", "--total", "600",
        ])
        .unwrap();
        assert_eq!(cli.items, 3);
        match cli.command {
            Commands::Item {
                index,
                kind,
                completed,
                watched,
                total,
                ..
            } => {
                assert_eq!(index, 1);
                assert_eq!(kind, ContentKind::Video);
                assert!(!completed);
                assert_eq!(watched, Some(45));
                assert_eq!(total, Some(600));
            }
            _ => panic!("expected item command"),
        }
    }

    #[test]
    fn negative_indexes_reach_the_service() {
        let cli = Cli::try_parse_from([
            "course", "navigate", "--user", "u1", "--course", "c1", "--chapter", "-2",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Navigate { chapter: -2, .. }));
    }

    #[test]
    fn blank_ids_are_rejected_at_parse_time() {
        assert!(Cli::try_parse_from(["course", "list-user", "--user", "  "]).is_err());
        assert!(Cli::try_parse_from(["course", "remove", "abc"]).is_err());
    }

    #[test]
    fn normalize_keeps_sqlite_urls_and_absolutizes_paths() {
        assert_eq!(
            normalize_sqlite_url("sqlite::memory:".into()),
            "sqlite::memory:"
        );
        assert_eq!(
            normalize_sqlite_url("sqlite:///tmp/course.sqlite3".into()),
            "sqlite:///tmp/course.sqlite3"
        );
        assert_eq!(
            normalize_sqlite_url("sqlite:/tmp/course.sqlite3".into()),
            "sqlite:///tmp/course.sqlite3"
        );
        assert!(normalize_sqlite_url("course.sqlite3".into()).starts_with("sqlite:///"));
    }

    #[test]
    fn prepare_rejects_urls_without_a_path() {
        assert!(prepare_sqlite_file("sqlite::memory:").is_ok());
        assert!(prepare_sqlite_file("sqlite://").is_err());
        assert!(prepare_sqlite_file("postgres://db").is_err());
    }
}
