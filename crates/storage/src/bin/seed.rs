use std::fmt;

use chrono::{DateTime, Duration, Utc};
use course_core::model::{ContentKind, CourseId, ItemProgressEvent, UserId};
use course_core::reconcile::apply_item_progress;
use storage::repository::{NewEnrollmentRecord, Storage, StorageError};

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    course_id: CourseId,
    learners: u32,
    items: u32,
    now: Option<DateTime<Utc>>,
}

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidCourseId { raw: String },
    InvalidLearners { raw: String },
    InvalidItems { raw: String },
    InvalidDbUrl { raw: String },
    InvalidNow { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidCourseId { raw } => write!(f, "invalid --course value: {raw:?}"),
            ArgsError::InvalidLearners { raw } => write!(f, "invalid --learners value: {raw}"),
            ArgsError::InvalidItems { raw } => write!(f, "invalid --items value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidNow { raw } => {
                write!(f, "invalid --now value (expected RFC3339): {raw}")
            }
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn parse_course(raw: String) -> Result<CourseId, ArgsError> {
    CourseId::new(raw.clone()).map_err(|_| ArgsError::InvalidCourseId { raw })
}

impl Args {
    fn parse() -> Result<Self, ArgsError> {
        let mut db_url =
            std::env::var("COURSE_DB_URL").unwrap_or_else(|_| "sqlite:dev.sqlite3?mode=rwc".into());
        let mut course_id =
            parse_course(std::env::var("COURSE_SEED_COURSE").unwrap_or_else(|_| "rust-101".into()))?;
        let mut learners = std::env::var("COURSE_SEED_LEARNERS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(5);
        let mut items = std::env::var("COURSE_SEED_ITEMS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(4);
        let mut now: Option<DateTime<Utc>> = None;

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = value;
                }
                "--course" => {
                    course_id = parse_course(require_value(&mut args, "--course")?)?;
                }
                "--learners" => {
                    let value = require_value(&mut args, "--learners")?;
                    learners = value
                        .parse::<u32>()
                        .map_err(|_| ArgsError::InvalidLearners { raw: value.clone() })?;
                }
                "--items" => {
                    let value = require_value(&mut args, "--items")?;
                    items = value
                        .parse::<u32>()
                        .map_err(|_| ArgsError::InvalidItems { raw: value.clone() })?;
                }
                "--now" => {
                    let value = require_value(&mut args, "--now")?;
                    let parsed = DateTime::parse_from_rfc3339(&value)
                        .map_err(|_| ArgsError::InvalidNow { raw: value.clone() })?
                        .with_timezone(&Utc);
                    now = Some(parsed);
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            course_id,
            learners,
            items,
            now,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p storage --bin seed -- [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>         SQLite URL (default: sqlite:dev.sqlite3?mode=rwc)");
    eprintln!("  --course <id>             Course to enroll learners in (default: rust-101)");
    eprintln!("  --learners <n>            Number of learners to enroll (default: 5)");
    eprintln!("  --items <n>               Content items in the course (default: 4)");
    eprintln!("  --now <rfc3339>           Fixed current time for deterministic seeding");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Environment (same as flags):");
    eprintln!("  COURSE_DB_URL, COURSE_SEED_COURSE, COURSE_SEED_LEARNERS, COURSE_SEED_ITEMS");
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse().map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let storage = Storage::sqlite(&args.db_url).await?;
    let now = args.now.unwrap_or_else(Utc::now);

    let kinds = [ContentKind::Chapter, ContentKind::Video, ContentKind::Quiz];
    let mut created = 0_u32;
    for learner in 0..args.learners {
        let user_id = UserId::new(format!("learner-{}", learner + 1))?;
        let enrolled_at = now - Duration::days(i64::from(args.learners - learner));
        let record = NewEnrollmentRecord {
            user_id,
            course_id: args.course_id.clone(),
            created_at: enrolled_at,
        };
        let mut enrollment = match storage.enrollments.create_enrollment(record).await {
            Ok(enrollment) => enrollment,
            Err(StorageError::Duplicate) => continue,
            Err(err) => return Err(err.into()),
        };
        created += 1;

        // Learner n has finished the first n items, wrapping at the course size.
        let finished = learner % args.items.saturating_add(1);
        for index in 0..finished {
            let kind = kinds[(index as usize) % kinds.len()];
            let mut event = ItemProgressEvent::new(i64::from(index), kind, true);
            if kind == ContentKind::Quiz {
                event = event.with_quiz(80, true);
            } else {
                event = event.with_watch(300, 300);
            }
            let at = enrolled_at + Duration::hours(i64::from(index) + 1);
            let next = apply_item_progress(args.items, Some(&enrollment), &event, at)?;
            enrollment = storage.enrollments.save_enrollment(&next).await?;
        }
    }

    println!(
        "Seeded {created} new enrollments in course {} ({} items) into {}",
        args.course_id, args.items, args.db_url
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
