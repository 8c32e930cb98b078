use chrono::Duration;
use course_core::model::{
    ContentKind, CourseId, ItemDetail, ItemProgressEvent, QuizSubmission, SchemeKind, UserId,
};
use course_core::reconcile::{
    add_time_spent, apply_item_progress, apply_quiz_result, issue_certificate,
};
use course_core::time::fixed_now;
use storage::repository::{EnrollmentRepository, NewEnrollmentRecord, StorageError};
use storage::sqlite::SqliteRepository;

async fn connect(name: &str) -> SqliteRepository {
    let repo = SqliteRepository::connect(&format!(
        "sqlite:file:{name}?mode=memory&cache=shared"
    ))
    .await
    .expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

fn record(user: &str, course: &str, minutes: i64) -> NewEnrollmentRecord {
    NewEnrollmentRecord {
        user_id: UserId::new(user).unwrap(),
        course_id: CourseId::new(course).unwrap(),
        created_at: fixed_now() + Duration::minutes(minutes),
    }
}

#[tokio::test]
async fn sqlite_roundtrip_persists_item_progress() {
    let repo = connect("memdb_item_roundtrip").await;
    let created = repo
        .create_enrollment(record("u1", "c1", 0))
        .await
        .unwrap();
    assert_eq!(created.version(), 1);
    assert_eq!(created.scheme_kind(), SchemeKind::NotStarted);

    let t0 = fixed_now();
    let chapter = ItemProgressEvent::new(0, ContentKind::Chapter, true).with_watch(300, 300);
    let next = apply_item_progress(3, Some(&created), &chapter, t0).unwrap();
    let saved = repo.save_enrollment(&next).await.unwrap();

    let video = ItemProgressEvent::new(1, ContentKind::Video, false).with_watch(45, 600);
    let next = apply_item_progress(3, Some(&saved), &video, t0).unwrap();
    let saved = repo.save_enrollment(&next).await.unwrap();

    let quiz = ItemProgressEvent::new(2, ContentKind::Quiz, true).with_quiz(90, true);
    let next = apply_item_progress(3, Some(&saved), &quiz, t0).unwrap();
    let next = add_time_spent(Some(&next), 25, t0).unwrap();
    let saved = repo.save_enrollment(&next).await.unwrap();
    assert_eq!(saved.version(), 4);

    let fetched = repo
        .get_enrollment(saved.user_id(), saved.course_id())
        .await
        .unwrap()
        .expect("enrollment");
    assert_eq!(fetched, saved);
    assert_eq!(fetched.progress(), 67);
    assert_eq!(fetched.time_spent(), 25);
    assert_eq!(fetched.last_visited_content(), 2);
    assert_eq!(
        fetched.item(1, ContentKind::Video).unwrap().detail,
        ItemDetail::Video {
            watched_seconds: 45,
            total_seconds: 600,
            video_completed: false,
        }
    );
}

#[tokio::test]
async fn sqlite_roundtrip_persists_legacy_quiz_results() {
    let repo = connect("memdb_quiz_roundtrip").await;
    let created = repo
        .create_enrollment(record("u1", "c1", 0))
        .await
        .unwrap();

    let mut current = created;
    for chapter_index in 0..2 {
        let submission = QuizSubmission {
            chapter_index,
            score: 75,
            passed: true,
        };
        let next = apply_quiz_result(Some(2), Some(&current), &submission, fixed_now()).unwrap();
        current = repo.save_enrollment(&next).await.unwrap();
    }
    assert!(current.completed());

    let issued = issue_certificate(Some(&current), "CERT-42", fixed_now()).unwrap();
    let saved = repo.save_enrollment(&issued).await.unwrap();

    let fetched = repo
        .get_enrollment_by_id(saved.id())
        .await
        .unwrap()
        .expect("enrollment");
    assert_eq!(fetched, saved);
    assert_eq!(fetched.scheme_kind(), SchemeKind::ChapterBased);
    assert_eq!(fetched.quiz_results().len(), 2);
    assert_eq!(fetched.certificate_id(), Some("CERT-42"));
    assert_eq!(fetched.completed_at(), Some(fixed_now()));
}

#[tokio::test]
async fn sqlite_rejects_duplicate_enrollment() {
    let repo = connect("memdb_duplicate").await;
    repo.create_enrollment(record("u1", "c1", 0)).await.unwrap();

    let err = repo
        .create_enrollment(record("u1", "c1", 5))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Duplicate));
}

#[tokio::test]
async fn sqlite_save_detects_stale_versions() {
    let repo = connect("memdb_stale").await;
    let created = repo
        .create_enrollment(record("u1", "c1", 0))
        .await
        .unwrap();

    let event = ItemProgressEvent::new(0, ContentKind::Chapter, true);
    let first = apply_item_progress(2, Some(&created), &event, fixed_now()).unwrap();
    repo.save_enrollment(&first).await.unwrap();

    let other = ItemProgressEvent::new(1, ContentKind::Chapter, true);
    let stale = apply_item_progress(2, Some(&created), &other, fixed_now()).unwrap();
    let err = repo.save_enrollment(&stale).await.unwrap_err();
    assert!(matches!(err, StorageError::Conflict));

    let fetched = repo
        .get_enrollment_by_id(created.id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched.items_progress().len(), 1);
    assert_eq!(fetched.progress(), 50);
}

#[tokio::test]
async fn sqlite_remove_cascades_and_reports_missing() {
    let repo = connect("memdb_remove").await;
    let created = repo
        .create_enrollment(record("u1", "c1", 0))
        .await
        .unwrap();
    let event = ItemProgressEvent::new(0, ContentKind::Quiz, true).with_quiz(100, true);
    let next = apply_item_progress(1, Some(&created), &event, fixed_now()).unwrap();
    let saved = repo.save_enrollment(&next).await.unwrap();

    repo.remove_enrollment(saved.id()).await.unwrap();
    assert!(
        repo.get_enrollment_by_id(saved.id())
            .await
            .unwrap()
            .is_none()
    );

    let leftover: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM enrollment_items WHERE enrollment_id = ?1")
            .bind(i64::try_from(saved.id().value()).unwrap())
            .fetch_one(repo.pool())
            .await
            .unwrap();
    assert_eq!(leftover, 0);

    assert!(matches!(
        repo.remove_enrollment(saved.id()).await.unwrap_err(),
        StorageError::NotFound
    ));
    assert!(matches!(
        repo.save_enrollment(&saved).await.unwrap_err(),
        StorageError::NotFound
    ));
}

#[tokio::test]
async fn sqlite_lists_newest_first() {
    let repo = connect("memdb_lists").await;
    repo.create_enrollment(record("u1", "c1", 0)).await.unwrap();
    repo.create_enrollment(record("u2", "c1", 10)).await.unwrap();
    repo.create_enrollment(record("u3", "c1", 0)).await.unwrap();
    repo.create_enrollment(record("u1", "c2", 20)).await.unwrap();

    let course = repo
        .list_by_course(&CourseId::new("c1").unwrap())
        .await
        .unwrap();
    let users: Vec<&str> = course.iter().map(|e| e.user_id().as_str()).collect();
    assert_eq!(users, ["u2", "u3", "u1"]);

    let user = repo
        .list_by_user(&UserId::new("u1").unwrap())
        .await
        .unwrap();
    let courses: Vec<&str> = user.iter().map(|e| e.course_id().as_str()).collect();
    assert_eq!(courses, ["c2", "c1"]);

    assert!(
        repo.list_by_course(&CourseId::new("empty").unwrap())
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let repo = connect("memdb_migrate_twice").await;
    repo.migrate().await.expect("second migrate");

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations")
        .fetch_one(repo.pool())
        .await
        .unwrap();
    assert_eq!(applied, 1);
}
