//! End-to-end pipeline tests against a mock API and the in-memory store
//!
//! Covers the pipeline's core guarantees: idempotent re-runs, the exclusion
//! invariant, foreign-key ordering, and the skip semantics for records with
//! missing data.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use lms_common::types::{EntityKind, ExclusionSet, StagedRecord};
use lms_common::SyncError;
use lms_sync::api::ApiClient;
use lms_sync::config::ApiConfig;
use lms_sync::normalize::Normalizer;
use lms_sync::pipeline::{Pipeline, Stage, ALL_STAGES};
use lms_sync::store::{MemoryStore, SyncStore};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const EXCLUDED_COURSE: i64 = 600;

fn test_client(base_url: &str) -> ApiClient {
    let config = ApiConfig {
        base_url: base_url.to_string(),
        token: "test-token".to_string(),
        per_page: 20,
        page_sleep_ms: 1,
        backoff_start_ms: 1,
        max_requests: 50,
        timeout_secs: 5,
    };
    ApiClient::new(&config).unwrap()
}

fn exclusions() -> ExclusionSet {
    ExclusionSet::new([EXCLUDED_COURSE])
}

/// Mock API with three courses, one excluded; sections and enrollments
/// under them, including the documented edge cases
async fn mock_api() -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/courses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 500, "name": "Intro", "course_code": "INTRO-101"},
            {"id": EXCLUDED_COURSE, "name": "Unwanted"},
            {"id": 700, "name": "Systems"}
        ])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/courses/500/sections"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 5001, "course_id": 500, "name": "Section A"}
        ])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/courses/{EXCLUDED_COURSE}/sections")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 6001, "course_id": EXCLUDED_COURSE}
        ])))
        .mount(&server)
        .await;

    // The API sometimes has no section data for a course
    Mock::given(method("GET"))
        .and(path("/courses/700/sections"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/courses/500/enrollments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "id": 9001, "user_id": 71, "course_id": 500,
                "type": "StudentEnrollment", "course_section_id": 5001,
                "enrollment_state": "active",
                "user": {"id": 71, "name": "Ada", "sortable_name": "Ada"}
            },
            // No nested user object: skipped, batch continues
            {"id": 9002, "course_id": 500, "type": "TaEnrollment"},
            // Section reference that was never staged
            {
                "id": 9003, "course_id": 500,
                "type": "TeacherEnrollment", "course_section_id": 9999,
                "user": {"id": 72, "name": "Grace"}
            }
        ])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/courses/700/enrollments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    // Enrollments of the excluded course must never be fetched
    Mock::given(method("GET"))
        .and(path(format!("/courses/{EXCLUDED_COURSE}/enrollments")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;

    server
}

#[tokio::test]
async fn full_pipeline_produces_canonical_rows() {
    let server = mock_api().await;
    let client = test_client(&server.uri());
    let store = MemoryStore::new();
    let exclusions = exclusions();
    let pull = store.create_pull().await.unwrap();

    let mut pipeline = Pipeline::new(&client, &store, &exclusions, false);
    pipeline.run(&pull, ALL_STAGES).await.unwrap();

    // All three courses staged, excluded one staged but never normalized
    assert_eq!(
        store.staged_count(pull.id, EntityKind::Course).await.unwrap(),
        3
    );
    assert_eq!(store.course_count(), 2);
    assert!(store.get_course(500).is_some());
    assert!(store.get_course(700).is_some());
    assert!(store.get_course(EXCLUDED_COURSE).is_none());

    // Section of the excluded course is dropped at normalization
    assert_eq!(store.section_count(), 1);
    assert!(store.get_section(5001).is_some());
    assert!(store.get_section(6001).is_none());

    // 9001 imported with its section; 9002 skipped (no user);
    // 9003 imported with the unresolvable section reference cleared
    assert_eq!(store.enrollment_count(), 2);
    let e9001 = store.get_enrollment(9001).unwrap();
    assert_eq!(e9001.user_id, 71);
    assert_eq!(e9001.course_id, 500);
    assert_eq!(e9001.course_section_id, Some(5001));
    assert!(store.get_enrollment(9002).is_none());
    let e9003 = store.get_enrollment(9003).unwrap();
    assert_eq!(e9003.course_section_id, None);

    assert_eq!(store.user_count(), 2);
    assert_eq!(store.get_user(71).unwrap().name.as_deref(), Some("Ada"));
}

#[tokio::test]
async fn pipeline_rerun_is_idempotent() {
    let server = mock_api().await;
    let client = test_client(&server.uri());
    let store = MemoryStore::new();
    let exclusions = exclusions();
    let pull = store.create_pull().await.unwrap();

    let mut pipeline = Pipeline::new(&client, &store, &exclusions, false);
    pipeline.run(&pull, ALL_STAGES).await.unwrap();

    let staged_before = store
        .staged_count(pull.id, EntityKind::Course)
        .await
        .unwrap()
        + store
            .staged_count(pull.id, EntityKind::Section)
            .await
            .unwrap()
        + store
            .staged_count(pull.id, EntityKind::Enrollment)
            .await
            .unwrap();
    let course_500_before = store.get_course(500).unwrap();

    // Fresh pipeline, same pull: everything already staged and normalized
    let mut pipeline = Pipeline::new(&client, &store, &exclusions, false);
    pipeline.run(&pull, ALL_STAGES).await.unwrap();

    let staged_after = store
        .staged_count(pull.id, EntityKind::Course)
        .await
        .unwrap()
        + store
            .staged_count(pull.id, EntityKind::Section)
            .await
            .unwrap()
        + store
            .staged_count(pull.id, EntityKind::Enrollment)
            .await
            .unwrap();

    assert_eq!(staged_before, staged_after);
    assert_eq!(store.course_count(), 2);
    assert_eq!(store.section_count(), 1);
    assert_eq!(store.enrollment_count(), 2);
    assert_eq!(store.get_course(500).unwrap(), course_500_before);
}

#[tokio::test]
async fn staging_and_normalizing_course_500_scenario() {
    let store = MemoryStore::new();
    let exclusions = ExclusionSet::default();
    let pull = store.create_pull().await.unwrap();

    let record = StagedRecord {
        external_id: 500,
        pull_id: pull.id,
        kind: EntityKind::Course,
        payload: r#"{"id": 500, "name": "Intro"}"#.to_string(),
    };
    store.insert_staged(&record).await.unwrap();

    let normalizer = Normalizer::new(&store, &exclusions, false);
    normalizer.normalize_courses(&pull).await.unwrap();

    let course = store.get_course(500).unwrap();
    assert_eq!(course.name.as_deref(), Some("Intro"));

    // Staging the identical object again under the same pull conflicts...
    let err = store.insert_staged(&record).await.unwrap_err();
    assert!(err.is_conflict());

    // ...and re-normalizing leaves exactly one row with the same values
    normalizer.normalize_courses(&pull).await.unwrap();
    assert_eq!(store.course_count(), 1);
    assert_eq!(store.get_course(500).unwrap().name.as_deref(), Some("Intro"));
}

#[tokio::test]
async fn enrollments_without_their_course_are_rejected() {
    let store = MemoryStore::new();
    let exclusions = ExclusionSet::default();
    let pull = store.create_pull().await.unwrap();

    store
        .insert_staged(&StagedRecord {
            external_id: 9001,
            pull_id: pull.id,
            kind: EntityKind::Enrollment,
            payload: r#"{"id": 9001, "course_id": 500, "user": {"id": 71}}"#.to_string(),
        })
        .await
        .unwrap();

    // Course 500 was never normalized: the record must not become a row
    let normalizer = Normalizer::new(&store, &exclusions, false);
    let outcome = normalizer
        .normalize_users_and_enrollments(&pull)
        .await
        .unwrap();

    assert_eq!(outcome.imported, 0);
    assert_eq!(outcome.skipped, 1);
    assert_eq!(store.enrollment_count(), 0);
}

#[tokio::test]
async fn exclusion_applies_even_with_staged_data() {
    let store = MemoryStore::new();
    let exclusions = exclusions();
    let pull = store.create_pull().await.unwrap();

    for (kind, payload) in [
        (
            EntityKind::Course,
            format!(r#"{{"id": {EXCLUDED_COURSE}, "name": "Unwanted"}}"#),
        ),
        (
            EntityKind::Section,
            format!(r#"{{"id": 6001, "course_id": {EXCLUDED_COURSE}}}"#),
        ),
        (
            EntityKind::Enrollment,
            format!(
                r#"{{"id": 9100, "course_id": {EXCLUDED_COURSE}, "user": {{"id": 80}}}}"#
            ),
        ),
    ] {
        store
            .insert_staged(&StagedRecord {
                external_id: serde_json::from_str::<serde_json::Value>(&payload).unwrap()["id"]
                    .as_i64()
                    .unwrap(),
                pull_id: pull.id,
                kind,
                payload,
            })
            .await
            .unwrap();
    }

    let normalizer = Normalizer::new(&store, &exclusions, false);
    normalizer.normalize_courses(&pull).await.unwrap();
    normalizer.normalize_sections(&pull).await.unwrap();
    normalizer
        .normalize_users_and_enrollments(&pull)
        .await
        .unwrap();

    assert_eq!(store.course_count(), 0);
    assert_eq!(store.section_count(), 0);
    assert_eq!(store.enrollment_count(), 0);
    assert_eq!(store.user_count(), 0);
}

#[tokio::test]
async fn dry_run_writes_nothing() {
    let server = mock_api().await;
    let client = test_client(&server.uri());
    let store = MemoryStore::new();
    let exclusions = exclusions();
    let pull = store.create_pull().await.unwrap();

    let mut pipeline = Pipeline::new(&client, &store, &exclusions, true);
    pipeline.run(&pull, ALL_STAGES).await.unwrap();

    // Ingestion stages; normalization parses and maps but never writes
    assert!(
        store.staged_count(pull.id, EntityKind::Course).await.unwrap() > 0
    );
    assert_eq!(store.course_count(), 0);
    assert_eq!(store.section_count(), 0);
    assert_eq!(store.user_count(), 0);
    assert_eq!(store.enrollment_count(), 0);
}

#[tokio::test]
async fn stages_refuse_to_run_out_of_order() {
    let client = test_client("http://localhost:9");
    let store = MemoryStore::new();
    let exclusions = ExclusionSet::default();
    let pull = store.create_pull().await.unwrap();

    let mut pipeline = Pipeline::new(&client, &store, &exclusions, false);
    let err = pipeline
        .run_stage(&pull, Stage::NormalizeCourses)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::StageOrder { .. }));
}
