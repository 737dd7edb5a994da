use axum::http::StatusCode;
use common::storage::types::{
    ingestion_job::IngestionJob,
    insight_chunk::InsightChunk,
    unsubscribe_token::UnsubscribeToken,
};
use serde_json::json;
use tower::ServiceExt;

use test_utils::*;

#[tokio::test]
async fn probes_answer_without_auth() {
    let db = setup_test_database().await;
    let app = build_app(db);

    let live = app.clone().oneshot(get("/api/v1/live", None)).await.unwrap();
    assert_eq!(live.status(), StatusCode::OK);

    let ready = app.oneshot(get("/api/v1/ready", None)).await.unwrap();
    assert_eq!(ready.status(), StatusCode::OK);
}

#[tokio::test]
async fn protected_routes_require_bearer_token() {
    let db = setup_test_database().await;
    let app = build_app(db);

    let response = app
        .clone()
        .oneshot(get("/api/v1/insights", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = response_json(response).await;
    assert_eq!(body["success"], false);
    assert!(body["detail"].is_string());

    let bad_key = app
        .oneshot(get("/api/v1/insights", Some("wrong-key")))
        .await
        .unwrap();
    assert_eq!(bad_key.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn create_insight_returns_row_and_queues_job() {
    let db = setup_test_database().await;
    let profile = create_test_profile(&db).await;
    let api_key = profile.api_key.clone().unwrap();
    let app = build_app(db.clone());

    let response = app
        .oneshot(post_json(
            "/api/v1/insights",
            Some(&api_key),
            json!({"url": "https://example.com/a", "thought": "interesting"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    let insight_id = body["id"].as_str().expect("id").to_string();
    assert_eq!(body["url"], "https://example.com/a");
    assert_eq!(body["thought"], "interesting");

    let jobs = IngestionJob::get_unfinished_jobs(&db).await.expect("jobs");
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].insight_id, insight_id);
}

#[tokio::test]
async fn create_insight_rejects_bad_urls() {
    let db = setup_test_database().await;
    let profile = create_test_profile(&db).await;
    let api_key = profile.api_key.clone().unwrap();
    let app = build_app(db);

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/insights",
            Some(&api_key),
            json!({"url": "not a url"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let scheme = app
        .oneshot(post_json(
            "/api/v1/insights",
            Some(&api_key),
            json!({"url": "ftp://example.com/file"}),
        ))
        .await
        .unwrap();
    assert_eq!(scheme.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn insight_listing_paginates() {
    let db = setup_test_database().await;
    let profile = create_test_profile(&db).await;
    let api_key = profile.api_key.clone().unwrap();
    let app = build_app(db);

    for i in 0..3 {
        let response = app
            .clone()
            .oneshot(post_json(
                "/api/v1/insights",
                Some(&api_key),
                json!({"url": format!("https://example.com/{i}")}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app
        .oneshot(get("/api/v1/insights?page=1&limit=2", Some(&api_key)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["insights"].as_array().unwrap().len(), 2);
    assert_eq!(body["pagination"]["total"], 3);
    assert_eq!(body["pagination"]["total_pages"], 2);
}

#[tokio::test]
async fn incremental_sync_etag_round_trip() {
    let db = setup_test_database().await;
    let profile = create_test_profile(&db).await;
    let api_key = profile.api_key.clone().unwrap();
    let app = build_app(db);

    let created = app
        .clone()
        .oneshot(post_json(
            "/api/v1/insights",
            Some(&api_key),
            json!({"url": "https://example.com/sync"}),
        ))
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::OK);

    // First sync returns the insight and an etag
    let first = app
        .clone()
        .oneshot(get("/api/v1/insights/sync/incremental", Some(&api_key)))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let first_body = response_json(first).await;
    assert_eq!(first_body["insights"].as_array().unwrap().len(), 1);
    let etag = first_body["etag"].as_str().unwrap().to_string();

    // Unchanged corpus: same etag, empty array, still 200
    let encoded = etag.replace('"', "%22");
    let second = app
        .oneshot(get(
            &format!("/api/v1/insights/sync/incremental?etag={encoded}"),
            Some(&api_key),
        ))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let second_body = response_json(second).await;
    assert!(second_body["insights"].as_array().unwrap().is_empty());
    assert_eq!(second_body["etag"], etag);
}

#[tokio::test]
async fn insight_ownership_is_enforced() {
    let db = setup_test_database().await;
    let owner = create_test_profile(&db).await;
    let owner_key = owner.api_key.clone().unwrap();
    let intruder = create_test_profile(&db).await;
    let intruder_key = intruder.api_key.clone().unwrap();
    let app = build_app(db);

    let created = app
        .clone()
        .oneshot(post_json(
            "/api/v1/insights",
            Some(&owner_key),
            json!({"url": "https://example.com/private"}),
        ))
        .await
        .unwrap();
    let body = response_json(created).await;
    let insight_id = body["id"].as_str().unwrap();

    let response = app
        .oneshot(get(
            &format!("/api/v1/insights/{insight_id}"),
            Some(&intruder_key),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn chunk_summary_reports_embedding_progress() {
    let db = setup_test_database().await;
    let profile = create_test_profile(&db).await;
    let api_key = profile.api_key.clone().unwrap();
    let app = build_app(db.clone());

    let created = app
        .clone()
        .oneshot(post_json(
            "/api/v1/insights",
            Some(&api_key),
            json!({"url": "https://example.com/chunky"}),
        ))
        .await
        .unwrap();
    let body = response_json(created).await;
    let insight_id = body["id"].as_str().unwrap().to_string();

    // Seed chunks the way the pipeline would: one embedded, one pending
    let embedded = InsightChunk::new(insight_id.clone(), 0, "embedded text".into(), 200)
        .with_user(&profile.id)
        .with_embedding(vec![0.01; 1536], "text-embedding-3-small", 12);
    let pending =
        InsightChunk::new(insight_id.clone(), 1, "pending text".into(), 200).with_user(&profile.id);
    db.store_item(embedded).await.expect("store embedded");
    db.store_item(pending).await.expect("store pending");

    let response = app
        .oneshot(get(
            &format!("/api/v1/insights/{insight_id}/chunks/summary"),
            Some(&api_key),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let summary = response_json(response).await;
    assert_eq!(summary["total_chunks"], 2);
    assert_eq!(summary["chunks_with_embedding"], 1);
}

#[tokio::test]
async fn chat_rejects_empty_message() {
    let db = setup_test_database().await;
    let profile = create_test_profile(&db).await;
    let api_key = profile.api_key.clone().unwrap();
    let app = build_app(db);

    let response = app
        .oneshot(post_json(
            "/api/v1/chat",
            Some(&api_key),
            json!({"message": "   "}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = response_json(response).await;
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn chat_health_is_public() {
    let db = setup_test_database().await;
    let app = build_app(db);

    let response = app
        .oneshot(get("/api/v1/chat/health", None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn session_lifecycle_over_http() {
    let db = setup_test_database().await;
    let profile = create_test_profile(&db).await;
    let api_key = profile.api_key.clone().unwrap();
    let app = build_app(db);

    let created = app
        .clone()
        .oneshot(post_json("/api/v1/chat/sessions", Some(&api_key), json!({})))
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::OK);
    let session = response_json(created).await;
    let session_id = session["id"].as_str().unwrap().to_string();
    assert_eq!(session["is_active"], true);

    let listed = app
        .clone()
        .oneshot(get("/api/v1/chat/sessions", Some(&api_key)))
        .await
        .unwrap();
    let sessions = response_json(listed).await;
    assert_eq!(sessions.as_array().unwrap().len(), 1);

    let renamed = app
        .clone()
        .oneshot(put_json(
            &format!("/api/v1/chat/sessions/{session_id}"),
            Some(&api_key),
            json!({"title": "Renamed"}),
        ))
        .await
        .unwrap();
    assert_eq!(renamed.status(), StatusCode::OK);

    let deleted = app
        .clone()
        .oneshot({
            let mut request = get(
                &format!("/api/v1/chat/sessions/{session_id}"),
                Some(&api_key),
            );
            *request.method_mut() = axum::http::Method::DELETE;
            request
        })
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::OK);

    // A deactivated session is gone from reads
    let after = app
        .oneshot(get(
            &format!("/api/v1/chat/sessions/{session_id}"),
            Some(&api_key),
        ))
        .await
        .unwrap();
    assert_eq!(after.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn memory_settings_round_trip() {
    let db = setup_test_database().await;
    let profile = create_test_profile(&db).await;
    let api_key = profile.api_key.clone().unwrap();
    let app = build_app(db);

    let updated = app
        .clone()
        .oneshot(put_json(
            "/api/v1/user/memory/settings",
            Some(&api_key),
            json!({
                "auto_consolidate": false,
                "consolidation_threshold": 0.7,
                "max_memories_per_type": 25,
                "consolidation_strategy": "importance"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(updated.status(), StatusCode::OK);

    let fetched = app
        .oneshot(get("/api/v1/user/memory/profile", Some(&api_key)))
        .await
        .unwrap();
    let body = response_json(fetched).await;
    let settings = &body["memory_profile"]["consolidation_settings"];
    assert_eq!(settings["auto_consolidate"], false);
    assert_eq!(settings["max_memories_per_type"], 25);
    assert_eq!(settings["consolidation_strategy"], "importance");
}

#[tokio::test]
async fn memory_settings_validation() {
    let db = setup_test_database().await;
    let profile = create_test_profile(&db).await;
    let api_key = profile.api_key.clone().unwrap();
    let app = build_app(db);

    let response = app
        .oneshot(put_json(
            "/api/v1/user/memory/settings",
            Some(&api_key),
            json!({
                "auto_consolidate": true,
                "consolidation_threshold": 1.5,
                "max_memories_per_type": 25,
                "consolidation_strategy": "similarity"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn cron_digest_requires_secret() {
    let db = setup_test_database().await;
    let app = build_app(db);

    let missing = app
        .clone()
        .oneshot(post_json("/api/v1/email/cron/digest", None, json!({})))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let mut request = post_json("/api/v1/email/cron/digest", None, json!({}));
    request.headers_mut().insert(
        "X-Cron-Secret",
        axum::http::HeaderValue::from_static("test-cron-secret"),
    );
    let authorized = app.oneshot(request).await.unwrap();
    assert_eq!(authorized.status(), StatusCode::OK);

    let body = response_json(authorized).await;
    assert_eq!(body["evaluated"], 0);
    assert_eq!(body["sent"], 0);
}

#[tokio::test]
async fn email_preferences_round_trip() {
    let db = setup_test_database().await;
    let profile = create_test_profile(&db).await;
    let api_key = profile.api_key.clone().unwrap();
    let app = build_app(db);

    let defaults = app
        .clone()
        .oneshot(get("/api/v1/email/preferences", Some(&api_key)))
        .await
        .unwrap();
    let body = response_json(defaults).await;
    assert_eq!(body["weekly_digest_enabled"], true);

    let updated = app
        .clone()
        .oneshot(put_json(
            "/api/v1/email/preferences",
            Some(&api_key),
            json!({
                "preferred_day": 2,
                "preferred_hour": 22,
                "timezone": "Asia/Tokyo",
                "no_activity_policy": "brief"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(updated.status(), StatusCode::OK);

    let invalid = app
        .oneshot(put_json(
            "/api/v1/email/preferences",
            Some(&api_key),
            json!({"preferred_hour": 99}),
        ))
        .await
        .unwrap();
    assert_eq!(invalid.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn unsubscribe_link_disables_digest() {
    let db = setup_test_database().await;
    let profile = create_test_profile(&db).await;
    let api_key = profile.api_key.clone().unwrap();
    let app = build_app(db.clone());

    let token = UnsubscribeToken::get_or_create(&profile.id, "test-unsubscribe-secret", &db)
        .await
        .expect("token");

    // The unsubscribe link works without authentication
    let response = app
        .clone()
        .oneshot(get(
            &format!("/api/v1/email/unsubscribe/{}", token.token),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let preferences = app
        .oneshot(get("/api/v1/email/preferences", Some(&api_key)))
        .await
        .unwrap();
    let body = response_json(preferences).await;
    assert_eq!(body["weekly_digest_enabled"], false);
}

#[tokio::test]
async fn webhook_bounce_is_acknowledged() {
    let db = setup_test_database().await;
    let app = build_app(db.clone());

    let response = app
        .oneshot(post_json(
            "/api/v1/email/webhooks/brevo",
            None,
            json!({"event": "hardBounce", "email": "user@example.com"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let suppressed =
        common::storage::types::email_suppression::EmailSuppression::is_suppressed(
            "user@example.com",
            &db,
        )
        .await
        .unwrap();
    assert!(suppressed);
}
