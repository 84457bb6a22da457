mod common;

use std::sync::Arc;

use anyhow::Result;
use axum::http::StatusCode;
use common::{body_to_json, quota_snapshot, workflow_over, TestApp};
use intake_backend::error::ErrorCode;
use intake_backend::quota::{Counter, Tier};
use intake_backend::store::MemoryStore;
use intake_backend::tenant::TenantContext;
use serde_json::json;

#[tokio::test]
async fn free_tier_conversions_stop_at_the_limit() -> Result<()> {
    let app = TestApp::new()?;
    let token = app.token("solo@garage.example", "garage", "member", Tier::Free);

    for _ in 0..10 {
        app.create_conversion(&token).await?;
    }

    let response = app
        .post_json("/api/v1/conversions", &json!({}), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "quota_exceeded");

    // The denied attempt must not consume anything.
    let snapshot = quota_snapshot(&app, &token).await?;
    assert_eq!(snapshot["conversions_used"], 10);
    assert_eq!(snapshot["conversions_limit"], 10);

    Ok(())
}

#[tokio::test]
async fn enterprise_tier_is_unlimited() -> Result<()> {
    let app = TestApp::new()?;
    let token = app.token(
        "procurement@megacorp.example",
        "megacorp",
        "member",
        Tier::Enterprise,
    );

    for _ in 0..15 {
        app.create_conversion(&token).await?;
    }

    let snapshot = quota_snapshot(&app, &token).await?;
    assert_eq!(snapshot["conversions_used"], 15);
    assert!(snapshot["conversions_limit"].is_null());

    Ok(())
}

#[tokio::test]
async fn quota_is_tracked_per_user_not_per_tenant() -> Result<()> {
    let app = TestApp::new()?;
    let alice = app.token("alice@initech.example", "initech", "member", Tier::Free);
    let bob = app.token("bob@initech.example", "initech", "member", Tier::Free);

    for _ in 0..3 {
        app.create_conversion(&alice).await?;
    }
    app.create_conversion(&bob).await?;

    let snapshot = quota_snapshot(&app, &alice).await?;
    assert_eq!(snapshot["conversions_used"], 3);
    let snapshot = quota_snapshot(&app, &bob).await?;
    assert_eq!(snapshot["conversions_used"], 1);

    Ok(())
}

#[tokio::test]
async fn revisions_and_finalization_are_never_billed() -> Result<()> {
    let app = TestApp::new()?;
    let token = app.token("ops@initech.example", "initech", "member", Tier::Free);

    let conversion_id = app.create_conversion(&token).await?;
    let response = app
        .post_json(
            "/api/v1/schema/generate",
            &json!({ "conversion_id": conversion_id }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    for round in 0..3 {
        let response = app
            .post_json(
                "/api/v1/schema/revise",
                &json!({ "conversion_id": conversion_id, "content": { "round": round } }),
                Some(&token),
            )
            .await?;
        assert_eq!(response.status(), StatusCode::CREATED);
    }
    let response = app
        .post_json(
            "/api/v1/schema/finalize",
            &json!({ "conversion_id": conversion_id }),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let snapshot = quota_snapshot(&app, &token).await?;
    assert_eq!(snapshot["api_calls_used"], 1);

    Ok(())
}

#[tokio::test]
async fn regenerating_an_existing_schema_is_free() -> Result<()> {
    let app = TestApp::new()?;
    let token = app.token("ops@initech.example", "initech", "member", Tier::Free);

    let conversion_id = app.create_conversion(&token).await?;
    for _ in 0..2 {
        let response = app
            .post_json(
                "/api/v1/schema/generate",
                &json!({ "conversion_id": conversion_id }),
                Some(&token),
            )
            .await?;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let snapshot = quota_snapshot(&app, &token).await?;
    assert_eq!(snapshot["api_calls_used"], 1);

    Ok(())
}

/// Two racing first-time generates must bill exactly one API call; the
/// loser of the create-once insert returns the stored record unbilled.
#[tokio::test]
async fn concurrent_schema_generates_bill_once() -> Result<()> {
    let harness = workflow_over(Arc::new(MemoryStore::new()));
    let ctx = TenantContext::new("initech", "ops@initech.example", "member", Tier::Pro);

    let conversion = harness.workflow.create_conversion(&ctx, json!({})).await?;
    let conversion_id = conversion.id.to_string();

    let (first, second) = tokio::join!(
        harness.workflow.generate_schema(&ctx, &conversion_id),
        harness.workflow.generate_schema(&ctx, &conversion_id),
    );
    let first = first?;
    let second = second?;
    assert_eq!(first.id, second.id);

    let snapshot = harness.quota.get_quota(&ctx.user_email, ctx.tier).await?;
    assert_eq!(snapshot.api_calls_used, 1);

    Ok(())
}

/// A generate refused at the quota limit leaves no schema row behind, so
/// a later attempt under fresh quota starts the lineage normally.
#[tokio::test]
async fn generate_refused_at_the_limit_leaves_no_schema() -> Result<()> {
    let harness = workflow_over(Arc::new(MemoryStore::new()));
    let ctx = TenantContext::new("garage", "solo@garage.example", "member", Tier::Free);

    let conversion = harness.workflow.create_conversion(&ctx, json!({})).await?;
    let conversion_id = conversion.id.to_string();

    for _ in 0..10 {
        harness
            .quota
            .check_and_increment(&ctx.user_email, ctx.tier, Counter::ApiCalls)
            .await?;
    }

    let err = harness
        .workflow
        .generate_schema(&ctx, &conversion_id)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::QuotaExceeded);

    let lineage = harness
        .workflow
        .schema_lineage(&ctx, &conversion_id)
        .await?;
    assert!(lineage.schema.is_none());

    Ok(())
}

#[tokio::test]
async fn snapshot_reads_do_not_create_counters() -> Result<()> {
    let app = TestApp::new()?;
    let token = app.token("new@initech.example", "initech", "member", Tier::Pro);

    let snapshot = quota_snapshot(&app, &token).await?;
    assert_eq!(snapshot["conversions_used"], 0);
    assert_eq!(snapshot["api_calls_used"], 0);
    assert_eq!(snapshot["exports_used"], 0);
    assert_eq!(snapshot["tier"], "pro");
    assert_eq!(snapshot["conversions_limit"], 100);

    Ok(())
}
