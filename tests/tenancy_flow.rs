mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{body_to_json, TestApp};
use intake_backend::quota::Tier;
use serde_json::json;

/// A resource in another tenant must be indistinguishable from a missing
/// one.
#[tokio::test]
async fn cross_tenant_reads_return_not_found() -> Result<()> {
    let app = TestApp::new()?;
    let initech = app.token("alice@initech.example", "initech", "member", Tier::Pro);
    let hooli = app.token("gavin@hooli.example", "hooli", "member", Tier::Pro);

    let conversion_id = app.create_conversion(&initech).await?;
    let document_id = app.upload_sample(conversion_id, &initech).await?;

    let response = app
        .get(&format!("/api/v1/conversions/{conversion_id}"), Some(&hooli))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["error"], "not_found");

    let response = app
        .get(&format!("/api/v1/documents/{document_id}"), Some(&hooli))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Mutations are rejected the same way.
    let response = app
        .post_json(
            &format!("/api/v1/conversions/{conversion_id}/archive"),
            &json!({}),
            Some(&hooli),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn same_tenant_non_owner_is_forbidden() -> Result<()> {
    let app = TestApp::new()?;
    let alice = app.token("alice@initech.example", "initech", "member", Tier::Pro);
    let bob = app.token("bob@initech.example", "initech", "member", Tier::Pro);

    let conversion_id = app.create_conversion(&alice).await?;

    let response = app
        .get(&format!("/api/v1/conversions/{conversion_id}"), Some(&bob))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "forbidden");

    Ok(())
}

#[tokio::test]
async fn admin_bypasses_ownership_but_not_tenancy() -> Result<()> {
    let app = TestApp::new()?;
    let alice = app.token("alice@initech.example", "initech", "member", Tier::Pro);
    let initech_admin = app.token("admin@initech.example", "initech", "admin", Tier::Pro);
    let hooli_admin = app.token("admin@hooli.example", "hooli", "admin", Tier::Pro);

    let conversion_id = app.create_conversion(&alice).await?;

    let response = app
        .get(
            &format!("/api/v1/conversions/{conversion_id}"),
            Some(&initech_admin),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .get(
            &format!("/api/v1/conversions/{conversion_id}"),
            Some(&hooli_admin),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    Ok(())
}

/// Same resource id registered under two tenants must not collide in the
/// ownership registry.
#[tokio::test]
async fn ownership_keys_do_not_collide_across_tenants() -> Result<()> {
    let app = TestApp::new()?;
    let initech = app.token("alice@initech.example", "initech", "member", Tier::Pro);
    let hooli = app.token("gavin@hooli.example", "hooli", "member", Tier::Pro);

    let initech_conversion = app.create_conversion(&initech).await?;
    let hooli_conversion = app.create_conversion(&hooli).await?;

    let response = app
        .get(
            &format!("/api/v1/conversions/{initech_conversion}"),
            Some(&initech),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let response = app
        .get(
            &format!("/api/v1/conversions/{hooli_conversion}"),
            Some(&hooli),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn requests_without_a_bearer_token_are_unauthenticated() -> Result<()> {
    let app = TestApp::new()?;

    let response = app.post_json("/api/v1/conversions", &json!({}), None).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.get("/api/v1/quota", None).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Garbage tokens fail verification the same way.
    let response = app
        .get("/api/v1/quota", Some("not-a-real-token"))
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn health_check_is_public() -> Result<()> {
    let app = TestApp::new()?;

    let response = app.get("/api/health", None).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["status"], "ok");

    Ok(())
}

#[tokio::test]
async fn error_envelope_carries_code_message_and_timestamp() -> Result<()> {
    let app = TestApp::new()?;
    let token = app.token("alice@initech.example", "initech", "member", Tier::Pro);

    let missing = uuid::Uuid::new_v4();
    let response = app
        .get(&format!("/api/v1/conversions/{missing}"), Some(&token))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "not_found");
    assert!(body["message"].is_string());
    assert!(body["timestamp"].is_string());

    Ok(())
}
