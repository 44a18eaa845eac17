mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_json, TestApp};
use serde_json::json;

#[tokio::test]
async fn client_crud_and_duplicate_email() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let password = "clientpass";
    app.insert_user("studio-admin", password, "admin").await?;
    let token = app.login_token("studio-admin", password).await?;

    let created = app
        .post_json(
            "/api/admin/clients",
            &json!({
                "name": "Ada Lovelace",
                "email": "Ada@Example.COM",
                "phone": "+1 555 0100"
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(created.status(), StatusCode::OK);
    let body = body_to_json(created.into_body()).await?;
    assert_eq!(body["success"], json!(true));
    // Emails are normalised to lowercase.
    assert_eq!(body["data"]["email"], json!("ada@example.com"));
    let client_id = body["data"]["id"].as_str().unwrap().to_string();

    // Same email, different case, is still a duplicate.
    let duplicate = app
        .post_json(
            "/api/admin/clients",
            &json!({ "name": "Other", "email": "ada@example.com" }),
            Some(&token),
        )
        .await?;
    assert_eq!(duplicate.status(), StatusCode::BAD_REQUEST);
    let body = body_to_json(duplicate.into_body()).await?;
    assert_eq!(body["success"], json!(false));

    let patched = app
        .patch_json(
            &format!("/api/admin/clients/{client_id}"),
            &json!({ "notes": "prefers outdoor shoots" }),
            Some(&token),
        )
        .await?;
    assert_eq!(patched.status(), StatusCode::OK);
    let body = body_to_json(patched.into_body()).await?;
    assert_eq!(body["data"]["notes"], json!("prefers outdoor shoots"));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn archived_clients_drop_out_of_default_listing() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let password = "archivepass";
    app.insert_user("archiver", password, "admin").await?;
    let token = app.login_token("archiver", password).await?;

    let created = app
        .post_json(
            "/api/admin/clients",
            &json!({ "name": "Grace Hopper", "email": "grace@example.com" }),
            Some(&token),
        )
        .await?;
    assert_eq!(created.status(), StatusCode::OK);
    let body = body_to_json(created.into_body()).await?;
    let client_id = body["data"]["id"].as_str().unwrap().to_string();

    let archived = app
        .delete(&format!("/api/admin/clients/{client_id}"), Some(&token))
        .await?;
    assert_eq!(archived.status(), StatusCode::OK);
    let body = body_to_json(archived.into_body()).await?;
    assert_eq!(body["data"]["status"], json!("ARCHIVED"));

    let listing = app.get("/api/admin/clients", Some(&token)).await?;
    let body = body_to_json(listing.into_body()).await?;
    assert_eq!(body["data"].as_array().unwrap().len(), 0);
    assert_eq!(body["pagination"]["total"], json!(0));

    let listing = app
        .get("/api/admin/clients?include_archived=true", Some(&token))
        .await?;
    let body = body_to_json(listing.into_body()).await?;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let restored = app
        .post_json(
            &format!("/api/admin/clients/{client_id}/restore"),
            &json!({}),
            Some(&token),
        )
        .await?;
    assert_eq!(restored.status(), StatusCode::OK);
    let body = body_to_json(restored.into_body()).await?;
    assert_eq!(body["data"]["status"], json!("ACTIVE"));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn inquiry_conversion_links_or_creates_client() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let password = "inquirypass";
    app.insert_user("frontdesk", password, "admin").await?;
    let token = app.login_token("frontdesk", password).await?;

    // The public contact form needs no token.
    let inquiry = app
        .post_json(
            "/public/inquiries",
            &json!({
                "name": "Alan Turing",
                "email": "alan@example.com",
                "message": "Looking for a portrait session"
            }),
            None,
        )
        .await?;
    assert_eq!(inquiry.status(), StatusCode::OK);
    let body = body_to_json(inquiry.into_body()).await?;
    assert_eq!(body["data"]["status"], json!("NEW"));
    let inquiry_id = body["data"]["id"].as_str().unwrap().to_string();

    let converted = app
        .post_json(
            &format!("/api/admin/inquiries/{inquiry_id}/convert"),
            &json!({}),
            Some(&token),
        )
        .await?;
    assert_eq!(converted.status(), StatusCode::OK);
    let body = body_to_json(converted.into_body()).await?;
    assert_eq!(body["data"]["client_created"], json!(true));
    assert_eq!(body["data"]["inquiry"]["status"], json!("CONVERTED"));

    // Converting twice is a conflict.
    let again = app
        .post_json(
            &format!("/api/admin/inquiries/{inquiry_id}/convert"),
            &json!({}),
            Some(&token),
        )
        .await?;
    assert_eq!(again.status(), StatusCode::CONFLICT);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn admin_routes_require_a_token() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let response = app.get("/api/admin/clients", None).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}
