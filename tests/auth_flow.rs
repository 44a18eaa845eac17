mod common;

use anyhow::{anyhow, Result};
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_json, TestApp};
use serde_json::json;

fn refresh_cookie(response: &hyper::Response<axum::body::Body>) -> Result<String> {
    let header = response
        .headers()
        .get("set-cookie")
        .ok_or_else(|| anyhow!("no refresh cookie set"))?
        .to_str()?;
    let pair = header
        .split(';')
        .next()
        .ok_or_else(|| anyhow!("empty cookie header"))?;
    Ok(pair.to_string())
}

#[tokio::test]
async fn login_refresh_and_logout() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.insert_user("owner", "correct-horse", "admin").await?;

    let rejected = app
        .post_json(
            "/api/auth/login",
            &json!({ "username": "owner", "password": "wrong" }),
            None,
        )
        .await?;
    assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);

    let login = app
        .post_json(
            "/api/auth/login",
            &json!({ "username": "owner", "password": "correct-horse" }),
            None,
        )
        .await?;
    assert_eq!(login.status(), StatusCode::OK);
    let cookie = refresh_cookie(&login)?;
    assert!(cookie.starts_with("studio_refresh="));
    let body = body_to_json(login.into_body()).await?;
    let access_token = body["data"]["access_token"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["token_type"], json!("Bearer"));

    let me = app.get("/api/auth/me", Some(&access_token)).await?;
    assert_eq!(me.status(), StatusCode::OK);
    let body = body_to_json(me.into_body()).await?;
    assert_eq!(body["data"]["username"], json!("owner"));

    // Refresh rotates the cookie and issues a fresh access token.
    let refreshed = app
        .post_with_cookie("/api/auth/refresh", &cookie, None)
        .await?;
    assert_eq!(refreshed.status(), StatusCode::OK);
    let new_cookie = refresh_cookie(&refreshed)?;
    assert_ne!(new_cookie, cookie);
    let body = body_to_json(refreshed.into_body()).await?;
    assert!(body["data"]["access_token"].is_string());

    // The old refresh token was revoked by the rotation.
    let replayed = app
        .post_with_cookie("/api/auth/refresh", &cookie, None)
        .await?;
    assert_eq!(replayed.status(), StatusCode::UNAUTHORIZED);

    let logout = app
        .post_with_cookie("/api/auth/logout", &new_cookie, Some(&access_token))
        .await?;
    assert_eq!(logout.status(), StatusCode::NO_CONTENT);

    let after_logout = app
        .post_with_cookie("/api/auth/refresh", &new_cookie, None)
        .await?;
    assert_eq!(after_logout.status(), StatusCode::UNAUTHORIZED);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn calendar_oauth_requires_configuration() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let password = "calendarpass";
    app.insert_user("calendar-admin", password, "admin").await?;
    let token = app.login_token("calendar-admin", password).await?;

    // No provider credentials are configured in the test environment.
    let unconfigured = app
        .get("/auth/oauth/google/authorize", Some(&token))
        .await?;
    assert_eq!(unconfigured.status(), StatusCode::BAD_REQUEST);

    let unknown = app
        .get("/auth/oauth/fancycal/authorize", Some(&token))
        .await?;
    assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);

    let accounts = app
        .get("/api/admin/calendar-accounts", Some(&token))
        .await?;
    assert_eq!(accounts.status(), StatusCode::OK);
    let body = body_to_json(accounts.into_body()).await?;
    assert_eq!(body["data"].as_array().unwrap().len(), 0);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn calendar_callback_rejects_forged_state() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let admin_id = app
        .insert_user("target-admin", "targetpass", "admin")
        .await?;

    // A callback carrying a guessed user id must not attach an account;
    // only a state token we minted ourselves resolves.
    let forged = app
        .get(
            &format!("/auth/oauth/google/callback?code=stolen-code&state={admin_id}"),
            None,
        )
        .await?;
    assert_eq!(forged.status(), StatusCode::BAD_REQUEST);
    let body = body_to_json(forged.into_body()).await?;
    assert!(body["message"].as_str().unwrap().contains("state"));

    let no_state = app
        .get("/auth/oauth/google/callback?code=stolen-code", None)
        .await?;
    assert_eq!(no_state.status(), StatusCode::BAD_REQUEST);

    let token = app.login_token("target-admin", "targetpass").await?;
    let accounts = app
        .get("/api/admin/calendar-accounts", Some(&token))
        .await?;
    let body = body_to_json(accounts.into_body()).await?;
    assert_eq!(body["data"].as_array().unwrap().len(), 0);

    app.cleanup().await?;
    Ok(())
}
