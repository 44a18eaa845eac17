mod common;

use anyhow::Result;
use axum::http::StatusCode;
use chrono::{Datelike, Duration, NaiveDate, Utc, Weekday};
use common::{acquire_db_lock, body_to_json, TestApp};
use serde_json::json;

/// A Monday at least a week out, so booked slots are always in the future.
fn next_monday() -> NaiveDate {
    let mut day = Utc::now().date_naive() + Duration::days(7);
    while day.weekday() != Weekday::Mon {
        day += Duration::days(1);
    }
    day
}

async fn configure_working_hours(app: &TestApp, token: &str) -> Result<()> {
    // Workday 11:00-16:00, 15 minute buffer, generous window.
    let response = app
        .put_json(
            "/api/admin/settings/appointments",
            &json!({
                "workday_start_min": 660,
                "workday_end_min": 960,
                "buffer_minutes": 15,
                "booking_window_days": 365,
                "slot_granularity_minutes": 15,
                "active_types": ["consultation", "portrait"],
                "timezone": "UTC"
            }),
            Some(token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

async fn create_client(app: &TestApp, token: &str, email: &str) -> Result<String> {
    let response = app
        .post_json(
            "/api/admin/clients",
            &json!({ "name": "Test Client", "email": email }),
            Some(token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    Ok(body["data"]["id"].as_str().unwrap().to_string())
}

async fn create_appointment(app: &TestApp, token: &str, client_id: &str) -> Result<String> {
    let response = app
        .post_json(
            "/api/admin/appointments",
            &json!({
                "client_id": client_id,
                "appointment_type": "consultation",
                "duration_minutes": 60
            }),
            Some(token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    assert_eq!(body["data"]["status"], json!("DRAFT"));
    Ok(body["data"]["id"].as_str().unwrap().to_string())
}

#[tokio::test]
async fn availability_applies_buffers_and_blocked_times() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let password = "schedpass";
    app.insert_user("scheduler", password, "admin").await?;
    let token = app.login_token("scheduler", password).await?;
    configure_working_hours(&app, &token).await?;

    let monday = next_monday();
    let client_id = create_client(&app, &token, "slots@example.com").await?;
    let appointment_id = create_appointment(&app, &token, &client_id).await?;

    // Draft appointments only reach the calendar through an invite.
    let invited = app
        .post_json(
            &format!("/api/admin/appointments/{appointment_id}/send-invite"),
            &json!({}),
            Some(&token),
        )
        .await?;
    assert_eq!(invited.status(), StatusCode::OK);

    let booked = app
        .post_json(
            &format!("/api/admin/appointments/{appointment_id}/book"),
            &json!({ "scheduled_at": format!("{monday}T13:00:00") }),
            Some(&token),
        )
        .await?;
    assert_eq!(booked.status(), StatusCode::OK);
    let body = body_to_json(booked.into_body()).await?;
    assert_eq!(body["data"]["status"], json!("BOOKED"));

    // The caller must say how long a slot it needs.
    let missing_duration = app
        .get(
            &format!("/api/admin/appointments/availability?from={monday}&to={monday}"),
            Some(&token),
        )
        .await?;
    assert_eq!(missing_duration.status(), StatusCode::BAD_REQUEST);

    let response = app
        .get(
            &format!("/api/admin/appointments/availability?from={monday}&to={monday}&duration_minutes=60"),
            Some(&token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_json(response.into_body()).await?;
    let slots: Vec<String> = body["data"]["slots"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s.as_str().unwrap().to_string())
        .collect();

    // The 13:00-14:00 booking is buffered to 12:45-14:15.
    assert!(slots.contains(&format!("{monday}T11:00:00+00:00")));
    assert!(!slots.contains(&format!("{monday}T12:45:00+00:00")));
    assert!(!slots.contains(&format!("{monday}T13:00:00+00:00")));
    assert!(slots.contains(&format!("{monday}T14:15:00+00:00")));
    // Last start that still ends inside the workday.
    assert!(slots.contains(&format!("{monday}T15:00:00+00:00")));
    assert!(!slots.contains(&format!("{monday}T15:15:00+00:00")));

    // Block out the morning and the 11:00 slot disappears.
    let blocked = app
        .post_json(
            "/api/admin/settings/blocked-times",
            &json!({
                "starts_at": format!("{monday}T11:00:00"),
                "ends_at": format!("{monday}T12:00:00"),
                "reason": "studio maintenance"
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(blocked.status(), StatusCode::OK);

    let response = app
        .get(
            &format!("/api/admin/appointments/availability?from={monday}&to={monday}&duration_minutes=60"),
            Some(&token),
        )
        .await?;
    let body = body_to_json(response.into_body()).await?;
    let slots: Vec<String> = body["data"]["slots"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s.as_str().unwrap().to_string())
        .collect();
    assert!(!slots.contains(&format!("{monday}T11:00:00+00:00")));
    assert!(slots.contains(&format!("{monday}T14:15:00+00:00")));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn invite_and_public_booking_flow() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let password = "invitepass";
    app.insert_user("inviter", password, "admin").await?;
    let token = app.login_token("inviter", password).await?;
    configure_working_hours(&app, &token).await?;

    let monday = next_monday();
    let client_id = create_client(&app, &token, "booker@example.com").await?;
    let appointment_id = create_appointment(&app, &token, &client_id).await?;
    app.clear_jobs().await?;

    let invited = app
        .post_json(
            &format!("/api/admin/appointments/{appointment_id}/send-invite"),
            &json!({}),
            Some(&token),
        )
        .await?;
    assert_eq!(invited.status(), StatusCode::OK);
    let body = body_to_json(invited.into_body()).await?;
    assert_eq!(body["data"]["appointment"]["status"], json!("INVITE_SENT"));
    let booking_url = body["data"]["booking_url"].as_str().unwrap().to_string();
    let booking_token = booking_url.rsplit('/').next().unwrap().to_string();

    // The invite email carries the same link.
    let emails = app.jobs_by_type("send-email").await?;
    assert_eq!(emails.len(), 1);
    let email_body = emails[0].payload["body"].as_str().unwrap();
    assert!(email_body.contains(&booking_url));

    // The public booking page needs no auth and offers slots.
    let details = app.get(&format!("/booking/{booking_token}"), None).await?;
    assert_eq!(details.status(), StatusCode::OK);
    let body = body_to_json(details.into_body()).await?;
    assert_eq!(body["data"]["client_name"], json!("Test Client"));
    assert_eq!(body["data"]["duration_minutes"], json!(60));
    assert!(!body["data"]["slots"].as_array().unwrap().is_empty());

    // Sundays are rejected even when requested directly.
    let sunday = monday - Duration::days(1);
    let rejected = app
        .post_json(
            &format!("/booking/{booking_token}/book"),
            &json!({ "scheduled_at": format!("{sunday}T13:00:00") }),
            None,
        )
        .await?;
    assert_eq!(rejected.status(), StatusCode::BAD_REQUEST);

    let booked = app
        .post_json(
            &format!("/booking/{booking_token}/book"),
            &json!({ "scheduled_at": format!("{monday}T13:00:00") }),
            None,
        )
        .await?;
    assert_eq!(booked.status(), StatusCode::OK);
    let body = body_to_json(booked.into_body()).await?;
    assert_eq!(body["data"]["status"], json!("BOOKED"));
    assert_eq!(
        body["data"]["scheduled_at"],
        json!(format!("{monday}T13:00:00+00:00"))
    );

    // Confirmation email plus a calendar push are queued.
    let emails = app.jobs_by_type("send-email").await?;
    assert_eq!(emails.len(), 2);
    let syncs = app.jobs_by_type("sync-appointment").await?;
    assert_eq!(syncs.len(), 1);
    assert_eq!(syncs[0].payload["action"], json!("push"));

    // A used invite cannot book twice.
    let reused = app.get(&format!("/booking/{booking_token}"), None).await?;
    assert_eq!(reused.status(), StatusCode::CONFLICT);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn lifecycle_transitions_are_enforced() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let password = "lifecyclepass";
    app.insert_user("lifecycle", password, "admin").await?;
    let token = app.login_token("lifecycle", password).await?;
    configure_working_hours(&app, &token).await?;

    let client_id = create_client(&app, &token, "lifecycle@example.com").await?;

    // Types outside the configured list are rejected up front.
    let bad_type = app
        .post_json(
            "/api/admin/appointments",
            &json!({
                "client_id": client_id,
                "appointment_type": "submarine-tour",
                "duration_minutes": 60
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(bad_type.status(), StatusCode::BAD_REQUEST);

    let appointment_id = create_appointment(&app, &token, &client_id).await?;

    // Draft appointments cannot jump straight to a closed outcome.
    let completed = app
        .post_json(
            &format!("/api/admin/appointments/{appointment_id}/complete"),
            &json!({}),
            Some(&token),
        )
        .await?;
    assert_eq!(completed.status(), StatusCode::CONFLICT);

    let cancelled = app
        .post_json(
            &format!("/api/admin/appointments/{appointment_id}/cancel"),
            &json!({ "reason": "client withdrew" }),
            Some(&token),
        )
        .await?;
    assert_eq!(cancelled.status(), StatusCode::OK);
    let body = body_to_json(cancelled.into_body()).await?;
    assert_eq!(body["data"]["status"], json!("CANCELLED"));
    assert_eq!(body["data"]["outcome_notes"], json!("client withdrew"));

    // Terminal states are frozen.
    let invited = app
        .post_json(
            &format!("/api/admin/appointments/{appointment_id}/send-invite"),
            &json!({}),
            Some(&token),
        )
        .await?;
    assert_eq!(invited.status(), StatusCode::CONFLICT);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn cancelling_a_booked_appointment_removes_the_calendar_event() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let password = "cancelpass";
    app.insert_user("canceller", password, "admin").await?;
    let token = app.login_token("canceller", password).await?;
    configure_working_hours(&app, &token).await?;

    let monday = next_monday();
    let client_id = create_client(&app, &token, "cancel@example.com").await?;
    let appointment_id = create_appointment(&app, &token, &client_id).await?;

    let invited = app
        .post_json(
            &format!("/api/admin/appointments/{appointment_id}/send-invite"),
            &json!({}),
            Some(&token),
        )
        .await?;
    assert_eq!(invited.status(), StatusCode::OK);
    let booked = app
        .post_json(
            &format!("/api/admin/appointments/{appointment_id}/book"),
            &json!({ "scheduled_at": format!("{monday}T11:00:00") }),
            Some(&token),
        )
        .await?;
    assert_eq!(booked.status(), StatusCode::OK);
    app.clear_jobs().await?;

    let cancelled = app
        .post_json(
            &format!("/api/admin/appointments/{appointment_id}/cancel"),
            &json!({}),
            Some(&token),
        )
        .await?;
    assert_eq!(cancelled.status(), StatusCode::OK);

    let syncs = app.jobs_by_type("sync-appointment").await?;
    assert_eq!(syncs.len(), 1);
    assert_eq!(syncs[0].payload["action"], json!("remove"));
    assert_eq!(
        syncs[0].payload["appointment_id"],
        json!(appointment_id)
    );

    app.cleanup().await?;
    Ok(())
}
