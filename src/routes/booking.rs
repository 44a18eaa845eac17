use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{Duration, NaiveDateTime, Utc};
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Appointment, Client},
    scheduling::{available_slots, AppointmentStatus},
    schema::{appointments, clients},
    signing::hash_token,
    state::AppState,
    utils::respond::{self, Envelope},
    utils::to_iso,
};

use super::appointments::{busy_intervals, current_status, grid_from, place_on_calendar};
use super::settings::load_settings;

#[derive(Serialize)]
pub struct BookingDetailsResponse {
    pub appointment_id: Uuid,
    pub appointment_type: String,
    pub duration_minutes: i32,
    pub client_name: String,
    pub slots: Vec<String>,
}

#[derive(Deserialize)]
pub struct BookSlotRequest {
    pub scheduled_at: NaiveDateTime,
}

#[derive(Serialize)]
pub struct BookSlotResponse {
    pub appointment_id: Uuid,
    pub status: String,
    pub scheduled_at: String,
}

/// Resolves an invite link and offers every bookable slot inside the
/// booking window.
pub async fn booking_details(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> AppResult<Json<Envelope<BookingDetailsResponse>>> {
    let mut conn = state.db()?;
    let appointment = appointment_for_token(&mut conn, &token)?;

    let client: Client = clients::table
        .find(appointment.client_id)
        .first(&mut conn)?;

    let settings = load_settings(&mut conn)?;
    let grid = grid_from(&settings);
    let (busy, blocked) = busy_intervals(&mut conn, Some(appointment.id))?;

    let now = Utc::now().naive_utc();
    let from = now.date();
    let to = from + Duration::days(settings.booking_window_days.max(0) as i64);
    let slots = available_slots(
        &grid,
        from,
        to,
        appointment.duration_minutes,
        &busy,
        &blocked,
        now,
    )
    .map_err(|err| AppError::bad_request(err.to_string()))?;

    Ok(respond::ok(BookingDetailsResponse {
        appointment_id: appointment.id,
        appointment_type: appointment.appointment_type,
        duration_minutes: appointment.duration_minutes,
        client_name: client.name,
        slots: slots.into_iter().map(to_iso).collect(),
    }))
}

/// Books the chosen slot. The slot is re-validated against the calendar
/// at booking time, so a slot shown earlier can still be rejected here.
pub async fn book_slot(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<BookSlotRequest>,
) -> AppResult<Json<Envelope<BookSlotResponse>>> {
    let mut conn = state.db()?;
    let appointment = appointment_for_token(&mut conn, &token)?;

    place_on_calendar(&state, &mut conn, &appointment, payload.scheduled_at)?;

    let updated: Appointment = appointments::table.find(appointment.id).first(&mut conn)?;
    let scheduled_at = updated
        .scheduled_at
        .map(to_iso)
        .unwrap_or_default();
    Ok(respond::ok(BookSlotResponse {
        appointment_id: updated.id,
        status: updated.status,
        scheduled_at,
    }))
}

/// Looks up the appointment behind an invite token. Only open invites
/// resolve: a used or cancelled invite reports a conflict instead of
/// leaking the calendar.
fn appointment_for_token(conn: &mut PgConnection, token: &str) -> AppResult<Appointment> {
    let token_hash = hash_token(token);
    let appointment: Appointment = appointments::table
        .filter(appointments::invite_token_hash.eq(Some(token_hash)))
        .first(conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    match current_status(&appointment)? {
        AppointmentStatus::InviteSent => Ok(appointment),
        AppointmentStatus::Booked => Err(AppError::conflict("this invite has already been used")),
        _ => Err(AppError::conflict("this invite is no longer open")),
    }
}
