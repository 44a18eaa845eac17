use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{AppointmentSettings, BlockedTime, NewBlockedTime},
    schema::{appointment_settings, blocked_times},
    state::AppState,
    utils::respond::{self, Envelope},
    utils::to_iso,
};

/// Single configuration row seeded by the migrations.
const SETTINGS_ROW_ID: i32 = 1;

const MINUTES_PER_DAY: i32 = 24 * 60;

#[derive(Serialize)]
pub struct SettingsResponse {
    pub workday_start_min: i32,
    pub workday_end_min: i32,
    pub buffer_minutes: i32,
    pub booking_window_days: i32,
    pub slot_granularity_minutes: i32,
    pub active_types: Value,
    pub timezone: String,
    pub updated_at: String,
}

impl From<AppointmentSettings> for SettingsResponse {
    fn from(settings: AppointmentSettings) -> Self {
        Self {
            workday_start_min: settings.workday_start_min,
            workday_end_min: settings.workday_end_min,
            buffer_minutes: settings.buffer_minutes,
            booking_window_days: settings.booking_window_days,
            slot_granularity_minutes: settings.slot_granularity_minutes,
            active_types: settings.active_types,
            timezone: settings.timezone,
            updated_at: to_iso(settings.updated_at),
        }
    }
}

#[derive(Deserialize)]
pub struct UpdateSettingsRequest {
    pub workday_start_min: i32,
    pub workday_end_min: i32,
    pub buffer_minutes: i32,
    pub booking_window_days: i32,
    pub slot_granularity_minutes: i32,
    pub active_types: Value,
    pub timezone: String,
}

pub(crate) fn load_settings(conn: &mut PgConnection) -> AppResult<AppointmentSettings> {
    let settings: AppointmentSettings = appointment_settings::table
        .find(SETTINGS_ROW_ID)
        .first(conn)?;
    Ok(settings)
}

pub async fn get_settings(
    State(state): State<AppState>,
) -> AppResult<Json<Envelope<SettingsResponse>>> {
    let mut conn = state.db()?;
    let settings = load_settings(&mut conn)?;
    Ok(respond::ok(settings.into()))
}

pub async fn update_settings(
    State(state): State<AppState>,
    Json(payload): Json<UpdateSettingsRequest>,
) -> AppResult<Json<Envelope<SettingsResponse>>> {
    if payload.workday_start_min < 0 || payload.workday_end_min > MINUTES_PER_DAY {
        return Err(AppError::bad_request(
            "workday bounds must fall within a single day",
        ));
    }
    if payload.workday_end_min <= payload.workday_start_min {
        return Err(AppError::bad_request("workday must end after it starts"));
    }
    if payload.buffer_minutes < 0 {
        return Err(AppError::bad_request("buffer minutes must not be negative"));
    }
    if payload.booking_window_days < 1 {
        return Err(AppError::bad_request(
            "booking window must be at least one day",
        ));
    }
    if payload.slot_granularity_minutes < 1 {
        return Err(AppError::bad_request(
            "slot granularity must be at least one minute",
        ));
    }
    let types_valid = payload
        .active_types
        .as_array()
        .map(|items| items.iter().all(|item| item.is_string()))
        .unwrap_or(false);
    if !types_valid {
        return Err(AppError::bad_request(
            "active_types must be an array of strings",
        ));
    }
    if payload.timezone.trim().is_empty() {
        return Err(AppError::bad_request("timezone must not be empty"));
    }

    let mut conn = state.db()?;
    diesel::update(appointment_settings::table.find(SETTINGS_ROW_ID))
        .set((
            appointment_settings::workday_start_min.eq(payload.workday_start_min),
            appointment_settings::workday_end_min.eq(payload.workday_end_min),
            appointment_settings::buffer_minutes.eq(payload.buffer_minutes),
            appointment_settings::booking_window_days.eq(payload.booking_window_days),
            appointment_settings::slot_granularity_minutes.eq(payload.slot_granularity_minutes),
            appointment_settings::active_types.eq(&payload.active_types),
            appointment_settings::timezone.eq(payload.timezone.trim()),
            appointment_settings::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    let settings = load_settings(&mut conn)?;
    Ok(respond::ok(settings.into()))
}

#[derive(Serialize)]
pub struct BlockedTimeResponse {
    pub id: Uuid,
    pub starts_at: String,
    pub ends_at: String,
    pub reason: Option<String>,
    pub created_at: String,
}

impl From<BlockedTime> for BlockedTimeResponse {
    fn from(blocked: BlockedTime) -> Self {
        Self {
            id: blocked.id,
            starts_at: to_iso(blocked.starts_at),
            ends_at: to_iso(blocked.ends_at),
            reason: blocked.reason,
            created_at: to_iso(blocked.created_at),
        }
    }
}

#[derive(Deserialize)]
pub struct CreateBlockedTimeRequest {
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
    pub reason: Option<String>,
}

pub async fn list_blocked_times(
    State(state): State<AppState>,
) -> AppResult<Json<Envelope<Vec<BlockedTimeResponse>>>> {
    let mut conn = state.db()?;
    let rows: Vec<BlockedTime> = blocked_times::table
        .order(blocked_times::starts_at.asc())
        .load(&mut conn)?;
    Ok(respond::ok(
        rows.into_iter().map(BlockedTimeResponse::from).collect(),
    ))
}

pub async fn create_blocked_time(
    State(state): State<AppState>,
    Json(payload): Json<CreateBlockedTimeRequest>,
) -> AppResult<Json<Envelope<BlockedTimeResponse>>> {
    if payload.ends_at <= payload.starts_at {
        return Err(AppError::bad_request(
            "blocked time must end after it starts",
        ));
    }

    let new_blocked = NewBlockedTime {
        id: Uuid::new_v4(),
        starts_at: payload.starts_at,
        ends_at: payload.ends_at,
        reason: payload.reason.filter(|r| !r.trim().is_empty()),
    };

    let mut conn = state.db()?;
    diesel::insert_into(blocked_times::table)
        .values(&new_blocked)
        .execute(&mut conn)?;

    let blocked: BlockedTime = blocked_times::table.find(new_blocked.id).first(&mut conn)?;
    Ok(respond::ok(blocked.into()))
}

pub async fn delete_blocked_time(
    State(state): State<AppState>,
    Path(blocked_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    let deleted = diesel::delete(blocked_times::table.find(blocked_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}
