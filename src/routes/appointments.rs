use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{NaiveDate, NaiveDateTime, Utc};
use diesel::{dsl::count_star, prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    jobs::{enqueue_job, JOB_SEND_EMAIL, JOB_SYNC_APPOINTMENT},
    models::{Appointment, AppointmentSettings, Client, NewAppointment},
    scheduling::{
        available_slots, check_slot, AppointmentStatus, AvailabilityError, Interval, SlotGrid,
    },
    schema::{appointments, blocked_times, clients},
    signing::{generate_magic_token, hash_token},
    state::AppState,
    utils::respond::{self, Envelope, PageQuery, Pagination},
    utils::to_iso,
};

use super::clients::CLIENT_ARCHIVED;
use super::settings::load_settings;

#[derive(Serialize)]
pub struct AppointmentResponse {
    pub id: Uuid,
    pub client_id: Uuid,
    pub appointment_type: String,
    pub status: String,
    pub scheduled_at: Option<String>,
    pub duration_minutes: i32,
    pub outcome: Option<String>,
    pub outcome_notes: Option<String>,
    pub admin_notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Appointment> for AppointmentResponse {
    fn from(appointment: Appointment) -> Self {
        Self {
            id: appointment.id,
            client_id: appointment.client_id,
            appointment_type: appointment.appointment_type,
            status: appointment.status,
            scheduled_at: appointment.scheduled_at.map(to_iso),
            duration_minutes: appointment.duration_minutes,
            outcome: appointment.outcome,
            outcome_notes: appointment.outcome_notes,
            admin_notes: appointment.admin_notes,
            created_at: to_iso(appointment.created_at),
            updated_at: to_iso(appointment.updated_at),
        }
    }
}

#[derive(Deserialize)]
pub struct AppointmentListQuery {
    pub status: Option<String>,
    pub client_id: Option<Uuid>,
    #[serde(flatten)]
    pub page: PageQuery,
}

#[derive(Deserialize)]
pub struct CreateAppointmentRequest {
    pub client_id: Uuid,
    pub appointment_type: String,
    pub duration_minutes: i32,
    pub admin_notes: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateAppointmentRequest {
    pub appointment_type: Option<String>,
    pub duration_minutes: Option<i32>,
    pub admin_notes: Option<Option<String>>,
}

#[derive(Deserialize)]
pub struct AvailabilityQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub duration_minutes: Option<i32>,
}

#[derive(Serialize)]
pub struct AvailabilityResponse {
    pub slots: Vec<String>,
    pub duration_minutes: i32,
}

#[derive(Serialize)]
pub struct SendInviteResponse {
    pub appointment: AppointmentResponse,
    pub booking_url: String,
}

#[derive(Deserialize)]
pub struct BookAppointmentRequest {
    pub scheduled_at: NaiveDateTime,
}

#[derive(Deserialize)]
pub struct OutcomeRequest {
    pub outcome: Option<String>,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: Option<String>,
}

pub async fn list_appointments(
    State(state): State<AppState>,
    Query(params): Query<AppointmentListQuery>,
) -> AppResult<Json<Envelope<Vec<AppointmentResponse>>>> {
    let mut conn = state.db()?;

    let mut query = appointments::table.into_boxed();
    let mut count_query = appointments::table.into_boxed();

    if let Some(raw) = params.status.as_deref() {
        let status = AppointmentStatus::parse(raw)
            .ok_or_else(|| AppError::bad_request("unknown appointment status"))?;
        query = query.filter(appointments::status.eq(status.as_str()));
        count_query = count_query.filter(appointments::status.eq(status.as_str()));
    }
    if let Some(client_id) = params.client_id {
        query = query.filter(appointments::client_id.eq(client_id));
        count_query = count_query.filter(appointments::client_id.eq(client_id));
    }

    let total: i64 = count_query.select(count_star()).first(&mut conn)?;
    let rows: Vec<Appointment> = query
        .order(appointments::created_at.desc())
        .offset(params.page.offset())
        .limit(params.page.per_page())
        .load(&mut conn)?;

    Ok(respond::paginated(
        rows.into_iter().map(AppointmentResponse::from).collect(),
        Pagination {
            page: params.page.page(),
            per_page: params.page.per_page(),
            total,
        },
    ))
}

pub async fn create_appointment(
    State(state): State<AppState>,
    Json(payload): Json<CreateAppointmentRequest>,
) -> AppResult<Json<Envelope<AppointmentResponse>>> {
    if payload.duration_minutes <= 0 {
        return Err(AppError::bad_request(
            "duration must be a positive number of minutes",
        ));
    }

    let mut conn = state.db()?;
    let client: Client = clients::table
        .find(payload.client_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;
    if client.status == CLIENT_ARCHIVED {
        return Err(AppError::bad_request(
            "appointments cannot be created for an archived client",
        ));
    }

    let settings = load_settings(&mut conn)?;
    let appointment_type = payload.appointment_type.trim();
    ensure_active_type(&settings, appointment_type)?;

    let new_appointment = NewAppointment {
        id: Uuid::new_v4(),
        client_id: client.id,
        appointment_type: appointment_type.to_string(),
        status: AppointmentStatus::Draft.as_str().to_string(),
        duration_minutes: payload.duration_minutes,
        admin_notes: payload.admin_notes.filter(|n| !n.trim().is_empty()),
    };

    diesel::insert_into(appointments::table)
        .values(&new_appointment)
        .execute(&mut conn)?;

    let appointment: Appointment = appointments::table
        .find(new_appointment.id)
        .first(&mut conn)?;
    Ok(respond::ok(appointment.into()))
}

pub async fn availability(
    State(state): State<AppState>,
    Query(params): Query<AvailabilityQuery>,
) -> AppResult<Json<Envelope<AvailabilityResponse>>> {
    let mut conn = state.db()?;
    let settings = load_settings(&mut conn)?;
    let grid = grid_from(&settings);
    let duration = params
        .duration_minutes
        .ok_or_else(|| AppError::bad_request("duration_minutes is required"))?;

    let (busy, blocked) = busy_intervals(&mut conn, None)?;
    let slots = available_slots(
        &grid,
        params.from,
        params.to,
        duration,
        &busy,
        &blocked,
        Utc::now().naive_utc(),
    )
    .map_err(availability_error)?;

    Ok(respond::ok(AvailabilityResponse {
        slots: slots.into_iter().map(to_iso).collect(),
        duration_minutes: duration,
    }))
}

pub async fn get_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
) -> AppResult<Json<Envelope<AppointmentResponse>>> {
    let mut conn = state.db()?;
    let appointment: Appointment = appointments::table.find(appointment_id).first(&mut conn)?;
    Ok(respond::ok(appointment.into()))
}

pub async fn update_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    Json(payload): Json<UpdateAppointmentRequest>,
) -> AppResult<Json<Envelope<AppointmentResponse>>> {
    let mut conn = state.db()?;
    let existing: Appointment = appointments::table.find(appointment_id).first(&mut conn)?;
    let status = current_status(&existing)?;

    // Type and duration shape the offered slots, so they are frozen
    // once a time is on the calendar.
    let editable = matches!(
        status,
        AppointmentStatus::Draft | AppointmentStatus::InviteSent
    );

    let mut new_type: Option<String> = None;
    if let Some(ref candidate) = payload.appointment_type {
        if !editable {
            return Err(AppError::conflict(
                "appointment type can only change before booking",
            ));
        }
        let settings = load_settings(&mut conn)?;
        let trimmed = candidate.trim();
        ensure_active_type(&settings, trimmed)?;
        new_type = Some(trimmed.to_string());
    }

    let mut new_duration: Option<i32> = None;
    if let Some(duration) = payload.duration_minutes {
        if !editable {
            return Err(AppError::conflict(
                "appointment duration can only change before booking",
            ));
        }
        if duration <= 0 {
            return Err(AppError::bad_request(
                "duration must be a positive number of minutes",
            ));
        }
        new_duration = Some(duration);
    }

    let notes_change = payload
        .admin_notes
        .map(|value| value.filter(|n| !n.trim().is_empty()));

    if new_type.is_none() && new_duration.is_none() && notes_change.is_none() {
        return Ok(respond::ok(existing.into()));
    }

    diesel::update(appointments::table.find(appointment_id))
        .set((
            new_type.map(|t| appointments::appointment_type.eq(t)),
            new_duration.map(|d| appointments::duration_minutes.eq(d)),
            notes_change.map(|n| appointments::admin_notes.eq(n)),
            appointments::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    let updated: Appointment = appointments::table.find(appointment_id).first(&mut conn)?;
    Ok(respond::ok(updated.into()))
}

/// Mints a fresh booking token and mails the self-scheduling link to the
/// client. Re-sending while the invite is still open rotates the token.
pub async fn send_invite(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
) -> AppResult<Json<Envelope<SendInviteResponse>>> {
    let mut conn = state.db()?;
    let appointment: Appointment = appointments::table.find(appointment_id).first(&mut conn)?;
    let status = current_status(&appointment)?;

    let next = AppointmentStatus::InviteSent;
    if status != AppointmentStatus::InviteSent {
        ensure_transition(status, next)?;
    }

    let client: Client = clients::table
        .find(appointment.client_id)
        .first(&mut conn)?;

    let token = generate_magic_token();
    let booking_url = format!(
        "{}/booking/{token}",
        state.config.public_base_url.trim_end_matches('/')
    );

    diesel::update(appointments::table.find(appointment_id))
        .set((
            appointments::status.eq(next.as_str()),
            appointments::invite_token_hash.eq(Some(hash_token(&token))),
            appointments::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    enqueue_job(
        &mut conn,
        JOB_SEND_EMAIL,
        json!({
            "to": client.email,
            "subject": format!("Schedule your {}", appointment.appointment_type),
            "body": format!(
                "Hi {},\n\nPick a time that works for you: {booking_url}\n",
                client.name
            ),
        }),
        None,
    )?;

    let updated: Appointment = appointments::table.find(appointment_id).first(&mut conn)?;
    Ok(respond::ok(SendInviteResponse {
        appointment: updated.into(),
        booking_url,
    }))
}

pub async fn book_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    Json(payload): Json<BookAppointmentRequest>,
) -> AppResult<Json<Envelope<AppointmentResponse>>> {
    let mut conn = state.db()?;
    let appointment: Appointment = appointments::table.find(appointment_id).first(&mut conn)?;
    let status = current_status(&appointment)?;
    ensure_transition(status, AppointmentStatus::Booked)?;

    place_on_calendar(&state, &mut conn, &appointment, payload.scheduled_at)?;

    let updated: Appointment = appointments::table.find(appointment_id).first(&mut conn)?;
    Ok(respond::ok(updated.into()))
}

pub async fn reschedule_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    Json(payload): Json<BookAppointmentRequest>,
) -> AppResult<Json<Envelope<AppointmentResponse>>> {
    let mut conn = state.db()?;
    let appointment: Appointment = appointments::table.find(appointment_id).first(&mut conn)?;
    let status = current_status(&appointment)?;
    if status != AppointmentStatus::Booked {
        return Err(AppError::conflict(
            "only booked appointments can be rescheduled",
        ));
    }

    place_on_calendar(&state, &mut conn, &appointment, payload.scheduled_at)?;

    let updated: Appointment = appointments::table.find(appointment_id).first(&mut conn)?;
    Ok(respond::ok(updated.into()))
}

pub async fn complete_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    Json(payload): Json<OutcomeRequest>,
) -> AppResult<Json<Envelope<AppointmentResponse>>> {
    close_out(
        &state,
        appointment_id,
        AppointmentStatus::Completed,
        payload.outcome,
        payload.notes,
    )
    .await
}

pub async fn mark_no_show(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    Json(payload): Json<OutcomeRequest>,
) -> AppResult<Json<Envelope<AppointmentResponse>>> {
    close_out(
        &state,
        appointment_id,
        AppointmentStatus::NoShow,
        payload.outcome,
        payload.notes,
    )
    .await
}

pub async fn cancel_appointment(
    State(state): State<AppState>,
    Path(appointment_id): Path<Uuid>,
    Json(payload): Json<CancelAppointmentRequest>,
) -> AppResult<Json<Envelope<AppointmentResponse>>> {
    let mut conn = state.db()?;
    let appointment: Appointment = appointments::table.find(appointment_id).first(&mut conn)?;
    let status = current_status(&appointment)?;
    ensure_transition(status, AppointmentStatus::Cancelled)?;

    diesel::update(appointments::table.find(appointment_id))
        .set((
            appointments::status.eq(AppointmentStatus::Cancelled.as_str()),
            appointments::outcome_notes
                .eq(payload.reason.filter(|r| !r.trim().is_empty())),
            appointments::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    // A booked slot was on external calendars, take it back down.
    if status == AppointmentStatus::Booked {
        enqueue_job(
            &mut conn,
            JOB_SYNC_APPOINTMENT,
            json!({ "appointment_id": appointment_id, "action": "remove" }),
            None,
        )?;
    }

    let updated: Appointment = appointments::table.find(appointment_id).first(&mut conn)?;
    Ok(respond::ok(updated.into()))
}

async fn close_out(
    state: &AppState,
    appointment_id: Uuid,
    next: AppointmentStatus,
    outcome: Option<String>,
    notes: Option<String>,
) -> AppResult<Json<Envelope<AppointmentResponse>>> {
    let mut conn = state.db()?;
    let appointment: Appointment = appointments::table.find(appointment_id).first(&mut conn)?;
    let status = current_status(&appointment)?;
    ensure_transition(status, next)?;

    diesel::update(appointments::table.find(appointment_id))
        .set((
            appointments::status.eq(next.as_str()),
            appointments::outcome.eq(outcome.filter(|o| !o.trim().is_empty())),
            appointments::outcome_notes.eq(notes.filter(|n| !n.trim().is_empty())),
            appointments::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    let updated: Appointment = appointments::table.find(appointment_id).first(&mut conn)?;
    Ok(respond::ok(updated.into()))
}

/// Validates the requested slot, writes the booked time, and queues the
/// confirmation email plus a calendar push. Shared by admin booking,
/// rescheduling, and the public booking page.
pub(crate) fn place_on_calendar(
    state: &AppState,
    conn: &mut PgConnection,
    appointment: &Appointment,
    scheduled_at: NaiveDateTime,
) -> AppResult<()> {
    let settings = load_settings(conn)?;
    let grid = grid_from(&settings);
    let (busy, blocked) = busy_intervals(conn, Some(appointment.id))?;

    check_slot(
        &grid,
        scheduled_at,
        appointment.duration_minutes,
        &busy,
        &blocked,
        Utc::now().naive_utc(),
    )
    .map_err(|rejection| AppError::bad_request(rejection.message()))?;

    let client: Client = clients::table
        .find(appointment.client_id)
        .first(conn)?;

    diesel::update(appointments::table.find(appointment.id))
        .set((
            appointments::status.eq(AppointmentStatus::Booked.as_str()),
            appointments::scheduled_at.eq(Some(scheduled_at)),
            appointments::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;

    enqueue_job(
        conn,
        JOB_SEND_EMAIL,
        json!({
            "to": client.email,
            "subject": format!("Your {} is confirmed", appointment.appointment_type),
            "body": format!(
                "Hi {},\n\nYour {} is booked for {} (UTC).\n",
                client.name,
                appointment.appointment_type,
                to_iso(scheduled_at)
            ),
        }),
        None,
    )?;
    enqueue_job(
        conn,
        JOB_SYNC_APPOINTMENT,
        json!({ "appointment_id": appointment.id, "action": "push" }),
        None,
    )?;

    Ok(())
}

pub(crate) fn grid_from(settings: &AppointmentSettings) -> SlotGrid {
    SlotGrid {
        workday_start_min: settings.workday_start_min,
        workday_end_min: settings.workday_end_min,
        buffer_minutes: settings.buffer_minutes,
        slot_granularity_minutes: settings.slot_granularity_minutes,
        booking_window_days: settings.booking_window_days,
    }
}

/// Booked appointment intervals plus blocked times, for overlap checks.
/// `exclude` drops the appointment being moved so it cannot conflict
/// with itself.
pub(crate) fn busy_intervals(
    conn: &mut PgConnection,
    exclude: Option<Uuid>,
) -> AppResult<(Vec<Interval>, Vec<Interval>)> {
    let mut query = appointments::table
        .filter(appointments::status.eq(AppointmentStatus::Booked.as_str()))
        .filter(appointments::scheduled_at.is_not_null())
        .into_boxed();
    if let Some(id) = exclude {
        query = query.filter(appointments::id.ne(id));
    }
    let booked: Vec<Appointment> = query.load(conn)?;

    let busy = booked
        .into_iter()
        .filter_map(|appointment| {
            appointment.scheduled_at.map(|start| {
                Interval::new(
                    start,
                    start + chrono::Duration::minutes(appointment.duration_minutes as i64),
                )
            })
        })
        .collect();

    let blocked_rows: Vec<crate::models::BlockedTime> = blocked_times::table.load(conn)?;
    let blocked = blocked_rows
        .into_iter()
        .map(|b| Interval::new(b.starts_at, b.ends_at))
        .collect();

    Ok((busy, blocked))
}

pub(crate) fn current_status(appointment: &Appointment) -> AppResult<AppointmentStatus> {
    AppointmentStatus::parse(&appointment.status)
        .ok_or_else(|| AppError::internal("appointment has an unknown status"))
}

pub(crate) fn ensure_transition(
    from: AppointmentStatus,
    to: AppointmentStatus,
) -> AppResult<()> {
    if from.is_terminal() {
        return Err(AppError::conflict(
            "appointment is in a terminal state and can no longer change",
        ));
    }
    if !from.can_transition(to) {
        return Err(AppError::conflict(format!(
            "appointment cannot move from {} to {}",
            from.as_str(),
            to.as_str()
        )));
    }
    Ok(())
}

fn ensure_active_type(settings: &AppointmentSettings, appointment_type: &str) -> AppResult<()> {
    if appointment_type.is_empty() {
        return Err(AppError::bad_request("appointment type must not be empty"));
    }
    let known = settings
        .active_types
        .as_array()
        .map(|types| {
            types
                .iter()
                .any(|t| t.as_str() == Some(appointment_type))
        })
        .unwrap_or(false);
    if !known {
        return Err(AppError::bad_request("unknown appointment type"));
    }
    Ok(())
}

fn availability_error(err: AvailabilityError) -> AppError {
    AppError::bad_request(err.to_string())
}
