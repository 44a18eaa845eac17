use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use diesel::{dsl::count_star, prelude::*, result::DatabaseErrorKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Client, Inquiry, NewClient, NewInquiry},
    schema::{clients, inquiries},
    state::AppState,
    utils::respond::{self, Envelope, PageQuery, Pagination},
    utils::to_iso,
};

use super::clients::CLIENT_ACTIVE;

pub const INQUIRY_NEW: &str = "NEW";
pub const INQUIRY_CONTACTED: &str = "CONTACTED";
pub const INQUIRY_CONVERTED: &str = "CONVERTED";
pub const INQUIRY_CLOSED: &str = "CLOSED";

const INQUIRY_STATUSES: &[&str] = &[
    INQUIRY_NEW,
    INQUIRY_CONTACTED,
    INQUIRY_CONVERTED,
    INQUIRY_CLOSED,
];

#[derive(Serialize)]
pub struct InquiryResponse {
    pub id: Uuid,
    pub client_id: Option<Uuid>,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub message: String,
    pub source: Option<String>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Inquiry> for InquiryResponse {
    fn from(inquiry: Inquiry) -> Self {
        Self {
            id: inquiry.id,
            client_id: inquiry.client_id,
            name: inquiry.name,
            email: inquiry.email,
            phone: inquiry.phone,
            message: inquiry.message,
            source: inquiry.source,
            status: inquiry.status,
            created_at: to_iso(inquiry.created_at),
            updated_at: to_iso(inquiry.updated_at),
        }
    }
}

#[derive(Deserialize)]
pub struct InquiryListQuery {
    pub status: Option<String>,
    #[serde(flatten)]
    pub page: PageQuery,
}

#[derive(Deserialize)]
pub struct CreateInquiryRequest {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub message: String,
    pub source: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateInquiryRequest {
    pub status: Option<String>,
    pub message: Option<String>,
}

pub async fn list_inquiries(
    State(state): State<AppState>,
    Query(params): Query<InquiryListQuery>,
) -> AppResult<Json<Envelope<Vec<InquiryResponse>>>> {
    let mut conn = state.db()?;

    let mut query = inquiries::table.into_boxed();
    let mut count_query = inquiries::table.into_boxed();

    if let Some(status) = params.status.as_deref() {
        if !INQUIRY_STATUSES.contains(&status) {
            return Err(AppError::bad_request("unknown inquiry status"));
        }
        query = query.filter(inquiries::status.eq(status.to_string()));
        count_query = count_query.filter(inquiries::status.eq(status.to_string()));
    }

    let total: i64 = count_query.select(count_star()).first(&mut conn)?;
    let rows: Vec<Inquiry> = query
        .order(inquiries::created_at.desc())
        .offset(params.page.offset())
        .limit(params.page.per_page())
        .load(&mut conn)?;

    Ok(respond::paginated(
        rows.into_iter().map(InquiryResponse::from).collect(),
        Pagination {
            page: params.page.page(),
            per_page: params.page.per_page(),
            total,
        },
    ))
}

pub async fn create_inquiry(
    State(state): State<AppState>,
    Json(payload): Json<CreateInquiryRequest>,
) -> AppResult<Json<Envelope<InquiryResponse>>> {
    insert_inquiry(&state, payload).await
}

/// Unauthenticated endpoint backing the public contact form.
pub async fn create_public_inquiry(
    State(state): State<AppState>,
    Json(payload): Json<CreateInquiryRequest>,
) -> AppResult<Json<Envelope<InquiryResponse>>> {
    insert_inquiry(&state, payload).await
}

async fn insert_inquiry(
    state: &AppState,
    payload: CreateInquiryRequest,
) -> AppResult<Json<Envelope<InquiryResponse>>> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }
    let email = payload.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::bad_request("a valid email is required"));
    }
    if payload.message.trim().is_empty() {
        return Err(AppError::bad_request("message must not be empty"));
    }

    let new_inquiry = NewInquiry {
        id: Uuid::new_v4(),
        client_id: None,
        name: name.to_string(),
        email,
        phone: payload.phone.filter(|p| !p.trim().is_empty()),
        message: payload.message.trim().to_string(),
        source: payload.source.filter(|s| !s.trim().is_empty()),
        status: INQUIRY_NEW.to_string(),
    };

    let mut conn = state.db()?;
    diesel::insert_into(inquiries::table)
        .values(&new_inquiry)
        .execute(&mut conn)?;

    let inquiry: Inquiry = inquiries::table.find(new_inquiry.id).first(&mut conn)?;
    Ok(respond::ok(inquiry.into()))
}

pub async fn get_inquiry(
    State(state): State<AppState>,
    Path(inquiry_id): Path<Uuid>,
) -> AppResult<Json<Envelope<InquiryResponse>>> {
    let mut conn = state.db()?;
    let inquiry: Inquiry = inquiries::table.find(inquiry_id).first(&mut conn)?;
    Ok(respond::ok(inquiry.into()))
}

pub async fn update_inquiry(
    State(state): State<AppState>,
    Path(inquiry_id): Path<Uuid>,
    Json(payload): Json<UpdateInquiryRequest>,
) -> AppResult<Json<Envelope<InquiryResponse>>> {
    let mut conn = state.db()?;
    let existing: Inquiry = inquiries::table.find(inquiry_id).first(&mut conn)?;

    if let Some(ref status) = payload.status {
        if !INQUIRY_STATUSES.contains(&status.as_str()) {
            return Err(AppError::bad_request("unknown inquiry status"));
        }
        // CONVERTED is only reachable through the convert endpoint.
        if status == INQUIRY_CONVERTED && existing.status != INQUIRY_CONVERTED {
            return Err(AppError::bad_request(
                "use the convert endpoint to convert an inquiry",
            ));
        }
    }

    let now = Utc::now().naive_utc();
    diesel::update(inquiries::table.find(inquiry_id))
        .set((
            payload
                .status
                .as_deref()
                .map(|s| inquiries::status.eq(s.to_string())),
            payload
                .message
                .as_deref()
                .map(|m| inquiries::message.eq(m.to_string())),
            inquiries::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

    let updated: Inquiry = inquiries::table.find(inquiry_id).first(&mut conn)?;
    Ok(respond::ok(updated.into()))
}

#[derive(Serialize)]
pub struct ConvertInquiryResponse {
    pub inquiry: InquiryResponse,
    pub client_id: Uuid,
    pub client_created: bool,
}

/// Converts an inquiry into a client. When a client with the same email
/// already exists the inquiry is linked instead of creating a duplicate.
pub async fn convert_inquiry(
    State(state): State<AppState>,
    Path(inquiry_id): Path<Uuid>,
) -> AppResult<Json<Envelope<ConvertInquiryResponse>>> {
    let mut conn = state.db()?;
    let inquiry: Inquiry = inquiries::table.find(inquiry_id).first(&mut conn)?;

    if inquiry.status == INQUIRY_CONVERTED {
        return Err(AppError::conflict("inquiry is already converted"));
    }

    let existing_client: Option<Client> = clients::table
        .filter(clients::email.eq(&inquiry.email))
        .first(&mut conn)
        .optional()?;

    let (client_id, client_created) = match existing_client {
        Some(client) => (client.id, false),
        None => {
            let new_client = NewClient {
                id: Uuid::new_v4(),
                name: inquiry.name.clone(),
                email: inquiry.email.clone(),
                phone: inquiry.phone.clone(),
                notes: None,
                status: CLIENT_ACTIVE.to_string(),
            };
            match diesel::insert_into(clients::table)
                .values(&new_client)
                .execute(&mut conn)
            {
                Ok(_) => {}
                Err(diesel::result::Error::DatabaseError(
                    DatabaseErrorKind::UniqueViolation,
                    _,
                )) => {
                    return Err(AppError::bad_request(
                        "a client with this email already exists",
                    ));
                }
                Err(err) => return Err(AppError::from(err)),
            }
            (new_client.id, true)
        }
    };

    let now = Utc::now().naive_utc();
    diesel::update(inquiries::table.find(inquiry_id))
        .set((
            inquiries::client_id.eq(Some(client_id)),
            inquiries::status.eq(INQUIRY_CONVERTED),
            inquiries::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

    let updated: Inquiry = inquiries::table.find(inquiry_id).first(&mut conn)?;
    Ok(respond::ok(ConvertInquiryResponse {
        inquiry: updated.into(),
        client_id,
        client_created,
    }))
}

pub async fn delete_inquiry(
    State(state): State<AppState>,
    Path(inquiry_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    let deleted = diesel::delete(inquiries::table.find(inquiry_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}
