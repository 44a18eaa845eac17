use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use diesel::{dsl::count_star, prelude::*, result::DatabaseErrorKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Client, NewClient},
    schema::clients,
    state::AppState,
    utils::respond::{self, Envelope, PageQuery, Pagination},
    utils::to_iso,
};

pub const CLIENT_ACTIVE: &str = "ACTIVE";
pub const CLIENT_ARCHIVED: &str = "ARCHIVED";

#[derive(Serialize)]
pub struct ClientResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub notes: Option<String>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Client> for ClientResponse {
    fn from(client: Client) -> Self {
        Self {
            id: client.id,
            name: client.name,
            email: client.email,
            phone: client.phone,
            notes: client.notes,
            status: client.status,
            created_at: to_iso(client.created_at),
            updated_at: to_iso(client.updated_at),
        }
    }
}

#[derive(Deserialize)]
pub struct ClientListQuery {
    #[serde(default)]
    pub include_archived: bool,
    pub q: Option<String>,
    #[serde(flatten)]
    pub page: PageQuery,
}

#[derive(Deserialize)]
pub struct CreateClientRequest {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateClientRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<Option<String>>,
    pub notes: Option<Option<String>>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = clients)]
struct ClientChangeset<'a> {
    name: Option<&'a str>,
    email: Option<&'a str>,
    phone: Option<Option<&'a str>>,
    notes: Option<Option<&'a str>>,
}

pub async fn list_clients(
    State(state): State<AppState>,
    Query(params): Query<ClientListQuery>,
) -> AppResult<Json<Envelope<Vec<ClientResponse>>>> {
    let mut conn = state.db()?;

    let mut query = clients::table.into_boxed();
    let mut count_query = clients::table.into_boxed();

    if !params.include_archived {
        query = query.filter(clients::status.ne(CLIENT_ARCHIVED));
        count_query = count_query.filter(clients::status.ne(CLIENT_ARCHIVED));
    }

    if let Some(needle) = params.q.as_ref().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        let pattern = format!("%{needle}%");
        query = query.filter(
            clients::name
                .ilike(pattern.clone())
                .or(clients::email.ilike(pattern.clone())),
        );
        count_query = count_query.filter(
            clients::name
                .ilike(pattern.clone())
                .or(clients::email.ilike(pattern)),
        );
    }

    let total: i64 = count_query.select(count_star()).first(&mut conn)?;
    let rows: Vec<Client> = query
        .order(clients::name.asc())
        .offset(params.page.offset())
        .limit(params.page.per_page())
        .load(&mut conn)?;

    Ok(respond::paginated(
        rows.into_iter().map(ClientResponse::from).collect(),
        Pagination {
            page: params.page.page(),
            per_page: params.page.per_page(),
            total,
        },
    ))
}

pub async fn create_client(
    State(state): State<AppState>,
    Json(payload): Json<CreateClientRequest>,
) -> AppResult<Json<Envelope<ClientResponse>>> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }
    let email = normalize_email(&payload.email)?;

    let new_client = NewClient {
        id: Uuid::new_v4(),
        name: name.to_string(),
        email,
        phone: payload.phone.filter(|p| !p.trim().is_empty()),
        notes: payload.notes,
        status: CLIENT_ACTIVE.to_string(),
    };

    let mut conn = state.db()?;
    match diesel::insert_into(clients::table)
        .values(&new_client)
        .execute(&mut conn)
    {
        Ok(_) => {}
        Err(diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            return Err(AppError::bad_request(
                "a client with this email already exists",
            ));
        }
        Err(err) => return Err(AppError::from(err)),
    }

    let client: Client = clients::table.find(new_client.id).first(&mut conn)?;
    Ok(respond::ok(client.into()))
}

pub async fn get_client(
    State(state): State<AppState>,
    Path(client_id): Path<Uuid>,
) -> AppResult<Json<Envelope<ClientResponse>>> {
    let mut conn = state.db()?;
    let client: Client = clients::table.find(client_id).first(&mut conn)?;
    Ok(respond::ok(client.into()))
}

pub async fn update_client(
    State(state): State<AppState>,
    Path(client_id): Path<Uuid>,
    Json(payload): Json<UpdateClientRequest>,
) -> AppResult<Json<Envelope<ClientResponse>>> {
    let mut conn = state.db()?;
    let existing: Client = clients::table.find(client_id).first(&mut conn)?;

    let mut new_name: Option<String> = None;
    if let Some(ref candidate) = payload.name {
        let trimmed = candidate.trim();
        if trimmed.is_empty() {
            return Err(AppError::bad_request("name must not be empty"));
        }
        if trimmed != existing.name {
            new_name = Some(trimmed.to_string());
        }
    }

    let mut new_email: Option<String> = None;
    if let Some(ref candidate) = payload.email {
        let normalized = normalize_email(candidate)?;
        if normalized != existing.email {
            let duplicate = clients::table
                .filter(clients::email.eq(&normalized))
                .filter(clients::id.ne(client_id))
                .first::<Client>(&mut conn)
                .optional()?;
            if duplicate.is_some() {
                return Err(AppError::bad_request(
                    "a client with this email already exists",
                ));
            }
            new_email = Some(normalized);
        }
    }

    let phone_change = payload
        .phone
        .map(|value| value.filter(|p| !p.trim().is_empty()));
    let notes_change = payload.notes;

    if new_name.is_none() && new_email.is_none() && phone_change.is_none() && notes_change.is_none()
    {
        return Ok(respond::ok(existing.into()));
    }

    let changeset = ClientChangeset {
        name: new_name.as_deref(),
        email: new_email.as_deref(),
        phone: phone_change
            .as_ref()
            .map(|opt| opt.as_ref().map(|value| value.as_str())),
        notes: notes_change
            .as_ref()
            .map(|opt| opt.as_ref().map(|value| value.as_str())),
    };

    let now = Utc::now().naive_utc();
    diesel::update(clients::table.find(client_id))
        .set((&changeset, clients::updated_at.eq(now)))
        .execute(&mut conn)?;

    let updated: Client = clients::table.find(client_id).first(&mut conn)?;
    Ok(respond::ok(updated.into()))
}

/// Soft delete: the record stays for history but drops out of default
/// listings.
pub async fn archive_client(
    State(state): State<AppState>,
    Path(client_id): Path<Uuid>,
) -> AppResult<Json<Envelope<ClientResponse>>> {
    set_client_status(&state, client_id, CLIENT_ARCHIVED).await
}

pub async fn restore_client(
    State(state): State<AppState>,
    Path(client_id): Path<Uuid>,
) -> AppResult<Json<Envelope<ClientResponse>>> {
    set_client_status(&state, client_id, CLIENT_ACTIVE).await
}

async fn set_client_status(
    state: &AppState,
    client_id: Uuid,
    status: &str,
) -> AppResult<Json<Envelope<ClientResponse>>> {
    let mut conn = state.db()?;
    let updated = diesel::update(clients::table.find(client_id))
        .set((
            clients::status.eq(status),
            clients::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;
    if updated == 0 {
        return Err(AppError::not_found());
    }

    let client: Client = clients::table.find(client_id).first(&mut conn)?;
    Ok(respond::ok(client.into()))
}

fn normalize_email(raw: &str) -> AppResult<String> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::bad_request("a valid email is required"));
    }
    Ok(email)
}
