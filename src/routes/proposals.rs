use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use diesel::{dsl::count_star, prelude::*};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    billing::{compute_totals, parse_line_items, validate_tax_rate},
    error::{AppError, AppResult},
    jobs::{enqueue_job, JOB_SEND_EMAIL},
    models::{Client, NewProposal, Proposal},
    schema::{clients, proposals},
    state::AppState,
    utils::respond::{self, Envelope, PageQuery, Pagination},
    utils::to_iso,
};

pub const PROPOSAL_DRAFT: &str = "DRAFT";
pub const PROPOSAL_SENT: &str = "SENT";
pub const PROPOSAL_ACCEPTED: &str = "ACCEPTED";
pub const PROPOSAL_DECLINED: &str = "DECLINED";
pub const PROPOSAL_ARCHIVED: &str = "ARCHIVED";

const PROPOSAL_STATUSES: &[&str] = &[
    PROPOSAL_DRAFT,
    PROPOSAL_SENT,
    PROPOSAL_ACCEPTED,
    PROPOSAL_DECLINED,
    PROPOSAL_ARCHIVED,
];

#[derive(Serialize)]
pub struct ProposalResponse {
    pub id: Uuid,
    pub client_id: Uuid,
    pub title: String,
    pub status: String,
    pub line_items: Value,
    pub tax_rate_bp: i32,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub notes: Option<String>,
    pub sent_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Proposal> for ProposalResponse {
    fn from(proposal: Proposal) -> Self {
        Self {
            id: proposal.id,
            client_id: proposal.client_id,
            title: proposal.title,
            status: proposal.status,
            line_items: proposal.line_items,
            tax_rate_bp: proposal.tax_rate_bp,
            subtotal_cents: proposal.subtotal_cents,
            tax_cents: proposal.tax_cents,
            total_cents: proposal.total_cents,
            notes: proposal.notes,
            sent_at: proposal.sent_at.map(to_iso),
            created_at: to_iso(proposal.created_at),
            updated_at: to_iso(proposal.updated_at),
        }
    }
}

#[derive(Deserialize)]
pub struct ProposalListQuery {
    pub status: Option<String>,
    pub client_id: Option<Uuid>,
    #[serde(flatten)]
    pub page: PageQuery,
}

#[derive(Deserialize)]
pub struct CreateProposalRequest {
    pub client_id: Uuid,
    pub title: String,
    pub line_items: Value,
    #[serde(default)]
    pub tax_rate_bp: i32,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateProposalRequest {
    pub title: Option<String>,
    pub line_items: Option<Value>,
    pub tax_rate_bp: Option<i32>,
    pub notes: Option<Option<String>>,
}

pub async fn list_proposals(
    State(state): State<AppState>,
    Query(params): Query<ProposalListQuery>,
) -> AppResult<Json<Envelope<Vec<ProposalResponse>>>> {
    let mut conn = state.db()?;

    let mut query = proposals::table.into_boxed();
    let mut count_query = proposals::table.into_boxed();

    if let Some(status) = params.status.as_deref() {
        if !PROPOSAL_STATUSES.contains(&status) {
            return Err(AppError::bad_request("unknown proposal status"));
        }
        query = query.filter(proposals::status.eq(status.to_string()));
        count_query = count_query.filter(proposals::status.eq(status.to_string()));
    }
    if let Some(client_id) = params.client_id {
        query = query.filter(proposals::client_id.eq(client_id));
        count_query = count_query.filter(proposals::client_id.eq(client_id));
    }

    let total: i64 = count_query.select(count_star()).first(&mut conn)?;
    let rows: Vec<Proposal> = query
        .order(proposals::created_at.desc())
        .offset(params.page.offset())
        .limit(params.page.per_page())
        .load(&mut conn)?;

    Ok(respond::paginated(
        rows.into_iter().map(ProposalResponse::from).collect(),
        Pagination {
            page: params.page.page(),
            per_page: params.page.per_page(),
            total,
        },
    ))
}

pub async fn create_proposal(
    State(state): State<AppState>,
    Json(payload): Json<CreateProposalRequest>,
) -> AppResult<Json<Envelope<ProposalResponse>>> {
    let title = payload.title.trim();
    if title.is_empty() {
        return Err(AppError::bad_request("title must not be empty"));
    }
    validate_tax_rate(payload.tax_rate_bp)?;
    let items = parse_line_items(&payload.line_items)?;
    let totals = compute_totals(&items, payload.tax_rate_bp)?;

    let mut conn = state.db()?;
    clients::table
        .find(payload.client_id)
        .first::<Client>(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    let new_proposal = NewProposal {
        id: Uuid::new_v4(),
        client_id: payload.client_id,
        title: title.to_string(),
        status: PROPOSAL_DRAFT.to_string(),
        line_items: serde_json::to_value(&items)?,
        tax_rate_bp: payload.tax_rate_bp,
        subtotal_cents: totals.subtotal_cents,
        tax_cents: totals.tax_cents,
        total_cents: totals.total_cents,
        notes: payload.notes.filter(|n| !n.trim().is_empty()),
    };

    diesel::insert_into(proposals::table)
        .values(&new_proposal)
        .execute(&mut conn)?;

    let proposal: Proposal = proposals::table.find(new_proposal.id).first(&mut conn)?;
    Ok(respond::ok(proposal.into()))
}

pub async fn get_proposal(
    State(state): State<AppState>,
    Path(proposal_id): Path<Uuid>,
) -> AppResult<Json<Envelope<ProposalResponse>>> {
    let mut conn = state.db()?;
    let proposal: Proposal = proposals::table.find(proposal_id).first(&mut conn)?;
    Ok(respond::ok(proposal.into()))
}

/// Drafts are the only editable proposals. Totals are always recomputed
/// server-side, never taken from the payload.
pub async fn update_proposal(
    State(state): State<AppState>,
    Path(proposal_id): Path<Uuid>,
    Json(payload): Json<UpdateProposalRequest>,
) -> AppResult<Json<Envelope<ProposalResponse>>> {
    let mut conn = state.db()?;
    let existing: Proposal = proposals::table.find(proposal_id).first(&mut conn)?;
    if existing.status != PROPOSAL_DRAFT {
        return Err(AppError::conflict("only draft proposals can be edited"));
    }

    let title = match payload.title {
        Some(ref candidate) => {
            let trimmed = candidate.trim();
            if trimmed.is_empty() {
                return Err(AppError::bad_request("title must not be empty"));
            }
            trimmed.to_string()
        }
        None => existing.title.clone(),
    };

    let tax_rate_bp = payload.tax_rate_bp.unwrap_or(existing.tax_rate_bp);
    validate_tax_rate(tax_rate_bp)?;

    let items_value = payload.line_items.unwrap_or(existing.line_items.clone());
    let items = parse_line_items(&items_value)?;
    let totals = compute_totals(&items, tax_rate_bp)?;

    let notes = match payload.notes {
        Some(value) => value.filter(|n| !n.trim().is_empty()),
        None => existing.notes.clone(),
    };

    diesel::update(proposals::table.find(proposal_id))
        .set((
            proposals::title.eq(title),
            proposals::line_items.eq(serde_json::to_value(&items)?),
            proposals::tax_rate_bp.eq(tax_rate_bp),
            proposals::subtotal_cents.eq(totals.subtotal_cents),
            proposals::tax_cents.eq(totals.tax_cents),
            proposals::total_cents.eq(totals.total_cents),
            proposals::notes.eq(notes),
            proposals::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    let updated: Proposal = proposals::table.find(proposal_id).first(&mut conn)?;
    Ok(respond::ok(updated.into()))
}

pub async fn send_proposal(
    State(state): State<AppState>,
    Path(proposal_id): Path<Uuid>,
) -> AppResult<Json<Envelope<ProposalResponse>>> {
    let mut conn = state.db()?;
    let proposal: Proposal = proposals::table.find(proposal_id).first(&mut conn)?;
    if proposal.status != PROPOSAL_DRAFT {
        return Err(AppError::conflict("only draft proposals can be sent"));
    }

    let client: Client = clients::table.find(proposal.client_id).first(&mut conn)?;

    let now = Utc::now().naive_utc();
    diesel::update(proposals::table.find(proposal_id))
        .set((
            proposals::status.eq(PROPOSAL_SENT),
            proposals::sent_at.eq(Some(now)),
            proposals::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

    enqueue_job(
        &mut conn,
        JOB_SEND_EMAIL,
        json!({
            "to": client.email,
            "subject": format!("Proposal: {}", proposal.title),
            "body": format!(
                "Hi {},\n\nYour proposal \"{}\" is ready. Total: ${:.2}.\n",
                client.name,
                proposal.title,
                proposal.total_cents as f64 / 100.0
            ),
        }),
        None,
    )?;

    let updated: Proposal = proposals::table.find(proposal_id).first(&mut conn)?;
    Ok(respond::ok(updated.into()))
}

pub async fn accept_proposal(
    State(state): State<AppState>,
    Path(proposal_id): Path<Uuid>,
) -> AppResult<Json<Envelope<ProposalResponse>>> {
    resolve_proposal(&state, proposal_id, PROPOSAL_ACCEPTED).await
}

pub async fn decline_proposal(
    State(state): State<AppState>,
    Path(proposal_id): Path<Uuid>,
) -> AppResult<Json<Envelope<ProposalResponse>>> {
    resolve_proposal(&state, proposal_id, PROPOSAL_DECLINED).await
}

async fn resolve_proposal(
    state: &AppState,
    proposal_id: Uuid,
    status: &str,
) -> AppResult<Json<Envelope<ProposalResponse>>> {
    let mut conn = state.db()?;
    let proposal: Proposal = proposals::table.find(proposal_id).first(&mut conn)?;
    if proposal.status != PROPOSAL_SENT {
        return Err(AppError::conflict(
            "only sent proposals can be accepted or declined",
        ));
    }

    diesel::update(proposals::table.find(proposal_id))
        .set((
            proposals::status.eq(status),
            proposals::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    let updated: Proposal = proposals::table.find(proposal_id).first(&mut conn)?;
    Ok(respond::ok(updated.into()))
}

pub async fn archive_proposal(
    State(state): State<AppState>,
    Path(proposal_id): Path<Uuid>,
) -> AppResult<Json<Envelope<ProposalResponse>>> {
    let mut conn = state.db()?;
    let proposal: Proposal = proposals::table.find(proposal_id).first(&mut conn)?;
    if proposal.status == PROPOSAL_ARCHIVED {
        return Err(AppError::conflict("proposal is already archived"));
    }

    diesel::update(proposals::table.find(proposal_id))
        .set((
            proposals::status.eq(PROPOSAL_ARCHIVED),
            proposals::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    let updated: Proposal = proposals::table.find(proposal_id).first(&mut conn)?;
    Ok(respond::ok(updated.into()))
}
