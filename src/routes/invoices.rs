use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{Datelike, NaiveDateTime, Utc};
use diesel::{
    dsl::count_star, prelude::*, result::DatabaseErrorKind, PgConnection,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    billing::{compute_totals, parse_line_items, validate_tax_rate},
    error::{AppError, AppResult},
    jobs::{enqueue_job, JOB_SEND_EMAIL},
    models::{Client, Invoice, NewInvoice, Proposal},
    schema::{clients, invoices, proposals},
    state::AppState,
    utils::respond::{self, Envelope, PageQuery, Pagination},
    utils::to_iso,
};

use super::proposals::PROPOSAL_ACCEPTED;

pub const INVOICE_DRAFT: &str = "DRAFT";
pub const INVOICE_SENT: &str = "SENT";
pub const INVOICE_PAID: &str = "PAID";
pub const INVOICE_VOID: &str = "VOID";

const INVOICE_STATUSES: &[&str] = &[INVOICE_DRAFT, INVOICE_SENT, INVOICE_PAID, INVOICE_VOID];

#[derive(Serialize)]
pub struct InvoiceResponse {
    pub id: Uuid,
    pub client_id: Uuid,
    pub proposal_id: Option<Uuid>,
    pub number: String,
    pub status: String,
    pub line_items: Value,
    pub tax_rate_bp: i32,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub due_at: Option<String>,
    pub sent_at: Option<String>,
    pub paid_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Invoice> for InvoiceResponse {
    fn from(invoice: Invoice) -> Self {
        Self {
            id: invoice.id,
            client_id: invoice.client_id,
            proposal_id: invoice.proposal_id,
            number: invoice.number,
            status: invoice.status,
            line_items: invoice.line_items,
            tax_rate_bp: invoice.tax_rate_bp,
            subtotal_cents: invoice.subtotal_cents,
            tax_cents: invoice.tax_cents,
            total_cents: invoice.total_cents,
            due_at: invoice.due_at.map(to_iso),
            sent_at: invoice.sent_at.map(to_iso),
            paid_at: invoice.paid_at.map(to_iso),
            created_at: to_iso(invoice.created_at),
            updated_at: to_iso(invoice.updated_at),
        }
    }
}

#[derive(Deserialize)]
pub struct InvoiceListQuery {
    pub status: Option<String>,
    pub client_id: Option<Uuid>,
    #[serde(flatten)]
    pub page: PageQuery,
}

/// Either `proposal_id` (inherits client, items, and tax rate from an
/// accepted proposal) or `client_id` plus `line_items`.
#[derive(Deserialize)]
pub struct CreateInvoiceRequest {
    pub proposal_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
    pub line_items: Option<Value>,
    pub tax_rate_bp: Option<i32>,
    pub due_at: Option<NaiveDateTime>,
}

#[derive(Deserialize)]
pub struct UpdateInvoiceRequest {
    pub line_items: Option<Value>,
    pub tax_rate_bp: Option<i32>,
    pub due_at: Option<Option<NaiveDateTime>>,
}

pub async fn list_invoices(
    State(state): State<AppState>,
    Query(params): Query<InvoiceListQuery>,
) -> AppResult<Json<Envelope<Vec<InvoiceResponse>>>> {
    let mut conn = state.db()?;

    let mut query = invoices::table.into_boxed();
    let mut count_query = invoices::table.into_boxed();

    if let Some(status) = params.status.as_deref() {
        if !INVOICE_STATUSES.contains(&status) {
            return Err(AppError::bad_request("unknown invoice status"));
        }
        query = query.filter(invoices::status.eq(status.to_string()));
        count_query = count_query.filter(invoices::status.eq(status.to_string()));
    }
    if let Some(client_id) = params.client_id {
        query = query.filter(invoices::client_id.eq(client_id));
        count_query = count_query.filter(invoices::client_id.eq(client_id));
    }

    let total: i64 = count_query.select(count_star()).first(&mut conn)?;
    let rows: Vec<Invoice> = query
        .order(invoices::created_at.desc())
        .offset(params.page.offset())
        .limit(params.page.per_page())
        .load(&mut conn)?;

    Ok(respond::paginated(
        rows.into_iter().map(InvoiceResponse::from).collect(),
        Pagination {
            page: params.page.page(),
            per_page: params.page.per_page(),
            total,
        },
    ))
}

pub async fn create_invoice(
    State(state): State<AppState>,
    Json(payload): Json<CreateInvoiceRequest>,
) -> AppResult<Json<Envelope<InvoiceResponse>>> {
    let mut conn = state.db()?;

    let (client_id, proposal_id, items_value, tax_rate_bp) = match payload.proposal_id {
        Some(proposal_id) => {
            let proposal: Proposal = proposals::table
                .find(proposal_id)
                .first(&mut conn)
                .optional()?
                .ok_or_else(AppError::not_found)?;
            if proposal.status != PROPOSAL_ACCEPTED {
                return Err(AppError::conflict(
                    "invoices can only be raised from accepted proposals",
                ));
            }
            let already_invoiced: i64 = invoices::table
                .filter(invoices::proposal_id.eq(proposal_id))
                .filter(invoices::status.ne(INVOICE_VOID))
                .select(count_star())
                .first(&mut conn)?;
            if already_invoiced > 0 {
                return Err(AppError::conflict("proposal is already invoiced"));
            }
            (
                proposal.client_id,
                Some(proposal_id),
                proposal.line_items,
                payload.tax_rate_bp.unwrap_or(proposal.tax_rate_bp),
            )
        }
        None => {
            let client_id = payload
                .client_id
                .ok_or_else(|| AppError::bad_request("client_id or proposal_id is required"))?;
            let items = payload
                .line_items
                .ok_or_else(|| AppError::bad_request("line_items are required"))?;
            (client_id, None, items, payload.tax_rate_bp.unwrap_or(0))
        }
    };

    validate_tax_rate(tax_rate_bp)?;
    let items = parse_line_items(&items_value)?;
    let totals = compute_totals(&items, tax_rate_bp)?;

    clients::table
        .find(client_id)
        .first::<Client>(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    let items_json = serde_json::to_value(&items)?;
    let invoice = insert_with_generated_number(&mut conn, |number| NewInvoice {
        id: Uuid::new_v4(),
        client_id,
        proposal_id,
        number,
        status: INVOICE_DRAFT.to_string(),
        line_items: items_json.clone(),
        tax_rate_bp,
        subtotal_cents: totals.subtotal_cents,
        tax_cents: totals.tax_cents,
        total_cents: totals.total_cents,
        due_at: payload.due_at,
    })?;

    Ok(respond::ok(invoice.into()))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> AppResult<Json<Envelope<InvoiceResponse>>> {
    let mut conn = state.db()?;
    let invoice: Invoice = invoices::table.find(invoice_id).first(&mut conn)?;
    Ok(respond::ok(invoice.into()))
}

pub async fn update_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
    Json(payload): Json<UpdateInvoiceRequest>,
) -> AppResult<Json<Envelope<InvoiceResponse>>> {
    let mut conn = state.db()?;
    let existing: Invoice = invoices::table.find(invoice_id).first(&mut conn)?;
    if existing.status != INVOICE_DRAFT {
        return Err(AppError::conflict("only draft invoices can be edited"));
    }

    let tax_rate_bp = payload.tax_rate_bp.unwrap_or(existing.tax_rate_bp);
    validate_tax_rate(tax_rate_bp)?;

    let items_value = payload.line_items.unwrap_or(existing.line_items.clone());
    let items = parse_line_items(&items_value)?;
    let totals = compute_totals(&items, tax_rate_bp)?;

    let due_at = match payload.due_at {
        Some(value) => value,
        None => existing.due_at,
    };

    diesel::update(invoices::table.find(invoice_id))
        .set((
            invoices::line_items.eq(serde_json::to_value(&items)?),
            invoices::tax_rate_bp.eq(tax_rate_bp),
            invoices::subtotal_cents.eq(totals.subtotal_cents),
            invoices::tax_cents.eq(totals.tax_cents),
            invoices::total_cents.eq(totals.total_cents),
            invoices::due_at.eq(due_at),
            invoices::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    let updated: Invoice = invoices::table.find(invoice_id).first(&mut conn)?;
    Ok(respond::ok(updated.into()))
}

pub async fn send_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> AppResult<Json<Envelope<InvoiceResponse>>> {
    let mut conn = state.db()?;
    let invoice: Invoice = invoices::table.find(invoice_id).first(&mut conn)?;
    if invoice.status != INVOICE_DRAFT {
        return Err(AppError::conflict("only draft invoices can be sent"));
    }

    let client: Client = clients::table.find(invoice.client_id).first(&mut conn)?;

    let now = Utc::now().naive_utc();
    diesel::update(invoices::table.find(invoice_id))
        .set((
            invoices::status.eq(INVOICE_SENT),
            invoices::sent_at.eq(Some(now)),
            invoices::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

    enqueue_job(
        &mut conn,
        JOB_SEND_EMAIL,
        json!({
            "to": client.email,
            "subject": format!("Invoice {}", invoice.number),
            "body": format!(
                "Hi {},\n\nInvoice {} for ${:.2} is ready.\n",
                client.name,
                invoice.number,
                invoice.total_cents as f64 / 100.0
            ),
        }),
        None,
    )?;

    let updated: Invoice = invoices::table.find(invoice_id).first(&mut conn)?;
    Ok(respond::ok(updated.into()))
}

pub async fn mark_invoice_paid(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> AppResult<Json<Envelope<InvoiceResponse>>> {
    let mut conn = state.db()?;
    let invoice: Invoice = invoices::table.find(invoice_id).first(&mut conn)?;
    if invoice.status != INVOICE_SENT {
        return Err(AppError::conflict("only sent invoices can be marked paid"));
    }

    let now = Utc::now().naive_utc();
    diesel::update(invoices::table.find(invoice_id))
        .set((
            invoices::status.eq(INVOICE_PAID),
            invoices::paid_at.eq(Some(now)),
            invoices::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

    let updated: Invoice = invoices::table.find(invoice_id).first(&mut conn)?;
    Ok(respond::ok(updated.into()))
}

pub async fn void_invoice(
    State(state): State<AppState>,
    Path(invoice_id): Path<Uuid>,
) -> AppResult<Json<Envelope<InvoiceResponse>>> {
    let mut conn = state.db()?;
    let invoice: Invoice = invoices::table.find(invoice_id).first(&mut conn)?;
    if invoice.status == INVOICE_PAID || invoice.status == INVOICE_VOID {
        return Err(AppError::conflict(
            "paid or voided invoices can no longer be voided",
        ));
    }

    diesel::update(invoices::table.find(invoice_id))
        .set((
            invoices::status.eq(INVOICE_VOID),
            invoices::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    let updated: Invoice = invoices::table.find(invoice_id).first(&mut conn)?;
    Ok(respond::ok(updated.into()))
}

/// Invoice numbers are `INV-<year>-<seq>` and unique. The sequence is
/// derived from the current row count, so concurrent inserts can collide
/// on the unique index; those retry with the next number.
fn insert_with_generated_number(
    conn: &mut PgConnection,
    build: impl Fn(String) -> NewInvoice,
) -> AppResult<Invoice> {
    let year = Utc::now().year();
    let prefix = format!("INV-{year}-");
    let existing: i64 = invoices::table
        .filter(invoices::number.like(format!("{prefix}%")))
        .select(count_star())
        .first(conn)?;

    for attempt in 0..3 {
        let number = format!("{prefix}{:04}", existing + 1 + attempt);
        let new_invoice = build(number);
        match diesel::insert_into(invoices::table)
            .values(&new_invoice)
            .execute(conn)
        {
            Ok(_) => {
                let invoice = invoices::table.find(new_invoice.id).first(conn)?;
                return Ok(invoice);
            }
            Err(diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                continue;
            }
            Err(err) => return Err(AppError::from(err)),
        }
    }

    Err(AppError::conflict(
        "could not allocate a unique invoice number, try again",
    ))
}
