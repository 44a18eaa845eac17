use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use diesel::{dsl::count_star, prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::error;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    jobs::{enqueue_job, JOB_SEND_EMAIL},
    models::{
        Client, Envelope as EnvelopeRow, EnvelopeAuditLog, EnvelopeDocument, NewEnvelope,
        NewEnvelopeAuditLog, NewEnvelopeDocument, NewSigner, Signer,
    },
    schema::{clients, envelope_audit_logs, envelope_documents, envelopes, signers},
    signing::{
        generate_magic_token, hash_token, ENVELOPE_COMPLETED, ENVELOPE_DRAFT, ENVELOPE_SENT,
        ENVELOPE_VOIDED, SIGNER_PENDING, WORKFLOW_PARALLEL, WORKFLOW_SEQUENTIAL,
    },
    state::AppState,
    utils::respond::{self, Envelope, PageQuery, Pagination},
    utils::to_iso,
};

const ENVELOPE_STATUSES: &[&str] = &[
    ENVELOPE_DRAFT,
    ENVELOPE_SENT,
    ENVELOPE_COMPLETED,
    crate::signing::ENVELOPE_DECLINED,
    ENVELOPE_VOIDED,
];

#[derive(Serialize)]
pub struct EnvelopeResponse {
    pub id: Uuid,
    pub client_id: Option<Uuid>,
    pub title: String,
    pub message: Option<String>,
    pub workflow: String,
    pub status: String,
    pub sent_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<EnvelopeRow> for EnvelopeResponse {
    fn from(envelope: EnvelopeRow) -> Self {
        Self {
            id: envelope.id,
            client_id: envelope.client_id,
            title: envelope.title,
            message: envelope.message,
            workflow: envelope.workflow,
            status: envelope.status,
            sent_at: envelope.sent_at.map(to_iso),
            created_at: to_iso(envelope.created_at),
            updated_at: to_iso(envelope.updated_at),
        }
    }
}

#[derive(Serialize)]
pub struct SignerResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: String,
    pub sequence_number: i32,
    pub status: String,
    pub signed_at: Option<String>,
    pub declined_at: Option<String>,
    pub decline_reason: Option<String>,
}

impl From<Signer> for SignerResponse {
    fn from(signer: Signer) -> Self {
        Self {
            id: signer.id,
            name: signer.name,
            email: signer.email,
            role: signer.role,
            sequence_number: signer.sequence_number,
            status: signer.status,
            signed_at: signer.signed_at.map(to_iso),
            declined_at: signer.declined_at.map(to_iso),
            decline_reason: signer.decline_reason,
        }
    }
}

#[derive(Serialize)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub title: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub created_at: String,
}

impl From<EnvelopeDocument> for DocumentResponse {
    fn from(document: EnvelopeDocument) -> Self {
        Self {
            id: document.id,
            title: document.title,
            content_type: document.content_type,
            size_bytes: document.size_bytes,
            created_at: to_iso(document.created_at),
        }
    }
}

#[derive(Serialize)]
pub struct EnvelopeDetailResponse {
    #[serde(flatten)]
    pub envelope: EnvelopeResponse,
    pub documents: Vec<DocumentResponse>,
    pub signers: Vec<SignerResponse>,
}

#[derive(Serialize)]
pub struct AuditLogResponse {
    pub id: Uuid,
    pub signer_id: Option<Uuid>,
    pub event: String,
    pub detail: Value,
    pub created_at: String,
}

impl From<EnvelopeAuditLog> for AuditLogResponse {
    fn from(log: EnvelopeAuditLog) -> Self {
        Self {
            id: log.id,
            signer_id: log.signer_id,
            event: log.event,
            detail: log.detail,
            created_at: to_iso(log.created_at),
        }
    }
}

#[derive(Deserialize)]
pub struct EnvelopeListQuery {
    pub status: Option<String>,
    pub client_id: Option<Uuid>,
    #[serde(flatten)]
    pub page: PageQuery,
}

#[derive(Deserialize)]
pub struct CreateEnvelopeRequest {
    pub title: String,
    pub message: Option<String>,
    pub workflow: Option<String>,
    pub client_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct UpdateEnvelopeRequest {
    pub title: Option<String>,
    pub message: Option<Option<String>>,
    pub workflow: Option<String>,
}

#[derive(Deserialize)]
pub struct AddSignerRequest {
    pub name: String,
    pub email: String,
    pub role: Option<String>,
}

pub async fn list_envelopes(
    State(state): State<AppState>,
    Query(params): Query<EnvelopeListQuery>,
) -> AppResult<Json<Envelope<Vec<EnvelopeResponse>>>> {
    let mut conn = state.db()?;

    let mut query = envelopes::table.into_boxed();
    let mut count_query = envelopes::table.into_boxed();

    if let Some(status) = params.status.as_deref() {
        if !ENVELOPE_STATUSES.contains(&status) {
            return Err(AppError::bad_request("unknown envelope status"));
        }
        query = query.filter(envelopes::status.eq(status.to_string()));
        count_query = count_query.filter(envelopes::status.eq(status.to_string()));
    }
    if let Some(client_id) = params.client_id {
        query = query.filter(envelopes::client_id.eq(client_id));
        count_query = count_query.filter(envelopes::client_id.eq(client_id));
    }

    let total: i64 = count_query.select(count_star()).first(&mut conn)?;
    let rows: Vec<EnvelopeRow> = query
        .order(envelopes::created_at.desc())
        .offset(params.page.offset())
        .limit(params.page.per_page())
        .load(&mut conn)?;

    Ok(respond::paginated(
        rows.into_iter().map(EnvelopeResponse::from).collect(),
        Pagination {
            page: params.page.page(),
            per_page: params.page.per_page(),
            total,
        },
    ))
}

pub async fn create_envelope(
    State(state): State<AppState>,
    Json(payload): Json<CreateEnvelopeRequest>,
) -> AppResult<Json<Envelope<EnvelopeResponse>>> {
    let title = payload.title.trim();
    if title.is_empty() {
        return Err(AppError::bad_request("title must not be empty"));
    }
    let workflow = validate_workflow(payload.workflow.as_deref())?;

    let mut conn = state.db()?;
    if let Some(client_id) = payload.client_id {
        clients::table
            .find(client_id)
            .first::<Client>(&mut conn)
            .optional()?
            .ok_or_else(AppError::not_found)?;
    }

    let new_envelope = NewEnvelope {
        id: Uuid::new_v4(),
        client_id: payload.client_id,
        title: title.to_string(),
        message: payload.message.filter(|m| !m.trim().is_empty()),
        workflow: workflow.to_string(),
        status: ENVELOPE_DRAFT.to_string(),
    };

    diesel::insert_into(envelopes::table)
        .values(&new_envelope)
        .execute(&mut conn)?;

    let envelope: EnvelopeRow = envelopes::table.find(new_envelope.id).first(&mut conn)?;
    Ok(respond::ok(envelope.into()))
}

pub async fn get_envelope(
    State(state): State<AppState>,
    Path(envelope_id): Path<Uuid>,
) -> AppResult<Json<Envelope<EnvelopeDetailResponse>>> {
    let mut conn = state.db()?;
    let envelope: EnvelopeRow = envelopes::table.find(envelope_id).first(&mut conn)?;

    let documents: Vec<EnvelopeDocument> = envelope_documents::table
        .filter(envelope_documents::envelope_id.eq(envelope_id))
        .order(envelope_documents::created_at.asc())
        .load(&mut conn)?;
    let signer_rows: Vec<Signer> = signers::table
        .filter(signers::envelope_id.eq(envelope_id))
        .order(signers::sequence_number.asc())
        .load(&mut conn)?;

    Ok(respond::ok(EnvelopeDetailResponse {
        envelope: envelope.into(),
        documents: documents.into_iter().map(DocumentResponse::from).collect(),
        signers: signer_rows.into_iter().map(SignerResponse::from).collect(),
    }))
}

pub async fn update_envelope(
    State(state): State<AppState>,
    Path(envelope_id): Path<Uuid>,
    Json(payload): Json<UpdateEnvelopeRequest>,
) -> AppResult<Json<Envelope<EnvelopeResponse>>> {
    let mut conn = state.db()?;
    let existing: EnvelopeRow = envelopes::table.find(envelope_id).first(&mut conn)?;
    if existing.status != ENVELOPE_DRAFT {
        return Err(AppError::conflict("only draft envelopes can be edited"));
    }

    let mut new_title: Option<String> = None;
    if let Some(ref candidate) = payload.title {
        let trimmed = candidate.trim();
        if trimmed.is_empty() {
            return Err(AppError::bad_request("title must not be empty"));
        }
        new_title = Some(trimmed.to_string());
    }

    let new_workflow = match payload.workflow.as_deref() {
        Some(candidate) => Some(validate_workflow(Some(candidate))?.to_string()),
        None => None,
    };

    let message_change = payload
        .message
        .map(|value| value.filter(|m| !m.trim().is_empty()));

    if new_title.is_none() && new_workflow.is_none() && message_change.is_none() {
        return Ok(respond::ok(existing.into()));
    }

    diesel::update(envelopes::table.find(envelope_id))
        .set((
            new_title.map(|t| envelopes::title.eq(t)),
            new_workflow.map(|w| envelopes::workflow.eq(w)),
            message_change.map(|m| envelopes::message.eq(m)),
            envelopes::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    let updated: EnvelopeRow = envelopes::table.find(envelope_id).first(&mut conn)?;
    Ok(respond::ok(updated.into()))
}

pub async fn upload_document(
    State(state): State<AppState>,
    Path(envelope_id): Path<Uuid>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<Envelope<DocumentResponse>>)> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut original_name: Option<String> = None;
    let mut content_type: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        let msg = format!("invalid multipart data: {err}");
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(msg)
    })? {
        let name = field.name().map(|n| n.to_string());
        if name.as_deref() == Some("file") {
            original_name = field.file_name().map(|n| n.to_string());
            content_type = field.content_type().map(|mime| mime.to_string());
            let data = field.bytes().await.map_err(|err| {
                let msg = format!("failed to read file bytes: {err}");
                error!(error = %err, "failed to read file bytes");
                AppError::bad_request(msg)
            })?;
            file_bytes = Some(data.to_vec());
        }
    }

    let file_bytes = file_bytes.ok_or_else(|| AppError::bad_request("file field is required"))?;
    if file_bytes.is_empty() {
        return Err(AppError::bad_request("file field must not be empty"));
    }
    let title = original_name.ok_or_else(|| AppError::bad_request("filename is required"))?;
    let content_type = content_type.unwrap_or_else(|| {
        mime_guess::from_path(&title)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    });

    let mut conn = state.db()?;
    let envelope: EnvelopeRow = envelopes::table
        .find(envelope_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;
    if envelope.status != ENVELOPE_DRAFT {
        return Err(AppError::conflict(
            "documents can only be added to draft envelopes",
        ));
    }

    let document_id = Uuid::new_v4();
    let storage_key = format!("envelopes/{envelope_id}/documents/{document_id}");
    let size_bytes = file_bytes.len() as i64;

    state
        .storage
        .put_object(
            &storage_key,
            file_bytes,
            Some(content_type.clone()),
            None,
        )
        .await
        .map_err(|err| {
            error!(error = %err, key = %storage_key, "failed to store envelope document");
            AppError::internal(format!("failed to store document: {err}"))
        })?;

    let new_document = NewEnvelopeDocument {
        id: document_id,
        envelope_id,
        title,
        storage_key,
        content_type,
        size_bytes,
    };

    diesel::insert_into(envelope_documents::table)
        .values(&new_document)
        .execute(&mut conn)?;

    let document: EnvelopeDocument = envelope_documents::table
        .find(document_id)
        .first(&mut conn)?;
    Ok((StatusCode::CREATED, respond::ok(document.into())))
}

pub async fn add_signer(
    State(state): State<AppState>,
    Path(envelope_id): Path<Uuid>,
    Json(payload): Json<AddSignerRequest>,
) -> AppResult<Json<Envelope<SignerResponse>>> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }
    let email = payload.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::bad_request("a valid email is required"));
    }

    let mut conn = state.db()?;
    let envelope: EnvelopeRow = envelopes::table
        .find(envelope_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;
    if envelope.status != ENVELOPE_DRAFT {
        return Err(AppError::conflict(
            "signers can only be added to draft envelopes",
        ));
    }

    let next_sequence: i32 = signers::table
        .filter(signers::envelope_id.eq(envelope_id))
        .select(diesel::dsl::max(signers::sequence_number))
        .first::<Option<i32>>(&mut conn)?
        .unwrap_or(0)
        + 1;

    let new_signer = NewSigner {
        id: Uuid::new_v4(),
        envelope_id,
        name: name.to_string(),
        email,
        role: payload
            .role
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| "signer".to_string()),
        sequence_number: next_sequence,
        status: SIGNER_PENDING.to_string(),
    };

    diesel::insert_into(signers::table)
        .values(&new_signer)
        .execute(&mut conn)?;

    let signer: Signer = signers::table.find(new_signer.id).first(&mut conn)?;
    Ok(respond::ok(signer.into()))
}

pub async fn remove_signer(
    State(state): State<AppState>,
    Path((envelope_id, signer_id)): Path<(Uuid, Uuid)>,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    let envelope: EnvelopeRow = envelopes::table
        .find(envelope_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;
    if envelope.status != ENVELOPE_DRAFT {
        return Err(AppError::conflict(
            "signers cannot be removed once the envelope is sent",
        ));
    }

    let deleted = diesel::delete(
        signers::table
            .find(signer_id)
            .filter(signers::envelope_id.eq(envelope_id)),
    )
    .execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Locks the envelope, mints a magic link per signer and starts the
/// signing workflow. Sequential envelopes only notify the first signer;
/// the next invitation goes out as each signer finishes.
pub async fn send_envelope(
    State(state): State<AppState>,
    Path(envelope_id): Path<Uuid>,
) -> AppResult<Json<Envelope<EnvelopeResponse>>> {
    let mut conn = state.db()?;
    let envelope: EnvelopeRow = envelopes::table.find(envelope_id).first(&mut conn)?;
    if envelope.status != ENVELOPE_DRAFT {
        return Err(AppError::conflict("only draft envelopes can be sent"));
    }

    let document_count: i64 = envelope_documents::table
        .filter(envelope_documents::envelope_id.eq(envelope_id))
        .select(count_star())
        .first(&mut conn)?;
    if document_count == 0 {
        return Err(AppError::bad_request(
            "envelope needs at least one document before sending",
        ));
    }

    let signer_rows: Vec<Signer> = signers::table
        .filter(signers::envelope_id.eq(envelope_id))
        .order(signers::sequence_number.asc())
        .load(&mut conn)?;
    if signer_rows.is_empty() {
        return Err(AppError::bad_request(
            "envelope needs at least one signer before sending",
        ));
    }

    let now = Utc::now().naive_utc();
    let notify_all = envelope.workflow == WORKFLOW_PARALLEL;

    for (index, signer) in signer_rows.iter().enumerate() {
        let token = generate_magic_token();
        diesel::update(signers::table.find(signer.id))
            .set((
                signers::magic_token_hash.eq(Some(hash_token(&token))),
                signers::updated_at.eq(now),
            ))
            .execute(&mut conn)?;

        if notify_all || index == 0 {
            queue_signer_invite(&mut conn, &state, &envelope, signer, &token)?;
        }
    }

    diesel::update(envelopes::table.find(envelope_id))
        .set((
            envelopes::status.eq(ENVELOPE_SENT),
            envelopes::sent_at.eq(Some(now)),
            envelopes::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

    record_audit(
        &mut conn,
        envelope_id,
        None,
        "envelope.sent",
        json!({ "signers": signer_rows.len(), "workflow": envelope.workflow }),
    )?;

    let updated: EnvelopeRow = envelopes::table.find(envelope_id).first(&mut conn)?;
    Ok(respond::ok(updated.into()))
}

pub async fn void_envelope(
    State(state): State<AppState>,
    Path(envelope_id): Path<Uuid>,
) -> AppResult<Json<Envelope<EnvelopeResponse>>> {
    let mut conn = state.db()?;
    let envelope: EnvelopeRow = envelopes::table.find(envelope_id).first(&mut conn)?;
    if !matches!(envelope.status.as_str(), ENVELOPE_DRAFT | ENVELOPE_SENT) {
        return Err(AppError::conflict(
            "only draft or sent envelopes can be voided",
        ));
    }

    let now = Utc::now().naive_utc();
    diesel::update(envelopes::table.find(envelope_id))
        .set((
            envelopes::status.eq(ENVELOPE_VOIDED),
            envelopes::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

    // Outstanding magic links stop resolving once the envelope leaves
    // SENT, no token cleanup needed.
    record_audit(&mut conn, envelope_id, None, "envelope.voided", json!({}))?;

    let updated: EnvelopeRow = envelopes::table.find(envelope_id).first(&mut conn)?;
    Ok(respond::ok(updated.into()))
}

pub async fn list_audit_trail(
    State(state): State<AppState>,
    Path(envelope_id): Path<Uuid>,
) -> AppResult<Json<Envelope<Vec<AuditLogResponse>>>> {
    let mut conn = state.db()?;
    envelopes::table
        .find(envelope_id)
        .first::<EnvelopeRow>(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    let rows: Vec<EnvelopeAuditLog> = envelope_audit_logs::table
        .filter(envelope_audit_logs::envelope_id.eq(envelope_id))
        .order(envelope_audit_logs::created_at.asc())
        .load(&mut conn)?;

    Ok(respond::ok(
        rows.into_iter().map(AuditLogResponse::from).collect(),
    ))
}

/// Appends an immutable audit event. Every signer-visible step of the
/// signing flow lands here.
pub(crate) fn record_audit(
    conn: &mut PgConnection,
    envelope_id: Uuid,
    signer_id: Option<Uuid>,
    event: &str,
    detail: Value,
) -> AppResult<()> {
    let log = NewEnvelopeAuditLog {
        id: Uuid::new_v4(),
        envelope_id,
        signer_id,
        event: event.to_string(),
        detail,
    };
    diesel::insert_into(envelope_audit_logs::table)
        .values(&log)
        .execute(conn)?;
    Ok(())
}

pub(crate) fn queue_signer_invite(
    conn: &mut PgConnection,
    state: &AppState,
    envelope: &EnvelopeRow,
    signer: &Signer,
    token: &str,
) -> AppResult<()> {
    let signing_url = format!(
        "{}/sign/{token}",
        state.config.public_base_url.trim_end_matches('/')
    );
    let message = envelope
        .message
        .as_deref()
        .map(|m| format!("\n{m}\n"))
        .unwrap_or_default();

    enqueue_job(
        conn,
        JOB_SEND_EMAIL,
        json!({
            "to": signer.email,
            "subject": format!("Signature requested: {}", envelope.title),
            "body": format!(
                "Hi {},\n{message}\nReview and sign here: {signing_url}\n",
                signer.name
            ),
        }),
        None,
    )?;

    record_audit(
        conn,
        envelope.id,
        Some(signer.id),
        "signer.invited",
        json!({ "email": signer.email, "sequence_number": signer.sequence_number }),
    )?;
    Ok(())
}

/// An envelope completes when every signer who has not been removed is
/// in a terminal, signed state.
pub(crate) fn all_signers_signed(signer_rows: &[Signer]) -> bool {
    !signer_rows.is_empty()
        && signer_rows
            .iter()
            .all(|signer| signer.status == crate::signing::SIGNER_SIGNED)
}

fn validate_workflow(raw: Option<&str>) -> AppResult<&'static str> {
    match raw {
        None => Ok(WORKFLOW_SEQUENTIAL),
        Some(value) if value == WORKFLOW_SEQUENTIAL => Ok(WORKFLOW_SEQUENTIAL),
        Some(value) if value == WORKFLOW_PARALLEL => Ok(WORKFLOW_PARALLEL),
        Some(_) => Err(AppError::bad_request(
            "workflow must be SEQUENTIAL or PARALLEL",
        )),
    }
}
