use std::time::Duration as StdDuration;

use axum::{
    extract::{Path, State},
    Json,
};
use base64::Engine;
use chrono::{Duration, NaiveDateTime, Utc};
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        Envelope as EnvelopeRow, EnvelopeDocument, NewSigningSession, Signer, SigningSession,
    },
    schema::{envelope_documents, envelopes, signers, signing_sessions},
    signing::{
        blocked_by_earlier_signer, generate_magic_token, generate_otp, hash_token,
        signer_is_terminal, ENVELOPE_COMPLETED, ENVELOPE_DECLINED, ENVELOPE_SENT, SIGNER_DECLINED,
        SIGNER_EXPIRED, SIGNER_PENDING, SIGNER_SIGNED, SIGNER_VIEWED, WORKFLOW_SEQUENTIAL,
    },
    state::AppState,
    utils::respond::{self, Envelope},
    utils::to_iso,
};

use super::envelopes::{all_signers_signed, queue_signer_invite, record_audit};

const DOCUMENT_URL_TTL: StdDuration = StdDuration::from_secs(15 * 60);

#[derive(Serialize)]
pub struct ValidateTokenResponse {
    pub signer_id: Uuid,
    pub signer_name: String,
    pub signer_status: String,
    pub envelope_title: String,
    pub envelope_message: Option<String>,
    pub workflow: String,
    pub blocked: bool,
    pub documents: Vec<String>,
}

#[derive(Deserialize)]
pub struct RequestOtpRequest {
    pub token: String,
}

#[derive(Serialize)]
pub struct RequestOtpResponse {
    pub signer_id: Uuid,
    pub expires_at: String,
}

#[derive(Deserialize)]
pub struct VerifyOtpRequest {
    pub token: String,
    pub otp: String,
}

#[derive(Serialize)]
pub struct SessionDocument {
    pub title: String,
    pub url: String,
}

#[derive(Serialize)]
pub struct VerifyOtpResponse {
    pub session_id: Uuid,
    pub signer_id: Uuid,
    pub expires_at: String,
    pub documents: Vec<SessionDocument>,
}

#[derive(Deserialize)]
pub struct ExtendSessionRequest {
    pub session_id: Uuid,
}

#[derive(Serialize)]
pub struct ExtendSessionResponse {
    pub session_id: Uuid,
    pub expires_at: String,
}

#[derive(Deserialize)]
pub struct SignRequest {
    pub session_id: Uuid,
    /// Base64-encoded PNG of the drawn signature.
    pub signature: String,
}

#[derive(Deserialize)]
pub struct DeclineRequest {
    pub session_id: Uuid,
    pub reason: Option<String>,
}

#[derive(Serialize)]
pub struct SignerStateResponse {
    pub signer_id: Uuid,
    pub status: String,
    pub envelope_status: String,
}

/// Resolves a magic link. The first successful open moves the signer
/// from PENDING to VIEWED; an expired link flips them to EXPIRED
/// instead.
pub async fn validate_token(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> AppResult<Json<Envelope<ValidateTokenResponse>>> {
    let mut conn = state.db()?;
    let (signer, envelope) = signer_for_token(&state, &mut conn, &token)?;

    if signer.status == SIGNER_PENDING {
        diesel::update(signers::table.find(signer.id))
            .set((
                signers::status.eq(SIGNER_VIEWED),
                signers::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(&mut conn)?;
        record_audit(
            &mut conn,
            envelope.id,
            Some(signer.id),
            "signer.viewed",
            json!({}),
        )?;
    }

    let signer: Signer = signers::table.find(signer.id).first(&mut conn)?;
    let documents: Vec<EnvelopeDocument> = envelope_documents::table
        .filter(envelope_documents::envelope_id.eq(envelope.id))
        .order(envelope_documents::created_at.asc())
        .load(&mut conn)?;
    let blocked = signer_blocked(&mut conn, &envelope, &signer)?;

    Ok(respond::ok(ValidateTokenResponse {
        signer_id: signer.id,
        signer_name: signer.name,
        signer_status: signer.status,
        envelope_title: envelope.title,
        envelope_message: envelope.message,
        workflow: envelope.workflow,
        blocked,
        documents: documents.into_iter().map(|d| d.title).collect(),
    }))
}

/// Emails a fresh one-time passcode to the signer's address on file.
/// Requesting again invalidates any earlier code.
pub async fn request_otp(
    State(state): State<AppState>,
    Json(payload): Json<RequestOtpRequest>,
) -> AppResult<Json<Envelope<RequestOtpResponse>>> {
    let mut conn = state.db()?;
    let (signer, envelope) = signer_for_token(&state, &mut conn, &payload.token)?;
    if signer_is_terminal(&signer.status) {
        return Err(AppError::conflict("signer has already finished"));
    }

    let otp = generate_otp();
    let expires_at =
        Utc::now().naive_utc() + Duration::minutes(state.config.otp_expiry_minutes as i64);

    diesel::update(signers::table.find(signer.id))
        .set((
            signers::otp_hash.eq(Some(hash_token(&otp))),
            signers::otp_expires_at.eq(Some(expires_at)),
            signers::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    crate::jobs::enqueue_job(
        &mut conn,
        crate::jobs::JOB_SEND_EMAIL,
        json!({
            "to": signer.email,
            "subject": format!("Your signing code for {}", envelope.title),
            "body": format!(
                "Hi {},\n\nYour one-time code is {otp}. It expires in {} minutes.\n",
                signer.name, state.config.otp_expiry_minutes
            ),
        }),
        None,
    )?;

    record_audit(
        &mut conn,
        envelope.id,
        Some(signer.id),
        "otp.requested",
        json!({}),
    )?;

    Ok(respond::ok(RequestOtpResponse {
        signer_id: signer.id,
        expires_at: to_iso(expires_at),
    }))
}

/// Exchanges a valid passcode for a signing session and presigned
/// document URLs.
pub async fn verify_otp(
    State(state): State<AppState>,
    Json(payload): Json<VerifyOtpRequest>,
) -> AppResult<Json<Envelope<VerifyOtpResponse>>> {
    let mut conn = state.db()?;
    let (signer, envelope) = signer_for_token(&state, &mut conn, &payload.token)?;
    if signer_is_terminal(&signer.status) {
        return Err(AppError::conflict("signer has already finished"));
    }

    let now = Utc::now().naive_utc();
    let otp_hash = signer
        .otp_hash
        .as_deref()
        .ok_or_else(|| AppError::bad_request("request a passcode first"))?;
    let otp_expires_at = signer
        .otp_expires_at
        .ok_or_else(|| AppError::bad_request("request a passcode first"))?;
    if otp_expires_at < now {
        return Err(AppError::bad_request("passcode has expired, request a new one"));
    }
    if hash_token(payload.otp.trim()) != otp_hash {
        return Err(AppError::unauthorized());
    }

    // The code is single use.
    diesel::update(signers::table.find(signer.id))
        .set((
            signers::otp_hash.eq::<Option<String>>(None),
            signers::otp_expires_at.eq::<Option<NaiveDateTime>>(None),
            signers::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

    let session = NewSigningSession {
        id: Uuid::new_v4(),
        signer_id: signer.id,
        expires_at: now + Duration::minutes(state.config.signing_session_minutes as i64),
    };
    diesel::insert_into(signing_sessions::table)
        .values(&session)
        .execute(&mut conn)?;

    record_audit(
        &mut conn,
        envelope.id,
        Some(signer.id),
        "otp.verified",
        json!({}),
    )?;

    let documents: Vec<EnvelopeDocument> = envelope_documents::table
        .filter(envelope_documents::envelope_id.eq(envelope.id))
        .order(envelope_documents::created_at.asc())
        .load(&mut conn)?;

    let mut session_documents = Vec::with_capacity(documents.len());
    for document in documents {
        let url = state
            .storage
            .presign_get_object(&document.storage_key, DOCUMENT_URL_TTL)
            .await
            .map_err(|err| {
                error!(error = %err, key = %document.storage_key, "failed to presign document");
                AppError::internal(format!("failed to presign document: {err}"))
            })?;
        session_documents.push(SessionDocument {
            title: document.title,
            url,
        });
    }

    Ok(respond::ok(VerifyOtpResponse {
        session_id: session.id,
        signer_id: signer.id,
        expires_at: to_iso(session.expires_at),
        documents: session_documents,
    }))
}

/// Pushes the session deadline out by another session window, for
/// signers still reading the documents.
pub async fn extend_session(
    State(state): State<AppState>,
    Json(payload): Json<ExtendSessionRequest>,
) -> AppResult<Json<Envelope<ExtendSessionResponse>>> {
    let mut conn = state.db()?;
    let session: SigningSession = signing_sessions::table
        .find(payload.session_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    let now = Utc::now().naive_utc();
    if session.expires_at < now {
        return Err(AppError::unauthorized());
    }

    let expires_at = now + Duration::minutes(state.config.signing_session_minutes as i64);
    diesel::update(signing_sessions::table.find(session.id))
        .set(signing_sessions::expires_at.eq(expires_at))
        .execute(&mut conn)?;

    let signer: Signer = signers::table.find(session.signer_id).first(&mut conn)?;
    record_audit(
        &mut conn,
        signer.envelope_id,
        Some(signer.id),
        "session.extended",
        json!({}),
    )?;

    Ok(respond::ok(ExtendSessionResponse {
        session_id: session.id,
        expires_at: to_iso(expires_at),
    }))
}

pub async fn sign_contract(
    State(state): State<AppState>,
    Path(signer_id): Path<Uuid>,
    Json(payload): Json<SignRequest>,
) -> AppResult<Json<Envelope<SignerStateResponse>>> {
    let mut conn = state.db()?;
    let signer = signer_for_session(&mut conn, signer_id, payload.session_id)?;
    let envelope: EnvelopeRow = envelopes::table.find(signer.envelope_id).first(&mut conn)?;
    if envelope.status != ENVELOPE_SENT {
        return Err(AppError::conflict("envelope is no longer open for signing"));
    }
    if signer_is_terminal(&signer.status) {
        return Err(AppError::conflict("signer has already finished"));
    }
    if signer_blocked(&mut conn, &envelope, &signer)? {
        return Err(AppError::conflict(
            "earlier signers have not finished yet",
        ));
    }

    let signature_bytes = base64::engine::general_purpose::STANDARD
        .decode(payload.signature.trim())
        .map_err(|_| AppError::bad_request("signature must be base64-encoded PNG data"))?;
    if signature_bytes.is_empty() {
        return Err(AppError::bad_request("signature must not be empty"));
    }

    let signature_key = format!(
        "envelopes/{}/signatures/{}.png",
        envelope.id, signer.id
    );
    state
        .storage
        .put_object(
            &signature_key,
            signature_bytes,
            Some("image/png".to_string()),
            None,
        )
        .await
        .map_err(|err| {
            error!(error = %err, key = %signature_key, "failed to store signature");
            AppError::internal(format!("failed to store signature: {err}"))
        })?;

    let now = Utc::now().naive_utc();
    diesel::update(signers::table.find(signer.id))
        .set((
            signers::status.eq(SIGNER_SIGNED),
            signers::signature_key.eq(Some(signature_key)),
            signers::signed_at.eq(Some(now)),
            signers::updated_at.eq(now),
        ))
        .execute(&mut conn)?;
    diesel::delete(signing_sessions::table.find(payload.session_id)).execute(&mut conn)?;

    record_audit(
        &mut conn,
        envelope.id,
        Some(signer.id),
        "signer.signed",
        json!({ "sequence_number": signer.sequence_number }),
    )?;

    let signer_rows: Vec<Signer> = signers::table
        .filter(signers::envelope_id.eq(envelope.id))
        .order(signers::sequence_number.asc())
        .load(&mut conn)?;

    let envelope_status = if all_signers_signed(&signer_rows) {
        diesel::update(envelopes::table.find(envelope.id))
            .set((
                envelopes::status.eq(ENVELOPE_COMPLETED),
                envelopes::updated_at.eq(now),
            ))
            .execute(&mut conn)?;
        record_audit(&mut conn, envelope.id, None, "envelope.completed", json!({}))?;
        ENVELOPE_COMPLETED.to_string()
    } else {
        if envelope.workflow == WORKFLOW_SEQUENTIAL {
            notify_next_signer(&mut conn, &state, &envelope, &signer_rows)?;
        }
        envelope.status.clone()
    };

    Ok(respond::ok(SignerStateResponse {
        signer_id: signer.id,
        status: SIGNER_SIGNED.to_string(),
        envelope_status,
    }))
}

/// A single decline closes the whole envelope.
pub async fn decline_contract(
    State(state): State<AppState>,
    Path(signer_id): Path<Uuid>,
    Json(payload): Json<DeclineRequest>,
) -> AppResult<Json<Envelope<SignerStateResponse>>> {
    let mut conn = state.db()?;
    let signer = signer_for_session(&mut conn, signer_id, payload.session_id)?;
    let envelope: EnvelopeRow = envelopes::table.find(signer.envelope_id).first(&mut conn)?;
    if envelope.status != ENVELOPE_SENT {
        return Err(AppError::conflict("envelope is no longer open for signing"));
    }
    if signer_is_terminal(&signer.status) {
        return Err(AppError::conflict("signer has already finished"));
    }

    let reason = payload.reason.filter(|r| !r.trim().is_empty());
    let now = Utc::now().naive_utc();
    diesel::update(signers::table.find(signer.id))
        .set((
            signers::status.eq(SIGNER_DECLINED),
            signers::declined_at.eq(Some(now)),
            signers::decline_reason.eq(reason.clone()),
            signers::updated_at.eq(now),
        ))
        .execute(&mut conn)?;
    diesel::update(envelopes::table.find(envelope.id))
        .set((
            envelopes::status.eq(ENVELOPE_DECLINED),
            envelopes::updated_at.eq(now),
        ))
        .execute(&mut conn)?;
    diesel::delete(signing_sessions::table.find(payload.session_id)).execute(&mut conn)?;

    record_audit(
        &mut conn,
        envelope.id,
        Some(signer.id),
        "signer.declined",
        json!({ "reason": reason }),
    )?;

    Ok(respond::ok(SignerStateResponse {
        signer_id: signer.id,
        status: SIGNER_DECLINED.to_string(),
        envelope_status: ENVELOPE_DECLINED.to_string(),
    }))
}

/// Looks up the signer behind a magic link. Only signers on SENT
/// envelopes resolve; an aged link flips the signer to EXPIRED before
/// rejecting.
fn signer_for_token(
    state: &AppState,
    conn: &mut PgConnection,
    token: &str,
) -> AppResult<(Signer, EnvelopeRow)> {
    let token_hash = hash_token(token);
    let signer: Signer = signers::table
        .filter(signers::magic_token_hash.eq(Some(token_hash)))
        .first(conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    let envelope: EnvelopeRow = envelopes::table.find(signer.envelope_id).first(conn)?;
    if envelope.status != ENVELOPE_SENT {
        return Err(AppError::conflict("envelope is no longer open for signing"));
    }

    if let Some(sent_at) = envelope.sent_at {
        let expires_at = sent_at + Duration::days(state.config.magic_link_expiry_days as i64);
        if Utc::now().naive_utc() > expires_at {
            if !signer_is_terminal(&signer.status) {
                diesel::update(signers::table.find(signer.id))
                    .set((
                        signers::status.eq(SIGNER_EXPIRED),
                        signers::updated_at.eq(Utc::now().naive_utc()),
                    ))
                    .execute(conn)?;
                record_audit(
                    conn,
                    envelope.id,
                    Some(signer.id),
                    "signer.expired",
                    json!({}),
                )?;
            }
            return Err(AppError::conflict("this signing link has expired"));
        }
    }

    Ok((signer, envelope))
}

fn signer_for_session(
    conn: &mut PgConnection,
    signer_id: Uuid,
    session_id: Uuid,
) -> AppResult<Signer> {
    let session: SigningSession = signing_sessions::table
        .find(session_id)
        .first(conn)
        .optional()?
        .ok_or_else(AppError::unauthorized)?;
    if session.signer_id != signer_id {
        return Err(AppError::unauthorized());
    }
    if session.expires_at < Utc::now().naive_utc() {
        return Err(AppError::unauthorized());
    }

    let signer: Signer = signers::table.find(signer_id).first(conn)?;
    Ok(signer)
}

fn signer_blocked(
    conn: &mut PgConnection,
    envelope: &EnvelopeRow,
    signer: &Signer,
) -> AppResult<bool> {
    if envelope.workflow != WORKFLOW_SEQUENTIAL {
        return Ok(false);
    }
    let rows: Vec<(i32, String)> = signers::table
        .filter(signers::envelope_id.eq(envelope.id))
        .select((signers::sequence_number, signers::status))
        .load(conn)?;
    Ok(blocked_by_earlier_signer(
        rows.iter().map(|(seq, status)| (*seq, status.as_str())),
        signer.sequence_number,
    ))
}

/// After a sequential signer finishes, invite the next signer in line.
/// Their original token was only stored hashed, so a new one is minted.
fn notify_next_signer(
    conn: &mut PgConnection,
    state: &AppState,
    envelope: &EnvelopeRow,
    signer_rows: &[Signer],
) -> AppResult<()> {
    let Some(next) = signer_rows
        .iter()
        .find(|candidate| !signer_is_terminal(&candidate.status))
    else {
        return Ok(());
    };

    let token = generate_magic_token();
    diesel::update(signers::table.find(next.id))
        .set((
            signers::magic_token_hash.eq(Some(hash_token(&token))),
            signers::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)?;

    queue_signer_invite(conn, state, envelope, next, &token)?;
    Ok(())
}
