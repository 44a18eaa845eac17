use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub role: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = refresh_tokens)]
#[diesel(belongs_to(User))]
pub struct RefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub revoked_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = refresh_tokens)]
pub struct NewRefreshToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub issued_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = clients)]
pub struct Client {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub notes: Option<String>,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = clients)]
pub struct NewClient {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub notes: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = inquiries)]
#[diesel(belongs_to(Client))]
pub struct Inquiry {
    pub id: Uuid,
    pub client_id: Option<Uuid>,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub message: String,
    pub source: Option<String>,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = inquiries)]
pub struct NewInquiry {
    pub id: Uuid,
    pub client_id: Option<Uuid>,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub message: String,
    pub source: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = appointment_settings)]
pub struct AppointmentSettings {
    pub id: i32,
    pub workday_start_min: i32,
    pub workday_end_min: i32,
    pub buffer_minutes: i32,
    pub booking_window_days: i32,
    pub slot_granularity_minutes: i32,
    pub active_types: serde_json::Value,
    pub timezone: String,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = blocked_times)]
pub struct BlockedTime {
    pub id: Uuid,
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
    pub reason: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = blocked_times)]
pub struct NewBlockedTime {
    pub id: Uuid,
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = appointments)]
#[diesel(belongs_to(Client))]
pub struct Appointment {
    pub id: Uuid,
    pub client_id: Uuid,
    pub appointment_type: String,
    pub status: String,
    pub scheduled_at: Option<NaiveDateTime>,
    pub duration_minutes: i32,
    pub invite_token_hash: Option<String>,
    pub outcome: Option<String>,
    pub outcome_notes: Option<String>,
    pub admin_notes: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = appointments)]
pub struct NewAppointment {
    pub id: Uuid,
    pub client_id: Uuid,
    pub appointment_type: String,
    pub status: String,
    pub duration_minutes: i32,
    pub admin_notes: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = proposals)]
#[diesel(belongs_to(Client))]
pub struct Proposal {
    pub id: Uuid,
    pub client_id: Uuid,
    pub title: String,
    pub status: String,
    pub line_items: serde_json::Value,
    pub tax_rate_bp: i32,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub notes: Option<String>,
    pub sent_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = proposals)]
pub struct NewProposal {
    pub id: Uuid,
    pub client_id: Uuid,
    pub title: String,
    pub status: String,
    pub line_items: serde_json::Value,
    pub tax_rate_bp: i32,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = invoices)]
#[diesel(belongs_to(Client))]
pub struct Invoice {
    pub id: Uuid,
    pub client_id: Uuid,
    pub proposal_id: Option<Uuid>,
    pub number: String,
    pub status: String,
    pub line_items: serde_json::Value,
    pub tax_rate_bp: i32,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub due_at: Option<NaiveDateTime>,
    pub sent_at: Option<NaiveDateTime>,
    pub paid_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = invoices)]
pub struct NewInvoice {
    pub id: Uuid,
    pub client_id: Uuid,
    pub proposal_id: Option<Uuid>,
    pub number: String,
    pub status: String,
    pub line_items: serde_json::Value,
    pub tax_rate_bp: i32,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub due_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = galleries)]
pub struct Gallery {
    pub id: Uuid,
    pub client_id: Option<Uuid>,
    pub title: String,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = galleries)]
pub struct NewGallery {
    pub id: Uuid,
    pub client_id: Option<Uuid>,
    pub title: String,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = gallery_assets)]
#[diesel(belongs_to(Gallery))]
pub struct GalleryAsset {
    pub id: Uuid,
    pub gallery_id: Uuid,
    pub filename: String,
    pub storage_key: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = gallery_assets)]
pub struct NewGalleryAsset {
    pub id: Uuid,
    pub gallery_id: Uuid,
    pub filename: String,
    pub storage_key: String,
    pub content_type: String,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = envelopes)]
pub struct Envelope {
    pub id: Uuid,
    pub client_id: Option<Uuid>,
    pub title: String,
    pub message: Option<String>,
    pub workflow: String,
    pub status: String,
    pub sent_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = envelopes)]
pub struct NewEnvelope {
    pub id: Uuid,
    pub client_id: Option<Uuid>,
    pub title: String,
    pub message: Option<String>,
    pub workflow: String,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = envelope_documents)]
#[diesel(belongs_to(Envelope))]
pub struct EnvelopeDocument {
    pub id: Uuid,
    pub envelope_id: Uuid,
    pub title: String,
    pub storage_key: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = envelope_documents)]
pub struct NewEnvelopeDocument {
    pub id: Uuid,
    pub envelope_id: Uuid,
    pub title: String,
    pub storage_key: String,
    pub content_type: String,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = signers)]
#[diesel(belongs_to(Envelope))]
pub struct Signer {
    pub id: Uuid,
    pub envelope_id: Uuid,
    pub name: String,
    pub email: String,
    pub role: String,
    pub sequence_number: i32,
    pub status: String,
    pub magic_token_hash: Option<String>,
    pub otp_hash: Option<String>,
    pub otp_expires_at: Option<NaiveDateTime>,
    pub signature_key: Option<String>,
    pub signed_at: Option<NaiveDateTime>,
    pub declined_at: Option<NaiveDateTime>,
    pub decline_reason: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = signers)]
pub struct NewSigner {
    pub id: Uuid,
    pub envelope_id: Uuid,
    pub name: String,
    pub email: String,
    pub role: String,
    pub sequence_number: i32,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = signing_sessions)]
#[diesel(belongs_to(Signer))]
pub struct SigningSession {
    pub id: Uuid,
    pub signer_id: Uuid,
    pub expires_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = signing_sessions)]
pub struct NewSigningSession {
    pub id: Uuid,
    pub signer_id: Uuid,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = envelope_audit_logs)]
#[diesel(belongs_to(Envelope))]
pub struct EnvelopeAuditLog {
    pub id: Uuid,
    pub envelope_id: Uuid,
    pub signer_id: Option<Uuid>,
    pub event: String,
    pub detail: serde_json::Value,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = envelope_audit_logs)]
pub struct NewEnvelopeAuditLog {
    pub id: Uuid,
    pub envelope_id: Uuid,
    pub signer_id: Option<Uuid>,
    pub event: String,
    pub detail: serde_json::Value,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = calendar_accounts)]
#[diesel(belongs_to(User))]
pub struct CalendarAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<NaiveDateTime>,
    pub account_email: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = calendar_accounts)]
pub struct NewCalendarAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<NaiveDateTime>,
    pub account_email: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = oauth_states)]
#[diesel(belongs_to(User))]
pub struct OauthState {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub state_hash: String,
    pub expires_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = oauth_states)]
pub struct NewOauthState {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub state_hash: String,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = jobs)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub run_after: NaiveDateTime,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub run_after: NaiveDateTime,
}
