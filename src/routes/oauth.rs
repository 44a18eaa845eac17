use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
    Json,
};
use chrono::{Duration, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    calendar::{authorize_url, client_credentials, exchange_code, Provider},
    error::{AppError, AppResult},
    models::{CalendarAccount, NewCalendarAccount, NewOauthState, OauthState},
    schema::{calendar_accounts, oauth_states},
    signing::{generate_magic_token, hash_token},
    state::AppState,
    utils::respond::{self, Envelope},
    utils::to_iso,
};

const STATE_TTL_MINUTES: i64 = 10;

#[derive(Serialize)]
pub struct AuthorizeResponse {
    pub url: String,
}

#[derive(Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct CalendarAccountResponse {
    pub id: Uuid,
    pub provider: String,
    pub account_email: Option<String>,
    pub token_expires_at: Option<String>,
    pub created_at: String,
}

impl From<CalendarAccount> for CalendarAccountResponse {
    fn from(account: CalendarAccount) -> Self {
        Self {
            id: account.id,
            provider: account.provider,
            account_email: account.account_email,
            token_expires_at: account.token_expires_at.map(to_iso),
            created_at: to_iso(account.created_at),
        }
    }
}

/// Builds the provider consent URL for the signed-in admin. The admin
/// UI fetches this and then navigates to it. The OAuth `state` value is
/// a single-use random token whose hash is stored against the user, so
/// the callback can both verify the flow started here and attribute the
/// connected account.
pub async fn authorize(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(provider): Path<String>,
) -> AppResult<Json<Envelope<AuthorizeResponse>>> {
    let provider = Provider::parse(&provider)
        .ok_or_else(|| AppError::bad_request("unknown calendar provider"))?;
    let (client_id, _) = client_credentials(&state.config, provider)
        .ok_or_else(|| AppError::bad_request("calendar provider is not configured"))?;

    let mut conn = state.db()?;
    // A new attempt supersedes any outstanding one for this provider.
    diesel::delete(
        oauth_states::table
            .filter(oauth_states::user_id.eq(user.user_id))
            .filter(oauth_states::provider.eq(provider.as_str())),
    )
    .execute(&mut conn)?;

    let state_token = generate_magic_token();
    let pending = NewOauthState {
        id: Uuid::new_v4(),
        user_id: user.user_id,
        provider: provider.as_str().to_string(),
        state_hash: hash_token(&state_token),
        expires_at: Utc::now().naive_utc() + Duration::minutes(STATE_TTL_MINUTES),
    };
    diesel::insert_into(oauth_states::table)
        .values(&pending)
        .execute(&mut conn)?;

    let redirect_uri = callback_uri(&state, provider);
    let url = authorize_url(provider, &client_id, &redirect_uri, &state_token)?;

    Ok(respond::ok(AuthorizeResponse { url }))
}

/// Provider redirect target. Exchanges the code, stores the account and
/// bounces the browser back to the app with a status query parameter.
pub async fn callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackQuery>,
) -> AppResult<impl IntoResponse> {
    let base = state.config.public_base_url.trim_end_matches('/');

    if let Some(err) = params.error {
        info!(provider = %provider, error = %err, "oauth consent denied");
        return Ok(Redirect::to(&format!("{base}/?calendar=denied")));
    }

    let provider = Provider::parse(&provider)
        .ok_or_else(|| AppError::bad_request("unknown calendar provider"))?;

    // The state token must match a pending attempt we minted ourselves;
    // anything else is a forged or replayed callback.
    let raw_state = params
        .state
        .as_deref()
        .ok_or_else(|| AppError::bad_request("missing state parameter"))?;
    let user_id = {
        let mut conn = state.db()?;
        let pending: OauthState = oauth_states::table
            .filter(oauth_states::state_hash.eq(hash_token(raw_state)))
            .filter(oauth_states::provider.eq(provider.as_str()))
            .first(&mut conn)
            .optional()?
            .ok_or_else(|| AppError::bad_request("unrecognized state parameter"))?;
        // Single use, whether or not the rest of the exchange succeeds.
        diesel::delete(oauth_states::table.find(pending.id)).execute(&mut conn)?;
        if pending.expires_at < Utc::now().naive_utc() {
            return Err(AppError::bad_request("state parameter has expired"));
        }
        pending.user_id
    };

    let (client_id, client_secret) = client_credentials(&state.config, provider)
        .ok_or_else(|| AppError::bad_request("calendar provider is not configured"))?;
    let code = params
        .code
        .ok_or_else(|| AppError::bad_request("missing authorization code"))?;

    let redirect_uri = callback_uri(&state, provider);
    let tokens = match exchange_code(provider, &client_id, &client_secret, &redirect_uri, &code)
        .await
    {
        Ok(tokens) => tokens,
        Err(err) => {
            error!(provider = %provider.as_str(), error = %err, "oauth code exchange failed");
            return Ok(Redirect::to(&format!("{base}/?calendar=error")));
        }
    };

    let mut conn = state.db()?;
    let token_expires_at = tokens
        .expires_in
        .map(|secs| Utc::now().naive_utc() + Duration::seconds(secs));

    // One connection per provider per user; reconnecting replaces the
    // stored tokens.
    diesel::delete(
        calendar_accounts::table
            .filter(calendar_accounts::user_id.eq(user_id))
            .filter(calendar_accounts::provider.eq(provider.as_str())),
    )
    .execute(&mut conn)?;

    let new_account = NewCalendarAccount {
        id: Uuid::new_v4(),
        user_id,
        provider: provider.as_str().to_string(),
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        token_expires_at,
        account_email: None,
    };
    diesel::insert_into(calendar_accounts::table)
        .values(&new_account)
        .execute(&mut conn)?;

    info!(provider = %provider.as_str(), "calendar account connected");
    Ok(Redirect::to(&format!("{base}/?calendar=connected")))
}

pub async fn list_accounts(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Envelope<Vec<CalendarAccountResponse>>>> {
    let mut conn = state.db()?;
    let rows: Vec<CalendarAccount> = calendar_accounts::table
        .filter(calendar_accounts::user_id.eq(user.user_id))
        .order(calendar_accounts::created_at.asc())
        .load(&mut conn)?;

    Ok(respond::ok(
        rows.into_iter().map(CalendarAccountResponse::from).collect(),
    ))
}

pub async fn disconnect_account(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(account_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    let deleted = diesel::delete(
        calendar_accounts::table
            .find(account_id)
            .filter(calendar_accounts::user_id.eq(user.user_id)),
    )
    .execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

fn callback_uri(state: &AppState, provider: Provider) -> String {
    format!(
        "{}/auth/oauth/{}/callback",
        state.config.public_base_url.trim_end_matches('/'),
        provider.as_str()
    )
}
