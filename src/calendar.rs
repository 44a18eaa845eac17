use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::CalendarAccount;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Google,
    Outlook,
}

impl Provider {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "google" => Some(Provider::Google),
            "outlook" => Some(Provider::Outlook),
            _ => None,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Outlook => "outlook",
        }
    }

    fn authorize_endpoint(&self) -> &'static str {
        match self {
            Provider::Google => "https://accounts.google.com/o/oauth2/v2/auth",
            Provider::Outlook => {
                "https://login.microsoftonline.com/common/oauth2/v2.0/authorize"
            }
        }
    }

    fn token_endpoint(&self) -> &'static str {
        match self {
            Provider::Google => "https://oauth2.googleapis.com/token",
            Provider::Outlook => "https://login.microsoftonline.com/common/oauth2/v2.0/token",
        }
    }

    fn scope(&self) -> &'static str {
        match self {
            Provider::Google => "https://www.googleapis.com/auth/calendar.events",
            Provider::Outlook => "offline_access https://graph.microsoft.com/Calendars.ReadWrite",
        }
    }

    fn events_endpoint(&self) -> &'static str {
        match self {
            Provider::Google => {
                "https://www.googleapis.com/calendar/v3/calendars/primary/events"
            }
            Provider::Outlook => "https://graph.microsoft.com/v1.0/me/events",
        }
    }
}

pub fn client_credentials(config: &AppConfig, provider: Provider) -> Option<(String, String)> {
    match provider {
        Provider::Google => config
            .google_oauth_client_id
            .clone()
            .zip(config.google_oauth_client_secret.clone()),
        Provider::Outlook => config
            .outlook_oauth_client_id
            .clone()
            .zip(config.outlook_oauth_client_secret.clone()),
    }
}

pub fn authorize_url(
    provider: Provider,
    client_id: &str,
    redirect_uri: &str,
    state: &str,
) -> Result<String> {
    let mut url = url::Url::parse(provider.authorize_endpoint())?;
    url.query_pairs_mut()
        .append_pair("client_id", client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("access_type", "offline")
        .append_pair("scope", provider.scope())
        .append_pair("state", state);
    Ok(url.to_string())
}

#[derive(Debug, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
}

pub async fn exchange_code(
    provider: Provider,
    client_id: &str,
    client_secret: &str,
    redirect_uri: &str,
    code: &str,
) -> Result<OAuthTokens> {
    let client = Client::new();
    let response = client
        .post(provider.token_endpoint())
        .form(&[
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
            ("code", code),
        ])
        .send()
        .await
        .context("failed to reach OAuth token endpoint")?;

    let response = response
        .error_for_status()
        .context("OAuth code exchange was rejected")?;
    let tokens = response
        .json::<OAuthTokens>()
        .await
        .context("failed to decode OAuth token response")?;
    Ok(tokens)
}

#[derive(Debug, Clone)]
pub struct CalendarEvent {
    pub appointment_id: Uuid,
    pub title: String,
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
    pub description: Option<String>,
}

/// Pushes booked appointments to connected provider calendars.
#[async_trait]
pub trait CalendarSync: Send + Sync + 'static {
    async fn push_event(&self, account: &CalendarAccount, event: &CalendarEvent) -> Result<()>;
    async fn remove_event(&self, account: &CalendarAccount, appointment_id: Uuid) -> Result<()>;
}

pub struct HttpCalendarSync {
    client: Client,
}

impl HttpCalendarSync {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

impl Default for HttpCalendarSync {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CalendarSync for HttpCalendarSync {
    async fn push_event(&self, account: &CalendarAccount, event: &CalendarEvent) -> Result<()> {
        let provider = Provider::parse(&account.provider)
            .ok_or_else(|| anyhow!("unknown calendar provider {}", account.provider))?;

        let body = match provider {
            Provider::Google => json!({
                "id": event.appointment_id.simple().to_string(),
                "summary": event.title,
                "description": event.description,
                "start": { "dateTime": format!("{}Z", event.starts_at.format("%Y-%m-%dT%H:%M:%S")) },
                "end": { "dateTime": format!("{}Z", event.ends_at.format("%Y-%m-%dT%H:%M:%S")) },
            }),
            Provider::Outlook => json!({
                "subject": event.title,
                "body": { "contentType": "text", "content": event.description },
                "start": { "dateTime": event.starts_at.format("%Y-%m-%dT%H:%M:%S").to_string(), "timeZone": "UTC" },
                "end": { "dateTime": event.ends_at.format("%Y-%m-%dT%H:%M:%S").to_string(), "timeZone": "UTC" },
            }),
        };

        let response = self
            .client
            .post(provider.events_endpoint())
            .bearer_auth(&account.access_token)
            .json(&body)
            .send()
            .await
            .context("failed to reach calendar provider")?;

        response
            .error_for_status()
            .context("calendar provider rejected the event")?;
        Ok(())
    }

    async fn remove_event(&self, account: &CalendarAccount, appointment_id: Uuid) -> Result<()> {
        let provider = Provider::parse(&account.provider)
            .ok_or_else(|| anyhow!("unknown calendar provider {}", account.provider))?;

        // Event ids are derived from the appointment id on both providers.
        let url = format!(
            "{}/{}",
            provider.events_endpoint(),
            appointment_id.simple()
        );
        let response = self
            .client
            .delete(url)
            .bearer_auth(&account.access_token)
            .send()
            .await
            .context("failed to reach calendar provider")?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        response
            .error_for_status()
            .context("calendar provider rejected the removal")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_round_trips() {
        assert_eq!(Provider::parse("google"), Some(Provider::Google));
        assert_eq!(Provider::parse("outlook"), Some(Provider::Outlook));
        assert_eq!(Provider::parse("ical"), None);
        assert_eq!(Provider::Google.as_str(), "google");
    }

    #[test]
    fn authorize_url_carries_redirect_and_scope() {
        let url = authorize_url(
            Provider::Google,
            "client-123",
            "https://app/callback",
            "state-abc",
        )
        .unwrap();
        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(url.contains("client_id=client-123"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fapp%2Fcallback"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("state=state-abc"));
    }
}
