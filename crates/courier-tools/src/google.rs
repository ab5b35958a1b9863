use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::backend::{EventQuery, Label, MessageQuery, WorkspaceBackend};

pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const CALENDAR_BASE: &str = "https://www.googleapis.com/calendar/v3";
const GMAIL_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

#[derive(Debug, Clone, Default)]
pub struct GoogleCredentials {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub token_uri: Option<String>,
}

impl GoogleCredentials {
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some() && self.client_id.is_some() && self.client_secret.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Calendar v3 and Gmail v1 over REST with a bearer token. A 401 triggers
/// one refresh-token exchange followed by a single retry.
pub struct GoogleWorkspaceBackend {
    client: Client,
    credentials: RwLock<GoogleCredentials>,
    calendar_base: String,
    gmail_base: String,
}

impl GoogleWorkspaceBackend {
    pub fn new(credentials: GoogleCredentials) -> Self {
        Self::with_endpoints(credentials, CALENDAR_BASE, GMAIL_BASE)
    }

    pub fn with_endpoints(
        credentials: GoogleCredentials,
        calendar_base: impl Into<String>,
        gmail_base: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            credentials: RwLock::new(credentials),
            calendar_base: calendar_base.into().trim_end_matches('/').to_string(),
            gmail_base: gmail_base.into().trim_end_matches('/').to_string(),
        }
    }

    fn events_url(&self, calendar_id: &str) -> String {
        format!(
            "{}/calendars/{}/events",
            self.calendar_base,
            urlencoding::encode(calendar_id)
        )
    }

    fn label_url(&self, label_id: &str) -> String {
        format!("{}/labels/{}", self.gmail_base, urlencoding::encode(label_id))
    }

    fn message_url(&self, message_id: &str) -> String {
        format!("{}/messages/{}", self.gmail_base, urlencoding::encode(message_id))
    }

    /// Exchanges the refresh token for a new access token and keeps it for
    /// subsequent requests.
    pub async fn refresh_credentials(&self) -> anyhow::Result<()> {
        let snapshot = self.credentials.read().await.clone();
        let (Some(refresh_token), Some(client_id), Some(client_secret)) = (
            snapshot.refresh_token.as_deref(),
            snapshot.client_id.as_deref(),
            snapshot.client_secret.as_deref(),
        ) else {
            anyhow::bail!("refresh token, client id and client secret are required to refresh credentials");
        };
        let token_uri = snapshot.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);

        let response = self
            .client
            .post(token_uri)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("token refresh failed with status {status}: {}", preview(&body));
        }
        let token: TokenResponse = response.json().await?;
        tracing::info!(
            expires_in = token.expires_in.unwrap_or_default(),
            "refreshed google access token"
        );
        self.credentials.write().await.access_token = Some(token.access_token);
        Ok(())
    }

    async fn call(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> anyhow::Result<Value> {
        let mut refreshed = false;
        loop {
            let token = self.credentials.read().await.access_token.clone();
            let mut req = self.client.request(method.clone(), url).query(query);
            if let Some(token) = token {
                req = req.bearer_auth(token);
            }
            if let Some(body) = body {
                req = req.json(body);
            }
            let response = req.send().await?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED
                && !refreshed
                && self.credentials.read().await.can_refresh()
            {
                tracing::debug!(url, "access token rejected, refreshing");
                self.refresh_credentials().await?;
                refreshed = true;
                continue;
            }

            let text = response.text().await?;
            if !status.is_success() {
                let detail = serde_json::from_str::<Value>(&text)
                    .ok()
                    .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
                    .unwrap_or_else(|| preview(&text));
                anyhow::bail!("{status}: {detail}");
            }
            if text.trim().is_empty() {
                return Ok(json!({}));
            }
            return Ok(serde_json::from_str(&text)?);
        }
    }
}

fn preview(body: &str) -> String {
    body.chars().take(300).collect()
}

#[async_trait]
impl WorkspaceBackend for GoogleWorkspaceBackend {
    async fn list_events(&self, query: &EventQuery) -> anyhow::Result<Vec<Value>> {
        let url = self.events_url(&query.calendar_id);
        let mut params = vec![
            ("singleEvents", "true".to_string()),
            ("orderBy", "startTime".to_string()),
        ];
        if let Some(max) = query.max_results {
            params.push(("maxResults", max.to_string()));
        }
        if let Some(min) = &query.time_min {
            params.push(("timeMin", min.clone()));
        }
        if let Some(max) = &query.time_max {
            params.push(("timeMax", max.clone()));
        }
        let value = self.call(Method::GET, &url, &params, None).await?;
        Ok(value
            .get("items")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_event(&self, calendar_id: &str, event: &Value) -> anyhow::Result<Value> {
        let url = self.events_url(calendar_id);
        self.call(Method::POST, &url, &[], Some(event)).await
    }

    async fn list_labels(&self) -> anyhow::Result<Vec<Label>> {
        let url = format!("{}/labels", self.gmail_base);
        let value = self.call(Method::GET, &url, &[], None).await?;
        let labels = value
            .get("labels")
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|raw| serde_json::from_value::<Label>(raw.clone()).ok())
                    .collect()
            })
            .unwrap_or_default();
        Ok(labels)
    }

    async fn label_details(&self, label_id: &str) -> anyhow::Result<Value> {
        let url = self.label_url(label_id);
        self.call(Method::GET, &url, &[], None).await
    }

    async fn search_messages(&self, query: &MessageQuery) -> anyhow::Result<Value> {
        let url = format!("{}/messages", self.gmail_base);
        let mut params = vec![
            ("q", query.query.clone()),
            ("maxResults", query.max_results.to_string()),
        ];
        if let Some(label) = &query.label_id {
            params.push(("labelIds", label.clone()));
        }
        self.call(Method::GET, &url, &params, None).await
    }

    async fn message_metadata(&self, message_id: &str) -> anyhow::Result<Value> {
        let url = self.message_url(message_id);
        let params = [
            ("format", "metadata".to_string()),
            ("metadataHeaders", "Subject".to_string()),
            ("metadataHeaders", "From".to_string()),
            ("metadataHeaders", "Date".to_string()),
        ];
        self.call(Method::GET, &url, &params, None).await
    }

    async fn send_message(&self, raw: &str) -> anyhow::Result<Value> {
        let url = format!("{}/messages/send", self.gmail_base);
        self.call(Method::POST, &url, &[], Some(&json!({"raw": raw})))
            .await
    }
}
