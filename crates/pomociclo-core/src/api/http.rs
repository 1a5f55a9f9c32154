//! HTTP implementation of [`SessionApi`] over the backend's JSON routes.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use super::{EndSession, RemoteSettings, SessionApi, SessionRewards, SessionStarted};
use crate::error::ApiError;
use crate::storage::ApiConfig;
use crate::subject::Subject;

#[derive(Debug, Deserialize)]
struct StatsResponse {
    #[serde(default)]
    subjects: Vec<SubjectStat>,
}

#[derive(Debug, Deserialize)]
struct SubjectStat {
    id: String,
    #[serde(default)]
    studied_minutes: u64,
}

/// Talks to `{base_url}/study/start`, `/study/end`, `/subjects`, `/stats`
/// and `/settings`.
///
/// Without a base URL every call returns [`ApiError::NotConfigured`].
pub struct HttpSessionApi {
    client: Client,
    base: Option<Url>,
    token: Option<String>,
}

impl HttpSessionApi {
    pub fn from_config(config: &ApiConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;

        let base = match config.base_url.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => {
                // Url::join replaces the last segment unless the base ends with '/'.
                let normalized = if raw.ends_with('/') {
                    raw.to_string()
                } else {
                    format!("{raw}/")
                };
                Some(Url::parse(&normalized)?)
            }
            _ => None,
        };

        Ok(Self {
            client,
            base,
            token: config.token.clone().filter(|t| !t.is_empty()),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.base.is_some()
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        let base = self.base.as_ref().ok_or(ApiError::NotConfigured)?;
        Ok(base.join(path)?)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn checked(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

impl SessionApi for HttpSessionApi {
    async fn start_session(&self, subject_id: &str) -> Result<SessionStarted, ApiError> {
        let url = self.endpoint("study/start")?;
        let response = self
            .authorize(self.client.post(url))
            .json(&json!({ "subject_id": subject_id }))
            .send()
            .await?;
        Ok(Self::checked(response).await?.json().await?)
    }

    async fn end_session(&self, request: &EndSession) -> Result<SessionRewards, ApiError> {
        let url = self.endpoint("study/end")?;
        let response = self
            .authorize(self.client.post(url))
            .json(request)
            .send()
            .await?;
        Ok(Self::checked(response).await?.json().await?)
    }

    async fn list_subjects(&self) -> Result<Vec<Subject>, ApiError> {
        let url = self.endpoint("subjects")?;
        let response = self.authorize(self.client.get(url)).send().await?;
        Ok(Self::checked(response).await?.json().await?)
    }

    async fn subject_totals(&self) -> Result<HashMap<String, u64>, ApiError> {
        let url = self.endpoint("stats")?;
        let response = self.authorize(self.client.get(url)).send().await?;
        let stats: StatsResponse = Self::checked(response).await?.json().await?;
        Ok(stats
            .subjects
            .into_iter()
            .map(|s| (s.id, s.studied_minutes))
            .collect())
    }

    async fn settings(&self) -> Result<RemoteSettings, ApiError> {
        let url = self.endpoint("settings")?;
        let response = self.authorize(self.client.get(url)).send().await?;
        Ok(Self::checked(response).await?.json().await?)
    }
}
