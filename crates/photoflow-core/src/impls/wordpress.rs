//! MediaPublisher for the WordPress REST media endpoint
//! (`POST {site}/wp-json/wp/v2/media`).

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_DISPOSITION, CONTENT_TYPE};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::ports::{MediaPublisher, PublishError, UploadedMedia};

/// Rejection bodies are cut to this many characters before being stored.
const ERROR_BODY_LIMIT: usize = 200;

pub const MOD_SECURITY_HINT: &str = "406 from WordPress usually means a request filter \
(mod_security) is blocking /wp-json/wp/v2/media; ask the host to whitelist it";

/// Site credentials. Only constructed when all three values are present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordPressCredentials {
    pub site_url: String,
    pub username: String,
    pub password: String,
}

impl WordPressCredentials {
    pub fn new(
        site_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            site_url: site_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn api_root(&self) -> String {
        format!("{}/wp-json/", self.site_url)
    }

    pub fn media_endpoint(&self) -> String {
        format!("{}/wp-json/wp/v2/media", self.site_url)
    }

    pub fn current_user_endpoint(&self) -> String {
        format!("{}/wp-json/wp/v2/users/me", self.site_url)
    }
}

pub struct WordPressClient {
    http: reqwest::Client,
    credentials: WordPressCredentials,
}

impl WordPressClient {
    pub fn new(credentials: WordPressCredentials, timeout: Duration) -> Result<Self, PublishError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PublishError::Transport(e.to_string()))?;
        Ok(Self { http, credentials })
    }

    /// HTTP status of the unauthenticated REST index (`GET /wp-json/`).
    pub async fn api_status(&self) -> Result<u16, PublishError> {
        let response = self
            .http
            .get(self.credentials.api_root())
            .send()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;
        Ok(response.status().as_u16())
    }

    /// Authenticate against `users/me` and return the account's display name.
    pub async fn verify(&self) -> Result<String, PublishError> {
        let response = self
            .http
            .get(self.credentials.current_user_endpoint())
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::Rejected {
                status,
                body: truncate_chars(&body, ERROR_BODY_LIMIT),
            });
        }

        let user: CurrentUser = response
            .json()
            .await
            .map_err(|e| PublishError::InvalidResponse(e.to_string()))?;
        Ok(user.name)
    }
}

#[derive(Deserialize)]
struct CurrentUser {
    name: String,
}

#[derive(Deserialize)]
struct MediaResponse {
    id: u64,
    source_url: String,
}

fn truncate_chars(s: &str, limit: usize) -> String {
    s.chars().take(limit).collect()
}

#[async_trait]
impl MediaPublisher for WordPressClient {
    async fn upload(
        &self,
        file_path: &Path,
        filename: &str,
    ) -> Result<UploadedMedia, PublishError> {
        let bytes = tokio::fs::read(file_path)
            .await
            .map_err(|source| PublishError::Read {
                path: file_path.display().to_string(),
                source,
            })?;

        let response = self
            .http
            .post(self.credentials.media_endpoint())
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .header(CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\""))
            .header(CONTENT_TYPE, "image/jpeg")
            .header(ACCEPT, "application/json")
            .body(bytes)
            .send()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 && status != 201 {
            let body = response.text().await.unwrap_or_default();
            if status == 406 {
                warn!(filename, "{MOD_SECURITY_HINT}");
            }
            return Err(PublishError::Rejected {
                status,
                body: truncate_chars(&body, ERROR_BODY_LIMIT),
            });
        }

        let media: MediaResponse = response
            .json()
            .await
            .map_err(|e| PublishError::InvalidResponse(e.to_string()))?;

        debug!(media_id = media.id, url = %media.source_url, "media uploaded");
        Ok(UploadedMedia {
            media_id: media.id,
            media_url: media.source_url,
        })
    }
}
