//! HTTP remote store
//!
//! Documents live at `{base}/users/{account}/habits/{key}`. Listing returns
//! `[{ "key", "fields" }]`, creating returns `{ "key" }`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use super::{RemoteError, RemoteResult, RemoteStore};
use crate::error::{Error, Result};
use crate::models::{RecordFields, RemoteDocument, RemoteKey};
use crate::util::{compact_text, is_http_url};

#[derive(Clone)]
pub struct HttpRemoteStore {
    base_url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct CreatedDocument {
    key: String,
}

impl HttpRemoteStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        if !is_http_url(&base_url) {
            return Err(Error::Config(format!(
                "remote URL must include http:// or https://: {base_url}"
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| Error::Config(format!("failed to build HTTP client: {error}")))?;

        Ok(Self { base_url, client })
    }

    fn collection_url(&self, account: &str) -> String {
        format!(
            "{}/users/{}/habits",
            self.base_url,
            urlencoding::encode(account)
        )
    }

    fn document_url(&self, account: &str, key: &RemoteKey) -> String {
        format!(
            "{}/{}",
            self.collection_url(account),
            urlencoding::encode(key.as_str())
        )
    }

    async fn check(response: Response) -> RemoteResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }
}

fn status_error(status: StatusCode, body: &str) -> RemoteError {
    let message = compact_text(body);
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        RemoteError::Unavailable(format!("HTTP {}: {message}", status.as_u16()))
    } else {
        RemoteError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

fn transport_error(error: &reqwest::Error) -> RemoteError {
    if error.is_timeout() {
        RemoteError::Timeout
    } else if error.is_decode() {
        RemoteError::InvalidPayload(error.to_string())
    } else {
        RemoteError::Unavailable(error.to_string())
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn list_all(&self, account: &str) -> RemoteResult<Vec<RemoteDocument>> {
        let response = self
            .client
            .get(self.collection_url(account))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        Self::check(response)
            .await?
            .json::<Vec<RemoteDocument>>()
            .await
            .map_err(|e| transport_error(&e))
    }

    async fn get(&self, account: &str, key: &RemoteKey) -> RemoteResult<Option<RemoteDocument>> {
        let response = self
            .client
            .get(self.document_url(account, key))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let fields = Self::check(response)
            .await?
            .json::<RecordFields>()
            .await
            .map_err(|e| transport_error(&e))?;
        Ok(Some(RemoteDocument {
            key: key.clone(),
            fields,
        }))
    }

    async fn create(&self, account: &str, fields: &RecordFields) -> RemoteResult<RemoteKey> {
        let response = self
            .client
            .post(self.collection_url(account))
            .json(fields)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        let created = Self::check(response)
            .await?
            .json::<CreatedDocument>()
            .await
            .map_err(|e| transport_error(&e))?;

        let key = created.key.trim();
        if key.is_empty() {
            return Err(RemoteError::InvalidPayload(
                "create response did not include a key".to_string(),
            ));
        }
        Ok(RemoteKey::new(key))
    }

    async fn set(&self, account: &str, key: &RemoteKey, fields: &RecordFields) -> RemoteResult<()> {
        let response = self
            .client
            .put(self.document_url(account, key))
            .json(fields)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        Self::check(response).await?;
        Ok(())
    }

    async fn delete(&self, account: &str, key: &RemoteKey) -> RemoteResult<()> {
        let response = self
            .client
            .delete(self.document_url(account, key))
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(response).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
