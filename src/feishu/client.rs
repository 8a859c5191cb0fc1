//! Feishu open-platform client: tenant token cache, bitable pagination,
//! drive media downloads.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tokio::sync::{Mutex, Semaphore};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::FeishuConfig;
use crate::error::{Result, SyncError};

use super::types::{
    ApiEnvelope, BatchDownloadResult, FieldListData, ListRecordsOptions, RawRecord,
    RecordListData, RecordsPage, TableField, TokenResponse,
};

/// Refresh the token this long before its reported expiry.
const TOKEN_SAFETY_WINDOW: Duration = Duration::from_secs(60);
/// Minimum spacing between successive record pages.
const PAGE_SPACING: Duration = Duration::from_millis(200);
/// Minimum spacing between media download batches.
const BATCH_SPACING: Duration = Duration::from_millis(500);
/// Bounded concurrency for batched media downloads.
const BATCH_CONCURRENCY: usize = 5;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(1);

const RECORD_TIMEOUT: Duration = Duration::from_secs(30);
const MEDIA_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Default)]
struct TokenCache {
    token: Option<String>,
    expires_at: Option<Instant>,
}

impl TokenCache {
    fn valid(&self) -> Option<String> {
        let expires_at = self.expires_at?;
        if Instant::now() + TOKEN_SAFETY_WINDOW < expires_at {
            self.token.clone()
        } else {
            None
        }
    }
}

#[derive(Clone)]
pub struct FeishuClient {
    http: Client,
    media_http: Client,
    config: FeishuConfig,
    /// Process-wide cache; the mutex serializes refreshes so concurrent
    /// callers await a single in-flight refresh.
    token: Arc<Mutex<TokenCache>>,
}

impl FeishuClient {
    pub fn new(config: FeishuConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(RECORD_TIMEOUT)
            .user_agent("product-sync/1.0")
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {e}")))?;
        let media_http = Client::builder()
            .timeout(MEDIA_TIMEOUT)
            .user_agent("product-sync/1.0")
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build media HTTP client: {e}")))?;

        Ok(Self {
            http,
            media_http,
            config,
            token: Arc::new(Mutex::new(TokenCache::default())),
        })
    }

    /// Returns the cached tenant token, refreshing when absent or inside the
    /// 60 s safety window before expiry.
    pub async fn get_access_token(&self) -> Result<String> {
        let mut cache = self.token.lock().await;
        if let Some(token) = cache.valid() {
            return Ok(token);
        }

        let response = self.refresh_token_with_retry().await?;
        let token = response.tenant_access_token.clone();
        cache.token = Some(token.clone());
        cache.expires_at = Some(Instant::now() + Duration::from_secs(response.expire));
        info!(expire_s = response.expire, "refreshed Feishu tenant token");
        Ok(token)
    }

    async fn invalidate_token(&self) {
        let mut cache = self.token.lock().await;
        cache.token = None;
        cache.expires_at = None;
    }

    async fn refresh_token_with_retry(&self) -> Result<TokenResponse> {
        let url = format!(
            "{}/open-apis/auth/v3/tenant_access_token/internal",
            self.config.base_url
        );
        let body = serde_json::json!({
            "app_id": self.config.app_id,
            "app_secret": self.config.app_secret,
        });

        let mut backoff = BACKOFF_BASE;
        let mut last_err = SyncError::upstream("token refresh never attempted", false);
        for attempt in 1..=MAX_ATTEMPTS {
            match self.refresh_token_once(&url, &body).await {
                Ok(token) => return Ok(token),
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    warn!(attempt, error = %e, "token refresh failed, backing off");
                    sleep(backoff).await;
                    backoff *= 2;
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    async fn refresh_token_once(&self, url: &str, body: &serde_json::Value) -> Result<TokenResponse> {
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(classify_reqwest)?;
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, "token refresh"));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SyncError::upstream(format!("bad token response: {e}"), false))?;
        if token.code != 0 {
            return Err(SyncError::upstream(
                format!("token refresh rejected (code {}): {}", token.code, token.msg),
                false,
            ));
        }
        Ok(token)
    }

    /// Authenticated GET with the handled-401 path: on 401 the cached token
    /// is invalidated and the call retried exactly once with a fresh token.
    async fn authed_get(
        &self,
        client: &Client,
        url: &str,
        query: &[(String, String)],
    ) -> Result<reqwest::Response> {
        for retry_after_401 in [false, true] {
            let token = self.get_access_token().await?;
            let response = client
                .get(url)
                .bearer_auth(&token)
                .query(query)
                .send()
                .await
                .map_err(classify_reqwest)?;

            if response.status() == StatusCode::UNAUTHORIZED && !retry_after_401 {
                warn!(url, "401 from upstream, refreshing token and retrying once");
                self.invalidate_token().await;
                continue;
            }
            let status = response.status();
            if !status.is_success() {
                return Err(classify_status(status, url));
            }
            return Ok(response);
        }
        unreachable!("401 retry loop always returns");
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(String, String)],
        what: &str,
    ) -> Result<T> {
        let response = self.authed_get(&self.http, url, query).await?;
        let envelope: ApiEnvelope<T> = response
            .json()
            .await
            .map_err(|e| SyncError::upstream(format!("bad {what} response: {e}"), false))?;
        if envelope.code != 0 {
            return Err(SyncError::upstream(
                format!("{what} rejected (code {}): {}", envelope.code, envelope.msg),
                false,
            ));
        }
        envelope
            .data
            .ok_or_else(|| SyncError::upstream(format!("{what} response missing data"), false))
    }

    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut backoff = BACKOFF_BASE;
        let mut last_err = SyncError::upstream(format!("{what} never attempted"), false);
        for attempt in 1..=MAX_ATTEMPTS {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    warn!(attempt, what, error = %e, "retryable upstream failure, backing off");
                    sleep(backoff).await;
                    backoff *= 2;
                    last_err = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    fn records_url(&self) -> String {
        format!(
            "{}/open-apis/bitable/v1/apps/{}/tables/{}/records",
            self.config.base_url, self.config.app_token, self.config.table_id
        )
    }

    pub async fn get_table_fields(&self) -> Result<Vec<TableField>> {
        let url = format!(
            "{}/open-apis/bitable/v1/apps/{}/tables/{}/fields",
            self.config.base_url, self.config.app_token, self.config.table_id
        );
        let data: FieldListData = self
            .with_retry("field listing", || self.get_json(&url, &[], "field listing"))
            .await?;
        Ok(data.items)
    }

    pub async fn get_table_records(&self, opts: &ListRecordsOptions) -> Result<RecordsPage> {
        let url = self.records_url();
        let mut query: Vec<(String, String)> = vec![(
            "page_size".into(),
            opts.effective_page_size().to_string(),
        )];
        if let Some(token) = &opts.page_token {
            query.push(("page_token".into(), token.clone()));
        }
        if let Some(filter) = &opts.filter {
            query.push(("filter".into(), filter.clone()));
        }
        if let Some(sort) = &opts.sort {
            query.push(("sort".into(), serde_json::to_string(sort)?));
        }
        if let Some(names) = &opts.field_names {
            query.push(("field_names".into(), serde_json::to_string(names)?));
        }

        let data: RecordListData = self
            .with_retry("record page", || self.get_json(&url, &query, "record page"))
            .await?;
        debug!(
            records = data.items.len(),
            has_more = data.has_more,
            "fetched record page"
        );
        Ok(RecordsPage {
            records: data.items,
            has_more: data.has_more,
            page_token: data.page_token,
        })
    }

    /// Pages through the whole table, spacing successive pages >=200 ms to
    /// respect upstream rate limits.
    pub async fn get_all_records(&self, opts: &ListRecordsOptions) -> Result<Vec<RawRecord>> {
        let mut all = Vec::new();
        let mut page_opts = opts.clone();
        let mut first = true;

        loop {
            if !first {
                sleep(PAGE_SPACING).await;
            }
            first = false;

            let page = self.get_table_records(&page_opts).await?;
            all.extend(page.records);
            if !page.has_more {
                break;
            }
            match page.page_token {
                Some(token) => page_opts.page_token = Some(token),
                None => break,
            }
        }

        info!(total = all.len(), "fetched all upstream records");
        Ok(all)
    }

    /// Authenticated fetch of a media blob. Fails loudly on an empty body or
    /// bytes that do not start with a known image magic.
    pub async fn download_image(&self, file_token: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}/open-apis/drive/v1/medias/{}/download",
            self.config.base_url, file_token
        );

        let mut backoff = BACKOFF_BASE;
        let mut attempt = 1;
        let bytes = loop {
            match self.fetch_media_once(&url).await {
                Ok(bytes) => break bytes,
                Err(e) if e.is_retryable() && attempt < MAX_ATTEMPTS => {
                    warn!(attempt, file_token, error = %e, "media download failed, backing off");
                    sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        if bytes.is_empty() {
            return Err(SyncError::upstream(
                format!("media {file_token} returned an empty body"),
                false,
            ));
        }
        if !looks_like_image(&bytes) {
            return Err(SyncError::upstream(
                format!("media {file_token} is not a recognized image format"),
                false,
            ));
        }
        Ok(bytes)
    }

    async fn fetch_media_once(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.authed_get(&self.media_http, url, &[]).await?;
        let bytes = response.bytes().await.map_err(classify_reqwest)?;
        Ok(bytes.to_vec())
    }

    /// Downloads many media blobs with bounded concurrency, >=500 ms between
    /// batches, collecting per-token errors instead of aborting the batch.
    pub async fn batch_download_images(&self, tokens: &[String]) -> BatchDownloadResult {
        let semaphore = Arc::new(Semaphore::new(BATCH_CONCURRENCY));
        let mut result = BatchDownloadResult::default();

        for (batch_index, batch) in tokens.chunks(BATCH_CONCURRENCY).enumerate() {
            if batch_index > 0 {
                sleep(BATCH_SPACING).await;
            }

            let mut handles = Vec::with_capacity(batch.len());
            for token in batch {
                let permit = semaphore.clone().acquire_owned().await.expect("semaphore");
                let client = self.clone();
                let task_token = token.clone();
                let handle = tokio::spawn(async move {
                    let _permit = permit;
                    client.download_image(&task_token).await
                });
                handles.push((token.clone(), handle));
            }

            for (token, handle) in handles {
                match handle.await {
                    Ok(Ok(bytes)) => {
                        result.downloaded.insert(token, bytes);
                    }
                    Ok(Err(e)) => {
                        warn!(token, error = %e, "media download failed");
                        result.failed.push((token, e.to_string()));
                    }
                    Err(e) => {
                        result.failed.push((token, format!("download task panicked: {e}")));
                    }
                }
            }
        }

        result
    }

    /// Cheap auth probe for the health endpoint.
    pub async fn check_auth(&self) -> Result<()> {
        self.get_access_token().await.map(|_| ())
    }
}

/// Known image magics: JPEG, PNG, WebP (RIFF....WEBP), GIF87a/GIF89a.
pub fn looks_like_image(bytes: &[u8]) -> bool {
    const PNG: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    if bytes.starts_with(&[0xFF, 0xD8]) {
        return true;
    }
    if bytes.starts_with(&PNG) {
        return true;
    }
    if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
        return true;
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return true;
    }
    false
}

fn classify_reqwest(e: reqwest::Error) -> SyncError {
    // Network errors and timeouts are transient by definition.
    SyncError::upstream(format!("request failed: {e}"), true)
}

fn classify_status(status: StatusCode, what: &str) -> SyncError {
    let retryable = status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error();
    SyncError::upstream(format!("{what} returned HTTP {status}"), retryable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_magic_detection() {
        assert!(looks_like_image(&[0xFF, 0xD8, 0xFF, 0xE0]));
        assert!(looks_like_image(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00]));
        assert!(looks_like_image(b"GIF89a......"));
        assert!(looks_like_image(b"RIFF\x00\x00\x00\x00WEBPVP8 "));
        assert!(!looks_like_image(b"RIFF\x00\x00\x00\x00WAVE"));
        assert!(!looks_like_image(b"<html>not an image</html>"));
        assert!(!looks_like_image(&[]));
    }

    #[test]
    fn status_classification() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "x").is_retryable());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "x").is_retryable());
        assert!(classify_status(StatusCode::REQUEST_TIMEOUT, "x").is_retryable());
        assert!(!classify_status(StatusCode::FORBIDDEN, "x").is_retryable());
        assert!(!classify_status(StatusCode::NOT_FOUND, "x").is_retryable());
    }
}
