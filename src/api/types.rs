//! Request / response payload shapes shared with the web layer.
//!
//! Every response is wrapped in [`ApiResponse`]; the HTTP server mounts
//! these types verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{SyncLog, SyncProgress, SyncStats};

pub const CODE_INVALID_PARAMS: &str = "INVALID_PARAMS";
pub const CODE_CONFLICT: &str = "CONFLICT";
pub const CODE_INTERNAL_ERROR: &str = "INTERNAL_ERROR";
pub const CODE_MISSING_PRODUCT_IDS: &str = "MISSING_PRODUCT_IDS";
pub const CODE_SYNC_NOT_FOUND: &str = "SYNC_NOT_FOUND";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

/// Shared response envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiErrorBody>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
            timestamp: Utc::now(),
            request_id: Some(format!("req_{}", Uuid::new_v4().simple())),
        }
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        let mut response = Self::ok(data);
        response.message = Some(message.into());
        response
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiErrorBody {
                code: code.into(),
                message: message.into(),
            }),
            message: None,
            timestamp: Utc::now(),
            request_id: Some(format!("req_{}", Uuid::new_v4().simple())),
        }
    }

    pub fn from_error(error: &crate::error::SyncError) -> Self {
        Self::error(error.code(), error.to_string())
    }
}

// --- POST /sync/feishu -----------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSyncRequest {
    pub mode: String,
    #[serde(default)]
    pub product_ids: Option<Vec<String>>,
    #[serde(default)]
    pub options: Option<StartSyncOptions>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSyncOptions {
    pub download_images: Option<bool>,
    pub validate_data: Option<bool>,
    pub dry_run: Option<bool>,
    pub batch_size: Option<usize>,
    pub concurrent_images: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSyncResponse {
    pub sync_id: String,
    /// Always `"started"`.
    pub status: String,
    /// Seconds, extrapolated from the previous completed run.
    pub estimated_duration: u64,
    pub progress_channel_url: String,
}

// --- GET /sync/status ------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentSyncView {
    pub sync_id: String,
    pub mode: String,
    pub started: DateTime<Utc>,
    pub paused: bool,
    pub progress: SyncProgress,
    pub stats: SyncStats,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_sync: Option<CurrentSyncView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<SyncLog>,
}

// --- POST /sync/control ----------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlSyncRequest {
    pub action: String,
    #[serde(default)]
    pub sync_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlSyncResponse {
    pub sync_id: String,
    pub action: String,
}

// --- GET /sync/history -----------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncHistoryQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncHistoryResponse {
    pub records: Vec<SyncLog>,
    pub pagination: crate::store::Pagination,
}

// --- POST /sync/validate ---------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub product_ids: Option<Vec<String>>,
    #[serde(default)]
    pub checks: Option<Vec<String>>,
}

// --- POST /sync/repair -----------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairApiRequest {
    #[serde(default)]
    pub issue_types: Option<Vec<String>>,
    #[serde(default)]
    pub product_ids: Option<Vec<String>>,
    #[serde(default)]
    pub dry_run: Option<bool>,
}

// --- GET /health -----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthServices {
    pub database: ServiceState,
    pub object_store: ServiceState,
    pub upstream: ServiceState,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthMetrics {
    /// Seconds since the service was constructed.
    pub uptime: u64,
    #[serde(rename = "memoryMB")]
    pub memory_mb: u64,
    pub cpu_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: HealthState,
    pub services: HealthServices,
    pub metrics: HealthMetrics,
}
