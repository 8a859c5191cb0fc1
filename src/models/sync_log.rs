//! Append-only record of sync runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Full,
    Incremental,
    Selective,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Incremental => "incremental",
            SyncMode::Selective => "selective",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "full" => Some(SyncMode::Full),
            "incremental" => Some(SyncMode::Incremental),
            "selective" => Some(SyncMode::Selective),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Running => "running",
            SyncStatus::Paused => "paused",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
            SyncStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(SyncStatus::Running),
            "paused" => Some(SyncStatus::Paused),
            "completed" => Some(SyncStatus::Completed),
            "failed" => Some(SyncStatus::Failed),
            "cancelled" => Some(SyncStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncStatus::Completed | SyncStatus::Failed | SyncStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub total_records: u64,
    pub processed_records: u64,
    pub created_records: u64,
    pub updated_records: u64,
    pub deleted_records: u64,
    pub processed_images: u64,
    pub failed_images: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncErrorLog {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SyncErrorLog {
    pub fn new(error_type: &str, message: impl Into<String>, product_id: Option<String>) -> Self {
        Self {
            error_type: error_type.to_string(),
            message: message.into(),
            product_id,
            timestamp: Utc::now(),
        }
    }
}

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    Initializing,
    FetchingData,
    ProcessingRecords,
    DownloadingImages,
}

impl SyncStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStage::Initializing => "initializing",
            SyncStage::FetchingData => "fetching_data",
            SyncStage::ProcessingRecords => "processing_records",
            SyncStage::DownloadingImages => "downloading_images",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub stage: SyncStage,
    /// Percentage within the current stage.
    pub percentage: u8,
    pub current_operation: String,
}

impl SyncProgress {
    pub fn new(stage: SyncStage, percentage: u8, operation: impl Into<String>) -> Self {
        Self {
            stage,
            percentage: percentage.min(100),
            current_operation: operation.into(),
        }
    }
}

impl Default for SyncProgress {
    fn default() -> Self {
        Self::new(SyncStage::Initializing, 0, "initializing sync run")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncLog {
    pub log_id: String,
    pub sync_type: SyncMode,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub status: SyncStatus,
    #[serde(default)]
    pub stats: SyncStats,
    #[serde(default)]
    pub error_logs: Vec<SyncErrorLog>,
    /// Redacted copy of the upstream config and sync options for this run.
    pub config: serde_json::Value,
    pub progress: SyncProgress,
}

impl SyncLog {
    pub fn open(log_id: String, sync_type: SyncMode, config: serde_json::Value) -> Self {
        Self {
            log_id,
            sync_type,
            start_time: Utc::now(),
            end_time: None,
            status: SyncStatus::Running,
            stats: SyncStats::default(),
            error_logs: Vec::new(),
            config,
            progress: SyncProgress::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(SyncStatus::Completed.is_terminal());
        assert!(SyncStatus::Failed.is_terminal());
        assert!(SyncStatus::Cancelled.is_terminal());
        assert!(!SyncStatus::Running.is_terminal());
        assert!(!SyncStatus::Paused.is_terminal());
    }

    #[test]
    fn stage_names_match_wire_format() {
        assert_eq!(SyncStage::FetchingData.as_str(), "fetching_data");
        let progress = SyncProgress::new(SyncStage::ProcessingRecords, 50, "processing 5/10");
        let value = serde_json::to_value(&progress).unwrap();
        assert_eq!(value["stage"], "processing_records");
        assert_eq!(value["currentOperation"], "processing 5/10");
    }

    #[test]
    fn percentage_is_clamped() {
        let progress = SyncProgress::new(SyncStage::ProcessingRecords, 180, "overflow");
        assert_eq!(progress.percentage, 100);
    }
}
