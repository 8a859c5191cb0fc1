//! Public operations and payload types consumed by the web layer.

mod service;
mod types;

pub use service::SyncService;
pub use types::{
    ApiErrorBody, ApiResponse, ControlSyncRequest, ControlSyncResponse, CurrentSyncView,
    HealthMetrics, HealthResponse, HealthServices, HealthState, RepairApiRequest, ServiceState,
    StartSyncOptions, StartSyncRequest, StartSyncResponse, SyncHistoryQuery, SyncHistoryResponse,
    SyncStatusResponse, ValidateRequest, CODE_CONFLICT, CODE_INTERNAL_ERROR, CODE_INVALID_PARAMS,
    CODE_MISSING_PRODUCT_IDS, CODE_SYNC_NOT_FOUND,
};
