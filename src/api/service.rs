//! Service facade: the explicit dependency graph assembled at startup.
//!
//! The web layer holds one `SyncService` and calls these operations; tests
//! construct the same graph with a fake upstream and an in-memory blob
//! store.

use std::sync::Arc;
use std::time::Instant;

use sysinfo::System;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::consistency::{
    ConsistencyChecker, RepairIssueType, RepairReport, RepairRequest, ValidationCheck,
    ValidationReport, ValidationScope,
};
use crate::error::{Result, SyncError};
use crate::feishu::{FeishuClient, UpstreamSource};
use crate::images::{CleanupReport, ImageService, RepairImagesReport};
use crate::models::{SyncMode, SyncStatus};
use crate::storage::{BlobStore, S3BlobStore};
use crate::store::{Database, ImageStore, ProductStore, SyncLogFilter, SyncLogStore};
use crate::sync::{ControlAction, SyncOptions, SyncOrchestrator};

use super::types::*;

const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Clone)]
pub struct SyncService {
    config: AppConfig,
    database: Database,
    products: Arc<ProductStore>,
    images: Arc<ImageStore>,
    sync_logs: Arc<SyncLogStore>,
    blobs: Arc<dyn BlobStore>,
    upstream: Arc<dyn UpstreamSource>,
    image_service: ImageService,
    orchestrator: Arc<SyncOrchestrator>,
    consistency: Arc<ConsistencyChecker>,
    started_at: Instant,
}

impl SyncService {
    /// Assembles the dependency graph over concrete collaborators.
    pub fn new(
        config: AppConfig,
        upstream: Arc<dyn UpstreamSource>,
        blobs: Arc<dyn BlobStore>,
    ) -> Result<Self> {
        let database = Database::open(&config.database_path)?;
        Self::with_database(config, upstream, blobs, database)
    }

    /// Same graph over an already-open database; tests use this with an
    /// in-memory one.
    pub fn with_database(
        config: AppConfig,
        upstream: Arc<dyn UpstreamSource>,
        blobs: Arc<dyn BlobStore>,
        database: Database,
    ) -> Result<Self> {
        let products = Arc::new(database.products());
        let images = Arc::new(database.images());
        let sync_logs = Arc::new(database.sync_logs());

        let image_service = ImageService::new(upstream.clone(), blobs.clone(), images.clone());
        let orchestrator = Arc::new(SyncOrchestrator::new(
            upstream.clone(),
            products.clone(),
            sync_logs.clone(),
            image_service.clone(),
            config.redacted(),
        ));
        let consistency = Arc::new(ConsistencyChecker::new(
            products.clone(),
            images.clone(),
            image_service.clone(),
        ));

        Ok(Self {
            config,
            database,
            products,
            images,
            sync_logs,
            blobs,
            upstream,
            image_service,
            orchestrator,
            consistency,
            started_at: Instant::now(),
        })
    }

    /// Production wiring from environment variables.
    pub fn from_env() -> Result<Self> {
        let config = AppConfig::from_env().map_err(|e| SyncError::Config(e.to_string()))?;
        let upstream = Arc::new(FeishuClient::new(config.feishu.clone())?);
        let blobs = Arc::new(S3BlobStore::new(&config.minio)?);
        Self::new(config, upstream, blobs)
    }

    fn build_options(&self, request: &StartSyncRequest) -> Result<SyncOptions> {
        let mode = SyncMode::parse(&request.mode).ok_or_else(|| {
            SyncError::InvalidParams(format!("unknown sync mode '{}'", request.mode))
        })?;

        let mut options = SyncOptions::new(mode);
        options.batch_size = self.config.sync.batch_size;
        options.concurrent_images = self.config.sync.concurrent_images;
        options.product_ids = request.product_ids.clone().unwrap_or_default();

        if let Some(overrides) = &request.options {
            if let Some(v) = overrides.download_images {
                options.download_images = v;
            }
            if let Some(v) = overrides.validate_data {
                options.validate_data = v;
            }
            if let Some(v) = overrides.dry_run {
                options.dry_run = v;
            }
            if let Some(v) = overrides.batch_size {
                options.batch_size = v.max(1);
            }
            if let Some(v) = overrides.concurrent_images {
                options.concurrent_images = v.max(1);
            }
        }
        Ok(options)
    }

    /// Starts a sync in the background and returns immediately with its id.
    /// Rejects with `Conflict` while another run is active.
    pub fn start_sync(&self, request: &StartSyncRequest) -> Result<StartSyncResponse> {
        let options = self.build_options(request)?;
        let claim = self.orchestrator.claim_run(&options)?;
        let sync_id = claim.sync_id.clone();
        let estimated_duration = self.orchestrator.estimate_duration_secs(&options);

        let orchestrator = self.orchestrator.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.execute_run(claim, options).await {
                error!(error = %e, "sync run ended with an entry-level error");
            }
        });

        info!(sync_id = %sync_id, "sync started in background");
        Ok(StartSyncResponse {
            progress_channel_url: format!("/sync/progress/{sync_id}"),
            sync_id,
            status: "started".into(),
            estimated_duration,
        })
    }

    /// Runs a sync inline to completion (CLI-style entry).
    pub async fn run_sync(&self, request: &StartSyncRequest) -> Result<crate::sync::SyncReport> {
        let options = self.build_options(request)?;
        self.orchestrator.sync_from_feishu(options).await
    }

    pub fn control_sync(&self, request: &ControlSyncRequest) -> Result<ControlSyncResponse> {
        let action = ControlAction::parse(&request.action).ok_or_else(|| {
            SyncError::InvalidParams(format!("unknown control action '{}'", request.action))
        })?;
        let sync_id = self
            .orchestrator
            .control_sync(action, request.sync_id.as_deref())?;
        Ok(ControlSyncResponse {
            sync_id,
            action: request.action.clone(),
        })
    }

    pub fn sync_status(&self) -> Result<SyncStatusResponse> {
        let current_sync = match self.orchestrator.current_sync() {
            Some(active) => {
                let stats = self
                    .sync_logs
                    .find_by_id(&active.sync_id)?
                    .map(|log| log.stats)
                    .unwrap_or_default();
                Some(CurrentSyncView {
                    sync_id: active.sync_id,
                    mode: active.mode.as_str().to_string(),
                    started: active.started,
                    paused: active.paused,
                    progress: active.progress,
                    stats,
                })
            }
            None => None,
        };

        let last_sync = self
            .sync_logs
            .find_recent(10)?
            .into_iter()
            .find(|log| log.status.is_terminal());

        Ok(SyncStatusResponse {
            current_sync,
            last_sync,
        })
    }

    pub fn sync_history(&self, query: &SyncHistoryQuery) -> Result<SyncHistoryResponse> {
        let status = query
            .status
            .as_deref()
            .map(|s| {
                SyncStatus::parse(s)
                    .ok_or_else(|| SyncError::InvalidParams(format!("unknown status '{s}'")))
            })
            .transpose()?;
        let mode = query
            .mode
            .as_deref()
            .map(|m| {
                SyncMode::parse(m)
                    .ok_or_else(|| SyncError::InvalidParams(format!("unknown mode '{m}'")))
            })
            .transpose()?;

        let page = self.sync_logs.find_filtered(&SyncLogFilter {
            status,
            mode,
            start_date: query.start_date,
            end_date: query.end_date,
            page: query.page.unwrap_or(1),
            limit: query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT),
        })?;

        Ok(SyncHistoryResponse {
            records: page.records,
            pagination: page.pagination,
        })
    }

    pub async fn validate(&self, request: &ValidateRequest) -> Result<ValidationReport> {
        let scope = match request.scope.as_deref().unwrap_or("all") {
            "all" => ValidationScope::All,
            "recent" => ValidationScope::Recent,
            "selective" => {
                let ids = request.product_ids.clone().unwrap_or_default();
                if ids.is_empty() {
                    return Err(SyncError::MissingProductIds);
                }
                ValidationScope::Selective(ids)
            }
            other => {
                return Err(SyncError::InvalidParams(format!(
                    "unknown validation scope '{other}'"
                )))
            }
        };

        let checks = match &request.checks {
            None => ValidationCheck::ALL.to_vec(),
            Some(names) => names
                .iter()
                .map(|name| {
                    ValidationCheck::parse(name).ok_or_else(|| {
                        SyncError::InvalidParams(format!("unknown check '{name}'"))
                    })
                })
                .collect::<Result<Vec<_>>>()?,
        };

        self.consistency.validate(scope, &checks).await
    }

    pub async fn repair(&self, request: &RepairApiRequest) -> Result<RepairReport> {
        let issue_types = match &request.issue_types {
            None => Vec::new(),
            Some(names) => names
                .iter()
                .map(|name| {
                    RepairIssueType::parse(name).ok_or_else(|| {
                        SyncError::InvalidParams(format!("unknown issue type '{name}'"))
                    })
                })
                .collect::<Result<Vec<_>>>()?,
        };

        self.consistency
            .repair(RepairRequest {
                issue_types,
                product_ids: request.product_ids.clone(),
                dry_run: request.dry_run.unwrap_or(false),
            })
            .await
    }

    pub async fn repair_broken_images(&self) -> Result<RepairImagesReport> {
        self.image_service.repair_broken_images().await
    }

    pub async fn cleanup_inactive_images(&self) -> Result<CleanupReport> {
        self.image_service.cleanup_inactive_images().await
    }

    /// Probes the three external collaborators and reports process metrics.
    /// A dead database or object store is `unhealthy`; an unreachable
    /// upstream alone degrades.
    pub async fn health_check(&self) -> HealthResponse {
        let database = match self.database.ping() {
            Ok(()) => ServiceState::Up,
            Err(_) => ServiceState::Down,
        };
        let object_store = match self.blobs.ping().await {
            Ok(()) => ServiceState::Up,
            Err(_) => ServiceState::Down,
        };
        let upstream = match self.upstream.check_auth().await {
            Ok(()) => ServiceState::Up,
            Err(_) => ServiceState::Down,
        };

        let status = match (database, object_store, upstream) {
            (ServiceState::Up, ServiceState::Up, ServiceState::Up) => HealthState::Healthy,
            (ServiceState::Up, ServiceState::Up, ServiceState::Down) => HealthState::Degraded,
            _ => HealthState::Unhealthy,
        };

        HealthResponse {
            status,
            services: HealthServices {
                database,
                object_store,
                upstream,
            },
            metrics: self.process_metrics(),
        }
    }

    fn process_metrics(&self) -> HealthMetrics {
        let uptime = self.started_at.elapsed().as_secs();

        let mut system = System::new_all();
        system.refresh_all();
        let process = sysinfo::get_current_pid()
            .ok()
            .and_then(|pid| system.process(pid));

        let memory_mb = process.map(|p| p.memory() / (1024 * 1024)).unwrap_or(0);
        let cpu_ms = process
            .map(|p| ((p.cpu_usage() as f64 / 100.0) * (p.run_time() as f64) * 1000.0) as u64)
            .unwrap_or(0);

        HealthMetrics {
            uptime,
            memory_mb,
            cpu_ms,
        }
    }

    // Component accessors used by tests and the web layer.

    pub fn products(&self) -> &Arc<ProductStore> {
        &self.products
    }

    pub fn images(&self) -> &Arc<ImageStore> {
        &self.images
    }

    pub fn sync_logs(&self) -> &Arc<SyncLogStore> {
        &self.sync_logs
    }

    pub fn image_service(&self) -> &ImageService {
        &self.image_service
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}
