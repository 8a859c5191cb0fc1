//! The sync orchestrator: drives the fetch -> transform -> diff -> upsert ->
//! image pipeline end to end for one run, owning the SyncLog row throughout.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::feishu::{ListRecordsOptions, UpstreamSource};
use crate::images::{ImageJob, ImageService};
use crate::models::{
    SyncErrorLog, SyncLog, SyncMode, SyncProgress, SyncStage, SyncStats, SyncStatus,
};
use crate::store::{ProductStore, SyncLogStore};
use crate::transform::{detect_changes, TransformedRecord, Transformer};

use super::control::SyncControl;
use super::progress::ProgressReporter;

/// Incremental cutoff fallback when no prior successful run exists.
const FIRST_RUN_WINDOW_HOURS: i64 = 24;
/// Assumed cost per record when no completed run provides a rate.
const FALLBACK_SECS_PER_RECORD: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub mode: SyncMode,
    pub product_ids: Vec<String>,
    pub download_images: bool,
    pub validate_data: bool,
    pub dry_run: bool,
    pub batch_size: usize,
    pub concurrent_images: usize,
}

impl SyncOptions {
    pub fn new(mode: SyncMode) -> Self {
        Self {
            mode,
            product_ids: Vec::new(),
            download_images: true,
            validate_data: true,
            dry_run: false,
            batch_size: 50,
            concurrent_images: 5,
        }
    }

    fn as_json(&self) -> serde_json::Value {
        serde_json::json!({
            "mode": self.mode.as_str(),
            "productIds": self.product_ids,
            "downloadImages": self.download_images,
            "validateData": self.validate_data,
            "dryRun": self.dry_run,
            "batchSize": self.batch_size,
            "concurrentImages": self.concurrent_images,
        })
    }
}

/// Final report of a run. Entry rejections (conflict, bad params) surface
/// as errors instead; a report is produced for every run that opened a log.
#[derive(Debug)]
pub struct SyncReport {
    pub sync_id: String,
    pub status: SyncStatus,
    pub stats: SyncStats,
    pub error_logs: Vec<SyncErrorLog>,
    pub duration_ms: i64,
}

/// Control actions accepted by [`SyncOrchestrator::control_sync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Pause,
    Resume,
    Cancel,
}

impl ControlAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pause" => Some(ControlAction::Pause),
            "resume" => Some(ControlAction::Resume),
            "cancel" => Some(ControlAction::Cancel),
            _ => None,
        }
    }
}

/// Live view of the in-flight run, exposed to status queries.
#[derive(Debug, Clone)]
pub struct ActiveSyncView {
    pub sync_id: String,
    pub mode: SyncMode,
    pub started: DateTime<Utc>,
    pub paused: bool,
    pub progress: SyncProgress,
}

struct ActiveSync {
    sync_id: String,
    mode: SyncMode,
    started: DateTime<Utc>,
    control: Arc<SyncControl>,
    progress_rx: watch::Receiver<SyncProgress>,
}

/// A claimed run slot: the sync id is known before the pipeline starts, so
/// callers can respond immediately and execute in the background.
pub struct RunClaim {
    pub sync_id: String,
    control: Arc<SyncControl>,
    reporter: ProgressReporter,
    guard: ActiveSlotGuard,
}

/// Clears the process-wide "current run" slot when the run exits, however
/// it exits.
struct ActiveSlotGuard {
    slot: Arc<Mutex<Option<ActiveSync>>>,
}

impl Drop for ActiveSlotGuard {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}

pub struct SyncOrchestrator {
    upstream: Arc<dyn UpstreamSource>,
    transformer: Transformer,
    products: Arc<ProductStore>,
    sync_logs: Arc<SyncLogStore>,
    images: ImageService,
    config_snapshot: serde_json::Value,
    active: Arc<Mutex<Option<ActiveSync>>>,
}

impl SyncOrchestrator {
    pub fn new(
        upstream: Arc<dyn UpstreamSource>,
        products: Arc<ProductStore>,
        sync_logs: Arc<SyncLogStore>,
        images: ImageService,
        config_snapshot: serde_json::Value,
    ) -> Self {
        Self {
            upstream,
            transformer: Transformer::new(),
            products,
            sync_logs,
            images,
            config_snapshot,
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Runs one sync end to end. At most one run is active per process;
    /// a second entry is rejected with `Conflict`.
    pub async fn sync_from_feishu(&self, options: SyncOptions) -> Result<SyncReport> {
        let claim = self.claim_run(&options)?;
        self.execute_run(claim, options).await
    }

    /// Validates the options and claims the process-wide run slot. The
    /// returned claim carries the sync id; dropping it without executing
    /// releases the slot.
    pub fn claim_run(&self, options: &SyncOptions) -> Result<RunClaim> {
        if options.mode == SyncMode::Selective && options.product_ids.is_empty() {
            return Err(SyncError::MissingProductIds);
        }

        let sync_id = format!("sync_{}", Uuid::new_v4().simple());
        let control = SyncControl::new();
        let (reporter, progress_rx) = ProgressReporter::new();

        {
            let mut slot = self.active.lock();
            if slot.is_some() {
                return Err(SyncError::Conflict);
            }
            *slot = Some(ActiveSync {
                sync_id: sync_id.clone(),
                mode: options.mode,
                started: Utc::now(),
                control: control.clone(),
                progress_rx,
            });
        }

        Ok(RunClaim {
            sync_id,
            control,
            reporter,
            guard: ActiveSlotGuard {
                slot: self.active.clone(),
            },
        })
    }

    /// Executes a claimed run to its terminal status.
    pub async fn execute_run(&self, claim: RunClaim, options: SyncOptions) -> Result<SyncReport> {
        let RunClaim {
            sync_id,
            control,
            reporter,
            guard: _guard,
        } = claim;

        let mut log = SyncLog::open(
            sync_id.clone(),
            options.mode,
            serde_json::json!({
                "upstream": self.config_snapshot,
                "options": options.as_json(),
            }),
        );
        // A store outage that prevents the log write fails the run up front.
        self.sync_logs.create(&log)?;

        info!(sync_id = %sync_id, mode = options.mode.as_str(), dry_run = options.dry_run, "sync run started");

        let outcome = self
            .run_pipeline(&options, &control, &reporter, &mut log)
            .await;

        log.end_time = Some(Utc::now());
        log.status = match &outcome {
            Ok(()) => SyncStatus::Completed,
            Err(SyncError::Cancelled) => SyncStatus::Cancelled,
            Err(_) => SyncStatus::Failed,
        };
        if let Err(e) = &outcome {
            if !matches!(e, SyncError::Cancelled) {
                log.error_logs
                    .push(SyncErrorLog::new("fatal", e.to_string(), None));
            }
        }
        if log.status == SyncStatus::Completed {
            log.progress = SyncProgress::new(SyncStage::DownloadingImages, 100, "sync complete");
        }
        self.sync_logs.save(&log)?;

        let duration_ms = log
            .end_time
            .map(|end| (end - log.start_time).num_milliseconds())
            .unwrap_or(0);
        match log.status {
            SyncStatus::Completed => {
                info!(sync_id = %sync_id, stats = ?log.stats, duration_ms, "sync run completed")
            }
            SyncStatus::Cancelled => warn!(sync_id = %sync_id, duration_ms, "sync run cancelled"),
            _ => error!(sync_id = %sync_id, duration_ms, "sync run failed"),
        }

        Ok(SyncReport {
            sync_id,
            status: log.status,
            stats: log.stats,
            error_logs: log.error_logs,
            duration_ms,
        })
    }

    async fn run_pipeline(
        &self,
        options: &SyncOptions,
        control: &SyncControl,
        reporter: &ProgressReporter,
        log: &mut SyncLog,
    ) -> Result<()> {
        reporter.report(SyncStage::Initializing, 0, "preparing sync run");
        control.checkpoint().await?;

        // --- fetch ---------------------------------------------------------
        reporter.report(SyncStage::FetchingData, 0, "fetching upstream records");
        log.progress = reporter.current();
        self.sync_logs.save(log)?;

        let mut records = self
            .upstream
            .get_all_records(&ListRecordsOptions::default())
            .await?;

        if options.mode == SyncMode::Selective {
            let wanted: HashSet<&str> = options.product_ids.iter().map(String::as_str).collect();
            records.retain(|record| wanted.contains(record.record_id.as_str()));
        }
        reporter.report(
            SyncStage::FetchingData,
            100,
            format!("fetched {} records", records.len()),
        );
        control.checkpoint().await?;

        // --- transform -----------------------------------------------------
        let sync_time = Utc::now();
        let batch = self.transformer.batch_transform(&records, sync_time);
        for failed in &batch.failed {
            log.error_logs.push(SyncErrorLog::new(
                "transform",
                failed
                    .errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
                Some(failed.record_id.clone()),
            ));
            log.stats.errors += 1;
        }
        if options.validate_data {
            for transformed in &batch.successful {
                for warning in &transformed.warnings {
                    log.error_logs.push(SyncErrorLog::new(
                        "validation_warning",
                        warning.to_string(),
                        Some(transformed.product.product_id.clone()),
                    ));
                }
            }
        }

        let mut retained = batch.successful;
        if options.mode == SyncMode::Incremental {
            let cutoff = self.incremental_cutoff()?;
            retained.retain(|t| t.product.collect_time > cutoff);
            info!(
                cutoff = %cutoff,
                retained = retained.len(),
                "incremental cutoff applied"
            );
        }

        log.stats.total_records = retained.len() as u64;

        // --- process records ----------------------------------------------
        let upstream_ids: HashSet<String> = retained
            .iter()
            .map(|t| t.product.product_id.clone())
            .collect();
        let mut image_jobs: Vec<ImageJob> = Vec::new();
        let total = retained.len() as u64;

        for transformed in retained {
            control.checkpoint().await?;

            let processed = log.stats.processed_records + 1;
            reporter.report(
                SyncStage::ProcessingRecords,
                per_stage_percentage(processed, total),
                format!("processing record {processed}/{total}"),
            );

            self.process_one(options, transformed, log, &mut image_jobs);
            log.stats.processed_records = processed;

            // Snapshot the log once per batch so status queries stay fresh
            // without a write per record.
            if processed % options.batch_size.max(1) as u64 == 0 {
                log.progress = reporter.current();
                self.sync_logs.save(log)?;
            }
        }

        // Full mode: products that disappeared upstream go inactive.
        if options.mode == SyncMode::Full {
            self.soft_delete_missing(options, &upstream_ids, control, log)
                .await?;
        }

        log.progress = reporter.current();
        self.sync_logs.save(log)?;

        // --- images --------------------------------------------------------
        if options.download_images && !options.dry_run && !image_jobs.is_empty() {
            control.checkpoint().await?;
            let job_count: usize = image_jobs.iter().map(|j| j.file_tokens.len()).sum();
            reporter.report(
                SyncStage::DownloadingImages,
                0,
                format!("downloading {job_count} images"),
            );

            let result = self
                .images
                .batch_download_from_feishu(&image_jobs, options.concurrent_images)
                .await;

            log.stats.processed_images = result.successful.len() as u64;
            log.stats.failed_images = result.failed.len() as u64;
            for failure in &result.failed {
                log.error_logs.push(SyncErrorLog::new(
                    "image",
                    format!("token {}: {}", failure.file_token, failure.error),
                    Some(failure.product_id.clone()),
                ));
            }

            // Write the uploaded URLs back onto the products.
            for record in &result.successful {
                if let Err(e) =
                    self.products
                        .set_image_url(&record.product_id, record.image_type, &record.public_url)
                {
                    warn!(product_id = %record.product_id, error = %e, "failed to attach image URL");
                    log.stats.errors += 1;
                    log.error_logs.push(SyncErrorLog::new(
                        "store",
                        e.to_string(),
                        Some(record.product_id.clone()),
                    ));
                }
            }

            reporter.report(SyncStage::DownloadingImages, 100, "image downloads finished");
        }

        Ok(())
    }

    /// Transform output -> store mutation for one product. Store failures
    /// are recorded and skipped; they never abort the run.
    fn process_one(
        &self,
        options: &SyncOptions,
        transformed: TransformedRecord,
        log: &mut SyncLog,
        image_jobs: &mut Vec<ImageJob>,
    ) {
        let mut product = transformed.product;
        let product_id = product.product_id.clone();

        let existing = match self.products.find(&product_id) {
            Ok(existing) => existing,
            Err(e) => {
                warn!(product_id = %product_id, error = %e, "product lookup failed");
                log.stats.errors += 1;
                log.error_logs
                    .push(SyncErrorLog::new("store", e.to_string(), Some(product_id)));
                return;
            }
        };

        enum Write {
            Created,
            Updated,
            Unchanged,
        }

        let mutation: Result<Write> = (|| {
            if let Some(existing) = existing {
                // Image URLs are written after upload; carry the stored ones
                // so their absence on the fresh transform is not a diff.
                product.images = existing.images.clone();
                if !detect_changes(&product, &existing).has_changes {
                    return Ok(Write::Unchanged);
                }
                if !options.dry_run {
                    self.products.upsert(&product)?;
                }
                Ok(Write::Updated)
            } else {
                if !options.dry_run {
                    self.products.upsert(&product)?;
                }
                Ok(Write::Created)
            }
        })();

        match mutation {
            Ok(Write::Created) => log.stats.created_records += 1,
            Ok(Write::Updated) => log.stats.updated_records += 1,
            Ok(Write::Unchanged) => {}
            Err(e) => {
                warn!(product_id = %product.product_id, error = %e, "product upsert failed");
                log.stats.errors += 1;
                log.error_logs.push(SyncErrorLog::new(
                    "store",
                    e.to_string(),
                    Some(product.product_id.clone()),
                ));
                return;
            }
        }

        if options.download_images {
            // The `_0` object naming is per-slot: only the first attachment
            // of each slot is synced as the canonical image.
            for (image_type, refs) in transformed.image_tokens {
                if let Some(first) = refs.first() {
                    image_jobs.push(ImageJob {
                        product_id: product.product_id.clone(),
                        image_type,
                        file_tokens: vec![first.file_token.clone()],
                    });
                }
            }
        }
    }

    async fn soft_delete_missing(
        &self,
        options: &SyncOptions,
        upstream_ids: &HashSet<String>,
        control: &SyncControl,
        log: &mut SyncLog,
    ) -> Result<()> {
        let active_ids = match self.products.active_ids() {
            Ok(ids) => ids,
            Err(e) => {
                log.stats.errors += 1;
                log.error_logs
                    .push(SyncErrorLog::new("store", e.to_string(), None));
                return Ok(());
            }
        };

        for product_id in active_ids {
            if upstream_ids.contains(&product_id) {
                continue;
            }
            control.checkpoint().await?;
            if options.dry_run {
                log.stats.deleted_records += 1;
                continue;
            }
            match self.products.soft_delete(&product_id) {
                Ok(true) => {
                    info!(product_id = %product_id, "product missing upstream, soft-deleted");
                    log.stats.deleted_records += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    log.stats.errors += 1;
                    log.error_logs
                        .push(SyncErrorLog::new("store", e.to_string(), Some(product_id)));
                }
            }
        }
        Ok(())
    }

    fn incremental_cutoff(&self) -> Result<DateTime<Utc>> {
        Ok(self
            .sync_logs
            .last_successful()?
            .map(|log| log.start_time)
            .unwrap_or_else(|| Utc::now() - Duration::hours(FIRST_RUN_WINDOW_HOURS)))
    }

    /// Applies a control action to the in-flight run. The optional
    /// `sync_id` must match when provided.
    pub fn control_sync(&self, action: ControlAction, sync_id: Option<&str>) -> Result<String> {
        let slot = self.active.lock();
        let Some(active) = slot.as_ref() else {
            return Err(SyncError::SyncNotFound("no run is active".into()));
        };
        if let Some(requested) = sync_id {
            if requested != active.sync_id {
                return Err(SyncError::SyncNotFound(format!(
                    "{requested} is not the active run"
                )));
            }
        }

        let id = active.sync_id.clone();
        match action {
            ControlAction::Pause => {
                active.control.pause();
                // The worker is parked at its checkpoint and will not write
                // the log itself; reflect the pause for status readers.
                if let Err(e) = self.sync_logs.update_status(&id, SyncStatus::Paused, None, None) {
                    warn!(sync_id = %id, error = %e, "failed to persist paused status");
                }
                info!(sync_id = %id, "sync paused");
            }
            ControlAction::Resume => {
                active.control.resume();
                if let Err(e) = self.sync_logs.update_status(&id, SyncStatus::Running, None, None) {
                    warn!(sync_id = %id, error = %e, "failed to persist running status");
                }
                info!(sync_id = %id, "sync resumed");
            }
            ControlAction::Cancel => {
                active.control.cancel();
                warn!(sync_id = %id, "sync cancel requested");
            }
        }
        Ok(id)
    }

    /// Live view of the current run, if one is active.
    pub fn current_sync(&self) -> Option<ActiveSyncView> {
        let slot = self.active.lock();
        slot.as_ref().map(|active| ActiveSyncView {
            sync_id: active.sync_id.clone(),
            mode: active.mode,
            started: active.started,
            paused: active.control.is_paused(),
            progress: active.progress_rx.borrow().clone(),
        })
    }

    /// Subscribes to the active run's progress channel.
    pub fn subscribe_progress(&self) -> Option<watch::Receiver<SyncProgress>> {
        let slot = self.active.lock();
        slot.as_ref().map(|active| active.progress_rx.clone())
    }

    pub fn is_running(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Duration estimate for the start-sync response: the upcoming run's
    /// expected record count divided by the records/second of the most
    /// recent completed run, or a flat per-record cost with no history.
    pub fn estimate_duration_secs(&self, options: &SyncOptions) -> u64 {
        let last = self.sync_logs.last_successful().ok().flatten();

        let expected_records = match options.mode {
            SyncMode::Selective => options.product_ids.len() as u64,
            // Full and incremental walk the whole table; the last run's
            // count (or the store size, before any history exists) is the
            // best available proxy.
            SyncMode::Full | SyncMode::Incremental => last
                .as_ref()
                .map(|log| log.stats.total_records)
                .filter(|&n| n > 0)
                .or_else(|| self.products.count().ok().filter(|&n| n > 0))
                .unwrap_or(0),
        };

        let rate = last.as_ref().and_then(records_per_second);
        extrapolate_duration_secs(expected_records, rate)
    }
}

/// Throughput of a finished run, when it processed anything at all.
fn records_per_second(log: &SyncLog) -> Option<f64> {
    let end = log.end_time?;
    let elapsed_secs = (end - log.start_time).num_milliseconds().max(0) as f64 / 1000.0;
    if elapsed_secs <= 0.0 || log.stats.total_records == 0 {
        return None;
    }
    Some(log.stats.total_records as f64 / elapsed_secs)
}

fn extrapolate_duration_secs(expected_records: u64, rate: Option<f64>) -> u64 {
    let secs = match rate {
        Some(rate) if rate > 0.0 => expected_records as f64 / rate,
        _ => expected_records as f64 * FALLBACK_SECS_PER_RECORD,
    };
    (secs.ceil() as u64).max(1)
}

fn per_stage_percentage(processed: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((processed * 100) / total).min(100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_percentage_floors() {
        assert_eq!(per_stage_percentage(1, 3), 33);
        assert_eq!(per_stage_percentage(2, 3), 66);
        assert_eq!(per_stage_percentage(3, 3), 100);
        assert_eq!(per_stage_percentage(0, 0), 100);
    }

    #[test]
    fn duration_extrapolates_from_last_run_rate() {
        let mut log = SyncLog::open("s1".into(), SyncMode::Full, serde_json::json!({}));
        log.stats.total_records = 200;
        log.end_time = Some(log.start_time + Duration::seconds(40));

        // 200 records in 40 s -> 5 records/s.
        let rate = records_per_second(&log).unwrap();
        assert!((rate - 5.0).abs() < f64::EPSILON);

        // A selective run of 10 records at that rate takes ~2 s.
        assert_eq!(extrapolate_duration_secs(10, Some(rate)), 2);
        // Fractional seconds round up.
        assert_eq!(extrapolate_duration_secs(11, Some(rate)), 3);
        // Small runs never estimate below one second.
        assert_eq!(extrapolate_duration_secs(1, Some(rate)), 1);
    }

    #[test]
    fn duration_falls_back_to_per_record_cost() {
        assert_eq!(
            extrapolate_duration_secs(100, None),
            (100.0 * FALLBACK_SECS_PER_RECORD).ceil() as u64
        );
        assert_eq!(extrapolate_duration_secs(0, None), 1);

        // A run with no end time or no records yields no usable rate.
        let mut log = SyncLog::open("s1".into(), SyncMode::Full, serde_json::json!({}));
        log.stats.total_records = 200;
        assert!(records_per_second(&log).is_none());
        log.end_time = Some(log.start_time + Duration::seconds(40));
        log.stats.total_records = 0;
        assert!(records_per_second(&log).is_none());
    }

    #[test]
    fn control_action_parsing() {
        assert_eq!(ControlAction::parse("pause"), Some(ControlAction::Pause));
        assert_eq!(ControlAction::parse("resume"), Some(ControlAction::Resume));
        assert_eq!(ControlAction::parse("cancel"), Some(ControlAction::Cancel));
        assert_eq!(ControlAction::parse("restart"), None);
    }
}
