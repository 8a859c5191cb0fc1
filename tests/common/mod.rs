//! Shared fixtures: a scripted fake upstream, an in-memory service graph,
//! and record/image builders.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use product_sync_backend::config::{AppConfig, FeishuConfig, MinioConfig, SyncTuning};
use product_sync_backend::error::{Result, SyncError};
use product_sync_backend::feishu::{
    BatchDownloadResult, ListRecordsOptions, RawRecord, RecordsPage, TableField, UpstreamSource,
};
use product_sync_backend::storage::MemoryBlobStore;
use product_sync_backend::store::Database;
use product_sync_backend::SyncService;

/// Upstream stand-in scripted by tests: a record table plus a token ->
/// bytes media map, with a fetch counter for dedupe assertions.
#[derive(Default)]
pub struct FakeUpstream {
    records: Mutex<Vec<RawRecord>>,
    media: Mutex<HashMap<String, Vec<u8>>>,
    pub media_fetches: AtomicUsize,
}

impl FakeUpstream {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_records(&self, records: Vec<RawRecord>) {
        *self.records.lock() = records;
    }

    pub fn put_media(&self, token: &str, bytes: Vec<u8>) {
        self.media.lock().insert(token.to_string(), bytes);
    }

    pub fn fetch_count(&self) -> usize {
        self.media_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamSource for FakeUpstream {
    async fn get_table_fields(&self) -> Result<Vec<TableField>> {
        Ok(Vec::new())
    }

    async fn get_table_records(&self, _opts: &ListRecordsOptions) -> Result<RecordsPage> {
        Ok(RecordsPage {
            records: self.records.lock().clone(),
            has_more: false,
            page_token: None,
        })
    }

    async fn get_all_records(&self, _opts: &ListRecordsOptions) -> Result<Vec<RawRecord>> {
        Ok(self.records.lock().clone())
    }

    async fn download_image(&self, file_token: &str) -> Result<Vec<u8>> {
        self.media_fetches.fetch_add(1, Ordering::SeqCst);
        self.media
            .lock()
            .get(file_token)
            .cloned()
            .ok_or_else(|| SyncError::upstream(format!("unknown media token {file_token}"), false))
    }

    async fn batch_download_images(&self, tokens: &[String]) -> BatchDownloadResult {
        let mut result = BatchDownloadResult::default();
        for token in tokens {
            match self.download_image(token).await {
                Ok(bytes) => {
                    result.downloaded.insert(token.clone(), bytes);
                }
                Err(e) => result.failed.push((token.clone(), e.to_string())),
            }
        }
        result
    }

    async fn check_auth(&self) -> Result<()> {
        Ok(())
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        feishu: FeishuConfig {
            app_id: "cli_test".into(),
            app_secret: "secret".into(),
            app_token: "bascnTest".into(),
            table_id: "tblTest".into(),
            base_url: "https://open.feishu.cn".into(),
        },
        minio: MinioConfig {
            endpoint: "http://127.0.0.1:9000".into(),
            access_key: "ak".into(),
            secret_key: "sk".into(),
            bucket: "products".into(),
            region: "us-east-1".into(),
            public_url: "http://127.0.0.1:9000/products".into(),
        },
        database_path: ":memory:".into(),
        sync: SyncTuning::default(),
    }
}

pub struct TestHarness {
    pub service: SyncService,
    pub upstream: Arc<FakeUpstream>,
    pub blobs: Arc<MemoryBlobStore>,
}

pub fn harness() -> TestHarness {
    let upstream = FakeUpstream::new();
    let blobs = Arc::new(MemoryBlobStore::new("products"));
    let service = SyncService::with_database(
        test_config(),
        upstream.clone(),
        blobs.clone(),
        Database::open_in_memory().expect("in-memory db"),
    )
    .expect("service graph");
    TestHarness {
        service,
        upstream,
        blobs,
    }
}

/// A valid upstream record with the mandatory fields populated.
pub fn record(record_id: &str, name: &str, price: f64, collect_ms: i64) -> RawRecord {
    record_with_fields(record_id, name, price, collect_ms, Vec::new())
}

pub fn record_with_fields(
    record_id: &str,
    name: &str,
    price: f64,
    collect_ms: i64,
    extra: Vec<(&str, Value)>,
) -> RawRecord {
    let mut fields: HashMap<String, Value> = HashMap::from([
        ("中文品名".to_string(), json!(name)),
        ("商品一级分类".to_string(), json!("零食")),
        ("正常售价".to_string(), json!(price)),
        ("采集平台".to_string(), json!("天猫")),
        ("采集时间".to_string(), json!(collect_ms)),
    ]);
    for (key, value) in extra {
        fields.insert(key.to_string(), value);
    }
    RawRecord {
        record_id: record_id.to_string(),
        fields,
    }
}

/// Deterministic PNG bytes for media fixtures.
pub fn png_bytes(width: u32, height: u32, seed: u8) -> Vec<u8> {
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba};
    let img: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::from_fn(width, height, |x, y| {
        Rgba([seed, (x % 256) as u8, (y % 256) as u8, 255])
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    bytes
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
