//! Application configuration loaded from the environment.

use anyhow::{bail, Result};
use serde_json::json;

/// Everything the sync core needs to talk to Feishu, MinIO and the local
/// database. Built once at startup; components borrow the slices they need.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub feishu: FeishuConfig,
    pub minio: MinioConfig,
    pub database_path: String,
    pub sync: SyncTuning,
}

#[derive(Debug, Clone)]
pub struct FeishuConfig {
    pub app_id: String,
    pub app_secret: String,
    pub app_token: String,
    pub table_id: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct MinioConfig {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
    /// Base URL prepended to object names when building public links.
    /// Defaults to `{endpoint}/{bucket}`.
    pub public_url: String,
}

#[derive(Debug, Clone)]
pub struct SyncTuning {
    pub concurrent_images: usize,
    pub batch_size: usize,
    pub thumbnail_quality: u8,
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            concurrent_images: 5,
            batch_size: 50,
            thumbnail_quality: 80,
        }
    }
}

fn required(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => bail!("missing required environment variable {name}"),
    }
}

fn optional_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let feishu = FeishuConfig {
            app_id: required("FEISHU_APP_ID")?,
            app_secret: required("FEISHU_APP_SECRET")?,
            app_token: required("FEISHU_APP_TOKEN")?,
            table_id: required("FEISHU_TABLE_ID")?,
            base_url: std::env::var("FEISHU_BASE_URL")
                .unwrap_or_else(|_| "https://open.feishu.cn".to_string()),
        };

        let endpoint = required("MINIO_ENDPOINT")?;
        let bucket = required("MINIO_BUCKET")?;
        let public_url = std::env::var("MINIO_PUBLIC_URL")
            .unwrap_or_else(|_| format!("{}/{}", endpoint.trim_end_matches('/'), bucket));
        let minio = MinioConfig {
            access_key: required("MINIO_ACCESS_KEY")?,
            secret_key: required("MINIO_SECRET_KEY")?,
            region: std::env::var("MINIO_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            endpoint,
            bucket,
            public_url,
        };

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./product-sync.db".to_string());

        let defaults = SyncTuning::default();
        let sync = SyncTuning {
            concurrent_images: optional_parse("SYNC_CONCURRENT_IMAGES", defaults.concurrent_images)
                .max(1),
            batch_size: optional_parse("SYNC_BATCH_SIZE", defaults.batch_size).max(1),
            thumbnail_quality: optional_parse("THUMBNAIL_QUALITY", defaults.thumbnail_quality)
                .clamp(1, 100),
        };

        Ok(Self {
            feishu,
            minio,
            database_path,
            sync,
        })
    }

    /// Redacted snapshot persisted into each SyncLog. Secrets never reach
    /// the database.
    pub fn redacted(&self) -> serde_json::Value {
        json!({
            "feishu": {
                "appId": self.feishu.app_id,
                "appSecret": "***",
                "appToken": self.feishu.app_token,
                "tableId": self.feishu.table_id,
            },
            "minio": {
                "endpoint": self.minio.endpoint,
                "accessKey": "***",
                "secretKey": "***",
                "bucket": self.minio.bucket,
            },
            "sync": {
                "concurrentImages": self.sync.concurrent_images,
                "batchSize": self.sync.batch_size,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redaction_strips_secrets() {
        let config = AppConfig {
            feishu: FeishuConfig {
                app_id: "cli_123".into(),
                app_secret: "super-secret".into(),
                app_token: "bascn".into(),
                table_id: "tbl".into(),
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
        };

        let snapshot = config.redacted().to_string();
        assert!(!snapshot.contains("super-secret"));
        assert!(!snapshot.contains("\"sk\""));
        assert!(snapshot.contains("cli_123"));
    }
}
