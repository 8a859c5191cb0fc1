//! Upstream client for the Feishu multi-dimensional spreadsheet service.

mod client;
mod types;

pub use client::{looks_like_image, FeishuClient};
pub use types::{
    AttachmentRef, BatchDownloadResult, FieldValue, ListRecordsOptions, RawRecord, RecordsPage,
    TableField,
};

use async_trait::async_trait;

use crate::error::Result;

/// Seam between the pipeline and the concrete upstream. The orchestrator,
/// image service and consistency checker all talk through this trait so
/// tests can inject a fake table.
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    async fn get_table_fields(&self) -> Result<Vec<TableField>>;
    async fn get_table_records(&self, opts: &ListRecordsOptions) -> Result<RecordsPage>;
    async fn get_all_records(&self, opts: &ListRecordsOptions) -> Result<Vec<RawRecord>>;
    async fn download_image(&self, file_token: &str) -> Result<Vec<u8>>;
    async fn batch_download_images(&self, tokens: &[String]) -> BatchDownloadResult;
    async fn check_auth(&self) -> Result<()>;
}

#[async_trait]
impl UpstreamSource for FeishuClient {
    async fn get_table_fields(&self) -> Result<Vec<TableField>> {
        FeishuClient::get_table_fields(self).await
    }

    async fn get_table_records(&self, opts: &ListRecordsOptions) -> Result<RecordsPage> {
        FeishuClient::get_table_records(self, opts).await
    }

    async fn get_all_records(&self, opts: &ListRecordsOptions) -> Result<Vec<RawRecord>> {
        FeishuClient::get_all_records(self, opts).await
    }

    async fn download_image(&self, file_token: &str) -> Result<Vec<u8>> {
        FeishuClient::download_image(self, file_token).await
    }

    async fn batch_download_images(&self, tokens: &[String]) -> BatchDownloadResult {
        FeishuClient::batch_download_images(self, tokens).await
    }

    async fn check_auth(&self) -> Result<()> {
        FeishuClient::check_auth(self).await
    }
}
