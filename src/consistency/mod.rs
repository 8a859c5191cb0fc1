//! Consistency validation and repair.
//!
//! Cross-checks product rows against image-object existence and field
//! invariants, and offers a repair pass (with dry-run) for the issue
//! classes the sync pipeline can leave behind.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::images::ImageService;
use crate::mapping::PRICE_MAX;
use crate::models::{ImageType, Product};
use crate::store::{ImageStore, ProductStore};

/// How many products a `recent` scope covers.
const RECENT_SCOPE_LIMIT: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationScope {
    All,
    Recent,
    Selective(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationCheck {
    DataIntegrity,
    ImageExistence,
    FieldValidation,
}

impl ValidationCheck {
    pub const ALL: [ValidationCheck; 3] = [
        ValidationCheck::DataIntegrity,
        ValidationCheck::ImageExistence,
        ValidationCheck::FieldValidation,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "data_integrity" => Some(ValidationCheck::DataIntegrity),
            "image_existence" => Some(ValidationCheck::ImageExistence),
            "field_validation" => Some(ValidationCheck::FieldValidation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Critical,
    Warning,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    #[serde(rename = "type")]
    pub issue_type: String,
    pub severity: IssueSeverity,
    pub product_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSummary {
    pub total_checked: u64,
    pub issues_found: u64,
    pub critical_issues: u64,
    pub warnings: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub validation_id: String,
    pub summary: ValidationSummary,
    pub issues: Vec<ValidationIssue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairIssueType {
    MissingImage,
    InvalidData,
    DuplicateProducts,
}

impl RepairIssueType {
    pub const ALL: [RepairIssueType; 3] = [
        RepairIssueType::MissingImage,
        RepairIssueType::InvalidData,
        RepairIssueType::DuplicateProducts,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "missing_image" => Some(RepairIssueType::MissingImage),
            "invalid_data" => Some(RepairIssueType::InvalidData),
            "duplicate_products" => Some(RepairIssueType::DuplicateProducts),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            RepairIssueType::MissingImage => "missing_image",
            RepairIssueType::InvalidData => "invalid_data",
            RepairIssueType::DuplicateProducts => "duplicate_products",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairStatus {
    Repaired,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairResult {
    pub product_id: String,
    pub issue_type: String,
    pub status: RepairStatus,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairSummary {
    pub total_issues: u64,
    pub repaired_issues: u64,
    pub failed_repairs: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    pub repair_id: String,
    pub dry_run: bool,
    pub summary: RepairSummary,
    pub results: Vec<RepairResult>,
}

#[derive(Debug, Clone)]
pub struct RepairRequest {
    pub issue_types: Vec<RepairIssueType>,
    pub product_ids: Option<Vec<String>>,
    pub dry_run: bool,
}

pub struct ConsistencyChecker {
    products: Arc<ProductStore>,
    images: Arc<ImageStore>,
    image_service: ImageService,
}

impl ConsistencyChecker {
    pub fn new(
        products: Arc<ProductStore>,
        images: Arc<ImageStore>,
        image_service: ImageService,
    ) -> Self {
        Self {
            products,
            images,
            image_service,
        }
    }

    fn scoped_products(&self, scope: &ValidationScope) -> Result<Vec<Product>> {
        match scope {
            ValidationScope::All => self.products.all(),
            ValidationScope::Recent => self.products.recent(RECENT_SCOPE_LIMIT),
            ValidationScope::Selective(ids) => {
                if ids.is_empty() {
                    return Err(SyncError::MissingProductIds);
                }
                let mut products = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(product) = self.products.find(id)? {
                        products.push(product);
                    }
                }
                Ok(products)
            }
        }
    }

    pub async fn validate(
        &self,
        scope: ValidationScope,
        checks: &[ValidationCheck],
    ) -> Result<ValidationReport> {
        let products = self.scoped_products(&scope)?;
        let mut issues = Vec::new();

        for product in &products {
            if checks.contains(&ValidationCheck::DataIntegrity) {
                check_data_integrity(product, &mut issues);
            }
            if checks.contains(&ValidationCheck::FieldValidation) {
                check_field_invariants(product, &mut issues);
            }
            if checks.contains(&ValidationCheck::ImageExistence) {
                self.check_image_existence(product, &mut issues).await?;
            }
        }

        let critical = issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Critical)
            .count() as u64;
        let report = ValidationReport {
            validation_id: format!("val_{}", Uuid::new_v4().simple()),
            summary: ValidationSummary {
                total_checked: products.len() as u64,
                issues_found: issues.len() as u64,
                critical_issues: critical,
                warnings: issues.len() as u64 - critical,
            },
            issues,
        };
        info!(
            validation_id = %report.validation_id,
            checked = report.summary.total_checked,
            issues = report.summary.issues_found,
            "consistency validation finished"
        );
        Ok(report)
    }

    async fn check_image_existence(
        &self,
        product: &Product,
        issues: &mut Vec<ValidationIssue>,
    ) -> Result<()> {
        let rows = self.images.for_product(&product.product_id)?;

        for image_type in ImageType::ALL {
            let Some(url) = product.images.get(image_type) else {
                continue;
            };
            let row = rows.iter().find(|r| r.image_type == image_type);
            match row {
                None => issues.push(ValidationIssue {
                    issue_type: "image_existence".into(),
                    severity: IssueSeverity::Warning,
                    product_id: product.product_id.clone(),
                    field: Some(format!("images.{image_type}")),
                    message: format!("URL {url} has no backing image record"),
                    suggested_fix: None,
                }),
                Some(row) => {
                    let integrity = self
                        .image_service
                        .validate_image_integrity(&row.object_name)
                        .await;
                    if !integrity.exists {
                        issues.push(ValidationIssue {
                            issue_type: "image_existence".into(),
                            severity: IssueSeverity::Critical,
                            product_id: product.product_id.clone(),
                            field: Some(format!("images.{image_type}")),
                            message: format!(
                                "object {} is missing from the store",
                                row.object_name
                            ),
                            suggested_fix: Some("missing_image".into()),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    pub async fn repair(&self, request: RepairRequest) -> Result<RepairReport> {
        let issue_types = if request.issue_types.is_empty() {
            RepairIssueType::ALL.to_vec()
        } else {
            request.issue_types.clone()
        };

        let mut results = Vec::new();
        for issue_type in issue_types {
            match issue_type {
                RepairIssueType::MissingImage => {
                    self.repair_missing_images(&request, &mut results).await?;
                }
                RepairIssueType::InvalidData => {
                    self.repair_invalid_data(&request, &mut results)?;
                }
                RepairIssueType::DuplicateProducts => {
                    self.repair_duplicates(&request, &mut results)?;
                }
            }
        }

        let mut summary = RepairSummary {
            total_issues: results.len() as u64,
            ..Default::default()
        };
        for result in &results {
            match result.status {
                RepairStatus::Repaired => summary.repaired_issues += 1,
                RepairStatus::Failed => summary.failed_repairs += 1,
                RepairStatus::Skipped => {}
            }
        }

        let report = RepairReport {
            repair_id: format!("rep_{}", Uuid::new_v4().simple()),
            dry_run: request.dry_run,
            summary,
            results,
        };
        info!(
            repair_id = %report.repair_id,
            dry_run = report.dry_run,
            total = report.summary.total_issues,
            repaired = report.summary.repaired_issues,
            "repair pass finished"
        );
        Ok(report)
    }

    fn in_scope(&self, request: &RepairRequest, product_id: &str) -> bool {
        match &request.product_ids {
            Some(ids) => ids.iter().any(|id| id == product_id),
            None => true,
        }
    }

    async fn repair_missing_images(
        &self,
        request: &RepairRequest,
        results: &mut Vec<RepairResult>,
    ) -> Result<()> {
        for row in self.images.list_active()? {
            if !self.in_scope(request, &row.product_id) {
                continue;
            }
            let integrity = self
                .image_service
                .validate_image_integrity(&row.object_name)
                .await;
            if integrity.exists {
                continue;
            }

            if request.dry_run {
                results.push(RepairResult {
                    product_id: row.product_id.clone(),
                    issue_type: RepairIssueType::MissingImage.as_str().into(),
                    status: RepairStatus::Skipped,
                    message: format!("would re-download {}", row.object_name),
                });
                continue;
            }

            match self.image_service.repair_from_source(&row).await {
                Ok(()) => results.push(RepairResult {
                    product_id: row.product_id.clone(),
                    issue_type: RepairIssueType::MissingImage.as_str().into(),
                    status: RepairStatus::Repaired,
                    message: format!("restored {}", row.object_name),
                }),
                Err(e) => {
                    warn!(image_id = %row.image_id, error = %e, "image repair failed");
                    results.push(RepairResult {
                        product_id: row.product_id.clone(),
                        issue_type: RepairIssueType::MissingImage.as_str().into(),
                        status: RepairStatus::Failed,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn repair_invalid_data(
        &self,
        request: &RepairRequest,
        results: &mut Vec<RepairResult>,
    ) -> Result<()> {
        for mut product in self.products.all()? {
            if !self.in_scope(request, &product.product_id) {
                continue;
            }

            let mut fixes = Vec::new();
            if product.price.normal < 0.0 {
                fixes.push(format!("price.normal {} -> 0", product.price.normal));
                product.price.normal = 0.0;
            } else if product.price.normal > PRICE_MAX {
                fixes.push(format!("price.normal {} -> {PRICE_MAX}", product.price.normal));
                product.price.normal = PRICE_MAX;
            }
            if let Some(discount) = product.price.discount {
                if discount < 0.0 {
                    fixes.push(format!("price.discount {discount} -> 0"));
                    product.price.discount = Some(0.0);
                }
            }
            if product.name.display.trim().is_empty() {
                fixes.push("recomputed display fields".into());
                product.recompute_displays();
            }

            if fixes.is_empty() {
                continue;
            }

            if request.dry_run {
                results.push(RepairResult {
                    product_id: product.product_id.clone(),
                    issue_type: RepairIssueType::InvalidData.as_str().into(),
                    status: RepairStatus::Skipped,
                    message: format!("would apply: {}", fixes.join(", ")),
                });
                continue;
            }

            product.sync_time = chrono::Utc::now();
            match self.products.upsert(&product) {
                Ok(_) => results.push(RepairResult {
                    product_id: product.product_id.clone(),
                    issue_type: RepairIssueType::InvalidData.as_str().into(),
                    status: RepairStatus::Repaired,
                    message: fixes.join(", "),
                }),
                Err(e) => results.push(RepairResult {
                    product_id: product.product_id.clone(),
                    issue_type: RepairIssueType::InvalidData.as_str().into(),
                    status: RepairStatus::Failed,
                    message: e.to_string(),
                }),
            }
        }
        Ok(())
    }

    fn repair_duplicates(
        &self,
        request: &RepairRequest,
        results: &mut Vec<RepairResult>,
    ) -> Result<()> {
        for product_id in self.products.duplicate_ids()? {
            if !self.in_scope(request, &product_id) {
                continue;
            }

            if request.dry_run {
                results.push(RepairResult {
                    product_id,
                    issue_type: RepairIssueType::DuplicateProducts.as_str().into(),
                    status: RepairStatus::Skipped,
                    message: "would keep newest syncTime row and drop the rest".into(),
                });
                continue;
            }

            match self.products.collapse_duplicates(&product_id) {
                Ok(removed) => results.push(RepairResult {
                    product_id,
                    issue_type: RepairIssueType::DuplicateProducts.as_str().into(),
                    status: RepairStatus::Repaired,
                    message: format!("removed {removed} duplicate row(s)"),
                }),
                Err(e) => results.push(RepairResult {
                    product_id,
                    issue_type: RepairIssueType::DuplicateProducts.as_str().into(),
                    status: RepairStatus::Failed,
                    message: e.to_string(),
                }),
            }
        }
        Ok(())
    }
}

fn check_data_integrity(product: &Product, issues: &mut Vec<ValidationIssue>) {
    if product.product_id.trim().is_empty() {
        issues.push(ValidationIssue {
            issue_type: "data_integrity".into(),
            severity: IssueSeverity::Critical,
            product_id: product.product_id.clone(),
            field: Some("productId".into()),
            message: "product has an empty productId".into(),
            suggested_fix: None,
        });
    }
    if product.name.display.trim().is_empty() {
        issues.push(ValidationIssue {
            issue_type: "data_integrity".into(),
            severity: IssueSeverity::Critical,
            product_id: product.product_id.clone(),
            field: Some("name.display".into()),
            message: "product has an empty display name".into(),
            suggested_fix: Some("invalid_data".into()),
        });
    }
}

fn check_field_invariants(product: &Product, issues: &mut Vec<ValidationIssue>) {
    if product.price.normal < 0.0 || product.price.normal > PRICE_MAX {
        issues.push(ValidationIssue {
            issue_type: "field_validation".into(),
            severity: IssueSeverity::Critical,
            product_id: product.product_id.clone(),
            field: Some("price.normal".into()),
            message: format!("price.normal {} outside [0, {PRICE_MAX}]", product.price.normal),
            suggested_fix: Some("invalid_data".into()),
        });
    }
    if let Some(discount) = product.price.discount {
        if discount > product.price.normal {
            issues.push(ValidationIssue {
                issue_type: "field_validation".into(),
                severity: IssueSeverity::Warning,
                product_id: product.product_id.clone(),
                field: Some("price.discount".into()),
                message: format!(
                    "discount {discount} exceeds normal price {}",
                    product.price.normal
                ),
                suggested_fix: None,
            });
        }
    }
    if let Some(barcode) = &product.barcode {
        let digits = barcode.trim();
        if !((8..=13).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit())) {
            issues.push(ValidationIssue {
                issue_type: "field_validation".into(),
                severity: IssueSeverity::Warning,
                product_id: product.product_id.clone(),
                field: Some("barcode".into()),
                message: format!("barcode '{barcode}' is not 8-13 digits"),
                suggested_fix: None,
            });
        }
    }
    if let Some(link) = &product.link {
        if !(link.starts_with("http://") || link.starts_with("https://")) {
            issues.push(ValidationIssue {
                issue_type: "field_validation".into(),
                severity: IssueSeverity::Warning,
                product_id: product.product_id.clone(),
                field: Some("link".into()),
                message: format!("link '{link}' is not an http(s) URL"),
                suggested_fix: None,
            });
        }
    }
    if product.version < 1 {
        issues.push(ValidationIssue {
            issue_type: "field_validation".into(),
            severity: IssueSeverity::Critical,
            product_id: product.product_id.clone(),
            field: Some("version".into()),
            message: format!("version {} is below 1", product.version),
            suggested_fix: None,
        });
    }
}
