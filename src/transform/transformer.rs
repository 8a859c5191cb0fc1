//! Raw upstream record -> canonical product transformation.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::feishu::{AttachmentRef, FieldValue, RawRecord};
use crate::mapping::{
    coerce, default_for, get_path, lookup_raw, set_path, CoercedValue, FieldType, FIELD_MAPPINGS,
};
use crate::models::{ImageType, Product};

/// A single structured error or warning tied to a canonical field path.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformIssue {
    pub field: String,
    pub message: String,
}

impl TransformIssue {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TransformIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of transforming one raw record.
#[derive(Debug)]
pub struct TransformOutcome {
    pub ok: bool,
    pub product: Option<Product>,
    /// Attachment tokens per image slot, extracted during mapping. Image
    /// URLs are only written to the product after upload.
    pub image_tokens: HashMap<ImageType, Vec<AttachmentRef>>,
    pub errors: Vec<TransformIssue>,
    pub warnings: Vec<TransformIssue>,
}

/// A successfully transformed record, as consumed by the orchestrator.
#[derive(Debug)]
pub struct TransformedRecord {
    pub product: Product,
    pub image_tokens: HashMap<ImageType, Vec<AttachmentRef>>,
    pub warnings: Vec<TransformIssue>,
}

#[derive(Debug)]
pub struct FailedRecord {
    pub record_id: String,
    pub errors: Vec<TransformIssue>,
}

#[derive(Debug, Default)]
pub struct BatchTransformResult {
    pub successful: Vec<TransformedRecord>,
    pub failed: Vec<FailedRecord>,
    pub total_errors: usize,
    pub total_warnings: usize,
}

/// Stateless transformer. The sync time is passed per call so runs are
/// deterministic under a pinned clock.
#[derive(Debug, Default, Clone)]
pub struct Transformer;

impl Transformer {
    pub fn new() -> Self {
        Self
    }

    pub fn transform_record(
        &self,
        raw: &RawRecord,
        sync_time: DateTime<Utc>,
        current_version: Option<i64>,
    ) -> TransformOutcome {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut image_tokens: HashMap<ImageType, Vec<AttachmentRef>> = HashMap::new();

        let mut doc = json!({
            "productId": raw.record_id,
            "feishuRecordId": raw.record_id,
        });

        for mapping in FIELD_MAPPINGS {
            let classified = lookup_raw(raw, mapping)
                .map(FieldValue::classify)
                .unwrap_or(FieldValue::Null);

            let mut coerced = match coerce(classified, mapping.field_type) {
                Ok(value) => value,
                Err(reason) => {
                    // Per-field coercion failures downgrade to a warning and
                    // fall back to the declared default.
                    warnings.push(TransformIssue::new(mapping.canonical_path, reason));
                    default_for(mapping)
                }
            };

            if coerced.is_null() && mapping.default_value.is_some() {
                coerced = default_for(mapping);
                if mapping.required {
                    warnings.push(TransformIssue::new(
                        mapping.canonical_path,
                        format!(
                            "missing required field '{}', using default",
                            mapping.upstream_field_name
                        ),
                    ));
                }
            }

            if let Some(transform) = mapping.transform {
                coerced = transform(coerced);
            }

            if let Some(validate) = mapping.validate {
                if let Err(reason) = validate(&coerced) {
                    // Validation misses are warnings; the value is dropped
                    // rather than persisted invalid.
                    warnings.push(TransformIssue::new(mapping.canonical_path, reason));
                    coerced = default_for(mapping);
                }
            }

            match coerced {
                CoercedValue::Null => {
                    if mapping.required && mapping.default_value.is_none() {
                        warnings.push(TransformIssue::new(
                            mapping.canonical_path,
                            format!("required field '{}' is empty", mapping.upstream_field_name),
                        ));
                    }
                }
                CoercedValue::Attachments(refs) => {
                    if let Some(image_type) = image_slot_for(mapping.canonical_path) {
                        if !refs.is_empty() {
                            image_tokens.insert(image_type, refs);
                        }
                    }
                }
                value => set_path(&mut doc, mapping.canonical_path, value.into_json()),
            }
        }

        // Records without a collect time cannot participate in incremental
        // cutoff or change tiebreaking; default to the sync clock.
        if get_path(&doc, "collectTime").is_none() {
            set_path(
                &mut doc,
                "collectTime",
                json!(sync_time.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
            );
        }

        set_path(
            &mut doc,
            "syncTime",
            json!(sync_time.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
        );
        set_path(&mut doc, "version", json!(current_version.unwrap_or(0) + 1));
        set_path(&mut doc, "status", json!("active"));
        set_path(&mut doc, "isVisible", json!(true));

        let mut product: Product = match serde_json::from_value(doc) {
            Ok(p) => p,
            Err(e) => {
                errors.push(TransformIssue::new(
                    "productId",
                    format!("canonical document did not deserialize: {e}"),
                ));
                return TransformOutcome {
                    ok: false,
                    product: None,
                    image_tokens,
                    errors,
                    warnings,
                };
            }
        };

        derive_discount_rate(&mut product, &mut warnings);
        product.recompute_displays();

        // Core identity set: a product with no name in either locale is not
        // usable downstream.
        if product.name.is_empty() {
            errors.push(TransformIssue::new(
                "name.display",
                "record has no product name in any locale",
            ));
        }

        let ok = errors.is_empty();
        debug!(
            record_id = %raw.record_id,
            ok,
            warnings = warnings.len(),
            "transformed record"
        );
        TransformOutcome {
            ok,
            product: ok.then_some(product),
            image_tokens,
            errors,
            warnings,
        }
    }

    pub fn batch_transform(
        &self,
        records: &[RawRecord],
        sync_time: DateTime<Utc>,
    ) -> BatchTransformResult {
        let mut result = BatchTransformResult::default();
        for raw in records {
            let outcome = self.transform_record(raw, sync_time, None);
            result.total_errors += outcome.errors.len();
            result.total_warnings += outcome.warnings.len();
            match outcome.product {
                Some(product) => result.successful.push(TransformedRecord {
                    product,
                    image_tokens: outcome.image_tokens,
                    warnings: outcome.warnings,
                }),
                None => result.failed.push(FailedRecord {
                    record_id: raw.record_id.clone(),
                    errors: outcome.errors,
                }),
            }
        }
        result
    }
}

fn image_slot_for(canonical_path: &str) -> Option<ImageType> {
    canonical_path
        .strip_prefix("images.")
        .and_then(ImageType::parse)
}

fn derive_discount_rate(product: &mut Product, warnings: &mut Vec<TransformIssue>) {
    let normal = product.price.normal;
    let Some(discount) = product.price.discount else {
        product.price.discount_rate = None;
        return;
    };

    if discount > normal {
        // Expected discount <= normal; kept as a warning, not an error.
        warnings.push(TransformIssue::new(
            "price.discount",
            format!("discount {discount} exceeds normal price {normal}"),
        ));
    }

    if normal > 0.0 {
        let rate = (1.0 - discount / normal).clamp(0.0, 1.0);
        product.price.discount_rate = Some((rate * 10_000.0).round() / 10_000.0);
    } else {
        product.price.discount_rate = None;
    }
}
