//! Declarative field mapping from upstream bitable columns to canonical
//! product paths.
//!
//! The table below is the single source of truth for which upstream fields
//! the core consumes, how each one is coerced, and what validation applies.
//! The transformer walks it in order and assembles the canonical document.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::feishu::{AttachmentRef, FieldValue, RawRecord};

/// Declared type of an upstream column. Drives coercion of the structurally
/// classified [`FieldValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Number,
    Date,
    Select,
    MultiSelect,
    Attachment,
    Url,
}

/// A field value after type coercion, ready to be written into the
/// canonical document.
#[derive(Debug, Clone, PartialEq)]
pub enum CoercedValue {
    Text(String),
    Number(f64),
    Date(DateTime<Utc>),
    List(Vec<String>),
    Attachments(Vec<AttachmentRef>),
    Null,
}

impl CoercedValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CoercedValue::Null)
    }

    pub fn into_json(self) -> Value {
        match self {
            CoercedValue::Text(s) => Value::String(s),
            CoercedValue::Number(n) => serde_json::json!(n),
            CoercedValue::Date(d) => Value::String(d.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
            CoercedValue::List(items) => Value::Array(items.into_iter().map(Value::String).collect()),
            CoercedValue::Attachments(refs) => serde_json::to_value(refs).unwrap_or(Value::Null),
            CoercedValue::Null => Value::Null,
        }
    }
}

pub type ValidateFn = fn(&CoercedValue) -> Result<(), String>;
pub type TransformFn = fn(CoercedValue) -> CoercedValue;

pub struct FieldMapping {
    pub upstream_field_id: &'static str,
    pub upstream_field_name: &'static str,
    /// Dotted path in the canonical product document.
    pub canonical_path: &'static str,
    pub field_type: FieldType,
    /// Required fields produce a warning when absent; the transformer
    /// upgrades the core identity set to errors.
    pub required: bool,
    pub default_value: Option<&'static str>,
    pub fallback_field_id: Option<&'static str>,
    pub transform: Option<TransformFn>,
    pub validate: Option<ValidateFn>,
}

pub const PRICE_MAX: f64 = 999_999.99;

fn validate_price(value: &CoercedValue) -> Result<(), String> {
    match value {
        CoercedValue::Number(n) if (0.0..=PRICE_MAX).contains(n) => Ok(()),
        CoercedValue::Number(n) => Err(format!("price {n} outside [0, {PRICE_MAX}]")),
        CoercedValue::Null => Ok(()),
        other => Err(format!("price must be a number, got {other:?}")),
    }
}

fn validate_barcode(value: &CoercedValue) -> Result<(), String> {
    match value {
        CoercedValue::Text(s) => {
            let digits = s.trim();
            if (8..=13).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit()) {
                Ok(())
            } else {
                Err(format!("barcode '{digits}' must be 8-13 digits"))
            }
        }
        CoercedValue::Null => Ok(()),
        other => Err(format!("barcode must be text, got {other:?}")),
    }
}

fn validate_link(value: &CoercedValue) -> Result<(), String> {
    match value {
        CoercedValue::Text(s) => {
            let url = s.trim();
            if url.starts_with("http://") || url.starts_with("https://") {
                Ok(())
            } else {
                Err(format!("link '{url}' must start with http:// or https://"))
            }
        }
        CoercedValue::Null => Ok(()),
        other => Err(format!("link must be text, got {other:?}")),
    }
}

/// The mapping table. Order matters only for error reporting; every entry
/// is applied independently.
pub static FIELD_MAPPINGS: &[FieldMapping] = &[
    FieldMapping {
        upstream_field_id: "fldNameZh",
        upstream_field_name: "中文品名",
        canonical_path: "name.chinese",
        field_type: FieldType::Text,
        required: true,
        default_value: None,
        fallback_field_id: Some("fldNameLegacy"),
        transform: None,
        validate: None,
    },
    FieldMapping {
        upstream_field_id: "fldNameEn",
        upstream_field_name: "英文品名",
        canonical_path: "name.english",
        field_type: FieldType::Text,
        required: false,
        default_value: None,
        fallback_field_id: None,
        transform: None,
        validate: None,
    },
    FieldMapping {
        upstream_field_id: "fldCatPrimaryZh",
        upstream_field_name: "商品一级分类",
        canonical_path: "category.primary.chinese",
        field_type: FieldType::Select,
        required: true,
        default_value: None,
        fallback_field_id: None,
        transform: None,
        validate: None,
    },
    FieldMapping {
        upstream_field_id: "fldCatPrimaryEn",
        upstream_field_name: "Primary Category",
        canonical_path: "category.primary.english",
        field_type: FieldType::Select,
        required: false,
        default_value: None,
        fallback_field_id: None,
        transform: None,
        validate: None,
    },
    FieldMapping {
        upstream_field_id: "fldCatSecondaryZh",
        upstream_field_name: "商品二级分类",
        canonical_path: "category.secondary.chinese",
        field_type: FieldType::Select,
        required: false,
        default_value: None,
        fallback_field_id: None,
        transform: None,
        validate: None,
    },
    FieldMapping {
        upstream_field_id: "fldCatSecondaryEn",
        upstream_field_name: "Secondary Category",
        canonical_path: "category.secondary.english",
        field_type: FieldType::Select,
        required: false,
        default_value: None,
        fallback_field_id: None,
        transform: None,
        validate: None,
    },
    FieldMapping {
        upstream_field_id: "fldPriceNormal",
        upstream_field_name: "正常售价",
        canonical_path: "price.normal",
        field_type: FieldType::Number,
        required: true,
        default_value: Some("0"),
        fallback_field_id: None,
        transform: None,
        validate: Some(validate_price),
    },
    FieldMapping {
        upstream_field_id: "fldPriceDiscount",
        upstream_field_name: "优惠售价",
        canonical_path: "price.discount",
        field_type: FieldType::Number,
        required: false,
        default_value: None,
        fallback_field_id: None,
        transform: None,
        validate: Some(validate_price),
    },
    FieldMapping {
        upstream_field_id: "fldOriginCountry",
        upstream_field_name: "产地国家",
        canonical_path: "origin.country.chinese",
        field_type: FieldType::Select,
        required: false,
        default_value: Some("中国"),
        fallback_field_id: None,
        transform: None,
        validate: None,
    },
    FieldMapping {
        upstream_field_id: "fldOriginCountryEn",
        upstream_field_name: "Country",
        canonical_path: "origin.country.english",
        field_type: FieldType::Select,
        required: false,
        default_value: None,
        fallback_field_id: None,
        transform: None,
        validate: None,
    },
    FieldMapping {
        upstream_field_id: "fldOriginProvince",
        upstream_field_name: "产地省份",
        canonical_path: "origin.province.chinese",
        field_type: FieldType::Select,
        required: false,
        default_value: None,
        fallback_field_id: None,
        transform: None,
        validate: None,
    },
    FieldMapping {
        upstream_field_id: "fldOriginCity",
        upstream_field_name: "产地城市",
        canonical_path: "origin.city.chinese",
        field_type: FieldType::Select,
        required: false,
        default_value: None,
        fallback_field_id: None,
        transform: None,
        validate: None,
    },
    FieldMapping {
        upstream_field_id: "fldPlatform",
        upstream_field_name: "采集平台",
        canonical_path: "platform.chinese",
        field_type: FieldType::Select,
        required: true,
        default_value: Some("未知平台"),
        fallback_field_id: None,
        transform: None,
        validate: None,
    },
    FieldMapping {
        upstream_field_id: "fldSpecification",
        upstream_field_name: "商品规格",
        canonical_path: "specification.chinese",
        field_type: FieldType::Text,
        required: false,
        default_value: None,
        fallback_field_id: None,
        transform: None,
        validate: None,
    },
    FieldMapping {
        upstream_field_id: "fldFlavor",
        upstream_field_name: "口味",
        canonical_path: "flavor.chinese",
        field_type: FieldType::MultiSelect,
        required: false,
        default_value: None,
        fallback_field_id: None,
        transform: None,
        validate: None,
    },
    FieldMapping {
        upstream_field_id: "fldManufacturer",
        upstream_field_name: "生产厂家",
        canonical_path: "manufacturer.chinese",
        field_type: FieldType::Text,
        required: false,
        default_value: None,
        fallback_field_id: None,
        transform: None,
        validate: None,
    },
    FieldMapping {
        upstream_field_id: "fldImageFront",
        upstream_field_name: "正面图片",
        canonical_path: "images.front",
        field_type: FieldType::Attachment,
        required: false,
        default_value: None,
        fallback_field_id: None,
        transform: None,
        validate: None,
    },
    FieldMapping {
        upstream_field_id: "fldImageBack",
        upstream_field_name: "背面图片",
        canonical_path: "images.back",
        field_type: FieldType::Attachment,
        required: false,
        default_value: None,
        fallback_field_id: None,
        transform: None,
        validate: None,
    },
    FieldMapping {
        upstream_field_id: "fldImageLabel",
        upstream_field_name: "标签图片",
        canonical_path: "images.label",
        field_type: FieldType::Attachment,
        required: false,
        default_value: None,
        fallback_field_id: None,
        transform: None,
        validate: None,
    },
    FieldMapping {
        upstream_field_id: "fldImagePackage",
        upstream_field_name: "外包装图片",
        canonical_path: "images.package",
        field_type: FieldType::Attachment,
        required: false,
        default_value: None,
        fallback_field_id: None,
        transform: None,
        validate: None,
    },
    FieldMapping {
        upstream_field_id: "fldImageGift",
        upstream_field_name: "赠品图片",
        canonical_path: "images.gift",
        field_type: FieldType::Attachment,
        required: false,
        default_value: None,
        fallback_field_id: None,
        transform: None,
        validate: None,
    },
    FieldMapping {
        upstream_field_id: "fldCollectTime",
        upstream_field_name: "采集时间",
        canonical_path: "collectTime",
        field_type: FieldType::Date,
        required: true,
        default_value: None,
        fallback_field_id: None,
        transform: None,
        validate: None,
    },
    FieldMapping {
        upstream_field_id: "fldLink",
        upstream_field_name: "商品链接",
        canonical_path: "link",
        field_type: FieldType::Url,
        required: false,
        default_value: None,
        fallback_field_id: None,
        transform: None,
        validate: Some(validate_link),
    },
    FieldMapping {
        upstream_field_id: "fldBoxSpec",
        upstream_field_name: "箱规",
        canonical_path: "boxSpec",
        field_type: FieldType::Text,
        required: false,
        default_value: None,
        fallback_field_id: None,
        transform: None,
        validate: None,
    },
    FieldMapping {
        upstream_field_id: "fldNotes",
        upstream_field_name: "备注",
        canonical_path: "notes",
        field_type: FieldType::Text,
        required: false,
        default_value: None,
        fallback_field_id: None,
        transform: None,
        validate: None,
    },
    FieldMapping {
        upstream_field_id: "fldBarcode",
        upstream_field_name: "条码",
        canonical_path: "barcode",
        field_type: FieldType::Text,
        required: false,
        default_value: None,
        fallback_field_id: None,
        transform: None,
        validate: Some(validate_barcode),
    },
];

/// Looks up the raw value for a mapping on a record's keyed fields:
/// field name first (the bitable default keying), then field id, then the
/// declared fallback id.
pub fn lookup_raw<'a>(record: &'a RawRecord, mapping: &FieldMapping) -> Option<&'a Value> {
    record
        .fields
        .get(mapping.upstream_field_name)
        .or_else(|| record.fields.get(mapping.upstream_field_id))
        .or_else(|| {
            mapping
                .fallback_field_id
                .and_then(|fallback| record.fields.get(fallback))
        })
        .filter(|v| !v.is_null())
}

fn round2(n: f64) -> f64 {
    (n * 100.0).round() / 100.0
}

fn parse_date_ms(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Coerces a structurally classified value to the mapping's declared type.
/// Returns `Err` with a reason when the shapes are incompatible; the
/// transformer downgrades that to a warning and applies the default.
pub fn coerce(value: FieldValue, field_type: FieldType) -> Result<CoercedValue, String> {
    match (field_type, value) {
        (_, FieldValue::Null) => Ok(CoercedValue::Null),

        (FieldType::Text, FieldValue::Text(s)) => Ok(CoercedValue::Text(s.trim().to_string())),
        (FieldType::Text, FieldValue::Number(n)) => Ok(CoercedValue::Text(format_number(n))),
        (FieldType::Text, FieldValue::MultiSelect(items)) => {
            Ok(CoercedValue::Text(items.join(", ")))
        }

        (FieldType::Number, FieldValue::Number(n)) => Ok(CoercedValue::Number(round2(n))),
        (FieldType::Number, FieldValue::Text(s)) => s
            .trim()
            .replace(['¥', '￥', ','], "")
            .parse::<f64>()
            .map(|n| CoercedValue::Number(round2(n)))
            .map_err(|_| format!("'{s}' is not a number")),

        (FieldType::Date, FieldValue::Number(n)) => parse_date_ms(n as i64)
            .map(CoercedValue::Date)
            .ok_or_else(|| format!("{n} is not a valid epoch-millisecond timestamp")),
        (FieldType::Date, FieldValue::Text(s)) => {
            let trimmed = s.trim();
            if let Ok(ms) = trimmed.parse::<i64>() {
                return parse_date_ms(ms)
                    .map(CoercedValue::Date)
                    .ok_or_else(|| format!("'{trimmed}' is not a valid timestamp"));
            }
            DateTime::parse_from_rfc3339(trimmed)
                .map(|d| CoercedValue::Date(d.with_timezone(&Utc)))
                .map_err(|_| format!("'{trimmed}' is not a date"))
        }

        (FieldType::Select, FieldValue::Text(s)) => Ok(CoercedValue::Text(s.trim().to_string())),
        // Single-select extracts the label; a multi-select cell mapped to a
        // scalar path takes its first element.
        (FieldType::Select, FieldValue::MultiSelect(items)) => items
            .into_iter()
            .next()
            .map(|s| CoercedValue::Text(s.trim().to_string()))
            .ok_or_else(|| "empty selection".to_string()),

        // Multi-select extracts the first element; every canonical path in
        // the table is a scalar.
        (FieldType::MultiSelect, FieldValue::MultiSelect(items)) => items
            .into_iter()
            .next()
            .map(|s| CoercedValue::Text(s.trim().to_string()))
            .ok_or_else(|| "empty selection".to_string()),
        (FieldType::MultiSelect, FieldValue::Text(s)) => {
            Ok(CoercedValue::Text(s.trim().to_string()))
        }

        (FieldType::Attachment, FieldValue::Attachment(refs)) => {
            Ok(CoercedValue::Attachments(refs))
        }

        (FieldType::Url, FieldValue::Text(s)) => Ok(CoercedValue::Text(s.trim().to_string())),

        (expected, got) => Err(format!("expected {expected:?}, got {got:?}")),
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Parses a mapping's default value into a coerced value of the declared
/// type. Defaults are authored in the table, so failures are programmer
/// errors and map to Null.
pub fn default_for(mapping: &FieldMapping) -> CoercedValue {
    let Some(raw) = mapping.default_value else {
        return CoercedValue::Null;
    };
    match mapping.field_type {
        FieldType::Number => raw
            .parse::<f64>()
            .map(|n| CoercedValue::Number(round2(n)))
            .unwrap_or(CoercedValue::Null),
        FieldType::Date => raw
            .parse::<i64>()
            .ok()
            .and_then(parse_date_ms)
            .map(CoercedValue::Date)
            .unwrap_or(CoercedValue::Null),
        _ => CoercedValue::Text(raw.to_string()),
    }
}

/// Writes `value` at a dotted path inside `doc`, creating intermediate
/// objects as needed.
pub fn set_path(doc: &mut Value, dotted: &str, value: Value) {
    let mut current = doc;
    let mut parts = dotted.split('.').peekable();
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            if let Some(obj) = current.as_object_mut() {
                obj.insert(part.to_string(), value);
            }
            return;
        }
        if !current.is_object() {
            return;
        }
        let obj = current.as_object_mut().expect("checked is_object");
        current = obj
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if !current.is_object() {
            *current = Value::Object(serde_json::Map::new());
        }
    }
}

/// Reads the value at a dotted path, if present.
pub fn get_path<'a>(doc: &'a Value, dotted: &str) -> Option<&'a Value> {
    let mut current = doc;
    for part in dotted.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn record_with(fields: Vec<(&str, Value)>) -> RawRecord {
        RawRecord {
            record_id: "rec1".into(),
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect::<HashMap<_, _>>(),
        }
    }

    fn mapping(path: &'static str) -> &'static FieldMapping {
        FIELD_MAPPINGS
            .iter()
            .find(|m| m.canonical_path == path)
            .expect("mapping exists")
    }

    #[test]
    fn lookup_prefers_field_name_then_id_then_fallback() {
        let m = mapping("name.chinese");
        let by_name = record_with(vec![("中文品名", json!("辣条"))]);
        assert_eq!(lookup_raw(&by_name, m), Some(&json!("辣条")));

        let by_id = record_with(vec![("fldNameZh", json!("辣条"))]);
        assert_eq!(lookup_raw(&by_id, m), Some(&json!("辣条")));

        let by_fallback = record_with(vec![("fldNameLegacy", json!("老版品名"))]);
        assert_eq!(lookup_raw(&by_fallback, m), Some(&json!("老版品名")));

        let missing = record_with(vec![("无关字段", json!("x"))]);
        assert_eq!(lookup_raw(&missing, m), None);
    }

    #[test]
    fn number_coercion_rounds_to_two_decimals() {
        let coerced = coerce(FieldValue::Number(12.005), FieldType::Number).unwrap();
        assert_eq!(coerced, CoercedValue::Number(12.01));

        let from_text = coerce(FieldValue::Text("¥1,234.567".into()), FieldType::Number).unwrap();
        assert_eq!(from_text, CoercedValue::Number(1234.57));

        assert!(coerce(FieldValue::Text("十二".into()), FieldType::Number).is_err());
    }

    #[test]
    fn date_coercion_accepts_epoch_millis() {
        let coerced = coerce(FieldValue::Number(1700000000000.0), FieldType::Date).unwrap();
        match coerced {
            CoercedValue::Date(d) => assert_eq!(d.timestamp_millis(), 1700000000000),
            other => panic!("expected date, got {other:?}"),
        }

        let from_text = coerce(FieldValue::Text("1700000000000".into()), FieldType::Date).unwrap();
        assert!(matches!(from_text, CoercedValue::Date(_)));
    }

    #[test]
    fn select_takes_first_of_multi() {
        let coerced = coerce(
            FieldValue::MultiSelect(vec!["天猫".into(), "京东".into()]),
            FieldType::Select,
        )
        .unwrap();
        assert_eq!(coerced, CoercedValue::Text("天猫".into()));
    }

    #[test]
    fn price_validation_bounds() {
        assert!(validate_price(&CoercedValue::Number(0.0)).is_ok());
        assert!(validate_price(&CoercedValue::Number(999_999.99)).is_ok());
        assert!(validate_price(&CoercedValue::Number(-0.01)).is_err());
        assert!(validate_price(&CoercedValue::Number(1_000_000.0)).is_err());
    }

    #[test]
    fn barcode_validation() {
        assert!(validate_barcode(&CoercedValue::Text("12345678".into())).is_ok());
        assert!(validate_barcode(&CoercedValue::Text("6901234567890".into())).is_ok());
        assert!(validate_barcode(&CoercedValue::Text("1234567".into())).is_err());
        assert!(validate_barcode(&CoercedValue::Text("12345678901234".into())).is_err());
        assert!(validate_barcode(&CoercedValue::Text("12a45678".into())).is_err());
    }

    #[test]
    fn link_validation() {
        assert!(validate_link(&CoercedValue::Text("https://item.jd.com/1.html".into())).is_ok());
        assert!(validate_link(&CoercedValue::Text("http://a.b".into())).is_ok());
        assert!(validate_link(&CoercedValue::Text("ftp://a.b".into())).is_err());
    }

    #[test]
    fn dotted_path_write_creates_intermediates() {
        let mut doc = json!({});
        set_path(&mut doc, "price.normal", json!(12.0));
        set_path(&mut doc, "name.chinese", json!("辣条"));
        set_path(&mut doc, "name.english", json!("Spicy Strips"));
        assert_eq!(doc["price"]["normal"], json!(12.0));
        assert_eq!(doc["name"]["chinese"], json!("辣条"));
        assert_eq!(get_path(&doc, "name.english"), Some(&json!("Spicy Strips")));
        assert_eq!(get_path(&doc, "name.missing"), None);
    }

    #[test]
    fn every_mapping_has_unique_canonical_path() {
        let mut seen = std::collections::HashSet::new();
        for m in FIELD_MAPPINGS {
            assert!(
                seen.insert(m.canonical_path),
                "duplicate canonical path {}",
                m.canonical_path
            );
        }
    }
}
