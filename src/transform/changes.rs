//! Change detection between a freshly transformed product and its stored
//! counterpart.

use serde::Serialize;
use serde_json::Value;

use crate::mapping::get_path;
use crate::models::Product;

/// Fixed set of canonical paths the sync pipeline compares. Anything
/// outside this set (syncTime, version, status) never triggers an update.
pub const COMPARED_PATHS: &[&str] = &[
    "name",
    "category.primary",
    "category.secondary",
    "price.normal",
    "price.discount",
    "platform",
    "specification",
    "flavor",
    "manufacturer",
    "origin.country",
    "origin.province",
    "origin.city",
    "collectTime",
    "images.front",
    "images.back",
    "images.label",
    "images.package",
    "images.gift",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDetail {
    pub path: String,
    pub old_value: Value,
    pub new_value: Value,
    pub change_type: ChangeType,
}

#[derive(Debug, Default)]
pub struct ChangeSet {
    pub has_changes: bool,
    pub changed_fields: Vec<String>,
    pub change_details: Vec<ChangeDetail>,
}

/// Compares `new` against `old` over [`COMPARED_PATHS`]. A strictly newer
/// collect time forces `has_changes` even when every compared field is
/// equal; an older-or-equal collect time never does.
pub fn detect_changes(new: &Product, old: &Product) -> ChangeSet {
    let new_doc = serde_json::to_value(new).unwrap_or(Value::Null);
    let old_doc = serde_json::to_value(old).unwrap_or(Value::Null);

    let mut set = ChangeSet::default();
    for path in COMPARED_PATHS {
        let new_value = get_path(&new_doc, path).cloned().unwrap_or(Value::Null);
        let old_value = get_path(&old_doc, path).cloned().unwrap_or(Value::Null);

        if values_equal(&new_value, &old_value) {
            continue;
        }

        let change_type = match (old_value.is_null(), new_value.is_null()) {
            (true, false) => ChangeType::Added,
            (false, true) => ChangeType::Removed,
            _ => ChangeType::Modified,
        };
        set.changed_fields.push(path.to_string());
        set.change_details.push(ChangeDetail {
            path: path.to_string(),
            old_value,
            new_value,
            change_type,
        });
    }

    set.has_changes = !set.change_details.is_empty() || new.collect_time > old.collect_time;
    set
}

/// Equality semantics: strings compare trimmed (timestamps by instant),
/// numbers by value, arrays element-wise in order, objects recursively over
/// the union of their keys. Null equals only null.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::String(x), Value::String(y)) => {
            if let (Ok(dx), Ok(dy)) = (
                chrono::DateTime::parse_from_rfc3339(x.trim()),
                chrono::DateTime::parse_from_rfc3339(y.trim()),
            ) {
                return dx == dy;
            }
            x.trim() == y.trim()
        }
        (Value::Number(x), Value::Number(y)) => {
            match (x.as_f64(), y.as_f64()) {
                (Some(fx), Some(fy)) => fx == fy,
                _ => x == y,
            }
        }
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xo), Value::Object(yo)) => {
            let keys: std::collections::BTreeSet<&String> = xo.keys().chain(yo.keys()).collect();
            keys.into_iter().all(|key| {
                values_equal(
                    xo.get(key).unwrap_or(&Value::Null),
                    yo.get(key).unwrap_or(&Value::Null),
                )
            })
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LocalizedText, Product, ProductStatus};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn base_product() -> Product {
        Product {
            product_id: "p1".into(),
            feishu_record_id: Some("p1".into()),
            name: LocalizedText::new(Some("Spicy Strips".into()), Some("辣条".into())),
            category: Default::default(),
            price: crate::models::Price {
                normal: 12.0,
                discount: Some(9.0),
                discount_rate: Some(0.25),
            },
            origin: Default::default(),
            platform: LocalizedText::new(None, Some("天猫".into())),
            specification: None,
            flavor: None,
            manufacturer: None,
            images: Default::default(),
            collect_time: Utc.timestamp_millis_opt(1700000000000).single().unwrap(),
            link: None,
            box_spec: None,
            notes: None,
            barcode: None,
            sync_time: Utc.timestamp_millis_opt(1700000100000).single().unwrap(),
            version: 1,
            status: ProductStatus::Active,
            is_visible: true,
        }
    }

    #[test]
    fn identical_products_have_no_changes() {
        let set = detect_changes(&base_product(), &base_product());
        assert!(!set.has_changes);
        assert!(set.change_details.is_empty());
    }

    #[test]
    fn price_change_is_modified_with_values() {
        let old = base_product();
        let mut new = base_product();
        new.price.normal = 15.0;
        new.collect_time = old.collect_time + chrono::Duration::hours(1);

        let set = detect_changes(&new, &old);
        assert!(set.has_changes);
        let detail = set
            .change_details
            .iter()
            .find(|d| d.path == "price.normal")
            .expect("price.normal diff");
        assert_eq!(detail.change_type, ChangeType::Modified);
        assert_eq!(detail.old_value, json!(12.0));
        assert_eq!(detail.new_value, json!(15.0));
    }

    #[test]
    fn newer_collect_time_alone_forces_change() {
        let old = base_product();
        let mut new = base_product();
        new.collect_time = old.collect_time + chrono::Duration::minutes(5);

        let set = detect_changes(&new, &old);
        assert!(set.has_changes);
        // collectTime itself appears in the diff set.
        assert!(set.changed_fields.iter().any(|f| f == "collectTime"));
    }

    #[test]
    fn older_collect_time_never_forces_change() {
        let old = base_product();
        let mut new = base_product();
        new.collect_time = old.collect_time - chrono::Duration::minutes(5);

        let set = detect_changes(&new, &old);
        // collectTime differs, so the diff is reported...
        assert!(set.changed_fields.iter().any(|f| f == "collectTime"));
        // ...and the record still counts as changed because a field moved.
        assert!(set.has_changes);

        // With an equal collect time and equal fields, nothing changes.
        let same = detect_changes(&base_product(), &old);
        assert!(!same.has_changes);
    }

    #[test]
    fn added_and_removed_classification() {
        let mut old = base_product();
        old.images.front = Some("http://store/products/p1/front_0.jpg".into());
        let mut new = base_product();
        new.flavor = Some(LocalizedText::new(None, Some("麻辣".into())));

        let set = detect_changes(&new, &old);
        let front = set
            .change_details
            .iter()
            .find(|d| d.path == "images.front")
            .unwrap();
        assert_eq!(front.change_type, ChangeType::Removed);
        let flavor = set
            .change_details
            .iter()
            .find(|d| d.path == "flavor")
            .unwrap();
        assert_eq!(flavor.change_type, ChangeType::Added);
    }

    #[test]
    fn string_comparison_is_trimmed() {
        let old = base_product();
        let mut new = base_product();
        new.name = LocalizedText::new(Some("  Spicy Strips ".into()), Some("辣条".into()));
        // Display recomputation trims, but compare the raw fields too.
        let set = detect_changes(&new, &old);
        assert!(!set.change_details.iter().any(|d| d.path == "name"));
    }

    #[test]
    fn sync_time_and_version_are_ignored() {
        let old = base_product();
        let mut new = base_product();
        new.sync_time = old.sync_time + chrono::Duration::hours(2);
        new.version = 7;
        let set = detect_changes(&new, &old);
        assert!(!set.has_changes);
    }
}
