//! Canonical product model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Display fallback when neither localization is present.
pub const NAME_SENTINEL: &str = "未命名商品";
/// Display fallback for categories and other descriptive fields.
pub const FIELD_SENTINEL: &str = "未分类";

/// Localized text with a computed display value: prefer English, fall back
/// to Chinese, else a sentinel. `display` is never empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalizedText {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub english: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chinese: Option<String>,
    #[serde(default)]
    pub display: String,
}

impl LocalizedText {
    pub fn new(english: Option<String>, chinese: Option<String>) -> Self {
        let mut text = Self {
            english,
            chinese,
            display: String::new(),
        };
        text.recompute_display(FIELD_SENTINEL);
        text
    }

    /// Recomputes `display = english || chinese || sentinel`, treating
    /// whitespace-only values as absent.
    pub fn recompute_display(&mut self, sentinel: &str) {
        let pick = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        self.display = pick(&self.english)
            .or_else(|| pick(&self.chinese))
            .unwrap_or_else(|| sentinel.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.english.is_none() && self.chinese.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    #[serde(default)]
    pub primary: LocalizedText,
    #[serde(default)]
    pub secondary: LocalizedText,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Price {
    #[serde(default)]
    pub normal: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount: Option<f64>,
    /// Derived: `clamp(1 - discount / normal, 0, 1)`, present only when
    /// both prices are.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Origin {
    #[serde(default)]
    pub country: LocalizedText,
    #[serde(default)]
    pub province: LocalizedText,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<LocalizedText>,
}

/// Public URLs into the object store, one per image slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductImages {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub front: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub back: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gift: Option<String>,
}

impl ProductImages {
    pub fn get(&self, image_type: super::ImageType) -> Option<&str> {
        use super::ImageType::*;
        match image_type {
            Front => self.front.as_deref(),
            Back => self.back.as_deref(),
            Label => self.label.as_deref(),
            Package => self.package.as_deref(),
            Gift => self.gift.as_deref(),
        }
    }

    pub fn set(&mut self, image_type: super::ImageType, url: String) {
        use super::ImageType::*;
        let slot = match image_type {
            Front => &mut self.front,
            Back => &mut self.back,
            Label => &mut self.label,
            Package => &mut self.package,
            Gift => &mut self.gift,
        };
        *slot = Some(url);
    }

    pub fn is_empty(&self) -> bool {
        self.front.is_none()
            && self.back.is_none()
            && self.label.is_none()
            && self.package.is_none()
            && self.gift.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Active,
    Inactive,
    Deleted,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Active => "active",
            ProductStatus::Inactive => "inactive",
            ProductStatus::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub product_id: String,
    /// Upstream record identifier this product was ingested from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feishu_record_id: Option<String>,
    #[serde(default)]
    pub name: LocalizedText,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub price: Price,
    #[serde(default)]
    pub origin: Origin,
    #[serde(default)]
    pub platform: LocalizedText,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specification: Option<LocalizedText>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flavor: Option<LocalizedText>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<LocalizedText>,
    #[serde(default)]
    pub images: ProductImages,
    pub collect_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub box_spec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub barcode: Option<String>,
    pub sync_time: DateTime<Utc>,
    pub version: i64,
    pub status: ProductStatus,
    pub is_visible: bool,
}

impl Product {
    /// Recomputes every `display` field from its localized siblings.
    pub fn recompute_displays(&mut self) {
        self.name.recompute_display(NAME_SENTINEL);
        self.category.primary.recompute_display(FIELD_SENTINEL);
        self.category.secondary.recompute_display(FIELD_SENTINEL);
        self.origin.country.recompute_display(FIELD_SENTINEL);
        self.origin.province.recompute_display(FIELD_SENTINEL);
        if let Some(city) = &mut self.origin.city {
            city.recompute_display(FIELD_SENTINEL);
        }
        self.platform.recompute_display(FIELD_SENTINEL);
        for slot in [
            &mut self.specification,
            &mut self.flavor,
            &mut self.manufacturer,
        ]
        .into_iter()
        .flatten()
        {
            slot.recompute_display(FIELD_SENTINEL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefers_english() {
        let text = LocalizedText::new(Some("Spicy Strips".into()), Some("辣条".into()));
        assert_eq!(text.display, "Spicy Strips");
    }

    #[test]
    fn display_falls_back_to_chinese() {
        let text = LocalizedText::new(None, Some("辣条".into()));
        assert_eq!(text.display, "辣条");

        let blank = LocalizedText::new(Some("   ".into()), Some("辣条".into()));
        assert_eq!(blank.display, "辣条");
    }

    #[test]
    fn display_never_empty() {
        let mut text = LocalizedText::default();
        text.recompute_display(NAME_SENTINEL);
        assert_eq!(text.display, NAME_SENTINEL);
    }

    #[test]
    fn image_slots_round_trip() {
        use crate::models::ImageType;
        let mut images = ProductImages::default();
        assert!(images.is_empty());
        images.set(ImageType::Front, "http://store/products/p1/front_0.jpg".into());
        assert_eq!(
            images.get(ImageType::Front),
            Some("http://store/products/p1/front_0.jpg")
        );
        assert_eq!(images.get(ImageType::Gift), None);
    }
}
