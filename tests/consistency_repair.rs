//! Consistency validation, repair passes, image integrity and proxy
//! resolution.

mod common;

use common::{harness, now_ms, png_bytes, record_with_fields};
use serde_json::json;

use product_sync_backend::api::{RepairApiRequest, StartSyncRequest, ValidateRequest};
use product_sync_backend::images::{ProxyFormat, ProxyOptions};
use product_sync_backend::models::{ImageType, ThumbnailSize};

async fn sync_one_product_with_front_image(h: &common::TestHarness) {
    h.upstream.put_media("tok_front", png_bytes(800, 600, 3));
    h.upstream.set_records(vec![record_with_fields(
        "recA",
        "卫龙辣条",
        12.0,
        now_ms() - 60_000,
        vec![("正面图片", json!([{"file_token": "tok_front", "name": "front.png"}]))],
    )]);
    h.service
        .run_sync(&StartSyncRequest {
            mode: "full".into(),
            product_ids: None,
            options: None,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn repair_restores_missing_object_from_source_token() {
    let h = harness();
    sync_one_product_with_front_image(&h).await;
    assert!(h.blobs.contains("products/recA/front_0.png"));
    let fetches_after_sync = h.upstream.fetch_count();

    // The object vanishes from the store behind our back.
    h.blobs.corrupt("products/recA/front_0.png");

    let report = h.service.repair_broken_images().await.unwrap();
    assert_eq!(report.total, 1);
    assert_eq!(report.broken_found, 1);
    assert_eq!(report.repaired, 1);
    assert_eq!(report.failed, 0);
    assert!(h.blobs.contains("products/recA/front_0.png"));
    assert_eq!(h.upstream.fetch_count(), fetches_after_sync + 1);

    // Nothing left to repair on the second pass.
    let second = h.service.repair_broken_images().await.unwrap();
    assert_eq!(second.broken_found, 0);
    assert_eq!(second.repaired, 0);
}

#[tokio::test]
async fn rows_without_source_token_are_unrepairable() {
    let h = harness();
    let record = h
        .service
        .image_service()
        .upload_image(png_bytes(64, 64, 9), "manual.png", "recM", ImageType::Front)
        .await
        .unwrap();
    assert!(record.metadata.source_token.is_none());

    h.blobs.corrupt(&record.object_name);

    let report = h.service.repair_broken_images().await.unwrap();
    assert_eq!(report.broken_found, 1);
    assert_eq!(report.repaired, 0);
    assert_eq!(report.failed, 1);
    assert!(report.errors[0].contains("no source token"));
}

#[tokio::test]
async fn validation_flags_missing_objects_and_bad_fields() {
    let h = harness();
    sync_one_product_with_front_image(&h).await;

    // Break the object and corrupt a field directly in the store.
    h.blobs.corrupt("products/recA/front_0.png");
    let mut damaged = h.service.products().find("recA").unwrap().unwrap();
    damaged.price.normal = -5.0;
    damaged.barcode = Some("12ab".into());
    h.service.products().upsert(&damaged).unwrap();

    let report = h
        .service
        .validate(&ValidateRequest::default())
        .await
        .unwrap();

    assert_eq!(report.summary.total_checked, 1);
    assert!(report.summary.critical_issues >= 2, "issues: {:?}", report.issues);
    assert!(report
        .issues
        .iter()
        .any(|i| i.issue_type == "image_existence"
            && i.field.as_deref() == Some("images.front")));
    assert!(report
        .issues
        .iter()
        .any(|i| i.issue_type == "field_validation"
            && i.field.as_deref() == Some("price.normal")));
    assert!(report
        .issues
        .iter()
        .any(|i| i.field.as_deref() == Some("barcode")));
}

#[tokio::test]
async fn invalid_data_repair_clamps_with_dry_run_first() {
    let h = harness();
    sync_one_product_with_front_image(&h).await;
    let mut damaged = h.service.products().find("recA").unwrap().unwrap();
    damaged.price.normal = -5.0;
    h.service.products().upsert(&damaged).unwrap();

    // Dry run reports but does not write.
    let dry = h
        .service
        .repair(&RepairApiRequest {
            issue_types: Some(vec!["invalid_data".into()]),
            product_ids: None,
            dry_run: Some(true),
        })
        .await
        .unwrap();
    assert!(dry.dry_run);
    assert_eq!(dry.summary.total_issues, 1);
    assert_eq!(dry.summary.repaired_issues, 0);
    assert_eq!(
        h.service.products().find("recA").unwrap().unwrap().price.normal,
        -5.0
    );

    let real = h
        .service
        .repair(&RepairApiRequest {
            issue_types: Some(vec!["invalid_data".into()]),
            product_ids: None,
            dry_run: Some(false),
        })
        .await
        .unwrap();
    assert_eq!(real.summary.repaired_issues, 1);
    let fixed = h.service.products().find("recA").unwrap().unwrap();
    assert_eq!(fixed.price.normal, 0.0);
}

#[tokio::test]
async fn duplicate_product_repair_keeps_newest_sync_time() {
    let h = harness();
    sync_one_product_with_front_image(&h).await;

    // Forge a stale duplicate row.
    let current = h.service.products().find("recA").unwrap().unwrap();
    let mut stale = current.clone();
    stale.sync_time = current.sync_time - chrono::Duration::hours(2);
    stale.notes = Some("stale row".into());
    h.service.products().insert_raw(&stale).unwrap();
    assert_eq!(h.service.products().duplicate_ids().unwrap().len(), 1);

    let report = h
        .service
        .repair(&RepairApiRequest {
            issue_types: Some(vec!["duplicate_products".into()]),
            product_ids: None,
            dry_run: Some(false),
        })
        .await
        .unwrap();
    assert_eq!(report.summary.repaired_issues, 1);
    assert!(h.service.products().duplicate_ids().unwrap().is_empty());

    let kept = h.service.products().find("recA").unwrap().unwrap();
    assert_ne!(kept.notes.as_deref(), Some("stale row"));
}

#[tokio::test]
async fn image_proxy_resolves_thumbnails_and_counts_access() {
    let h = harness();
    let record = h
        .service
        .image_service()
        .upload_image(png_bytes(1200, 900, 5), "front.png", "recP", ImageType::Front)
        .await
        .unwrap();

    // Pure size request maps to the nearest fixed thumbnail.
    let target = h
        .service
        .image_service()
        .get_image_proxy(&record.image_id, ProxyOptions {
            width: Some(120),
            ..Default::default()
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(target.thumbnail, Some(ThumbnailSize::Small));
    assert!(target.url.contains("thumbnails/small/"));

    let target = h
        .service
        .image_service()
        .get_image_proxy(&record.image_id, ProxyOptions {
            width: Some(280),
            ..Default::default()
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(target.thumbnail, Some(ThumbnailSize::Medium));

    // Any dynamic transform produces a parameterized proxy URL.
    let target = h
        .service
        .image_service()
        .get_image_proxy(&record.image_id, ProxyOptions {
            width: Some(500),
            quality: Some(70),
            format: Some(ProxyFormat::Webp),
            ..Default::default()
        })
        .await
        .unwrap()
        .unwrap();
    assert!(target.thumbnail.is_none());
    assert!(target.url.contains("q=70"));
    assert!(target.url.contains("format=webp"));

    // Access stats were bumped once per resolution.
    let row = h
        .service
        .images()
        .find_by_id(&record.image_id)
        .unwrap()
        .unwrap();
    assert_eq!(row.access_count, 3);
    assert!(row.last_accessed_at.is_some());

    // Unknown ids resolve to nothing.
    assert!(h
        .service
        .image_service()
        .get_image_proxy("missing", ProxyOptions::default())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn upload_is_idempotent_for_identical_bytes() {
    let h = harness();
    let bytes = png_bytes(256, 256, 2);

    let first = h
        .service
        .image_service()
        .upload_image(bytes.clone(), "a.png", "recI", ImageType::Label)
        .await
        .unwrap();
    let objects_after_first = h.blobs.object_count();

    let second = h
        .service
        .image_service()
        .upload_image(bytes, "b.png", "recI", ImageType::Label)
        .await
        .unwrap();

    assert_eq!(first.image_id, second.image_id);
    assert_eq!(h.blobs.object_count(), objects_after_first);
    assert_eq!(h.service.images().for_product("recI").unwrap().len(), 1);
}

#[tokio::test]
async fn cleanup_removes_inactive_rows_and_objects() {
    let h = harness();
    let record = h
        .service
        .image_service()
        .upload_image(png_bytes(64, 64, 4), "x.png", "recC", ImageType::Gift)
        .await
        .unwrap();
    assert!(h.blobs.contains(&record.object_name));

    h.service.images().deactivate(&record.image_id).unwrap();
    let report = h.service.cleanup_inactive_images().await.unwrap();

    assert_eq!(report.scanned, 1);
    assert_eq!(report.removed, 1);
    assert!(!h.blobs.contains(&record.object_name));
    assert!(!h.blobs.contains("thumbnails/small/recC_gift_0.webp"));
    assert!(h
        .service
        .images()
        .find_by_id(&record.image_id)
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn selective_validation_requires_ids() {
    let h = harness();
    let err = h
        .service
        .validate(&ValidateRequest {
            scope: Some("selective".into()),
            product_ids: None,
            checks: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        product_sync_backend::error::SyncError::MissingProductIds
    ));
    assert_eq!(err.code(), "MISSING_PRODUCT_IDS");
}
