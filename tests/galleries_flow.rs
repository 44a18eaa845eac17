mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_json, TestApp};
use serde_json::json;

#[tokio::test]
async fn gallery_asset_upload_download_and_delete() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let password = "gallerypass";
    app.insert_user("curator", password, "admin").await?;
    let token = app.login_token("curator", password).await?;

    let created = app
        .post_json(
            "/api/admin/galleries",
            &json!({ "title": "Summer wedding" }),
            Some(&token),
        )
        .await?;
    assert_eq!(created.status(), StatusCode::OK);
    let body = body_to_json(created.into_body()).await?;
    assert_eq!(body["data"]["status"], json!("ACTIVE"));
    let gallery_id = body["data"]["id"].as_str().unwrap().to_string();

    let photo = b"\x89PNG fake image bytes";
    let uploaded = app
        .upload_file(
            &format!("/api/admin/galleries/{gallery_id}/assets"),
            "ceremony.png",
            "image/png",
            photo,
            &token,
        )
        .await?;
    assert_eq!(uploaded.status(), StatusCode::CREATED);
    let body = body_to_json(uploaded.into_body()).await?;
    assert_eq!(body["data"]["filename"], json!("ceremony.png"));
    assert_eq!(body["data"]["content_type"], json!("image/png"));
    assert_eq!(body["data"]["size_bytes"], json!(photo.len()));
    let asset_id = body["data"]["id"].as_str().unwrap().to_string();

    // The bytes landed in object storage under the gallery prefix.
    let storage = app.storage();
    let stored = storage
        .get(&format!("galleries/{gallery_id}/{asset_id}"))
        .await
        .expect("asset stored");
    assert_eq!(stored.bytes, photo);
    assert!(stored
        .content_disposition
        .as_deref()
        .unwrap()
        .contains("ceremony.png"));

    let listed = app
        .get(&format!("/api/admin/galleries/{gallery_id}/assets"), Some(&token))
        .await?;
    let body = body_to_json(listed.into_body()).await?;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    // Downloads hand out a presigned URL rather than streaming bytes.
    let download = app
        .get(
            &format!("/api/admin/galleries/{gallery_id}/assets/{asset_id}/download"),
            Some(&token),
        )
        .await?;
    assert_eq!(download.status(), StatusCode::OK);
    let body = body_to_json(download.into_body()).await?;
    assert!(body["data"]["url"].as_str().unwrap().contains("fake-storage"));
    assert_eq!(body["data"]["expires_in_seconds"], json!(900));

    let deleted = app
        .delete(
            &format!("/api/admin/galleries/{gallery_id}/assets/{asset_id}"),
            Some(&token),
        )
        .await?;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
    assert_eq!(storage.object_count().await, 0);

    let missing = app
        .get(
            &format!("/api/admin/galleries/{gallery_id}/assets/{asset_id}/download"),
            Some(&token),
        )
        .await?;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn archived_galleries_reject_new_assets() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let password = "archivegal";
    app.insert_user("gallery-archiver", password, "admin").await?;
    let token = app.login_token("gallery-archiver", password).await?;

    let created = app
        .post_json(
            "/api/admin/galleries",
            &json!({ "title": "Old sessions" }),
            Some(&token),
        )
        .await?;
    let body = body_to_json(created.into_body()).await?;
    let gallery_id = body["data"]["id"].as_str().unwrap().to_string();

    let archived = app
        .delete(&format!("/api/admin/galleries/{gallery_id}"), Some(&token))
        .await?;
    assert_eq!(archived.status(), StatusCode::OK);
    let body = body_to_json(archived.into_body()).await?;
    assert_eq!(body["data"]["status"], json!("ARCHIVED"));

    let rejected = app
        .upload_file(
            &format!("/api/admin/galleries/{gallery_id}/assets"),
            "late.jpg",
            "image/jpeg",
            b"jpeg bytes",
            &token,
        )
        .await?;
    assert_eq!(rejected.status(), StatusCode::CONFLICT);

    // Archived galleries drop out of the default listing.
    let listing = app.get("/api/admin/galleries", Some(&token)).await?;
    let body = body_to_json(listing.into_body()).await?;
    assert_eq!(body["data"].as_array().unwrap().len(), 0);

    let listing = app
        .get("/api/admin/galleries?include_archived=true", Some(&token))
        .await?;
    let body = body_to_json(listing.into_body()).await?;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    app.cleanup().await?;
    Ok(())
}
