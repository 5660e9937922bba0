use actix_web::{http::StatusCode, middleware, test, web, App};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use photo_vault::api;
use photo_vault::app_state::AppState;
use photo_vault::config::AppConfig;
use photo_vault::metadata::mock_store::MockMetadataStore;
use photo_vault::metadata::{Album, AlbumSummary, MetadataStorage, Photo};
use photo_vault::service::{request_id_scope, BulkDeleteResult, PhotoPage, UploadResult, VaultStats};
use photo_vault::storage::mock_store::MockBlobStore;

const BOUNDARY: &str = "photo-vault-test-boundary";

struct Vault {
    state: AppState,
    metadata: MockMetadataStore,
    blobs: MockBlobStore,
}

fn vault() -> Vault {
    let metadata = MockMetadataStore::new();
    let blobs = MockBlobStore::new();
    let state = AppState::with_backends(
        Arc::new(metadata.clone()),
        Arc::new(blobs.clone()),
        AppConfig::for_testing(),
    )
    .unwrap();
    Vault { state, metadata, blobs }
}

macro_rules! app {
    ($vault:expr) => {
        test::init_service(
            App::new()
                .wrap(middleware::from_fn(request_id_scope))
                .app_data(web::Data::new($vault.state.clone()))
                .configure(api::configure),
        )
        .await
    };
}

/// multipart/form-data body with an optional album id and one part per file
fn upload_form(album_id: Option<&str>, files: &[(&str, &str)]) -> Vec<u8> {
    let mut body = String::new();
    if let Some(album_id) = album_id {
        body.push_str(&format!(
            "--{}\r\nContent-Disposition: form-data; name=\"album_id\"\r\n\r\n{}\r\n",
            BOUNDARY, album_id
        ));
    }
    for (file_name, content) in files {
        body.push_str(&format!(
            "--{}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{}\"\r\nContent-Type: image/jpeg\r\n\r\n{}\r\n",
            BOUNDARY, file_name, content
        ));
    }
    body.push_str(&format!("--{}--\r\n", BOUNDARY));
    body.into_bytes()
}

fn upload_request(album_id: Option<&str>, files: &[(&str, &str)]) -> test::TestRequest {
    test::TestRequest::post()
        .uri("/api/photos/upload")
        .insert_header(("content-type", format!("multipart/form-data; boundary={}", BOUNDARY)))
        .set_payload(upload_form(album_id, files))
}

#[actix_web::test]
async fn test_trip_album_lifecycle() {
    let vault = vault();
    let app = app!(vault);

    // Create "Trip"
    let req = test::TestRequest::post()
        .uri("/api/albums")
        .set_json(json!({ "name": "Trip", "description": "Summer" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let trip: Album = test::read_body_json(resp).await;
    assert_eq!(trip.photo_count, 0);

    // Upload three photos into it
    let req = upload_request(Some(&trip.id), &[("a.jpg", "aaa"), ("b.jpg", "bbb"), ("c.jpg", "ccc")]).to_request();
    let result: UploadResult = test::call_and_read_body_json(&app, req).await;
    assert_eq!(result.succeeded.len(), 3);
    assert!(result.failed.is_empty());

    let req = test::TestRequest::get().uri(&format!("/api/albums/{}", trip.id)).to_request();
    let album: Album = test::call_and_read_body_json(&app, req).await;
    assert_eq!(album.photo_count, 3);

    let req = test::TestRequest::get().uri(&format!("/api/photos?album={}", trip.id)).to_request();
    let page: PhotoPage = test::call_and_read_body_json(&app, req).await;
    assert_eq!(page.photos.len(), 3);
    assert!(!page.has_more);
    for pair in page.photos.windows(2) {
        assert!(pair[0].uploaded_at >= pair[1].uploaded_at);
    }

    // Delete the cover photo
    let cover = page.photos[0].clone();
    let req = test::TestRequest::put()
        .uri(&format!("/api/albums/{}/cover", trip.id))
        .set_json(json!({ "photo_id": cover.id }))
        .to_request();
    let album: Album = test::call_and_read_body_json(&app, req).await;
    assert_eq!(album.cover_photo_id.as_deref(), Some(cover.id.as_str()));

    let req = test::TestRequest::delete().uri(&format!("/api/photos/{}", cover.id)).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let req = test::TestRequest::get().uri(&format!("/api/albums/{}", trip.id)).to_request();
    let album: Album = test::call_and_read_body_json(&app, req).await;
    assert_eq!(album.cover_photo_id, None);
    assert_eq!(album.photo_count, 2);
    assert!(!vault.blobs.contains_blob(&cover.blob_id));

    // Bulk delete the remaining two while one blob refuses to go
    let remaining: Vec<&Photo> = page.photos[1..].iter().collect();
    vault.blobs.fail_delete_of(&remaining[1].blob_id);
    let req = test::TestRequest::post()
        .uri("/api/photos/bulk-delete")
        .set_json(json!({ "photo_ids": [remaining[0].id, remaining[1].id] }))
        .to_request();
    let result: BulkDeleteResult = test::call_and_read_body_json(&app, req).await;
    assert_eq!(result.deleted_count, 2);
    assert_eq!(result.blob_failures.len(), 1);
    assert_eq!(result.blob_failures[0].blob_id, remaining[1].blob_id);

    let req = test::TestRequest::get().uri(&format!("/api/albums/{}", trip.id)).to_request();
    let album: Album = test::call_and_read_body_json(&app, req).await;
    assert_eq!(album.photo_count, 0);
    let req = test::TestRequest::get().uri(&format!("/api/photos?album={}", trip.id)).to_request();
    let page: PhotoPage = test::call_and_read_body_json(&app, req).await;
    assert!(page.photos.is_empty());

    // The failed blob is picked up by the retry worker once the store recovers
    vault.blobs.heal_delete(&remaining[1].blob_id);
    assert_eq!(vault.state.deletion_worker().run_once().await.unwrap(), 1);
    assert_eq!(vault.blobs.blob_count(), 0);
}

#[actix_web::test]
async fn test_delete_album_moves_photos_to_default() {
    let vault = vault();
    let app = app!(vault);
    let default = vault.state.albums.default_album().unwrap();
    let trip = vault.state.albums.create("Trip", None, false).unwrap();

    let req = upload_request(Some(&trip.id), &[("a.jpg", "aaa"), ("b.jpg", "bbb")]).to_request();
    let result: UploadResult = test::call_and_read_body_json(&app, req).await;
    assert_eq!(result.succeeded.len(), 2);

    let req = test::TestRequest::delete().uri(&format!("/api/albums/{}", trip.id)).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["reassigned_photos"], 2);

    let req = test::TestRequest::get().uri("/api/albums").to_request();
    let albums: Vec<AlbumSummary> = test::call_and_read_body_json(&app, req).await;
    assert!(albums.iter().all(|s| s.album.id != trip.id));
    let default_now = albums.iter().find(|s| s.album.id == default.id).unwrap();
    assert_eq!(default_now.album.photo_count, default.photo_count + 2);
    assert_eq!(vault.metadata.member_count(&default.id), 2);

    for photo in &result.succeeded {
        let req = test::TestRequest::get().uri(&format!("/api/photos/{}", photo.id)).to_request();
        let stored: Photo = test::call_and_read_body_json(&app, req).await;
        assert_eq!(stored.album_id.as_deref(), Some(default.id.as_str()));
    }
}

#[actix_web::test]
async fn test_default_album_is_protected() {
    let vault = vault();
    let app = app!(vault);
    let default = vault.state.albums.default_album().unwrap();

    let req = test::TestRequest::delete().uri(&format!("/api/albums/{}", default.id)).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "forbidden");

    let req = test::TestRequest::patch()
        .uri(&format!("/api/albums/{}", default.id))
        .set_json(json!({ "name": "Misc" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::post()
        .uri("/api/albums")
        .set_json(json!({ "name": "Uncategorized" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_validation_and_not_found() {
    let vault = vault();
    let app = app!(vault);

    let req = test::TestRequest::post()
        .uri("/api/albums")
        .set_json(json!({ "name": "  " }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::get().uri("/api/photos/missing").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

    let req = test::TestRequest::post().uri("/api/photos/missing/favorite").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

    let req = test::TestRequest::get().uri("/api/photos?album=missing").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

    let req = upload_request(Some("missing"), &[("a.jpg", "aaa")]).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    assert_eq!(vault.blobs.blob_count(), 0);

    let req = test::TestRequest::post()
        .uri("/api/photos/bulk-delete")
        .set_json(json!({ "photo_ids": [] }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_partial_upload_failure() {
    let vault = vault();
    let app = app!(vault);
    vault.blobs.fail_uploads_containing(b"CORRUPT");

    let req = upload_request(
        None,
        &[("a.jpg", "good"), ("b.jpg", "CORRUPT"), ("c.jpg", "fine"), ("d.jpg", "CORRUPT too")],
    ).to_request();
    let result: UploadResult = test::call_and_read_body_json(&app, req).await;
    assert_eq!(result.succeeded.len(), 2);
    assert_eq!(result.failed.len(), 2);

    let req = test::TestRequest::get().uri("/api/stats").to_request();
    let stats: VaultStats = test::call_and_read_body_json(&app, req).await;
    assert_eq!(stats.total_photos, 2);
    for photo in &result.succeeded {
        assert!(vault.blobs.contains_blob(&photo.blob_id));
    }
}

#[actix_web::test]
async fn test_metadata_outage_returns_orphans_for_retry() {
    let vault = vault();
    let app = app!(vault);
    let trip = vault.state.albums.create("Trip", None, false).unwrap();
    vault.blobs.slow_uploads_containing(b"SLOW", Duration::from_millis(100));

    // The store goes away after the album is resolved but before the insert
    let metadata = vault.metadata.clone();
    let request = test::call_service(&app, upload_request(Some(&trip.id), &[("a.jpg", "SLOW a"), ("b.jpg", "SLOW b")]).to_request());
    let outage = async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        metadata.set_unavailable(true);
    };
    let (resp, ()) = tokio::join!(request, outage);
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "metadata_commit");
    assert_eq!(body["album_id"], trip.id.as_str());
    let uploaded = body["uploaded"].clone();
    assert_eq!(uploaded.as_array().map(Vec::len), Some(2));
    assert_eq!(vault.blobs.blob_count(), 2);

    vault.metadata.set_unavailable(false);
    let req = test::TestRequest::post()
        .uri("/api/photos/commit")
        .set_json(json!({ "album_id": trip.id, "uploaded": uploaded.clone() }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let photos: Vec<Photo> = test::read_body_json(resp).await;
    assert_eq!(photos.len(), 2);
    assert_eq!(vault.state.albums.get(&trip.id).unwrap().photo_count, 2);

    // A replayed commit is idempotent
    let req = test::TestRequest::post()
        .uri("/api/photos/commit")
        .set_json(json!({ "album_id": trip.id, "uploaded": uploaded }))
        .to_request();
    let replayed: Vec<Photo> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(replayed.len(), 2);
    assert_eq!(vault.metadata.count_photos().unwrap(), 2);
}

#[actix_web::test]
async fn test_commit_refuses_blobs_the_store_does_not_have() {
    let vault = vault();
    let app = app!(vault);
    let default = vault.state.albums.default_album().unwrap();

    let forged = json!([{
        "file_name": "ghost.jpg",
        "blob": {
            "blob_id": "vault/ghost",
            "url": "mock://vault/ghost",
            "thumbnail_url": null,
            "width": 1,
            "height": 1,
            "size_bytes": 999999999u64,
            "format": "jpg"
        }
    }]);
    let req = test::TestRequest::post()
        .uri("/api/photos/commit")
        .set_json(json!({ "album_id": default.id, "uploaded": forged }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::get().uri("/api/stats").to_request();
    let stats: VaultStats = test::call_and_read_body_json(&app, req).await;
    assert_eq!(stats.total_photos, 0);
    assert_eq!(stats.total_bytes, 0);
}

#[actix_web::test]
async fn test_slow_blob_store_fails_only_that_item() {
    let metadata = MockMetadataStore::new();
    let blobs = MockBlobStore::new();
    let mut config = AppConfig::for_testing();
    config.storage.request_timeout_secs = 1;
    let state = AppState::with_backends(Arc::new(metadata.clone()), Arc::new(blobs.clone()), config).unwrap();
    let vault = Vault { state, metadata, blobs };
    let app = app!(vault);
    vault.blobs.slow_uploads_containing(b"STALL", Duration::from_millis(1500));

    let req = upload_request(None, &[("quick.jpg", "quick"), ("stall.jpg", "STALL")]).to_request();
    let result: UploadResult = test::call_and_read_body_json(&app, req).await;
    assert_eq!(result.succeeded.len(), 1);
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].file_name, "stall.jpg");
    assert_eq!(vault.metadata.count_photos().unwrap(), 1);
}

#[actix_web::test]
async fn test_favorites_search_and_pagination() {
    let vault = vault();
    let app = app!(vault);
    let trip = vault.state.albums.create("Trip", None, false).unwrap();
    let home = vault.state.albums.create("Home", None, false).unwrap();

    let files: Vec<(String, String)> = (0..12).map(|i| (format!("trip-{}.jpg", i), format!("t{}", i))).collect();
    let files: Vec<(&str, &str)> = files.iter().map(|(n, c)| (n.as_str(), c.as_str())).collect();
    let trip_upload: UploadResult = test::call_and_read_body_json(&app, upload_request(Some(&trip.id), &files).to_request()).await;
    let home_upload: UploadResult =
        test::call_and_read_body_json(&app, upload_request(Some(&home.id), &[("beach.jpg", "h1"), ("porch.jpg", "h2")]).to_request())
            .await;

    // Favorite one photo per album
    for photo in [&trip_upload.succeeded[0], &home_upload.succeeded[0]] {
        let req = test::TestRequest::post()
            .uri(&format!("/api/photos/{}/favorite", photo.id))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["is_favorite"], true);
    }

    let req = test::TestRequest::get().uri("/api/photos?album=all&favorites=true").to_request();
    let page: PhotoPage = test::call_and_read_body_json(&app, req).await;
    assert_eq!(page.photos.len(), 2);
    assert!(page.photos.iter().all(|p| p.is_favorite));

    let req = test::TestRequest::get()
        .uri(&format!("/api/photos?album={}&favorites=true", home.id))
        .to_request();
    let page: PhotoPage = test::call_and_read_body_json(&app, req).await;
    assert_eq!(page.photos.len(), 1);
    assert_eq!(page.photos[0].id, home_upload.succeeded[0].id);

    // Titles come from file names
    let req = test::TestRequest::get().uri("/api/photos?search=BEACH").to_request();
    let page: PhotoPage = test::call_and_read_body_json(&app, req).await;
    assert_eq!(page.photos.len(), 1);

    let first: PhotoPage = test::call_and_read_body_json(
        &app,
        test::TestRequest::get().uri("/api/photos?page=1&page_size=10").to_request(),
    )
    .await;
    let second: PhotoPage = test::call_and_read_body_json(
        &app,
        test::TestRequest::get().uri("/api/photos?page=2&page_size=10").to_request(),
    )
    .await;
    assert_eq!(first.photos.len(), 10);
    assert!(first.has_more);
    assert_eq!(second.photos.len(), 4);
    assert!(!second.has_more);
    assert!(second.photos.iter().all(|p| first.photos.iter().all(|q| q.id != p.id)));
}

#[actix_web::test]
async fn test_photo_edits_and_stats() {
    let vault = vault();
    let app = app!(vault);
    let trip = vault.state.albums.create("Trip", None, false).unwrap();
    let upload: UploadResult = test::call_and_read_body_json(&app, upload_request(Some(&trip.id), &[("a.jpg", "aaaa")]).to_request()).await;
    let photo = &upload.succeeded[0];

    let req = test::TestRequest::patch()
        .uri(&format!("/api/photos/{}", photo.id))
        .set_json(json!({ "title": "Dunes", "tags": ["desert", " Desert ", ""] }))
        .to_request();
    let edited: Photo = test::call_and_read_body_json(&app, req).await;
    assert_eq!(edited.title.as_deref(), Some("Dunes"));
    assert_eq!(edited.tags, vec!["desert".to_string()]);

    let req = test::TestRequest::put()
        .uri(&format!("/api/photos/{}/album", photo.id))
        .set_json(json!({ "album_id": null }))
        .to_request();
    let moved: Photo = test::call_and_read_body_json(&app, req).await;
    let default = vault.state.albums.default_album().unwrap();
    assert_eq!(moved.album_id.as_deref(), Some(default.id.as_str()));
    assert_eq!(vault.state.albums.get(&trip.id).unwrap().photo_count, 0);

    let req = test::TestRequest::post().uri(&format!("/api/photos/{}/favorite", photo.id)).to_request();
    test::call_service(&app, req).await;

    let req = test::TestRequest::get().uri("/api/stats").to_request();
    let stats: VaultStats = test::call_and_read_body_json(&app, req).await;
    assert_eq!(
        stats,
        VaultStats {
            total_photos: 1,
            total_albums: 2,
            favorite_count: 1,
            total_bytes: 4,
        }
    );
}
