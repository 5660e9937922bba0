//! HTTP handlers
//!
//! Thin actix-web layer over the services in [`crate::service`]. Every route
//! sits behind the external authentication gate; nothing here checks
//! identity. Errors are rendered by the `ResponseError` impl of
//! [`VaultError`].

use actix_web::{delete, get, patch, post, put, web, HttpRequest, HttpResponse};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::app_state::AppState;
use crate::error::{Result, VaultError};
use crate::metadata::{AlbumPatch, PhotoPatch};
use crate::service::{PhotoListQuery, RequestContext, UploadItem};
use crate::storage::UploadedBlob;

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateAlbumRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub is_private: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CoverRequest {
    /// `null` clears the cover
    pub photo_id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ReassignRequest {
    /// `null` moves the photo to the default album
    pub album_id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct BulkDeleteRequest {
    pub photo_ids: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CommitRequest {
    pub album_id: String,
    pub uploaded: Vec<UploadedBlob>,
}

/// Register every route on an actix app or scope
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(list_albums)
        .service(create_album)
        .service(get_album)
        .service(update_album)
        .service(delete_album)
        .service(set_album_cover)
        .service(list_photos)
        .service(upload_photos)
        .service(commit_photos)
        .service(bulk_delete_photos)
        .service(get_photo)
        .service(update_photo)
        .service(delete_photo)
        .service(toggle_favorite)
        .service(reassign_photo)
        .service(get_stats);
}

#[get("/api/albums")]
async fn list_albums(ctx: RequestContext, state: web::Data<AppState>) -> Result<HttpResponse> {
    debug!("[{}] list albums", ctx.request_id);
    Ok(HttpResponse::Ok().json(state.queries.list_albums()?))
}

#[post("/api/albums")]
async fn create_album(
    ctx: RequestContext,
    state: web::Data<AppState>,
    body: web::Json<CreateAlbumRequest>,
) -> Result<HttpResponse> {
    let body = body.into_inner();
    let album = state.albums.create(&body.name, body.description, body.is_private)?;
    info!("[{}] created album {}", ctx.request_id, album.id);
    Ok(HttpResponse::Created().json(album))
}

#[get("/api/albums/{id}")]
async fn get_album(state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(state.albums.get(&path)?))
}

#[patch("/api/albums/{id}")]
async fn update_album(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<AlbumPatch>,
) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(state.albums.update(&path, &body)?))
}

#[delete("/api/albums/{id}")]
async fn delete_album(ctx: RequestContext, state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse> {
    let album_id = path.into_inner();
    let moved = state.albums.delete(&album_id)?;
    info!("[{}] deleted album {}", ctx.request_id, album_id);
    Ok(HttpResponse::Ok().json(json!({ "deleted": album_id, "reassigned_photos": moved })))
}

#[put("/api/albums/{id}/cover")]
async fn set_album_cover(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<CoverRequest>,
) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(state.albums.set_cover(&path, body.photo_id.as_deref())?))
}

#[get("/api/photos")]
async fn list_photos(state: web::Data<AppState>, query: web::Query<PhotoListQuery>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(state.queries.list_photos(&query)?))
}

#[get("/api/photos/{id}")]
async fn get_photo(state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(state.photos.get(&path)?))
}

#[patch("/api/photos/{id}")]
async fn update_photo(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<PhotoPatch>,
) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(state.photos.update_details(&path, &body)?))
}

#[delete("/api/photos/{id}")]
async fn delete_photo(ctx: RequestContext, state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse> {
    let photo = state.deletions.delete_photo(&path).await?;
    info!("[{}] deleted photo {}", ctx.request_id, photo.id);
    Ok(HttpResponse::Ok().json(json!({ "deleted": photo.id })))
}

#[post("/api/photos/{id}/favorite")]
async fn toggle_favorite(state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse> {
    let photo_id = path.into_inner();
    let is_favorite = state.photos.toggle_favorite(&photo_id)?;
    Ok(HttpResponse::Ok().json(json!({ "id": photo_id, "is_favorite": is_favorite })))
}

#[put("/api/photos/{id}/album")]
async fn reassign_photo(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<ReassignRequest>,
) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(state.photos.reassign_album(&path, body.album_id.as_deref())?))
}

#[post("/api/photos/bulk-delete")]
async fn bulk_delete_photos(
    ctx: RequestContext,
    state: web::Data<AppState>,
    body: web::Json<BulkDeleteRequest>,
) -> Result<HttpResponse> {
    let result = state.deletions.bulk_delete(&body.photo_ids).await?;
    info!(
        "[{}] bulk delete: {} deleted, {} blob failure(s)",
        ctx.request_id,
        result.deleted_count,
        result.blob_failures.len()
    );
    Ok(HttpResponse::Ok().json(result))
}

/// Files and target album of a multipart upload
async fn read_upload_form(body: Bytes, content_type: &str) -> Result<(Vec<UploadItem>, Option<String>)> {
    let boundary =
        multer::parse_boundary(content_type).map_err(|e| VaultError::Validation(format!("bad multipart request: {}", e)))?;
    let stream = futures::stream::once(async move { Ok::<Bytes, std::io::Error>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut items = Vec::new();
    let mut album_id = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| VaultError::Validation(format!("bad multipart field: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("files") => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| VaultError::Validation(format!("unreadable file {}: {}", file_name, e)))?;
                items.push(UploadItem { file_name, data });
            }
            Some("album_id") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| VaultError::Validation(format!("unreadable album_id: {}", e)))?;
                let text = text.trim();
                if !text.is_empty() {
                    album_id = Some(text.to_string());
                }
            }
            other => debug!("Ignoring multipart field {:?}", other),
        }
    }
    Ok((items, album_id))
}

#[post("/api/photos/upload")]
async fn upload_photos(
    ctx: RequestContext,
    req: HttpRequest,
    mut payload: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let content_type = req
        .headers()
        .get("content-type")
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let limit = state.config.server.max_payload_size;
    let mut bytes = BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| VaultError::Validation(format!("upload interrupted: {}", e)))?;
        if bytes.len() + chunk.len() > limit {
            return Err(VaultError::Validation(format!("upload exceeds {} bytes", limit)));
        }
        bytes.extend_from_slice(&chunk);
    }
    info!("[{}] received upload of {} bytes", ctx.request_id, bytes.len());

    let (items, album_id) = read_upload_form(bytes.freeze(), &content_type).await?;
    let result = state.uploads.upload(items, album_id.as_deref()).await?;
    Ok(HttpResponse::Ok().json(result))
}

#[post("/api/photos/commit")]
async fn commit_photos(state: web::Data<AppState>, body: web::Json<CommitRequest>) -> Result<HttpResponse> {
    let CommitRequest { album_id, uploaded } = body.into_inner();
    let photos = state.uploads.commit_uploaded(&album_id, uploaded).await?;
    Ok(HttpResponse::Created().json(photos))
}

#[get("/api/stats")]
async fn get_stats(state: web::Data<AppState>) -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(state.stats.compute_stats()?))
}
