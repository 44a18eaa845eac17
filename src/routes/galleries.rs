use std::time::Duration;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use diesel::{dsl::count_star, prelude::*};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Client, Gallery, GalleryAsset, NewGallery, NewGalleryAsset},
    schema::{clients, galleries, gallery_assets},
    state::AppState,
    utils::respond::{self, Envelope, PageQuery, Pagination},
    utils::to_iso,
};

pub const GALLERY_ACTIVE: &str = "ACTIVE";
pub const GALLERY_ARCHIVED: &str = "ARCHIVED";

const DOWNLOAD_URL_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Serialize)]
pub struct GalleryResponse {
    pub id: Uuid,
    pub client_id: Option<Uuid>,
    pub title: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Gallery> for GalleryResponse {
    fn from(gallery: Gallery) -> Self {
        Self {
            id: gallery.id,
            client_id: gallery.client_id,
            title: gallery.title,
            status: gallery.status,
            created_at: to_iso(gallery.created_at),
            updated_at: to_iso(gallery.updated_at),
        }
    }
}

#[derive(Serialize)]
pub struct AssetResponse {
    pub id: Uuid,
    pub gallery_id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub created_at: String,
}

impl From<GalleryAsset> for AssetResponse {
    fn from(asset: GalleryAsset) -> Self {
        Self {
            id: asset.id,
            gallery_id: asset.gallery_id,
            filename: asset.filename,
            content_type: asset.content_type,
            size_bytes: asset.size_bytes,
            created_at: to_iso(asset.created_at),
        }
    }
}

#[derive(Deserialize)]
pub struct GalleryListQuery {
    #[serde(default)]
    pub include_archived: bool,
    pub client_id: Option<Uuid>,
    #[serde(flatten)]
    pub page: PageQuery,
}

#[derive(Deserialize)]
pub struct CreateGalleryRequest {
    pub title: String,
    pub client_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct UpdateGalleryRequest {
    pub title: Option<String>,
    pub client_id: Option<Option<Uuid>>,
}

#[derive(Serialize)]
pub struct DownloadResponse {
    pub url: String,
    pub expires_in_seconds: u64,
}

pub async fn list_galleries(
    State(state): State<AppState>,
    Query(params): Query<GalleryListQuery>,
) -> AppResult<Json<Envelope<Vec<GalleryResponse>>>> {
    let mut conn = state.db()?;

    let mut query = galleries::table.into_boxed();
    let mut count_query = galleries::table.into_boxed();

    if !params.include_archived {
        query = query.filter(galleries::status.ne(GALLERY_ARCHIVED));
        count_query = count_query.filter(galleries::status.ne(GALLERY_ARCHIVED));
    }
    if let Some(client_id) = params.client_id {
        query = query.filter(galleries::client_id.eq(client_id));
        count_query = count_query.filter(galleries::client_id.eq(client_id));
    }

    let total: i64 = count_query.select(count_star()).first(&mut conn)?;
    let rows: Vec<Gallery> = query
        .order(galleries::created_at.desc())
        .offset(params.page.offset())
        .limit(params.page.per_page())
        .load(&mut conn)?;

    Ok(respond::paginated(
        rows.into_iter().map(GalleryResponse::from).collect(),
        Pagination {
            page: params.page.page(),
            per_page: params.page.per_page(),
            total,
        },
    ))
}

pub async fn create_gallery(
    State(state): State<AppState>,
    Json(payload): Json<CreateGalleryRequest>,
) -> AppResult<Json<Envelope<GalleryResponse>>> {
    let title = payload.title.trim();
    if title.is_empty() {
        return Err(AppError::bad_request("title must not be empty"));
    }

    let mut conn = state.db()?;
    if let Some(client_id) = payload.client_id {
        clients::table
            .find(client_id)
            .first::<Client>(&mut conn)
            .optional()?
            .ok_or_else(AppError::not_found)?;
    }

    let new_gallery = NewGallery {
        id: Uuid::new_v4(),
        client_id: payload.client_id,
        title: title.to_string(),
        status: GALLERY_ACTIVE.to_string(),
    };

    diesel::insert_into(galleries::table)
        .values(&new_gallery)
        .execute(&mut conn)?;

    let gallery: Gallery = galleries::table.find(new_gallery.id).first(&mut conn)?;
    Ok(respond::ok(gallery.into()))
}

pub async fn get_gallery(
    State(state): State<AppState>,
    Path(gallery_id): Path<Uuid>,
) -> AppResult<Json<Envelope<GalleryResponse>>> {
    let mut conn = state.db()?;
    let gallery: Gallery = galleries::table.find(gallery_id).first(&mut conn)?;
    Ok(respond::ok(gallery.into()))
}

pub async fn update_gallery(
    State(state): State<AppState>,
    Path(gallery_id): Path<Uuid>,
    Json(payload): Json<UpdateGalleryRequest>,
) -> AppResult<Json<Envelope<GalleryResponse>>> {
    let mut conn = state.db()?;
    let existing: Gallery = galleries::table.find(gallery_id).first(&mut conn)?;

    let mut new_title: Option<String> = None;
    if let Some(ref candidate) = payload.title {
        let trimmed = candidate.trim();
        if trimmed.is_empty() {
            return Err(AppError::bad_request("title must not be empty"));
        }
        new_title = Some(trimmed.to_string());
    }

    if let Some(Some(client_id)) = payload.client_id {
        clients::table
            .find(client_id)
            .first::<Client>(&mut conn)
            .optional()?
            .ok_or_else(AppError::not_found)?;
    }

    if new_title.is_none() && payload.client_id.is_none() {
        return Ok(respond::ok(existing.into()));
    }

    diesel::update(galleries::table.find(gallery_id))
        .set((
            new_title.map(|t| galleries::title.eq(t)),
            payload.client_id.map(|c| galleries::client_id.eq(c)),
            galleries::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    let updated: Gallery = galleries::table.find(gallery_id).first(&mut conn)?;
    Ok(respond::ok(updated.into()))
}

/// Archiving keeps the assets in storage; only the listing visibility
/// changes.
pub async fn archive_gallery(
    State(state): State<AppState>,
    Path(gallery_id): Path<Uuid>,
) -> AppResult<Json<Envelope<GalleryResponse>>> {
    let mut conn = state.db()?;
    let updated = diesel::update(galleries::table.find(gallery_id))
        .set((
            galleries::status.eq(GALLERY_ARCHIVED),
            galleries::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;
    if updated == 0 {
        return Err(AppError::not_found());
    }

    let gallery: Gallery = galleries::table.find(gallery_id).first(&mut conn)?;
    Ok(respond::ok(gallery.into()))
}

pub async fn list_assets(
    State(state): State<AppState>,
    Path(gallery_id): Path<Uuid>,
) -> AppResult<Json<Envelope<Vec<AssetResponse>>>> {
    let mut conn = state.db()?;
    galleries::table
        .find(gallery_id)
        .first::<Gallery>(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    let rows: Vec<GalleryAsset> = gallery_assets::table
        .filter(gallery_assets::gallery_id.eq(gallery_id))
        .order(gallery_assets::created_at.asc())
        .load(&mut conn)?;

    Ok(respond::ok(
        rows.into_iter().map(AssetResponse::from).collect(),
    ))
}

pub async fn upload_asset(
    State(state): State<AppState>,
    Path(gallery_id): Path<Uuid>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<Envelope<AssetResponse>>)> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut original_name: Option<String> = None;
    let mut content_type: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        let msg = format!("invalid multipart data: {err}");
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(msg)
    })? {
        let name = field.name().map(|n| n.to_string());
        if name.as_deref() == Some("file") {
            original_name = field.file_name().map(|n| n.to_string());
            content_type = field.content_type().map(|mime| mime.to_string());
            let data = field.bytes().await.map_err(|err| {
                let msg = format!("failed to read file bytes: {err}");
                error!(error = %err, "failed to read file bytes");
                AppError::bad_request(msg)
            })?;
            file_bytes = Some(data.to_vec());
        }
    }

    let file_bytes = file_bytes.ok_or_else(|| AppError::bad_request("file field is required"))?;
    if file_bytes.is_empty() {
        return Err(AppError::bad_request("file field must not be empty"));
    }
    let filename =
        original_name.ok_or_else(|| AppError::bad_request("filename is required"))?;

    let content_type = content_type.unwrap_or_else(|| {
        mime_guess::from_path(&filename)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    });

    let mut conn = state.db()?;
    let gallery: Gallery = galleries::table
        .find(gallery_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;
    if gallery.status == GALLERY_ARCHIVED {
        return Err(AppError::conflict(
            "assets cannot be added to an archived gallery",
        ));
    }

    let asset_id = Uuid::new_v4();
    let storage_key = format!("galleries/{gallery_id}/{asset_id}");
    let size_bytes = file_bytes.len() as i64;

    state
        .storage
        .put_object(
            &storage_key,
            file_bytes,
            Some(content_type.clone()),
            attachment_content_disposition(&filename),
        )
        .await
        .map_err(|err| {
            error!(error = %err, key = %storage_key, "failed to store gallery asset");
            AppError::internal(format!("failed to store asset: {err}"))
        })?;

    let new_asset = NewGalleryAsset {
        id: asset_id,
        gallery_id,
        filename,
        storage_key,
        content_type,
        size_bytes,
    };

    diesel::insert_into(gallery_assets::table)
        .values(&new_asset)
        .execute(&mut conn)?;

    let asset: GalleryAsset = gallery_assets::table.find(asset_id).first(&mut conn)?;
    Ok((StatusCode::CREATED, respond::ok(asset.into())))
}

/// Hands out a short-lived presigned URL; object bytes never flow
/// through the service.
pub async fn download_asset(
    State(state): State<AppState>,
    Path((gallery_id, asset_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<Envelope<DownloadResponse>>> {
    let mut conn = state.db()?;
    let asset: GalleryAsset = gallery_assets::table
        .find(asset_id)
        .filter(gallery_assets::gallery_id.eq(gallery_id))
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    let url = state
        .storage
        .presign_get_object(&asset.storage_key, DOWNLOAD_URL_TTL)
        .await
        .map_err(|err| {
            error!(error = %err, key = %asset.storage_key, "failed to presign download");
            AppError::internal(format!("failed to presign download: {err}"))
        })?;

    Ok(respond::ok(DownloadResponse {
        url,
        expires_in_seconds: DOWNLOAD_URL_TTL.as_secs(),
    }))
}

pub async fn delete_asset(
    State(state): State<AppState>,
    Path((gallery_id, asset_id)): Path<(Uuid, Uuid)>,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    let asset: GalleryAsset = gallery_assets::table
        .find(asset_id)
        .filter(gallery_assets::gallery_id.eq(gallery_id))
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;

    // The row goes first; a leaked object is recoverable, a dangling row
    // is not.
    diesel::delete(gallery_assets::table.find(asset_id)).execute(&mut conn)?;

    if let Err(err) = state.storage.delete_object(&asset.storage_key).await {
        warn!(error = %err, key = %asset.storage_key, "failed to delete stored asset");
    }

    Ok(StatusCode::NO_CONTENT)
}

fn attachment_content_disposition(filename: &str) -> Option<String> {
    if filename.is_empty() {
        return None;
    }

    let sanitized: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            _ => ch,
        })
        .collect();

    let encoded =
        percent_encoding::utf8_percent_encode(&sanitized, percent_encoding::NON_ALPHANUMERIC);
    Some(format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        sanitized, encoded
    ))
}
