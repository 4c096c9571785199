//! /api/v1/files: multipart upload, download, search and attachment.

use std::sync::Arc;

use axum::extract::multipart::MultipartError;
use axum::extract::Multipart;
use axum::http::StatusCode;
use axum::response::Response;
use axum::{Extension, Json};
use portal_core::error::PortalError;
use portal_core::principal::Principal;
use portal_core::service::{FileQuery, UploadRequest};
use portal_core::types::{FileRecord, FileVisibility, Paged};
use portal_core::upload::FileDescriptor;
use portal_core::Portal;
use serde::Deserialize;
use uuid::Uuid;

use super::attachment;
use crate::error::AppError;
use crate::extract::{ApiJson, ApiPath, ApiQuery};

#[derive(Debug, Deserialize)]
pub struct AttachRequest {
    pub proposal_id: Uuid,
}

fn multipart_error(portal: &Portal, e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        let max = portal.settings().upload.max_bytes;
        // The body limit tripped before the file was fully read; report it
        // as at least one byte over.
        return AppError(PortalError::FileTooLarge { size: max + 1, max });
    }
    AppError::bad_request(format!("malformed multipart body: {}", e.body_text()))
}

/// Multipart fields: `file` (required), `proposal_id`, `visibility`.
pub async fn upload(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<FileRecord>), AppError> {
    let mut file = None;
    let mut proposal_id = None;
    let mut visibility = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(&portal, e))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let declared_mime = field.content_type().map(str::to_string);
                let content = field
                    .bytes()
                    .await
                    .map_err(|e| multipart_error(&portal, e))?;
                file = Some(FileDescriptor {
                    filename,
                    declared_mime,
                    content: content.to_vec(),
                });
            }
            "proposal_id" => {
                let text = field.text().await.map_err(|e| multipart_error(&portal, e))?;
                let text = text.trim();
                if !text.is_empty() {
                    let id = Uuid::parse_str(text)
                        .map_err(|_| AppError::bad_request(format!("invalid proposal_id {text}")))?;
                    proposal_id = Some(id);
                }
            }
            "visibility" => {
                let text = field.text().await.map_err(|e| multipart_error(&portal, e))?;
                let text = text.trim();
                if !text.is_empty() {
                    let v = FileVisibility::from_str(text)
                        .ok_or_else(|| AppError::bad_request(format!("invalid visibility {text}")))?;
                    visibility = Some(v);
                }
            }
            other => {
                tracing::debug!(field = other, "ignoring unknown multipart field");
            }
        }
    }

    let file = file.ok_or_else(|| AppError::bad_request("multipart field `file` is required"))?;
    let record = portal
        .upload_file(
            &principal,
            UploadRequest {
                file,
                proposal_id,
                visibility,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

pub async fn search(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiQuery(query): ApiQuery<FileQuery>,
) -> Result<Json<Paged<FileRecord>>, AppError> {
    Ok(Json(portal.search_files(&principal, query).await?))
}

pub async fn get_file(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<FileRecord>, AppError> {
    Ok(Json(portal.get_file(&principal, id).await?))
}

pub async fn download(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Response, AppError> {
    let download = portal.download_file(&principal, id).await?;
    Ok(attachment(
        &download.file.mime_type,
        &download.file.original_filename,
        download.content,
    ))
}

pub async fn delete_file(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<StatusCode, AppError> {
    portal.delete_file(&principal, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn attach(
    Extension(portal): Extension<Arc<Portal>>,
    Extension(principal): Extension<Principal>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<AttachRequest>,
) -> Result<Json<FileRecord>, AppError> {
    Ok(Json(portal.attach_file(&principal, id, req.proposal_id).await?))
}
