//! File uploads, downloads and attachment to proposals.

use std::collections::HashMap;

use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use super::{Portal, Result};
use crate::access;
use crate::error::PortalError;
use crate::principal::Principal;
use crate::types::*;
use crate::upload::{storage_key, FileDescriptor};

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file: FileDescriptor,
    pub proposal_id: Option<Uuid>,
    pub visibility: Option<FileVisibility>,
}

#[derive(Debug, Clone)]
pub struct FileDownload {
    pub file: FileRecord,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileQuery {
    pub kind: Option<FileKind>,
    pub proposal_id: Option<Uuid>,
    pub uploaded_by: Option<Uuid>,
    pub visibility: Option<FileVisibility>,
    pub filename: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn file_audit(actor: &Principal, action: &str, id: Uuid, detail: serde_json::Value) -> AuditLogEntry {
    AuditLogEntry::new(Some(actor.user_id), action, AuditTarget::File, id, detail)
}

impl Portal {
    /// Whether the caller may view the proposal; a missing proposal is `false`.
    async fn proposal_viewable(&self, principal: &Principal, id: Uuid) -> Result<bool> {
        let Some(proposal) = self.stores.proposals.get_proposal(id).await? else {
            return Ok(false);
        };
        let shared = self.shared_with(principal, id).await?;
        Ok(access::can_view_proposal(principal, &proposal, shared))
    }

    async fn live_file(&self, id: Uuid) -> Result<FileRecord> {
        self.stores
            .files
            .get_file(id)
            .await?
            .filter(|f| f.status != FileStatus::Deleted)
            .ok_or_else(|| PortalError::not_found("file", id))
    }

    async fn readable_file(&self, principal: &Principal, id: Uuid) -> Result<FileRecord> {
        let file = self.live_file(id).await?;
        let viewable = match file.proposal_id {
            Some(pid) => self.proposal_viewable(principal, pid).await?,
            None => false,
        };
        if !access::can_view_file(principal, &file, viewable) {
            return Err(PortalError::PermissionDenied(
                "you do not have access to this file".into(),
            ));
        }
        Ok(file)
    }

    /// Validate, store the bytes, then record the file. Nothing is stored
    /// when validation fails.
    pub async fn upload_file(&self, principal: &Principal, req: UploadRequest) -> Result<FileRecord> {
        let validated = match self.settings.upload.validate(&req.file) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(filename = %req.file.filename, size = req.file.content.len(), error = %e, "upload rejected");
                return Err(e);
            }
        };
        if let Some(pid) = req.proposal_id {
            self.editable_proposal(principal, pid).await?;
        }
        let visibility = match (req.visibility, req.proposal_id) {
            (Some(FileVisibility::Public), _) if !principal.is_staff() => {
                return Err(PortalError::PermissionDenied(
                    "only staff may publish files".into(),
                ))
            }
            (Some(FileVisibility::Private) | None, Some(_)) => FileVisibility::Proposal,
            (Some(v), _) => v,
            (None, None) => FileVisibility::Private,
        };

        let id = Uuid::new_v4();
        let key = storage_key(id, validated.kind, &validated.extension, req.proposal_id);
        let storage_ref = self
            .stores
            .blobs
            .store(&key, &req.file.content, &validated.mime_type)
            .await?;

        let now = Utc::now();
        let file = FileRecord {
            id,
            filename: validated.filename,
            original_filename: validated.original_filename,
            kind: validated.kind,
            extension: validated.extension,
            mime_type: validated.mime_type,
            size_bytes: validated.size_bytes as i64,
            storage_ref,
            visibility,
            status: FileStatus::Ready,
            uploaded_by: principal.user_id,
            proposal_id: req.proposal_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        let audit = file_audit(
            principal,
            "file.uploaded",
            id,
            json!({
                "filename": file.original_filename,
                "size_bytes": file.size_bytes,
                "proposal_id": file.proposal_id,
            }),
        );
        if let Err(e) = self.stores.files.save_file(&file, &audit).await {
            if let Err(cleanup) = self.stores.blobs.delete(&file.storage_ref).await {
                tracing::warn!(file_id = %id, error = %cleanup, "orphaned blob after failed upload");
            }
            return Err(e);
        }
        tracing::info!(file_id = %id, kind = file.kind.as_str(), size = file.size_bytes, "file uploaded");
        Ok(file)
    }

    pub async fn get_file(&self, principal: &Principal, id: Uuid) -> Result<FileRecord> {
        self.readable_file(principal, id).await
    }

    pub async fn download_file(&self, principal: &Principal, id: Uuid) -> Result<FileDownload> {
        let file = self.readable_file(principal, id).await?;
        let content = self.stores.blobs.fetch(&file.storage_ref).await?;
        self.stores
            .audit
            .append(&file_audit(principal, "file.downloaded", id, json!({})))
            .await?;
        Ok(FileDownload { file, content })
    }

    /// Attaching makes a private file visible to the proposal's viewers.
    pub async fn attach_file(&self, principal: &Principal, id: Uuid, proposal_id: Uuid) -> Result<FileRecord> {
        let mut file = self.live_file(id).await?;
        if !access::can_manage_file(principal, &file) {
            return Err(PortalError::PermissionDenied(
                "only the uploader or an admin may attach this file".into(),
            ));
        }
        self.editable_proposal(principal, proposal_id).await?;

        let previous = file.proposal_id;
        file.proposal_id = Some(proposal_id);
        if file.visibility == FileVisibility::Private {
            file.visibility = FileVisibility::Proposal;
        }
        file.updated_at = Utc::now();
        let audit = file_audit(
            principal,
            "file.attached",
            id,
            json!({ "from": previous, "to": proposal_id }),
        );
        self.stores.files.save_file(&file, &audit).await?;
        Ok(file)
    }

    pub async fn list_proposal_files(&self, principal: &Principal, proposal_id: Uuid) -> Result<Vec<FileRecord>> {
        self.viewable_proposal(principal, proposal_id).await?;
        let filter = FileFilter {
            proposal_id: Some(proposal_id),
            ..FileFilter::default()
        };
        self.stores.files.list_files(&filter).await
    }

    /// Filtered search over live files the caller may read.
    pub async fn search_files(&self, principal: &Principal, query: FileQuery) -> Result<Paged<FileRecord>> {
        let (limit, offset) = clamp_page(query.limit, query.offset);
        let filter = FileFilter {
            kind: query.kind,
            proposal_id: query.proposal_id,
            uploaded_by: query.uploaded_by,
            visibility: query.visibility,
            filename: query.filename,
            include_deleted: false,
        };

        let mut viewable: HashMap<Uuid, bool> = HashMap::new();
        let mut readable = Vec::new();
        for file in self.stores.files.list_files(&filter).await? {
            let proposal_viewable = match file.proposal_id {
                Some(pid) => match viewable.get(&pid) {
                    Some(v) => *v,
                    None => {
                        let v = self.proposal_viewable(principal, pid).await?;
                        viewable.insert(pid, v);
                        v
                    }
                },
                None => false,
            };
            if access::can_view_file(principal, &file, proposal_viewable) {
                readable.push(file);
            }
        }

        let total = readable.len() as i64;
        let items = readable
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect();
        Ok(Paged {
            items,
            total,
            limit,
            offset,
        })
    }

    /// Soft delete: the record stays, the bytes go.
    pub async fn delete_file(&self, principal: &Principal, id: Uuid) -> Result<()> {
        let mut file = self.live_file(id).await?;
        if !access::can_manage_file(principal, &file) {
            return Err(PortalError::PermissionDenied(
                "only the uploader or an admin may delete this file".into(),
            ));
        }
        let now = Utc::now();
        file.status = FileStatus::Deleted;
        file.deleted_at = Some(now);
        file.updated_at = now;
        let audit = file_audit(
            principal,
            "file.deleted",
            id,
            json!({ "filename": file.original_filename }),
        );
        self.stores.files.save_file(&file, &audit).await?;
        if let Err(e) = self.stores.blobs.delete(&file.storage_ref).await {
            tracing::warn!(file_id = %id, error = %e, "blob removal failed after delete");
        }
        tracing::info!(file_id = %id, by = %principal.user_id, "file deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::super::{AuthPolicy, PortalSettings, PortalStores};
    use super::*;
    use crate::memory::MemoryStore;
    use crate::upload::UploadPolicy;
    use std::sync::Arc;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    fn descriptor(name: &str, mime: &str, content: &[u8]) -> FileDescriptor {
        FileDescriptor {
            filename: name.into(),
            declared_mime: Some(mime.into()),
            content: content.to_vec(),
        }
    }

    fn upload(name: &str, mime: &str, content: &[u8], proposal_id: Option<Uuid>) -> UploadRequest {
        UploadRequest {
            file: descriptor(name, mime, content),
            proposal_id,
            visibility: None,
        }
    }

    #[tokio::test]
    async fn oversized_upload_stores_nothing() {
        let portal = Portal::new(
            PortalStores::in_memory(MemoryStore::new()),
            PortalSettings {
                auth: AuthPolicy {
                    bcrypt_cost: 4,
                    ..AuthPolicy::default()
                },
                upload: UploadPolicy {
                    max_bytes: 8,
                    ..UploadPolicy::default()
                },
            },
            Arc::new(FakeIssuer),
        )
        .unwrap();
        let pm = user(&portal, "pm@example.com", Role::ProjectManager).await;
        let err = portal
            .upload_file(&pm, upload("notes.txt", "text/plain", b"more than eight bytes", None))
            .await
            .unwrap_err();
        assert!(matches!(err, PortalError::FileTooLarge { size: 21, max: 8 }));

        let all = portal.search_files(&pm, FileQuery::default()).await.unwrap();
        assert_eq!(all.total, 0);
    }

    #[tokio::test]
    async fn upload_then_download() {
        let portal = portal();
        let pm = user(&portal, "pm@example.com", Role::ProjectManager).await;
        let file = portal
            .upload_file(&pm, upload("My Logo.png", "image/png", PNG, None))
            .await
            .unwrap();
        assert_eq!(file.kind, FileKind::Image);
        assert_eq!(file.filename, "My_Logo.png");
        assert_eq!(file.visibility, FileVisibility::Private);
        assert!(file.storage_ref.contains(&format!("general/image/{}.png", file.id)));

        let download = portal.download_file(&pm, file.id).await.unwrap();
        assert_eq!(download.content, PNG);
        assert_eq!(download.file.mime_type, "image/png");
    }

    #[tokio::test]
    async fn mismatched_content_is_rejected() {
        let portal = portal();
        let pm = user(&portal, "pm@example.com", Role::ProjectManager).await;
        assert!(matches!(
            portal
                .upload_file(&pm, upload("fake.pdf", "application/pdf", b"not a pdf", None))
                .await,
            Err(PortalError::ContentMismatch(_))
        ));
        assert!(matches!(
            portal
                .upload_file(&pm, upload("run.exe", "application/octet-stream", b"MZ", None))
                .await,
            Err(PortalError::UnsupportedType(_))
        ));
    }

    #[tokio::test]
    async fn attached_files_follow_proposal_visibility() {
        let portal = portal();
        let pm = user(&portal, "pm@example.com", Role::ProjectManager).await;
        let client = user(&portal, "c@example.com", Role::Client).await;

        let mut req = new_proposal("With files");
        req.client_user_id = Some(client.user_id);
        let proposal = portal.create_proposal(&pm, req).await.unwrap();
        for to in [
            ProposalStatus::InReview,
            ProposalStatus::Approved,
            ProposalStatus::Sent,
        ] {
            portal.transition_proposal(&pm, proposal.id, to, None).await.unwrap();
        }

        let file = portal
            .upload_file(&pm, upload("brief.txt", "text/plain", b"the brief", None))
            .await
            .unwrap();
        assert!(matches!(
            portal.get_file(&client, file.id).await,
            Err(PortalError::PermissionDenied(_))
        ));

        let attached = portal.attach_file(&pm, file.id, proposal.id).await.unwrap();
        assert_eq!(attached.visibility, FileVisibility::Proposal);
        assert!(portal.get_file(&client, file.id).await.is_ok());
        assert_eq!(
            portal.list_proposal_files(&client, proposal.id).await.unwrap().len(),
            1
        );
        let found = portal.search_files(&client, FileQuery::default()).await.unwrap();
        assert_eq!(found.total, 1);
    }

    #[tokio::test]
    async fn clients_cannot_upload_to_proposals_or_publish() {
        let portal = portal();
        let pm = user(&portal, "pm@example.com", Role::ProjectManager).await;
        let client = user(&portal, "c@example.com", Role::Client).await;
        let proposal = portal.create_proposal(&pm, new_proposal("P")).await.unwrap();

        assert!(matches!(
            portal
                .upload_file(&client, upload("a.txt", "text/plain", b"a", Some(proposal.id)))
                .await,
            Err(PortalError::PermissionDenied(_))
        ));
        let mut public = upload("a.txt", "text/plain", b"a", None);
        public.visibility = Some(FileVisibility::Public);
        assert!(matches!(
            portal.upload_file(&client, public).await,
            Err(PortalError::PermissionDenied(_))
        ));
    }

    #[tokio::test]
    async fn delete_is_soft_and_owner_only() {
        let portal = portal();
        let pm = user(&portal, "pm@example.com", Role::ProjectManager).await;
        let other = user(&portal, "pm2@example.com", Role::ProjectManager).await;
        let file = portal
            .upload_file(&pm, upload("notes.md", "text/markdown", b"# notes", None))
            .await
            .unwrap();

        assert!(matches!(
            portal.delete_file(&other, file.id).await,
            Err(PortalError::PermissionDenied(_))
        ));
        portal.delete_file(&pm, file.id).await.unwrap();
        assert!(matches!(
            portal.get_file(&pm, file.id).await,
            Err(PortalError::NotFound(_))
        ));

        let record = portal.stores.files.get_file(file.id).await.unwrap().unwrap();
        assert_eq!(record.status, FileStatus::Deleted);
        assert!(record.deleted_at.is_some());
        let actions: Vec<String> = portal
            .stores
            .audit
            .list_for_target(AuditTarget::File, file.id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(actions, vec!["file.uploaded", "file.deleted"]);
    }
}
