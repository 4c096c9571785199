//! Role-scoped access rules for proposals, files and user management.
//!
//! These are pure predicates; services load the rows and call them.

use crate::principal::Principal;
use crate::types::{FileRecord, FileVisibility, Proposal, Role, User};

/// Whether the caller may read `proposal`.
///
/// Staff see everything. Clients see client-visible statuses of proposals
/// assigned to them or granted through an active share (`shared_with_caller`).
pub fn can_view_proposal(principal: &Principal, proposal: &Proposal, shared_with_caller: bool) -> bool {
    match principal.role {
        Role::Admin | Role::ProjectManager => true,
        Role::Client => {
            client_has_grant(principal, proposal, shared_with_caller)
                && proposal.status.is_client_visible()
        }
    }
}

/// Assignment or share, regardless of status.
pub fn client_has_grant(principal: &Principal, proposal: &Proposal, shared_with_caller: bool) -> bool {
    proposal.client_user_id == Some(principal.user_id) || shared_with_caller
}

/// Content and metadata edits: creator, staff assignee, or admin.
pub fn can_edit_proposal(principal: &Principal, proposal: &Proposal) -> bool {
    principal.is_admin()
        || proposal.created_by == principal.user_id
        || proposal.assigned_to == Some(principal.user_id)
}

/// Whether the caller may read `file`.
///
/// `proposal_viewable` is the result of [`can_view_proposal`] for the
/// attached proposal, or `false` when the file is unattached.
pub fn can_view_file(principal: &Principal, file: &FileRecord, proposal_viewable: bool) -> bool {
    principal.is_admin()
        || file.uploaded_by == principal.user_id
        || file.visibility == FileVisibility::Public
        || (file.proposal_id.is_some() && proposal_viewable)
}

/// Attach or delete: the uploader or an admin.
pub fn can_manage_file(principal: &Principal, file: &FileRecord) -> bool {
    principal.is_admin() || file.uploaded_by == principal.user_id
}

/// Admins manage anyone except other admins; project managers manage
/// clients. Everyone manages themselves.
pub fn can_manage_user(principal: &Principal, target: &User) -> bool {
    if principal.user_id == target.id {
        return true;
    }
    match principal.role {
        Role::Admin => target.role != Role::Admin,
        Role::ProjectManager => target.role == Role::Client,
        Role::Client => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileKind, FileStatus, ProjectPhase, ProposalStatus, UserStatus};
    use chrono::Utc;
    use uuid::Uuid;

    fn principal(role: Role) -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            email: "p@example.com".into(),
            role,
        }
    }

    fn proposal(created_by: Uuid, status: ProposalStatus) -> Proposal {
        let now = Utc::now();
        Proposal {
            id: Uuid::new_v4(),
            project_name: "Portal".into(),
            client_name: "Acme".into(),
            phase: ProjectPhase::Discovery,
            status,
            content: String::new(),
            requirements: None,
            created_by,
            assigned_to: None,
            client_user_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn file(uploaded_by: Uuid, visibility: FileVisibility, proposal_id: Option<Uuid>) -> FileRecord {
        let now = Utc::now();
        FileRecord {
            id: Uuid::new_v4(),
            filename: "brief.pdf".into(),
            original_filename: "brief.pdf".into(),
            kind: FileKind::Document,
            extension: "pdf".into(),
            mime_type: "application/pdf".into(),
            size_bytes: 10,
            storage_ref: "memory://x".into(),
            visibility,
            status: FileStatus::Ready,
            uploaded_by,
            proposal_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn user(role: Role) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: "t@example.com".into(),
            password_hash: String::new(),
            first_name: "T".into(),
            last_name: "U".into(),
            phone_number: None,
            company: None,
            bio: None,
            timezone: "UTC".into(),
            role,
            status: UserStatus::Active,
            is_verified: true,
            failed_login_attempts: 0,
            locked_until: None,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn staff_view_everything() {
        let p = proposal(Uuid::new_v4(), ProposalStatus::Draft);
        assert!(can_view_proposal(&principal(Role::ProjectManager), &p, false));
        assert!(can_view_proposal(&principal(Role::Admin), &p, false));
    }

    #[test]
    fn client_needs_grant_and_visible_status() {
        let client = principal(Role::Client);
        let mut p = proposal(Uuid::new_v4(), ProposalStatus::Sent);
        assert!(!can_view_proposal(&client, &p, false));
        assert!(can_view_proposal(&client, &p, true));

        p.client_user_id = Some(client.user_id);
        assert!(can_view_proposal(&client, &p, false));

        p.status = ProposalStatus::Draft;
        assert!(!can_view_proposal(&client, &p, false));
    }

    #[test]
    fn edit_limited_to_creator_assignee_admin() {
        let pm = principal(Role::ProjectManager);
        let mut p = proposal(Uuid::new_v4(), ProposalStatus::Draft);
        assert!(!can_edit_proposal(&pm, &p));
        p.assigned_to = Some(pm.user_id);
        assert!(can_edit_proposal(&pm, &p));
        assert!(can_edit_proposal(&principal(Role::Admin), &p));

        let creator = principal(Role::ProjectManager);
        let p = proposal(creator.user_id, ProposalStatus::Draft);
        assert!(can_edit_proposal(&creator, &p));
    }

    #[test]
    fn client_never_edits_even_when_shared() {
        let client = principal(Role::Client);
        let mut p = proposal(Uuid::new_v4(), ProposalStatus::Sent);
        p.client_user_id = Some(client.user_id);
        assert!(!can_edit_proposal(&client, &p));
    }

    #[test]
    fn attached_file_follows_proposal_visibility() {
        let viewer = principal(Role::Client);
        let f = file(Uuid::new_v4(), FileVisibility::Private, Some(Uuid::new_v4()));
        assert!(can_view_file(&viewer, &f, true));
        assert!(!can_view_file(&viewer, &f, false));
    }

    #[test]
    fn public_and_owned_files() {
        let viewer = principal(Role::Client);
        assert!(can_view_file(
            &viewer,
            &file(Uuid::new_v4(), FileVisibility::Public, None),
            false
        ));
        assert!(can_view_file(
            &viewer,
            &file(viewer.user_id, FileVisibility::Private, None),
            false
        ));
        assert!(!can_view_file(
            &viewer,
            &file(Uuid::new_v4(), FileVisibility::Private, None),
            false
        ));
    }

    #[test]
    fn file_management_is_uploader_or_admin() {
        let owner = principal(Role::ProjectManager);
        let f = file(owner.user_id, FileVisibility::Private, None);
        assert!(can_manage_file(&owner, &f));
        assert!(can_manage_file(&principal(Role::Admin), &f));
        assert!(!can_manage_file(&principal(Role::ProjectManager), &f));
    }

    #[test]
    fn user_management_rules() {
        let admin = principal(Role::Admin);
        let pm = principal(Role::ProjectManager);
        assert!(can_manage_user(&admin, &user(Role::ProjectManager)));
        assert!(!can_manage_user(&admin, &user(Role::Admin)));
        assert!(can_manage_user(&pm, &user(Role::Client)));
        assert!(!can_manage_user(&pm, &user(Role::ProjectManager)));
        assert!(!can_manage_user(&principal(Role::Client), &user(Role::Client)));

        let mut me = user(Role::Admin);
        me.id = admin.user_id;
        assert!(can_manage_user(&admin, &me));
    }
}
