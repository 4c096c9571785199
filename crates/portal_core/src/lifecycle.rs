//! Proposal status machine.
//!
//! ```text
//! draft ──▶ in_review ──▶ approved ──▶ sent ──┬──▶ accepted
//!                                             └──▶ rejected
//! ```
//!
//! There are no backward edges. `accepted` and `rejected` are terminal,
//! both for status and for content edits.

use chrono::{DateTime, Utc};

use crate::error::PortalError;
use crate::principal::Principal;
use crate::types::{Proposal, ProposalStatus, Role};

use ProposalStatus::*;

/// Edges a client may take, on proposals shared with them.
const CLIENT_EDGES: &[(ProposalStatus, ProposalStatus)] = &[(Sent, Accepted), (Sent, Rejected)];

pub fn allowed_targets(from: ProposalStatus) -> &'static [ProposalStatus] {
    match from {
        Draft => &[InReview],
        InReview => &[Approved],
        Approved => &[Sent],
        Sent => &[Accepted, Rejected],
        Accepted | Rejected => &[],
    }
}

pub fn is_allowed(from: ProposalStatus, to: ProposalStatus) -> bool {
    allowed_targets(from).contains(&to)
}

pub fn is_terminal(status: ProposalStatus) -> bool {
    allowed_targets(status).is_empty()
}

/// Content and metadata edits are refused once a proposal is terminal.
pub fn ensure_editable(proposal: &Proposal) -> Result<(), PortalError> {
    if is_terminal(proposal.status) {
        Err(PortalError::ProposalLocked(proposal.status))
    } else {
        Ok(())
    }
}

/// Validate that `principal` may move `proposal` to `to`.
///
/// `client_has_access` is whether the proposal is assigned or shared to the
/// caller; it only matters for clients.
pub fn authorize_transition(
    principal: &Principal,
    proposal: &Proposal,
    to: ProposalStatus,
    client_has_access: bool,
) -> Result<(), PortalError> {
    let from = proposal.status;
    if !is_allowed(from, to) {
        return Err(PortalError::InvalidTransition { from, to });
    }
    match principal.role {
        Role::Admin | Role::ProjectManager => Ok(()),
        Role::Client => {
            if !client_has_access {
                return Err(PortalError::PermissionDenied(
                    "proposal is not shared with you".into(),
                ));
            }
            if CLIENT_EDGES.contains(&(from, to)) {
                Ok(())
            } else {
                Err(PortalError::PermissionDenied(format!(
                    "clients may not move a proposal from {from} to {to}"
                )))
            }
        }
    }
}

/// Outcome of an applied transition, recorded in the audit detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct AppliedTransition {
    pub from: ProposalStatus,
    pub to: ProposalStatus,
}

/// Authorize and apply. On error the proposal is left untouched.
pub fn apply_transition(
    principal: &Principal,
    proposal: &mut Proposal,
    to: ProposalStatus,
    client_has_access: bool,
    now: DateTime<Utc>,
) -> Result<AppliedTransition, PortalError> {
    authorize_transition(principal, proposal, to, client_has_access)?;
    let from = proposal.status;
    proposal.status = to;
    proposal.updated_at = now;
    Ok(AppliedTransition { from, to })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProjectPhase;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn proposal(status: ProposalStatus) -> Proposal {
        let now = Utc::now();
        Proposal {
            id: Uuid::new_v4(),
            project_name: "Portal".into(),
            client_name: "Acme".into(),
            phase: ProjectPhase::Exploratory,
            status,
            content: "<p>body</p>".into(),
            requirements: None,
            created_by: Uuid::new_v4(),
            assigned_to: None,
            client_user_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn principal(role: Role) -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            email: "x@example.com".into(),
            role,
        }
    }

    fn status_strategy() -> impl Strategy<Value = ProposalStatus> {
        prop::sample::select(ProposalStatus::ALL.to_vec())
    }

    #[test]
    fn forward_chain_is_allowed() {
        assert!(is_allowed(Draft, InReview));
        assert!(is_allowed(InReview, Approved));
        assert!(is_allowed(Approved, Sent));
        assert!(is_allowed(Sent, Accepted));
        assert!(is_allowed(Sent, Rejected));
    }

    #[test]
    fn no_backward_or_skip_edges() {
        assert!(!is_allowed(Rejected, Draft));
        assert!(!is_allowed(InReview, Draft));
        assert!(!is_allowed(Draft, Approved));
        assert!(!is_allowed(Draft, Draft));
        assert!(is_terminal(Accepted));
        assert!(is_terminal(Rejected));
        assert!(!is_terminal(Sent));
    }

    #[test]
    fn staff_takes_any_edge() {
        let pm = principal(Role::ProjectManager);
        let mut p = proposal(Draft);
        let applied = apply_transition(&pm, &mut p, InReview, false, Utc::now()).unwrap();
        assert_eq!(applied.from, Draft);
        assert_eq!(p.status, InReview);

        let admin = principal(Role::Admin);
        let mut p = proposal(Sent);
        apply_transition(&admin, &mut p, Accepted, false, Utc::now()).unwrap();
        assert_eq!(p.status, Accepted);
    }

    #[test]
    fn client_may_accept_shared_sent_proposal() {
        let client = principal(Role::Client);
        let mut p = proposal(Sent);
        apply_transition(&client, &mut p, Rejected, true, Utc::now()).unwrap();
        assert_eq!(p.status, Rejected);
    }

    #[test]
    fn client_denied_without_share() {
        let client = principal(Role::Client);
        let mut p = proposal(Sent);
        let err = apply_transition(&client, &mut p, Accepted, false, Utc::now()).unwrap_err();
        assert!(matches!(err, PortalError::PermissionDenied(_)));
        assert_eq!(p.status, Sent);
    }

    #[test]
    fn client_denied_staff_edges() {
        let client = principal(Role::Client);
        let mut p = proposal(Approved);
        let err = apply_transition(&client, &mut p, Sent, true, Utc::now()).unwrap_err();
        assert!(matches!(err, PortalError::PermissionDenied(_)));
        assert_eq!(p.status, Approved);
    }

    #[test]
    fn terminal_proposals_are_locked() {
        assert!(ensure_editable(&proposal(Sent)).is_ok());
        let err = ensure_editable(&proposal(Accepted)).unwrap_err();
        assert!(matches!(err, PortalError::ProposalLocked(Accepted)));
    }

    proptest! {
        #[test]
        fn transitions_only_follow_edges(from in status_strategy(), to in status_strategy()) {
            let admin = principal(Role::Admin);
            let mut p = proposal(from);
            let before = p.clone();
            match apply_transition(&admin, &mut p, to, false, Utc::now()) {
                Ok(applied) => {
                    prop_assert!(is_allowed(from, to));
                    prop_assert_eq!(applied.to, to);
                    prop_assert_eq!(p.status, to);
                }
                Err(PortalError::InvalidTransition { from: f, to: t }) => {
                    prop_assert!(!is_allowed(from, to));
                    prop_assert_eq!((f, t), (from, to));
                    prop_assert_eq!(p, before);
                }
                Err(other) => prop_assert!(false, "unexpected error {other}"),
            }
        }

        #[test]
        fn client_never_reaches_staff_states(from in status_strategy(), to in status_strategy()) {
            let client = principal(Role::Client);
            let mut p = proposal(from);
            if apply_transition(&client, &mut p, to, true, Utc::now()).is_ok() {
                prop_assert_eq!(from, Sent);
                prop_assert!(to == Accepted || to == Rejected);
            } else {
                prop_assert_eq!(p.status, from);
            }
        }
    }
}
