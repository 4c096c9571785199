//! Read-side projections over a caller's visible proposals.
//!
//! Callers pass an already role-filtered set; nothing here checks access.

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::types::{ProjectPhase, Proposal, ProposalStatus, ProposalSummary};

const RECENT_LIMIT: usize = 5;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusBucket {
    pub status: ProposalStatus,
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PhaseBucket {
    pub phase: ProjectPhase,
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DashboardSummary {
    pub total: usize,
    pub by_status: Vec<StatusBucket>,
    pub by_phase: Vec<PhaseBucket>,
    /// in_review + approved + sent
    pub active: usize,
    pub completed: usize,
    pub rejected: usize,
    /// accepted / (accepted + rejected), as a percentage.
    pub acceptance_rate: Option<f64>,
    pub created_this_month: usize,
    pub recent: Vec<ProposalSummary>,
}

/// Share of `part` in `total`, rounded to one decimal place.
pub fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 * 1000.0 / total as f64).round() / 10.0
}

fn count_status(proposals: &[Proposal], status: ProposalStatus) -> usize {
    proposals.iter().filter(|p| p.status == status).count()
}

/// Most recently updated first.
pub fn recent(proposals: &[Proposal], limit: usize) -> Vec<ProposalSummary> {
    let mut sorted: Vec<&Proposal> = proposals.iter().collect();
    sorted.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    sorted.into_iter().take(limit).map(ProposalSummary::from).collect()
}

impl DashboardSummary {
    pub fn compute(proposals: &[Proposal], now: DateTime<Utc>) -> Self {
        let total = proposals.len();

        let by_status = ProposalStatus::ALL
            .iter()
            .map(|s| {
                let count = count_status(proposals, *s);
                StatusBucket {
                    status: *s,
                    count,
                    percentage: percentage(count, total),
                }
            })
            .collect();

        let by_phase = ProjectPhase::ALL
            .iter()
            .map(|ph| {
                let count = proposals.iter().filter(|p| p.phase == *ph).count();
                PhaseBucket {
                    phase: *ph,
                    count,
                    percentage: percentage(count, total),
                }
            })
            .collect();

        let active = proposals
            .iter()
            .filter(|p| {
                matches!(
                    p.status,
                    ProposalStatus::InReview | ProposalStatus::Approved | ProposalStatus::Sent
                )
            })
            .count();
        let completed = count_status(proposals, ProposalStatus::Accepted);
        let rejected = count_status(proposals, ProposalStatus::Rejected);
        let decided = completed + rejected;
        let acceptance_rate = (decided > 0).then(|| percentage(completed, decided));

        let created_this_month = proposals
            .iter()
            .filter(|p| p.created_at.year() == now.year() && p.created_at.month() == now.month())
            .count();

        Self {
            total,
            by_status,
            by_phase,
            active,
            completed,
            rejected,
            acceptance_rate,
            created_this_month,
            recent: recent(proposals, RECENT_LIMIT),
        }
    }

    pub fn count_for(&self, status: ProposalStatus) -> usize {
        self.by_status
            .iter()
            .find(|b| b.status == status)
            .map(|b| b.count)
            .unwrap_or(0)
    }
}

/// Client portal dashboard.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ClientDashboard {
    pub total_proposals: usize,
    /// Accepted proposals, i.e. running projects.
    pub active_projects: usize,
    /// Sent and awaiting the client's decision.
    pub pending_proposals: usize,
    /// Phase distribution of active projects.
    pub phase_summary: Vec<PhaseBucket>,
    pub recent: Vec<ProposalSummary>,
}

impl ClientDashboard {
    pub fn compute(proposals: &[Proposal]) -> Self {
        let accepted: Vec<&Proposal> = proposals
            .iter()
            .filter(|p| p.status == ProposalStatus::Accepted)
            .collect();
        let phase_summary = ProjectPhase::ALL
            .iter()
            .map(|ph| {
                let count = accepted.iter().filter(|p| p.phase == *ph).count();
                PhaseBucket {
                    phase: *ph,
                    count,
                    percentage: percentage(count, accepted.len()),
                }
            })
            .collect();
        Self {
            total_proposals: proposals.len(),
            active_projects: accepted.len(),
            pending_proposals: count_status(proposals, ProposalStatus::Sent),
            phase_summary,
            recent: recent(proposals, RECENT_LIMIT),
        }
    }
}

/// Assigned workload of one staff member.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TeamMemberLoad {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub active: usize,
    pub completed: usize,
}

pub fn member_load(user_id: Uuid, name: String, email: String, proposals: &[Proposal]) -> TeamMemberLoad {
    let assigned = proposals.iter().filter(|p| p.assigned_to == Some(user_id));
    let (mut active, mut completed) = (0, 0);
    for p in assigned {
        match p.status {
            ProposalStatus::Accepted => completed += 1,
            ProposalStatus::Rejected => {}
            _ => active += 1,
        }
    }
    TeamMemberLoad {
        user_id,
        name,
        email,
        active,
        completed,
    }
}

/// Proposals created, and decisions reached, in one calendar month.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MonthBucket {
    /// `YYYY-MM`
    pub month: String,
    pub created: usize,
    pub accepted: usize,
    pub rejected: usize,
}

fn month_key(at: DateTime<Utc>) -> (i32, u32) {
    (at.year(), at.month())
}

/// The last `months` calendar months up to and including `now`'s, oldest
/// first. Decisions are dated by `updated_at`.
pub fn monthly_activity(proposals: &[Proposal], now: DateTime<Utc>, months: u32) -> Vec<MonthBucket> {
    let (mut year, mut month) = month_key(now);
    let mut keys = Vec::with_capacity(months as usize);
    for _ in 0..months {
        keys.push((year, month));
        if month == 1 {
            year -= 1;
            month = 12;
        } else {
            month -= 1;
        }
    }
    keys.reverse();

    keys.into_iter()
        .map(|key| {
            let decided = |status: ProposalStatus| {
                proposals
                    .iter()
                    .filter(|p| p.status == status && month_key(p.updated_at) == key)
                    .count()
            };
            MonthBucket {
                month: format!("{:04}-{:02}", key.0, key.1),
                created: proposals
                    .iter()
                    .filter(|p| month_key(p.created_at) == key)
                    .count(),
                accepted: decided(ProposalStatus::Accepted),
                rejected: decided(ProposalStatus::Rejected),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn proposal(status: ProposalStatus, phase: ProjectPhase, created_at: DateTime<Utc>) -> Proposal {
        Proposal {
            id: Uuid::new_v4(),
            project_name: "P".into(),
            client_name: "C".into(),
            phase,
            status,
            content: String::new(),
            requirements: None,
            created_by: Uuid::new_v4(),
            assigned_to: None,
            client_user_id: None,
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn empty_set_is_zero_filled() {
        let s = DashboardSummary::compute(&[], Utc::now());
        assert_eq!(s.total, 0);
        assert_eq!(s.by_status.len(), 6);
        assert_eq!(s.by_phase.len(), 4);
        assert!(s.by_status.iter().all(|b| b.count == 0 && b.percentage == 0.0));
        assert_eq!(s.acceptance_rate, None);
        assert!(s.recent.is_empty());
    }

    #[test]
    fn counts_and_percentages() {
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();
        let last_month = now - Duration::days(40);
        let proposals = vec![
            proposal(ProposalStatus::Draft, ProjectPhase::Exploratory, now),
            proposal(ProposalStatus::InReview, ProjectPhase::Exploratory, now),
            proposal(ProposalStatus::Accepted, ProjectPhase::Development, last_month),
            proposal(ProposalStatus::Accepted, ProjectPhase::Deployment, last_month),
            proposal(ProposalStatus::Rejected, ProjectPhase::Discovery, last_month),
            proposal(ProposalStatus::Sent, ProjectPhase::Discovery, now),
        ];
        let s = DashboardSummary::compute(&proposals, now);
        assert_eq!(s.total, 6);
        assert_eq!(s.count_for(ProposalStatus::Accepted), 2);
        assert_eq!(s.active, 2);
        assert_eq!(s.completed, 2);
        assert_eq!(s.rejected, 1);
        assert_eq!(s.acceptance_rate, Some(66.7));
        assert_eq!(s.created_this_month, 3);
        let accepted = s
            .by_status
            .iter()
            .find(|b| b.status == ProposalStatus::Accepted)
            .unwrap();
        assert_eq!(accepted.percentage, 33.3);
        assert_eq!(s.recent.len(), 5);
    }

    #[test]
    fn recent_is_newest_first() {
        let now = Utc::now();
        let old = proposal(ProposalStatus::Draft, ProjectPhase::Exploratory, now - Duration::days(3));
        let new = proposal(ProposalStatus::Draft, ProjectPhase::Exploratory, now);
        let r = recent(&[old.clone(), new.clone()], 5);
        assert_eq!(r[0].id, new.id);
        assert_eq!(r[1].id, old.id);
    }

    #[test]
    fn client_dashboard_buckets() {
        let now = Utc::now();
        let proposals = vec![
            proposal(ProposalStatus::Accepted, ProjectPhase::Development, now),
            proposal(ProposalStatus::Sent, ProjectPhase::Exploratory, now),
            proposal(ProposalStatus::Sent, ProjectPhase::Exploratory, now),
        ];
        let d = ClientDashboard::compute(&proposals);
        assert_eq!(d.total_proposals, 3);
        assert_eq!(d.active_projects, 1);
        assert_eq!(d.pending_proposals, 2);
        let dev = d
            .phase_summary
            .iter()
            .find(|b| b.phase == ProjectPhase::Development)
            .unwrap();
        assert_eq!(dev.count, 1);
        assert_eq!(dev.percentage, 100.0);
    }

    #[test]
    fn monthly_activity_wraps_the_year() {
        let now = Utc.with_ymd_and_hms(2025, 2, 10, 9, 0, 0).unwrap();
        let december = Utc.with_ymd_and_hms(2024, 12, 5, 9, 0, 0).unwrap();
        let mut won = proposal(ProposalStatus::Accepted, ProjectPhase::Development, december);
        won.updated_at = now;
        let proposals = vec![
            proposal(ProposalStatus::Draft, ProjectPhase::Exploratory, december),
            won,
        ];
        let months = monthly_activity(&proposals, now, 3);
        let labels: Vec<&str> = months.iter().map(|m| m.month.as_str()).collect();
        assert_eq!(labels, vec!["2024-12", "2025-01", "2025-02"]);
        assert_eq!(months[0].created, 2);
        assert_eq!(months[1].created, 0);
        assert_eq!(months[2].accepted, 1);
    }

    #[test]
    fn member_load_counts_assigned_only() {
        let now = Utc::now();
        let pm = Uuid::new_v4();
        let mut a = proposal(ProposalStatus::Sent, ProjectPhase::Discovery, now);
        a.assigned_to = Some(pm);
        let mut b = proposal(ProposalStatus::Accepted, ProjectPhase::Discovery, now);
        b.assigned_to = Some(pm);
        let c = proposal(ProposalStatus::Draft, ProjectPhase::Discovery, now);
        let load = member_load(pm, "PM".into(), "pm@x".into(), &[a, b, c]);
        assert_eq!(load.active, 1);
        assert_eq!(load.completed, 1);
    }
}
