// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Access and permission evaluator.
//!
//! Pure decision logic over the grant/role rows: owner first, then the
//! per-workload grant, then roles. Suspension gating sits in front of the
//! whole chain. The evaluator never mutates state; it answers with the
//! denial kind (`Forbidden` or `Locked`) when the answer is no.

use crate::config::SuspensionDeletePolicy;
use crate::domain::access::PrincipalId;
use crate::domain::error::{CoreError, CoreResult};
use crate::domain::repository::AccessRepository;
use crate::domain::workload::Workload;
use std::sync::Arc;

/// How an operation relates to suspension gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspensionGate {
    /// Read-only; never gated.
    Read,
    /// State-changing; locked while suspended.
    Mutation,
    /// The one mutation suspension exists to allow.
    Unsuspend,
    /// Separately policy-gated.
    Delete,
    /// Crash-counter reset; flag-controlled (see `CoreConfig`).
    ResetCrashCount,
}

#[derive(Debug, Clone, Copy)]
pub struct SuspensionPolicy {
    pub enforced: bool,
    pub delete_policy: SuspensionDeletePolicy,
    pub reset_crash_allowed: bool,
}

impl SuspensionPolicy {
    pub fn from_config(config: &crate::config::CoreConfig) -> Self {
        Self {
            enforced: config.suspension_enforced,
            delete_policy: config.suspension_delete_policy,
            reset_crash_allowed: config.suspension_reset_crash_allowed,
        }
    }
}

pub struct AccessEvaluator {
    access: Arc<dyn AccessRepository>,
    policy: SuspensionPolicy,
}

impl AccessEvaluator {
    pub fn new(access: Arc<dyn AccessRepository>, policy: SuspensionPolicy) -> Self {
        Self { access, policy }
    }

    /// Evaluate `principal` performing the operation guarded by `token` on
    /// `workload`. Short-circuits on the first accepting rule.
    pub async fn check(
        &self,
        principal: PrincipalId,
        workload: &Workload,
        token: &str,
        gate: SuspensionGate,
    ) -> CoreResult<()> {
        self.check_suspension(workload, gate)?;

        // (1) Owner.
        if workload.owner_id == principal {
            return Ok(());
        }

        // (2) Per-workload grant row.
        if let Some(grant) = self.access.grant_for(principal, workload.id).await? {
            if grant.allows(token) {
                return Ok(());
            }
        }

        // (3) Roles: wildcard, the token itself, or admin.read for reads.
        for role in self.access.roles_for(principal).await? {
            if role.allows(token) {
                return Ok(());
            }
        }

        Err(CoreError::Forbidden(token.to_string()))
    }

    fn check_suspension(&self, workload: &Workload, gate: SuspensionGate) -> CoreResult<()> {
        if !workload.is_suspended() || !self.policy.enforced {
            return Ok(());
        }
        match gate {
            SuspensionGate::Read | SuspensionGate::Unsuspend => Ok(()),
            SuspensionGate::Delete => match self.policy.delete_policy {
                SuspensionDeletePolicy::Allow => Ok(()),
                SuspensionDeletePolicy::Block => Err(CoreError::Locked),
            },
            SuspensionGate::ResetCrashCount => {
                if self.policy.reset_crash_allowed {
                    Ok(())
                } else {
                    Err(CoreError::Locked)
                }
            }
            SuspensionGate::Mutation => Err(CoreError::Locked),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::access::{permissions, Role, WorkloadAccess};
    use crate::domain::repository::RepositoryError;
    use crate::domain::workload::{Suspension, WorkloadId};
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::RwLock;

    #[derive(Default)]
    struct StubAccess {
        grants: RwLock<Vec<WorkloadAccess>>,
        roles: RwLock<Vec<(PrincipalId, Role)>>,
    }

    #[async_trait]
    impl AccessRepository for StubAccess {
        async fn grant_for(
            &self,
            principal: PrincipalId,
            workload: WorkloadId,
        ) -> Result<Option<WorkloadAccess>, RepositoryError> {
            Ok(self
                .grants
                .read()
                .iter()
                .find(|g| g.principal == principal && g.workload == workload)
                .cloned())
        }

        async fn list_for_workload(
            &self,
            workload: WorkloadId,
        ) -> Result<Vec<WorkloadAccess>, RepositoryError> {
            Ok(self.grants.read().iter().filter(|g| g.workload == workload).cloned().collect())
        }

        async fn upsert_grant(&self, grant: WorkloadAccess) -> Result<(), RepositoryError> {
            self.grants.write().push(grant);
            Ok(())
        }

        async fn delete_grants_for_workload(
            &self,
            workload: WorkloadId,
        ) -> Result<(), RepositoryError> {
            self.grants.write().retain(|g| g.workload != workload);
            Ok(())
        }

        async fn roles_for(&self, principal: PrincipalId) -> Result<Vec<Role>, RepositoryError> {
            Ok(self
                .roles
                .read()
                .iter()
                .filter(|(p, _)| *p == principal)
                .map(|(_, r)| r.clone())
                .collect())
        }
    }

    fn evaluator(policy: SuspensionPolicy) -> (AccessEvaluator, Arc<StubAccess>) {
        let repo = Arc::new(StubAccess::default());
        (AccessEvaluator::new(repo.clone(), policy), repo)
    }

    fn default_policy() -> SuspensionPolicy {
        SuspensionPolicy {
            enforced: true,
            delete_policy: SuspensionDeletePolicy::Allow,
            reset_crash_allowed: true,
        }
    }

    fn suspended(mut w: crate::domain::workload::Workload) -> crate::domain::workload::Workload {
        w.suspension = Some(Suspension {
            suspended_at: Utc::now(),
            suspended_by: "admin".into(),
            reason: "billing".into(),
        });
        w
    }

    #[tokio::test]
    async fn owner_is_always_permitted() {
        let (eval, _) = evaluator(default_policy());
        let w = crate::domain::workload::testutil::workload();
        eval.check(w.owner_id, &w, permissions::SERVER_START, SuspensionGate::Mutation)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn stranger_is_forbidden_then_granted() {
        let (eval, repo) = evaluator(default_policy());
        let w = crate::domain::workload::testutil::workload();
        let stranger = PrincipalId(99);

        let err = eval
            .check(stranger, &w, permissions::SERVER_START, SuspensionGate::Mutation)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));

        repo.upsert_grant(WorkloadAccess {
            principal: stranger,
            workload: w.id,
            permissions: vec![permissions::SERVER_START.into()],
            created_at: Utc::now(),
        })
        .await
        .unwrap();

        eval.check(stranger, &w, permissions::SERVER_START, SuspensionGate::Mutation)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn role_wildcard_accepts() {
        let (eval, repo) = evaluator(default_policy());
        let w = crate::domain::workload::testutil::workload();
        let admin = PrincipalId(50);
        repo.roles.write().push((
            admin,
            Role { id: 1, name: "root".into(), permissions: vec!["*".into()] },
        ));
        eval.check(admin, &w, permissions::SERVER_DELETE, SuspensionGate::Mutation)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn suspension_locks_mutations_even_for_owner() {
        let (eval, _) = evaluator(default_policy());
        let w = suspended(crate::domain::workload::testutil::workload());

        let err = eval
            .check(w.owner_id, &w, permissions::SERVER_START, SuspensionGate::Mutation)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Locked));

        // Reads and unsuspend pass the gate.
        eval.check(w.owner_id, &w, permissions::SERVER_VIEW, SuspensionGate::Read)
            .await
            .unwrap();
        eval.check(w.owner_id, &w, permissions::SERVER_SUSPEND, SuspensionGate::Unsuspend)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn delete_policy_controls_suspended_delete() {
        let (eval, _) = evaluator(default_policy());
        let w = suspended(crate::domain::workload::testutil::workload());
        eval.check(w.owner_id, &w, permissions::SERVER_DELETE, SuspensionGate::Delete)
            .await
            .unwrap();

        let (eval, _) = evaluator(SuspensionPolicy {
            delete_policy: SuspensionDeletePolicy::Block,
            ..default_policy()
        });
        let err = eval
            .check(w.owner_id, &w, permissions::SERVER_DELETE, SuspensionGate::Delete)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Locked));
    }

    #[tokio::test]
    async fn gating_disabled_by_flag() {
        let (eval, _) = evaluator(SuspensionPolicy { enforced: false, ..default_policy() });
        let w = suspended(crate::domain::workload::testutil::workload());
        eval.check(w.owner_id, &w, permissions::SERVER_START, SuspensionGate::Mutation)
            .await
            .unwrap();
    }
}
