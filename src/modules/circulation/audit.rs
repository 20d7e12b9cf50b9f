//! Consistency between the loan log and the copies' cached issued flag.
//!
//! The log is authoritative. An audit only reports drift; correcting it is a
//! separate, explicit [`CirculationLedger::reconcile`] call per copy.

use std::collections::BTreeSet;

use super::ledger::CirculationLedger;
use super::models::{IntegrityViolation, Reconciliation, ViolationKind};
use crate::error::LendingResult;

impl CirculationLedger {
    pub async fn audit(&self) -> LendingResult<Vec<IntegrityViolation>> {
        let flagged: BTreeSet<String> = self.store.issued_copy_ids().await?.into_iter().collect();
        let on_loan: BTreeSet<String> = self
            .store
            .open_loans()
            .await?
            .into_iter()
            .map(|loan| loan.copy_id)
            .collect();

        let mut violations: Vec<IntegrityViolation> = flagged
            .difference(&on_loan)
            .map(|copy_id| IntegrityViolation {
                copy_id: copy_id.clone(),
                kind: ViolationKind::FlaggedWithoutLoan,
            })
            .chain(on_loan.difference(&flagged).map(|copy_id| IntegrityViolation {
                copy_id: copy_id.clone(),
                kind: ViolationKind::LoanWithoutFlag,
            }))
            .collect();
        violations.sort_by(|a, b| a.copy_id.cmp(&b.copy_id));

        for violation in &violations {
            tracing::error!(
                copy_id = %violation.copy_id,
                kind = ?violation.kind,
                "copy flag disagrees with the loan log"
            );
        }
        tracing::info!(violations = violations.len(), "integrity audit finished");
        Ok(violations)
    }

    /// Rewrites one copy's issued flag from the loan log.
    pub async fn reconcile(&self, copy_id: &str) -> LendingResult<Reconciliation> {
        let copy = self.copies.get(copy_id).await?;
        let issued = self
            .store
            .loans_for_copy(copy_id)
            .await?
            .iter()
            .any(|loan| loan.is_open());

        let changed = copy.issued != issued;
        if changed {
            self.copies.set_issued(copy_id, issued).await?;
            tracing::warn!(copy_id, issued, "copy flag reconciled with the loan log");
        }
        Ok(Reconciliation {
            copy_id: copy.id,
            issued,
            changed,
        })
    }
}
