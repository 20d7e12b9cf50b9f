//! HTTP handlers of the circulation module.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use shelf_authz::{authorize, Action, Principal};
use shelf_db::{BorrowerKind, BorrowerRef, LoanRecord};
use shelf_http::error::AppError;

use super::models::{
    BatchStatus, CopyTrack, IntegrityViolation, IssueReport, IssueRequest, Reconciliation,
    ReturnOutcome, ReturnRequest, Statement,
};
use crate::error::LendingError;
use crate::Services;

pub fn router(services: Services) -> Router {
    Router::new()
        .route("/issue", post(issue))
        .route("/return", post(return_copies))
        .route("/borrowers/{kind}/{id}/active", get(active_loans))
        .route("/borrowers/{kind}/{id}/history", get(history))
        .route("/borrowers/{kind}/{id}/statement", get(statement))
        .route("/copies/{copy_id}/track", get(track_copy))
        .route("/audit", get(audit))
        .route("/audit/{copy_id}/reconcile", post(reconcile))
        .with_state(services)
}

fn borrower(kind: &str, id: String) -> Result<BorrowerRef, AppError> {
    let kind = BorrowerKind::parse(kind)
        .ok_or_else(|| LendingError::validation("kind", "must be 'student' or 'faculty'"))?;
    Ok(BorrowerRef::new(id, kind))
}

/// A batch that issued nothing is reported with 422 and the full outcome body.
async fn issue(
    State(services): State<Services>,
    principal: Principal,
    Json(request): Json<IssueRequest>,
) -> Result<(StatusCode, Json<IssueReport>), AppError> {
    authorize(&principal, Action::Circulate)?;
    let outcome = services
        .ledger
        .issue(&request.borrower, &principal.user_id, &request.copy_ids)
        .await?;

    let report = IssueReport::from(outcome);
    let status = match report.status {
        BatchStatus::NoneIssued => StatusCode::UNPROCESSABLE_ENTITY,
        BatchStatus::Complete | BatchStatus::Partial => StatusCode::OK,
    };
    Ok((status, Json(report)))
}

async fn return_copies(
    State(services): State<Services>,
    principal: Principal,
    Json(request): Json<ReturnRequest>,
) -> Result<Json<ReturnOutcome>, AppError> {
    authorize(&principal, Action::Circulate)?;
    let outcome = services
        .ledger
        .return_copies(
            &request.borrower,
            &request.copy_ids,
            request.remarks.as_deref(),
        )
        .await?;
    Ok(Json(outcome))
}

async fn active_loans(
    State(services): State<Services>,
    principal: Principal,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Json<Vec<LoanRecord>>, AppError> {
    let borrower = borrower(&kind, id)?;
    authorize(&principal, Action::ReadBorrower(&borrower))?;
    Ok(Json(services.ledger.active_loans(&borrower).await?))
}

async fn history(
    State(services): State<Services>,
    principal: Principal,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Json<Vec<LoanRecord>>, AppError> {
    let borrower = borrower(&kind, id)?;
    authorize(&principal, Action::ReadBorrower(&borrower))?;
    Ok(Json(services.ledger.history(&borrower).await?))
}

async fn statement(
    State(services): State<Services>,
    principal: Principal,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Json<Statement>, AppError> {
    let borrower = borrower(&kind, id)?;
    authorize(&principal, Action::ReadBorrower(&borrower))?;
    let loans = services.ledger.statement(&borrower).await?;
    Ok(Json(Statement::new(borrower, loans)))
}

async fn track_copy(
    State(services): State<Services>,
    principal: Principal,
    Path(copy_id): Path<String>,
) -> Result<Json<CopyTrack>, AppError> {
    authorize(&principal, Action::Circulate)?;
    Ok(Json(services.ledger.track_copy(&copy_id).await?))
}

async fn audit(
    State(services): State<Services>,
    principal: Principal,
) -> Result<Json<Vec<IntegrityViolation>>, AppError> {
    authorize(&principal, Action::Audit)?;
    Ok(Json(services.ledger.audit().await?))
}

async fn reconcile(
    State(services): State<Services>,
    principal: Principal,
    Path(copy_id): Path<String>,
) -> Result<Json<Reconciliation>, AppError> {
    authorize(&principal, Action::Audit)?;
    Ok(Json(services.ledger.reconcile(&copy_id).await?))
}
