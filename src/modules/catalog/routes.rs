//! HTTP handlers of the catalog module.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use shelf_authz::{authorize, Action, Principal};
use shelf_db::BookCopy;
use shelf_http::error::AppError;

use super::models::{
    CopyDetails, DashboardCounts, RegisterTitleRequest, RegisteredTitle, SearchParams,
    TamperedRequest, TitleUpdate, TitleWithCopies, UpdateTitleRequest,
};
use crate::utils::{Page, Pagination};
use crate::Services;

pub fn router(services: Services) -> Router {
    Router::new()
        .route("/titles", post(register_title).get(search_titles))
        .route("/titles/by-copy/{copy_id}", put(update_title))
        .route("/copies/{copy_id}", get(copy_details))
        .route("/copies/{copy_id}/tampered", put(set_tampered))
        .route("/dashboard", get(dashboard))
        .with_state(services)
}

async fn register_title(
    State(services): State<Services>,
    principal: Principal,
    Json(request): Json<RegisterTitleRequest>,
) -> Result<(StatusCode, Json<RegisteredTitle>), AppError> {
    authorize(&principal, Action::ManageCatalog)?;
    let registered = services
        .titles
        .register_title(request.title, request.stock)
        .await?;
    Ok((StatusCode::CREATED, Json(registered)))
}

async fn update_title(
    State(services): State<Services>,
    principal: Principal,
    Path(copy_id): Path<String>,
    Json(request): Json<UpdateTitleRequest>,
) -> Result<Json<TitleUpdate>, AppError> {
    authorize(&principal, Action::ManageCatalog)?;
    let update = services
        .titles
        .update_title(&copy_id, request.title, request.stock)
        .await?;
    Ok(Json(update))
}

async fn search_titles(
    State(services): State<Services>,
    principal: Principal,
    Query(params): Query<SearchParams>,
) -> Result<Json<Page<TitleWithCopies>>, AppError> {
    authorize(&principal, Action::BrowseCatalog)?;
    let pagination = Pagination::new(params.page, params.per_page, services.default_page_size)?;
    let page = services.titles.search(params.filter(), pagination).await?;
    Ok(Json(page))
}

async fn copy_details(
    State(services): State<Services>,
    principal: Principal,
    Path(copy_id): Path<String>,
) -> Result<Json<CopyDetails>, AppError> {
    authorize(&principal, Action::BrowseCatalog)?;
    Ok(Json(services.titles.get_by_copy(&copy_id).await?))
}

async fn set_tampered(
    State(services): State<Services>,
    principal: Principal,
    Path(copy_id): Path<String>,
    Json(request): Json<TamperedRequest>,
) -> Result<Json<BookCopy>, AppError> {
    authorize(&principal, Action::ManageCatalog)?;
    let copy = services
        .copies
        .set_tampered(&copy_id, request.tampered)
        .await?;
    Ok(Json(copy))
}

async fn dashboard(
    State(services): State<Services>,
    principal: Principal,
) -> Result<Json<DashboardCounts>, AppError> {
    authorize(&principal, Action::Circulate)?;
    Ok(Json(services.copies.dashboard().await?))
}
