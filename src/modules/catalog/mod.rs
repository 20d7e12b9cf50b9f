pub mod copies;
pub mod models;
pub mod routes;
pub mod sequence;
pub mod titles;

use async_trait::async_trait;
use axum::Router;
use serde_json::json;
use shelf_kernel::{InitCtx, Module};

use crate::Services;

pub use copies::CopyCatalog;
pub use sequence::SequenceAllocator;
pub use titles::{CatalogPolicy, TitleCatalog};

/// Titles, copies and the identifier sequence behind them
pub struct CatalogModule {
    services: Services,
}

impl CatalogModule {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Module for CatalogModule {
    fn name(&self) -> &'static str {
        "catalog"
    }

    async fn init(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        let counter = &ctx.settings.circulation.counter_name;
        let state = ctx.store.load_counter(counter).await?;
        tracing::info!(
            module = self.name(),
            environment = ?ctx.settings.environment,
            counter = %counter,
            position = ?state.map(|c| sequence::format_copy_id(&c)),
            "catalog module initialized"
        );
        Ok(())
    }

    fn routes(&self) -> Router {
        routes::router(self.services.clone())
    }

    fn openapi(&self) -> Option<serde_json::Value> {
        let error = |description: &str| {
            json!({
                "description": description,
                "content": {
                    "application/json": {
                        "schema": { "$ref": "#/components/schemas/ErrorResponse" }
                    }
                }
            })
        };
        let body = |schema: &str| {
            json!({
                "content": {
                    "application/json": {
                        "schema": { "$ref": format!("#/components/schemas/{schema}") }
                    }
                }
            })
        };
        let copy_id = json!({
            "name": "copy_id",
            "in": "path",
            "required": true,
            "schema": { "type": "string", "example": "AA-000001" }
        });

        Some(json!({
            "paths": {
                "/titles": {
                    "post": {
                        "summary": "Register a title and mint its copies",
                        "tags": ["Catalog"],
                        "requestBody": body("RegisterTitle"),
                        "responses": {
                            "201": { "description": "Title and its new copies" },
                            "409": error("Duplicate title and author"),
                            "422": error("Validation error")
                        }
                    },
                    "get": {
                        "summary": "Search titles",
                        "tags": ["Catalog"],
                        "parameters": [
                            { "name": "title", "in": "query", "schema": { "type": "string" } },
                            { "name": "author", "in": "query", "schema": { "type": "string" } },
                            { "name": "copy_id", "in": "query", "schema": { "type": "string" } },
                            { "name": "page", "in": "query", "schema": { "type": "integer", "minimum": 1 } },
                            { "name": "per_page", "in": "query", "schema": { "type": "integer", "minimum": 1, "maximum": 100 } }
                        ],
                        "responses": {
                            "200": { "description": "One page of titles with their copies" },
                            "422": error("Invalid pagination")
                        }
                    }
                },
                "/titles/by-copy/{copy_id}": {
                    "put": {
                        "summary": "Update the title owning a copy and grow its stock",
                        "tags": ["Catalog"],
                        "parameters": [copy_id.clone()],
                        "requestBody": body("RegisterTitle"),
                        "responses": {
                            "200": { "description": "Updated title and added copies" },
                            "404": error("Copy not found"),
                            "409": error("Stock shrink or duplicate title"),
                            "422": error("Validation error")
                        }
                    }
                },
                "/copies/{copy_id}": {
                    "get": {
                        "summary": "Copy details with its title and stock",
                        "tags": ["Catalog"],
                        "parameters": [copy_id.clone()],
                        "responses": {
                            "200": { "description": "Copy details" },
                            "404": error("Copy not found")
                        }
                    }
                },
                "/copies/{copy_id}/tampered": {
                    "put": {
                        "summary": "Flag or clear a damaged copy",
                        "tags": ["Catalog"],
                        "parameters": [copy_id],
                        "responses": {
                            "200": { "description": "Updated copy" },
                            "404": error("Copy not found")
                        }
                    }
                },
                "/dashboard": {
                    "get": {
                        "summary": "Title and copy counts",
                        "tags": ["Catalog"],
                        "responses": {
                            "200": { "description": "Counts" }
                        }
                    }
                }
            },
            "components": {
                "schemas": {
                    "RegisterTitle": {
                        "type": "object",
                        "properties": {
                            "title": { "type": "string" },
                            "author": { "type": "string" },
                            "details": { "type": "string" },
                            "price": { "type": "number", "minimum": 0 },
                            "course": { "type": "string" },
                            "branch": { "type": "string" },
                            "stock": { "type": "integer", "minimum": 1, "maximum": 200 }
                        },
                        "required": ["title", "author", "details", "price", "course", "branch", "stock"]
                    }
                }
            }
        }))
    }

    async fn start(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "catalog module started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "catalog module stopped");
        Ok(())
    }
}
