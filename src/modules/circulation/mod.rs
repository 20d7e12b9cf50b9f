pub mod audit;
pub mod fines;
pub mod ledger;
pub mod models;
pub mod routes;

use async_trait::async_trait;
use axum::Router;
use serde_json::json;
use shelf_kernel::{InitCtx, Module};

use crate::Services;

pub use fines::{fine, FinePolicy};
pub use ledger::CirculationLedger;

/// Issue, return, fines and the integrity audit
pub struct CirculationModule {
    services: Services,
}

impl CirculationModule {
    pub fn new(services: Services) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Module for CirculationModule {
    fn name(&self) -> &'static str {
        "circulation"
    }

    async fn init(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        ctx.store.ping().await?;
        let policy = self.services.ledger.policy();
        tracing::info!(
            module = self.name(),
            backend = ctx.store.backend(),
            loan_period_days = policy.loan_period_days,
            fine_per_day = policy.per_day_rate,
            "circulation module initialized"
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
        let borrower_params = json!([
            {
                "name": "kind",
                "in": "path",
                "required": true,
                "schema": { "type": "string", "enum": ["student", "faculty"] }
            },
            { "name": "id", "in": "path", "required": true, "schema": { "type": "string" } }
        ]);
        let copy_id = json!([{
            "name": "copy_id",
            "in": "path",
            "required": true,
            "schema": { "type": "string", "example": "AA-000001" }
        }]);

        Some(json!({
            "paths": {
                "/issue": {
                    "post": {
                        "summary": "Issue a batch of copies to one borrower",
                        "tags": ["Circulation"],
                        "requestBody": {
                            "content": {
                                "application/json": {
                                    "schema": { "$ref": "#/components/schemas/IssueRequest" }
                                }
                            }
                        },
                        "responses": {
                            "200": { "description": "Every or some copies issued; see status" },
                            "422": { "description": "No copy issued, or invalid batch" }
                        }
                    }
                },
                "/return": {
                    "post": {
                        "summary": "Return a batch of copies",
                        "tags": ["Circulation"],
                        "responses": {
                            "200": { "description": "Returned and not-found copies" },
                            "422": error("Invalid batch")
                        }
                    }
                },
                "/borrowers/{kind}/{id}/active": {
                    "get": {
                        "summary": "Open loans of a borrower",
                        "tags": ["Circulation"],
                        "parameters": borrower_params.clone(),
                        "responses": { "200": { "description": "Open loans, newest first" } }
                    }
                },
                "/borrowers/{kind}/{id}/history": {
                    "get": {
                        "summary": "Every loan of a borrower",
                        "tags": ["Circulation"],
                        "parameters": borrower_params.clone(),
                        "responses": { "200": { "description": "Loans, newest first" } }
                    }
                },
                "/borrowers/{kind}/{id}/statement": {
                    "get": {
                        "summary": "Loans with fines evaluated now",
                        "tags": ["Circulation"],
                        "parameters": borrower_params,
                        "responses": { "200": { "description": "Statement" } }
                    }
                },
                "/copies/{copy_id}/track": {
                    "get": {
                        "summary": "Circulation history and analytics of one copy",
                        "tags": ["Circulation"],
                        "parameters": copy_id.clone(),
                        "responses": {
                            "200": { "description": "Copy track" },
                            "404": error("Copy not found")
                        }
                    }
                },
                "/audit": {
                    "get": {
                        "summary": "Copies whose issued flag disagrees with the loan log",
                        "tags": ["Circulation"],
                        "responses": { "200": { "description": "Integrity violations" } }
                    }
                },
                "/audit/{copy_id}/reconcile": {
                    "post": {
                        "summary": "Rewrite one copy's issued flag from the loan log",
                        "tags": ["Circulation"],
                        "parameters": copy_id,
                        "responses": {
                            "200": { "description": "Reconciliation result" },
                            "404": error("Copy not found")
                        }
                    }
                }
            },
            "components": {
                "schemas": {
                    "Borrower": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "kind": { "type": "string", "enum": ["student", "faculty"] }
                        },
                        "required": ["id", "kind"]
                    },
                    "IssueRequest": {
                        "type": "object",
                        "properties": {
                            "borrower": { "$ref": "#/components/schemas/Borrower" },
                            "copy_ids": { "type": "array", "items": { "type": "string" } }
                        },
                        "required": ["borrower", "copy_ids"]
                    }
                }
            }
        }))
    }

    async fn start(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        let violations = self.services.ledger.audit().await?;
        if violations.is_empty() {
            tracing::info!(module = self.name(), "circulation module started");
        } else {
            tracing::warn!(
                module = self.name(),
                violations = violations.len(),
                "circulation module started with integrity violations; see GET /api/circulation/audit"
            );
        }
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "circulation module stopped");
        Ok(())
    }
}
