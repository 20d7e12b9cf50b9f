//! Request principals and the role table that guards every lending operation.
//!
//! Authentication happens upstream; this crate only trusts the identity
//! headers it is handed and decides what that identity may do.

use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use shelf_db::{BorrowerKind, BorrowerRef};
use shelf_http::error::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Librarian,
    Student,
    Faculty,
    Admin,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "librarian" => Some(Role::Librarian),
            "student" => Some(Role::Student),
            "faculty" => Some(Role::Faculty),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Staff roles run the circulation desk.
    pub fn is_staff(self) -> bool {
        matches!(self, Role::Librarian | Role::Admin)
    }

    /// The borrower population this role belongs to, if any.
    pub fn borrower_kind(self) -> Option<BorrowerKind> {
        match self {
            Role::Student => Some(BorrowerKind::Student),
            Role::Faculty => Some(BorrowerKind::Faculty),
            Role::Librarian | Role::Admin => None,
        }
    }
}

/// The authenticated caller of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub role: Role,
}

impl Principal {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    /// The caller as a borrower, for students and faculty.
    pub fn as_borrower(&self) -> Option<BorrowerRef> {
        self.role
            .borrower_kind()
            .map(|kind| BorrowerRef::new(self.user_id.clone(), kind))
    }
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header(parts, USER_ID_HEADER)
            .ok_or_else(|| AppError::unauthorized("missing x-user-id header"))?;
        let role = header(parts, USER_ROLE_HEADER)
            .ok_or_else(|| AppError::unauthorized("missing x-user-role header"))?;
        let role = Role::parse(role)
            .ok_or_else(|| AppError::unauthorized(format!("unknown role '{role}'")))?;

        Ok(Principal::new(user_id, role))
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Operations a principal can be authorized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action<'a> {
    /// Register or update titles, flag copies.
    ManageCatalog,
    /// Search titles and look up copy details.
    BrowseCatalog,
    /// Issue and return copies, track copies, dashboard counts.
    Circulate,
    /// Run and act on the integrity audit.
    Audit,
    /// Read one borrower's loans, history or statement.
    ReadBorrower(&'a BorrowerRef),
}

/// Decide whether `principal` may perform `action`.
pub fn authorize(principal: &Principal, action: Action<'_>) -> Result<(), AppError> {
    let allowed = match action {
        Action::BrowseCatalog => true,
        Action::ManageCatalog | Action::Circulate | Action::Audit => principal.role.is_staff(),
        Action::ReadBorrower(borrower) => {
            principal.role.is_staff() || principal.as_borrower().as_ref() == Some(borrower)
        }
    };

    if allowed {
        Ok(())
    } else {
        tracing::warn!(
            target: "shelf-authz",
            user_id = %principal.user_id,
            role = ?principal.role,
            action = ?action,
            "action denied"
        );
        Err(AppError::forbidden("not permitted for this role"))
    }
}
