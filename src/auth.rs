//! Caller identity supplied by the upstream gateway
//!
//! The gateway authenticates the request and forwards the caller as
//! `X-User-Id` / `X-User-Role`. These values are trusted as-is.

use axum::{extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::OrderError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Staff,
    Picker,
    Courier,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Client => write!(f, "client"),
            Role::Staff => write!(f, "staff"),
            Role::Picker => write!(f, "picker"),
            Role::Courier => write!(f, "courier"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "client" => Ok(Role::Client),
            "staff" => Ok(Role::Staff),
            "picker" => Ok(Role::Picker),
            "courier" => Ok(Role::Courier),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// Authenticated caller of the current request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Uuid,
    pub role: Role,
}

impl Caller {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn is_courier(&self) -> bool {
        self.role == Role::Courier
    }

    /// Staff-side roles that may browse every order
    pub fn is_operator(&self) -> bool {
        matches!(self.role, Role::Staff | Role::Picker | Role::Courier)
    }
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = OrderError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header_str(parts, USER_ID_HEADER)
            .and_then(|v| Uuid::parse_str(v).ok())
            .ok_or(OrderError::Unauthorized)?;
        let role = header_str(parts, USER_ROLE_HEADER)
            .and_then(|v| v.parse::<Role>().ok())
            .ok_or(OrderError::Unauthorized)?;

        Ok(Caller { user_id, role })
    }
}

fn header_str<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
}
