//! Caller identity from trusted gateway headers
//!
//! Authentication happens upstream; these middlewares only resolve who is
//! calling and attach it as a request extension.

use axum::{extract::Request, middleware::Next, response::Response};
use shared::error::{AppError, ErrorCode};

use crate::lifecycle::Actor;

pub const RESTAURANT_ID_HEADER: &str = "x-restaurant-id";
pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ADMIN_ID_HEADER: &str = "x-admin-id";

/// Restaurant owner (or staff) acting on their own subscription
#[derive(Debug, Clone)]
pub struct OwnerIdentity {
    pub restaurant_id: i64,
    pub user_id: Option<String>,
}

impl OwnerIdentity {
    pub fn actor(&self) -> Actor {
        Actor::Owner {
            user_id: self.user_id.clone(),
        }
    }
}

/// Platform admin
#[derive(Debug, Clone)]
pub struct AdminIdentity {
    pub admin_id: String,
}

impl AdminIdentity {
    pub fn actor(&self) -> Actor {
        Actor::Admin {
            admin_id: self.admin_id.clone(),
        }
    }
}

fn header<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

pub async fn owner_identity(mut request: Request, next: Next) -> Result<Response, AppError> {
    let restaurant_id = header(&request, RESTAURANT_ID_HEADER)
        .ok_or_else(AppError::not_authenticated)?
        .parse::<i64>()
        .map_err(|_| AppError::with_message(ErrorCode::NotAuthenticated, "Invalid restaurant id"))?;
    let user_id = header(&request, ACTOR_ID_HEADER).map(str::to_string);

    request.extensions_mut().insert(OwnerIdentity {
        restaurant_id,
        user_id,
    });
    Ok(next.run(request).await)
}

pub async fn admin_identity(mut request: Request, next: Next) -> Result<Response, AppError> {
    let admin_id = header(&request, ADMIN_ID_HEADER)
        .ok_or_else(|| AppError::new(ErrorCode::AdminRequired))?
        .to_string();

    request.extensions_mut().insert(AdminIdentity { admin_id });
    Ok(next.run(request).await)
}
