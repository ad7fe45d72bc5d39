use crate::auth::jwt::verify_token;
use crate::config::Config;
use crate::error::LedgerError;
use crate::model::role::Role;
use actix_web::{
    FromRequest, HttpMessage, HttpRequest, dev::Payload, error::ErrorUnauthorized, web::Data,
};
use futures::future::{Ready, ready};

/// The authenticated actor behind a request.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub user_id: u64,
    pub username: String,
    pub role: Role,
}

impl FromRequest for AuthUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        // already verified by auth_middleware
        if let Some(user) = req.extensions().get::<AuthUser>() {
            return ready(Ok(user.clone()));
        }

        let token = match req
            .headers()
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
        {
            Some(t) => t,
            None => return ready(Err(ErrorUnauthorized("Missing token"))),
        };

        let config = match req.app_data::<Data<Config>>() {
            Some(c) => c,
            None => {
                return ready(Err(
                    actix_web::error::ErrorInternalServerError("Config missing"),
                ));
            }
        };

        // same checks as the middleware, refresh tokens included
        let claims = match verify_token(token, &config.jwt_secret) {
            Ok(c) => c,
            Err(_) => return ready(Err(ErrorUnauthorized("Invalid token"))),
        };

        let role = match Role::from_id(claims.role) {
            Some(r) => r,
            None => return ready(Err(ErrorUnauthorized("Invalid role"))),
        };

        ready(Ok(AuthUser {
            user_id: claims.user_id,
            username: claims.sub,
            role,
        }))
    }
}

impl AuthUser {
    pub fn new(user_id: u64, username: &str, role: Role) -> Self {
        Self {
            user_id,
            username: username.to_string(),
            role,
        }
    }

    pub fn require_admin(&self) -> Result<(), LedgerError> {
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(LedgerError::Forbidden("Admin only".into()))
        }
    }

    /// Marking student attendance.
    pub fn require_staff_or_admin(&self) -> Result<(), LedgerError> {
        if matches!(self.role, Role::Admin | Role::Teacher | Role::Staff) {
            Ok(())
        } else {
            Err(LedgerError::Forbidden("Staff/Admin only".into()))
        }
    }

    /// Check-ins are made by the user themselves, or by an admin on their behalf.
    pub fn require_self_or_admin(&self, user_id: u64) -> Result<(), LedgerError> {
        if self.user_id == user_id || self.role == Role::Admin {
            Ok(())
        } else {
            Err(LedgerError::Forbidden(
                "Cannot check in for another user".into(),
            ))
        }
    }
}
