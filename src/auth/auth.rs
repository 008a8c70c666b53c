use crate::auth::jwt::verify_token;
use crate::config::Config;
use crate::error::ApiError;
use crate::model::role::Role;
use crate::models::{Claims, TokenType};
use actix_web::{FromRequest, HttpMessage, HttpRequest, dev::Payload, web::Data};
use futures::future::{Ready, ready};

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: u64,
    pub username: String,
    pub role: Role,

    /// Present only if this user is linked to an employee record
    pub employee_id: Option<u64>,
}

impl AuthUser {
    pub fn from_claims(claims: Claims) -> Result<Self, ApiError> {
        if claims.token_type != TokenType::Access {
            return Err(ApiError::Unauthorized("Access token required".into()));
        }
        let role = Role::from_id(claims.role)
            .ok_or_else(|| ApiError::Unauthorized("Invalid role".into()))?;

        Ok(AuthUser {
            user_id: claims.user_id,
            username: claims.sub,
            role,
            employee_id: claims.employee_id,
        })
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(ApiError::forbidden("Admin only"))
        }
    }

    pub fn require_supervisor_or_admin(&self) -> Result<(), ApiError> {
        if matches!(self.role, Role::Admin | Role::Supervisor) {
            Ok(())
        } else {
            Err(ApiError::forbidden("Supervisor/Admin only"))
        }
    }

    /// The employee profile behind this login; field actions need one.
    pub fn employee_id(&self) -> Result<u64, ApiError> {
        self.employee_id
            .ok_or_else(|| ApiError::forbidden("No employee profile"))
    }
}

/// Bearer token from the Authorization header, if well formed.
pub fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

impl FromRequest for AuthUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        // set by auth_middleware on protected scopes
        if let Some(user) = req.extensions().get::<AuthUser>() {
            return ready(Ok(user.clone()));
        }

        let Some(token) = bearer_token(req) else {
            return ready(Err(ApiError::Unauthorized("Missing token".into())));
        };

        let Some(config) = req.app_data::<Data<Config>>() else {
            tracing::error!("Config missing from app data");
            return ready(Err(ApiError::Internal));
        };

        let result = verify_token(token, &config.jwt_secret)
            .map_err(|_| ApiError::Unauthorized("Invalid token".into()))
            .and_then(AuthUser::from_claims);

        ready(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(role: u8, token_type: TokenType) -> Claims {
        Claims {
            user_id: 1,
            sub: "sup".into(),
            role,
            exp: 0,
            jti: "j".into(),
            token_type,
            employee_id: None,
        }
    }

    #[test]
    fn refresh_tokens_cannot_authenticate_requests() {
        assert!(AuthUser::from_claims(claims(1, TokenType::Refresh)).is_err());
    }

    #[test]
    fn role_guards() {
        let supervisor = AuthUser::from_claims(claims(2, TokenType::Access)).unwrap();
        assert!(supervisor.require_supervisor_or_admin().is_ok());
        assert!(supervisor.require_admin().is_err());
        assert!(supervisor.employee_id().is_err());

        let worker = AuthUser::from_claims(claims(3, TokenType::Access)).unwrap();
        assert!(worker.require_supervisor_or_admin().is_err());
    }

    #[test]
    fn unknown_role_is_unauthorized() {
        assert!(matches!(
            AuthUser::from_claims(claims(9, TokenType::Access)),
            Err(ApiError::Unauthorized(_))
        ));
    }
}
