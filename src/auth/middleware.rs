use crate::auth::auth::AuthUser;
use crate::auth::jwt::verify_token;
use crate::config::Config;
use actix_web::middleware::Next;
use actix_web::{
    Error, HttpMessage, HttpResponse,
    body::BoxBody,
    dev::{ServiceRequest, ServiceResponse},
    web::Data,
};
use serde_json::json;

fn reject(req: ServiceRequest, body: serde_json::Value) -> ServiceResponse<BoxBody> {
    let resp = HttpResponse::Unauthorized().json(body);
    req.into_response(resp.map_into_boxed_body())
}

pub async fn auth_middleware(
    req: ServiceRequest,
    next: Next<BoxBody>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    let config = req
        .app_data::<Data<Config>>()
        .ok_or_else(|| actix_web::error::ErrorInternalServerError("App config missing"))?
        .clone();

    let header_value = req
        .headers()
        .get("Authorization")
        .map(|h| h.to_str().map(str::to_owned));

    let header_value = match header_value {
        Some(Ok(v)) => v,
        Some(Err(_)) => {
            return Ok(reject(
                req,
                json!({"message": "Invalid Authorization header encoding"}),
            ));
        }
        None => return Ok(reject(req, json!({"message": "Missing Authorization header"}))),
    };

    let Some(token) = header_value.strip_prefix("Bearer ") else {
        return Ok(reject(
            req,
            json!({"message": "Authorization header must start with Bearer"}),
        ));
    };

    let claims = match verify_token(token, &config.jwt_secret) {
        Ok(c) => c,
        Err(e) => {
            return Ok(reject(
                req,
                json!({"message": "Invalid or expired token", "details": e}),
            ));
        }
    };

    let auth_user = match AuthUser::from_claims(claims) {
        Ok(user) => user,
        Err(e) => return Ok(reject(req, json!({"message": e.to_string()}))),
    };

    tracing::debug!(user_id = auth_user.user_id, role = %auth_user.role, "Authenticated request");
    req.extensions_mut().insert(auth_user);

    next.call(req).await
}
