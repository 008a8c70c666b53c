use crate::{
    api::{attendance, employee, integrity, project, supervisor, worker_task},
    auth::{handlers, middleware::auth_middleware},
    config::Config,
};
use actix_governor::{
    Governor, GovernorConfig, GovernorConfigBuilder, PeerIpKeyExtractor,
    governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};
use anyhow::{Context, Result, anyhow};
use std::sync::Arc;

type IpLimit = GovernorConfig<PeerIpKeyExtractor, NoOpMiddleware>;

/// Limiter settings for the public auth routes and the protected scope.
pub struct RateLimits {
    login: IpLimit,
    refresh: IpLimit,
    protected: IpLimit,
}

impl RateLimits {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(RateLimits {
            login: ip_limit(config.rate_login_per_min).context("RATE_LOGIN_PER_MIN")?,
            refresh: ip_limit(config.rate_refresh_per_min).context("RATE_REFRESH_PER_MIN")?,
            protected: ip_limit(config.rate_protected_per_min)
                .context("RATE_PROTECTED_PER_MIN")?,
        })
    }
}

/// Allows `requests_per_min` with an equal burst.
fn ip_limit(requests_per_min: u32) -> Result<IpLimit> {
    let requests_per_min = requests_per_min.max(1);
    let per_ms = (60_000 / requests_per_min as u64).max(1);

    GovernorConfigBuilder::default()
        .per_millisecond(per_ms)
        .burst_size(requests_per_min)
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .ok_or_else(|| anyhow!("invalid rate limit of {requests_per_min} requests per minute"))
}

pub fn configure(cfg: &mut web::ServiceConfig, config: &Config, limits: &RateLimits) {
    let login_limiter = Arc::new(Governor::new(&limits.login));
    let refresh_limiter = Arc::new(Governor::new(&limits.refresh));
    let protected_limiter = Arc::new(Governor::new(&limits.protected));

    // Public routes
    cfg.service(
        web::scope("/auth")
            .service(
                web::resource("/login")
                    .wrap(login_limiter.clone())
                    .route(web::post().to(handlers::login)),
            )
            .service(
                web::resource("/refresh")
                    .wrap(refresh_limiter.clone())
                    .route(web::post().to(handlers::refresh_token)),
            )
            .service(
                web::resource("/logout")
                    .wrap(login_limiter)
                    .route(web::post().to(handlers::logout)),
            ),
    );

    // Protected routes
    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware)) // authentication
            .wrap(protected_limiter) // rate limiting
            .service(web::resource("/users").route(web::post().to(handlers::create_user)))
            .service(
                web::scope("/attendance")
                    .route("/validate-geofence", web::post().to(attendance::validate_geofence))
                    .route("/check-in", web::post().to(attendance::check_in))
                    .route("/check-out", web::post().to(attendance::check_out))
                    .route("/today", web::get().to(attendance::today)),
            )
            .service(
                web::scope("/worker/tasks")
                    .route("/today", web::get().to(worker_task::today_tasks))
                    .route("/{id}/start", web::post().to(worker_task::start_task))
                    .route("/{id}/pause", web::post().to(worker_task::pause_task))
                    .route("/{id}/resume", web::post().to(worker_task::resume_task))
                    .route("/{id}/complete", web::post().to(worker_task::complete_task))
                    .route("/{id}/progress", web::put().to(worker_task::update_progress)),
            )
            .service(
                web::scope("/supervisor")
                    .route("/tasks", web::post().to(supervisor::create_assignment))
                    .route(
                        "/active-tasks/{project_id}",
                        web::get().to(supervisor::active_tasks),
                    ),
            )
            .service(
                web::scope("/projects")
                    .service(web::resource("").route(web::post().to(project::create_project)))
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(project::get_project))
                            .route(web::put().to(project::update_project)),
                    ),
            )
            .service(
                web::scope("/employees")
                    // /employees
                    .service(
                        web::resource("")
                            .route(web::post().to(employee::create_employee))
                            .route(web::get().to(employee::list_employees)),
                    )
                    // /employees/{id}
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(employee::get_employee))
                            .route(web::put().to(employee::update_employee)),
                    ),
            )
            .service(
                web::scope("/admin/integrity")
                    .route("/active-tasks", web::get().to(integrity::active_task_conflicts))
                    .route(
                        "/active-tasks/repair",
                        web::post().to(integrity::repair_active_tasks),
                    )
                    .route(
                        "/attendance-dates",
                        web::get().to(integrity::attendance_date_drift),
                    )
                    .route(
                        "/attendance-dates/repair",
                        web::post().to(integrity::repair_attendance_dates),
                    ),
            ),
    );
}

// LOGIN
//  ├─ access_token (15 min)
//  └─ refresh_token (7 days)

// API REQUEST
//  └─ Authorization: Bearer access_token

// ACCESS EXPIRED
//  └─ POST /auth/refresh with refresh_token
//       └─ returns new pair, old refresh token revoked

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limits_accept_zero_and_large_rates() {
        assert!(ip_limit(0).is_ok());
        assert!(ip_limit(1_000_000).is_ok());
    }

    #[test]
    fn limits_build_from_default_config() {
        let config = Config::from_lookup(|key| match key {
            "SERVER_ADDR" => Some("127.0.0.1:0".into()),
            "DATABASE_URL" => Some("mysql://localhost/test".into()),
            "JWT_SECRET" => Some("routes-secret".into()),
            "RATE_LOGIN_PER_MIN" => Some("0".into()),
            _ => None,
        })
        .unwrap();

        assert!(RateLimits::from_config(&config).is_ok());
    }
}
