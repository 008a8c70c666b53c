use actix_web::middleware::NormalizePath;
use actix_web::web::Data;
use actix_web::{App, HttpServer, Responder, get};

mod api;
mod auth;
mod config;
mod db;
mod docs;
mod error;
mod model;
mod models;
mod routes;
mod utils;

use config::Config;
use db::init_db;

use crate::docs::ApiDoc;
use crate::routes::RateLimits;
use crate::utils::project_cache;
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::rolling;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[get("/")]
async fn index() -> impl Responder {
    "sitecrew ok"
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Rolling daily log
    let file_appender = rolling::daily(&config.log_dir, "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_target(false) // removes module path
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .pretty()
        .init();

    info!("Server starting...");

    let pool = init_db(&config.database_url, config.run_migrations).await?;
    project_cache::init(config.project_cache_ttl_secs);

    let pool_for_cache_warmup = pool.clone();
    actix_web::rt::spawn(async move {
        if let Err(e) = project_cache::warmup_project_cache(&pool_for_cache_warmup, 200).await {
            error!(error = ?e, "Failed to warm up project cache");
        }
    });

    let limits = Arc::new(RateLimits::from_config(&config)?);
    let server_addr = config.server_addr.clone();
    let openapi = ApiDoc::openapi();

    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .wrap(NormalizePath::trim())
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}") // wildcard {_:.*} to match JS/CSS files
                    .url("/api-doc/openapi.json", openapi.clone()),
            )
            .app_data(Data::new(pool.clone()))
            .app_data(Data::new(config.clone()))
            .service(index)
            .configure(|cfg| routes::configure(cfg, &config, &limits))
    })
    .bind(server_addr)?
    .run()
    .await?;

    Ok(())
}
