mod auth;
mod booking;
mod config;
mod db;
mod filters;
mod models;
mod routes;
mod schedule;
mod state;
mod stats;
mod templates;
mod whatsapp;

use actix_files::Files;
use actix_web::{middleware, web, App, HttpServer};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;

use crate::{auth::AdminCredentials, config::Config, state::AppState};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    if let Err(err) = run().await {
        eprintln!("Startup error: {err}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .init();

    let config = Config::from_env();
    db::ensure_sqlite_dir(&config.database_url)?;

    let connect_options = SqliteConnectOptions::from_str(&config.database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect_options)
        .await?;

    db::run_migrations(&pool).await?;
    db::seed_defaults(&pool).await?;

    let credentials = AdminCredentials::from_config(&config)
        .map_err(|err| format!("cannot hash admin password: {err}"))?;
    match auth::sweep_expired_sessions(&pool).await {
        Ok(0) => {}
        Ok(removed) => log::info!("Removed {removed} expired admin sessions"),
        Err(err) => log::warn!("Expired session sweep failed: {err}"),
    }

    let address = format!("0.0.0.0:{}", config.port);
    let state = AppState::new(pool, config, credentials);
    log::info!("Starting Barbearia on http://{address}");

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(middleware::Logger::default())
            .service(Files::new("/static", "./static").prefer_utf8(true))
            .configure(routes::public::configure)
            .configure(routes::events::configure)
            .configure(routes::admin::configure)
    })
    .bind(address)?
    .run()
    .await?;

    Ok(())
}
