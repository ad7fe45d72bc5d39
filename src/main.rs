use std::str::FromStr;
use std::sync::Arc;

use actix_web::middleware::NormalizePath;
use actix_web::web::Data;
use actix_web::{App, HttpServer};

use rollcall::config::{Config, StorageBackend};
use rollcall::db::{init_db, run_migrations};
use rollcall::docs::ApiDoc;
use rollcall::ledger::memory::MemoryStore;
use rollcall::ledger::mysql::MySqlStore;
use rollcall::routes;
use rollcall::state::AppState;

use tracing::{info, warn};
use tracing_appender::rolling;
use utoipa::OpenApi; // ← needed for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Rolling daily log
    let file_appender = rolling::daily("logs", "rollcall.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let max_level = tracing::Level::from_str(&config.log_level).unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(max_level)
        .with_ansi(false)
        .with_target(false) // removes module path
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .pretty()
        .init();

    info!(addr = %config.server_addr, "Server starting...");

    let state = match &config.storage {
        StorageBackend::MySql { database_url } => {
            let pool = init_db(database_url, config.db_acquire_timeout_secs).await?;
            if config.run_migrations {
                run_migrations(&pool).await?;
            }
            AppState::new(Arc::new(MySqlStore::new(pool)), &config)?
        }
        StorageBackend::Memory => {
            warn!("STORAGE=memory: attendance is kept in process and lost on restart");
            AppState::new(Arc::new(MemoryStore::new()), &config)?
        }
    };

    let state = Data::new(state);
    let server_addr = config.server_addr.clone();
    let config_data = config.clone();

    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .wrap(NormalizePath::trim())
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}") // ← important: wildcard {_:.*} to match JS/CSS files
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
            .app_data(state.clone())
            .app_data(Data::new(config.clone()))
            .configure(|cfg| routes::configure(cfg, config_data.clone()))
    })
    .bind(server_addr)?
    .run()
    .await?;

    info!("Server stopped");
    Ok(())
}
