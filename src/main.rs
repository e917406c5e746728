use actix_web::{web, App, HttpServer};
use actix_cors::Cors;
use dotenv::dotenv;
use fitcoach_server::{
    health_check, AppError, AppState, ChatServer, Hub, JwtAuthorizer, PgMessageStore, Settings,
};
use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const DB_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

#[actix_web::main]
async fn main() -> fitcoach_server::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    // Load configuration
    let config = Settings::new()?;
    info!("Configuration loaded successfully ({})", config.environment);

    let store = PgMessageStore::new_with_options(
        &config.database.url,
        config.database.max_connections,
        DB_ACQUIRE_TIMEOUT,
    )
    .await?;

    let hub = Hub::spawn(config.chat.hub_capacity);

    // Start the chat listener
    let chat_listener =
        tokio::net::TcpListener::bind((config.chat.host.as_str(), config.chat.port)).await?;
    let chat_server = Arc::new(ChatServer::new(
        hub.clone(),
        Arc::new(JwtAuthorizer::new(&config.auth.jwt_secret)),
        Arc::new(store),
        config.chat.clone(),
    ));
    tokio::spawn(chat_server.serve(chat_listener));

    let state = web::Data::new(AppState::new(config.clone(), hub));

    let listener = TcpListener::bind((config.server.host.as_str(), config.server.port))?;
    info!("Starting HTTP server at {}:{}", config.server.host, config.server.port);

    let workers = config.server.workers as usize;
    let cors_settings = config.cors.clone();

    HttpServer::new(move || {
        let cors = if cors_settings.enabled {
            let cors_config = if cors_settings.allow_any_origin {
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
            } else {
                Cors::default()
                    .allowed_methods(vec!["GET"])
                    .allowed_headers(vec!["Content-Type"])
            };
            cors_config.max_age(cors_settings.max_age as usize)
        } else {
            // CORS disabled - use most restrictive settings
            Cors::default()
        };

        App::new()
            .wrap(cors)
            .app_data(state.clone())
            .route("/health", web::get().to(health_check))
    })
    .listen(listener)?
    .workers(workers)
    .run()
    .await
    .map_err(|e| AppError::InternalError(e.to_string()))?;

    Ok(())
}
