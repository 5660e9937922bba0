use actix_web::{middleware, web, App, HttpServer};
use log::{error, info, warn};

use photo_vault::api;
use photo_vault::app_state::AppState;
use photo_vault::config::AppConfig;
use photo_vault::service::request_id_scope;

fn init_logging(config_file: &str) {
    if let Err(e) = log4rs::init_file(config_file, Default::default()) {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
        warn!("Failed to load log config {}: {}; logging to stderr", config_file, e);
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config = AppConfig::load().map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    init_logging(&config.logging.config_file);

    let state = AppState::from_config(config.clone()).map_err(|e| {
        error!("Failed to initialize application state: {}", e);
        std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
    })?;

    let _deletion_worker = config.deletion.enabled.then(|| state.deletion_worker().start_background());

    info!("Starting server on {}:{}", config.server.host, config.server.port);
    let data = web::Data::new(state);
    let payload_limit = config.server.max_payload_size;

    HttpServer::new(move || {
        App::new()
            .wrap(middleware::from_fn(request_id_scope))
            .wrap(middleware::Logger::default())
            .app_data(data.clone())
            .app_data(web::PayloadConfig::default().limit(payload_limit))
            .app_data(web::JsonConfig::default().limit(payload_limit))
            .configure(api::configure)
    })
    .workers(config.server.workers)
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await
}
