use actix_web::{App, HttpServer, web};
use actix_web::dev::Service;
use log::{error, info};

use black_delta::api;
use black_delta::app_state::AppState;
use black_delta::config::AppConfig;
use black_delta::logging::init_logging;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config = AppConfig::load()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("Failed to load configuration: {}", e)))?;

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("Failed to initialise logging: {}", e);
    }

    let app_state = AppState::from_config(config.clone()).map_err(|e| {
        error!("Failed to initialize application state: {}", e);
        std::io::Error::other(e.to_string())
    })?;

    if config.reconcile.enabled {
        app_state.reconcile_worker().start_background();
    } else {
        info!("Reconcile worker disabled");
    }

    let bind = (config.server.host.clone(), config.server.port);
    let max_payload = config.server.max_payload_size as usize;
    info!("Starting server on {}:{}", bind.0, bind.1);

    let data = web::Data::new(app_state);
    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            // Outermost, so the access log line never carries a previous request's user
            .wrap_fn(|req, srv| {
                api::clear_log_user();
                srv.call(req)
            })
            .app_data(data.clone())
            .app_data(web::PayloadConfig::default().limit(max_payload))
            .app_data(web::JsonConfig::default().limit(max_payload))
            .configure(api::configure)
    });
    if config.server.workers > 0 {
        server = server.workers(config.server.workers);
    }

    server.bind(bind)?.run().await
}
