use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use log::info;
use std::sync::Arc;

use finds_server::api::{configure_routes, AppState};
use finds_server::auth::AuthService;
use finds_server::media::MediaUrls;
use finds_server::notify::{HttpPushSender, NotificationService};
use finds_server::storage::FsObjectStorage;
use finds_server::store::Store;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .expect("PORT must be a number");
    let database_path =
        std::env::var("DATABASE_PATH").unwrap_or_else(|_| "finds.db".to_string());
    let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| {
        log::warn!("JWT_SECRET not set, using an insecure development secret");
        "dev-secret-change-me".to_string()
    });
    let media_root = std::env::var("MEDIA_ROOT").unwrap_or_else(|_| "media".to_string());

    let store = Arc::new(Store::new(&database_path).expect("Failed to open database"));
    let auth_service = Arc::new(AuthService::new(jwt_secret));
    let notifications = Arc::new(NotificationService::new(
        store.clone(),
        Arc::new(HttpPushSender::new()),
    ));

    let state = web::Data::new(AppState {
        store,
        auth_service,
        notifications,
        media_urls: MediaUrls::proxy(),
        storage: Arc::new(FsObjectStorage::new(media_root)),
    });

    info!("Starting finds server on port {}", port);
    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(state.clone())
            .app_data(web::JsonConfig::default().limit(1024 * 1024))
            .wrap(cors)
            .wrap(Logger::default())
            .configure(configure_routes)
    })
    .workers(1)
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
