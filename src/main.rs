use actix_web::{middleware, web, App, HttpServer};
use log::{error, info};

use mentorhub::account;
use mentorhub::config::AppConfig;
use mentorhub::context::AppContext;
use mentorhub::db::connect_db;
use mentorhub::logger::Logger;
use mentorhub::response::json_error_handler;
use mentorhub::routes::{account as account_routes, media, mentor, profile};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();
    let config = AppConfig::from_env();
    let db = connect_db(&config).await;
    let server_port = config.server_port;
    let ctx = AppContext::new(db, config, Logger::global());

    // `create-superuser <username> <email>`, password from SUPERUSER_PASSWORD.
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("create-superuser") {
        let (Some(username), Some(email)) = (args.get(1), args.get(2)) else {
            error!("usage: create-superuser <username> <email>");
            return Ok(());
        };
        let password = std::env::var("SUPERUSER_PASSWORD").unwrap_or_default();
        match account::create_superuser(&ctx, username, email, &password).await {
            Ok(created) => info!("superuser {} created", created.username),
            Err(e) => error!("create-superuser failed: {}", e),
        }
        return Ok(());
    }

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(ctx.clone()))
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .wrap(middleware::Logger::default())
            .service(
                web::scope("/api")
                    .service(web::scope("/account").configure(account_routes::config))
                    .service(web::scope("/profile").configure(profile::config))
                    .service(web::scope("/mentor").configure(mentor::config)),
            )
            .service(web::scope("/media").configure(media::config))
    })
    .bind(("0.0.0.0", server_port))?;
    info!("server started at http://0.0.0.0:{}", server_port);
    server.run().await
}
