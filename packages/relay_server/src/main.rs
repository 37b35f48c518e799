#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]

use std::env;

use actix_cors::Cors;
use actix_web::{http, middleware, web, App};
use tokio::try_join;

use relay_server::auth::OriginPolicy;
use relay_server::ws::server::RelayServer;
use relay_server::{api, ws};

fn main() -> Result<(), std::io::Error> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();

    let bind_addr = args
        .get(1)
        .cloned()
        .unwrap_or_else(|| env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string()));

    let service_port = if let Some(port) = args.get(2) {
        port.parse::<u16>().expect("Invalid port argument")
    } else {
        env::var("PORT")
            .ok()
            .map(|port| port.parse::<u16>().expect("Invalid PORT environment variable"))
            .unwrap_or(8000)
    };

    let origin_policy = OriginPolicy::new(
        args.get(3)
            .cloned()
            .unwrap_or_else(|| env::var("ORIGIN_HOST").unwrap_or_default()),
    );

    actix_web::rt::System::with_tokio_rt(|| {
        let threads = if let Ok(Ok(threads)) = env::var("MAX_THREADS").map(|t| t.parse::<usize>()) {
            threads
        } else {
            64
        };
        log::debug!("Running with {threads} max blocking threads");
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .max_blocking_threads(threads)
            .build()
            .unwrap()
    })
    .block_on(async move {
        let (relay_server, server_handle) = RelayServer::new();
        let relay_server = tokio::task::spawn(relay_server.run());

        let app = move || {
            let cors = Cors::default()
                .allow_any_origin()
                .allowed_methods(vec!["GET", "POST"])
                .allowed_headers(vec![http::header::AUTHORIZATION, http::header::ACCEPT])
                .allowed_header(http::header::CONTENT_TYPE)
                .supports_credentials()
                .max_age(3600);

            App::new()
                .wrap(cors)
                .wrap(middleware::Compress::default())
                .app_data(web::Data::new(server_handle.clone()))
                .app_data(web::Data::new(origin_policy.clone()))
                .service(api::health_endpoint)
                .service(ws::api::websocket)
        };

        let mut http_server = actix_web::HttpServer::new(app);

        if let Ok(Ok(workers)) = env::var("ACTIX_WORKERS").map(|w| w.parse::<usize>()) {
            http_server = http_server.workers(workers);
        }

        let http_server = http_server.bind((bind_addr, service_port))?.run();

        try_join!(http_server, async move {
            match relay_server.await {
                Ok(value) => value,
                Err(err) => {
                    panic!("Failed to shut down relay server: {err:?}");
                }
            }
        })?;

        Ok(())
    })
}
