#[cfg(not(target_arch = "wasm32"))]
mod native {
    extern crate socialgraph;

    use std::sync::OnceLock;

    use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
    use socialgraph::config::Settings;
    use socialgraph::core::db::seed_demo_data;
    use socialgraph::core::kv::MemoryStore;
    use socialgraph::notifications::deliver_pending;
    use socialgraph::router::route;
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    mod adapter {
        use actix_web::HttpRequest;
        use spin_sdk::http::{Method, Request};

        pub fn actix_to_spin_request(req: &HttpRequest, body: actix_web::web::Bytes) -> Request {
            let method = match req.method().as_str() {
                "GET" => Method::Get,
                "POST" => Method::Post,
                "PUT" => Method::Put,
                "DELETE" => Method::Delete,
                "HEAD" => Method::Head,
                "OPTIONS" => Method::Options,
                "PATCH" => Method::Patch,
                _ => Method::Get,
            };

            let uri = req.uri().to_string();
            let mut builder = Request::builder();
            builder.method(method).uri(&uri);
            for (name, value) in req.headers() {
                if let Ok(val_str) = value.to_str() {
                    builder.header(name.as_str(), val_str);
                }
            }
            builder.body(body.to_vec()).build()
        }

        pub fn spin_to_actix_response(spin_resp: spin_sdk::http::Response) -> actix_web::HttpResponse {
            let status = *spin_resp.status();
            let body = spin_resp.body().to_vec();

            actix_web::HttpResponse::build(
                actix_web::http::StatusCode::from_u16(status)
                    .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR),
            )
            .content_type("application/json")
            .body(body)
        }
    }

    /// Process-wide store; data lives as long as the server.
    fn store() -> &'static MemoryStore {
        static STORE: OnceLock<MemoryStore> = OnceLock::new();
        STORE.get_or_init(MemoryStore::new)
    }

    pub async fn run() -> std::io::Result<()> {
        dotenvy::dotenv().ok();

        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info,socialgraph=debug".into()),
            )
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_line_number(true),
            )
            .init();

        let settings = Settings::from_env();
        if settings.seed_demo_data {
            if let Err(e) = seed_demo_data(store()) {
                tracing::warn!(error = %e, "demo data seeding failed");
            }
        }

        tracing::info!(addr = %settings.bind_addr, "server listening");

        HttpServer::new(|| App::new().default_service(web::route().to(handle_all)))
            .bind(&settings.bind_addr)?
            .run()
            .await
    }

    async fn handle_all(req: HttpRequest, body: web::Bytes) -> HttpResponse {
        let spin_req = adapter::actix_to_spin_request(&req, body);
        let resp = route(store(), &spin_req);

        // Notification delivery stays off the response path.
        tokio::task::spawn_blocking(|| {
            if let Err(e) = deliver_pending(store()) {
                tracing::warn!(error = %e, "notification delivery failed");
            }
        });

        adapter::spin_to_actix_response(resp)
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    native::run().await
}

#[cfg(target_arch = "wasm32")]
fn main() {}
