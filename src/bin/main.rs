#[cfg(not(target_arch = "wasm32"))]
mod native {
    extern crate microblog;

    use std::time::Duration;

    use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
    use microblog::config::Settings;
    use microblog::core::memory::MemoryStore;

    type Microblog = microblog::App<MemoryStore>;

    const PRESENCE_FLUSH_SECS: u64 = 5;

    mod adapter {
        use actix_web::HttpRequest;
        use spin_sdk::http::{Method, Request};

        pub fn actix_to_spin_request(req: &HttpRequest, body: actix_web::web::Bytes) -> anyhow::Result<Request> {
            let method = match req.method().as_str() {
                "GET" => Method::Get,
                "POST" => Method::Post,
                "PUT" => Method::Put,
                "DELETE" => Method::Delete,
                "HEAD" => Method::Head,
                "OPTIONS" => Method::Options,
                "PATCH" => Method::Patch,
                other => anyhow::bail!("unsupported method {}", other),
            };

            let uri = req.uri().to_string();
            let mut builder = Request::builder();
            let mut with_headers = builder.method(method).uri(&uri);
            for (name, value) in req.headers() {
                if let Ok(val_str) = value.to_str() {
                    with_headers = with_headers.header(name.as_str(), val_str);
                }
            }

            Ok(with_headers.body(body.to_vec()).build())
        }

        pub fn spin_to_actix_response(spin_resp: spin_sdk::http::Response) -> actix_web::HttpResponse {
            let status = actix_web::http::StatusCode::from_u16(*spin_resp.status())
                .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);

            let mut response = actix_web::HttpResponse::build(status);
            for (name, value) in spin_resp.headers() {
                if let Some(val_str) = value.as_str() {
                    response.insert_header((name, val_str));
                }
            }
            response.body(spin_resp.body().to_vec())
        }
    }

    pub async fn run() -> anyhow::Result<()> {
        let settings = Settings::from_env();
        let bind_addr = settings.bind_addr.clone();

        let app = web::Data::new(Microblog::new(MemoryStore::new(), settings));
        app.bootstrap()?;

        let flusher = app.clone();
        actix_web::rt::spawn(async move {
            let mut tick = actix_web::rt::time::interval(Duration::from_secs(PRESENCE_FLUSH_SECS));
            loop {
                tick.tick().await;
                if let Err(e) = flusher.flush_presence() {
                    log::warn!("last_seen flush failed: {}", e);
                }
            }
        });

        log::info!("Server listening on http://{}", bind_addr);

        HttpServer::new(move || {
            App::new()
                .app_data(app.clone())
                .default_service(web::route().to(handle_all))
        })
        .bind(&bind_addr)?
        .run()
        .await?;
        Ok(())
    }

    async fn handle_all(app: web::Data<Microblog>, req: HttpRequest, body: web::Bytes) -> HttpResponse {
        let spin_req = match adapter::actix_to_spin_request(&req, body) {
            Ok(r) => r,
            Err(e) => {
                log::debug!("rejected request: {}", e);
                return HttpResponse::BadRequest().json(serde_json::json!({"error": "Invalid request"}));
            }
        };

        adapter::spin_to_actix_response(app.handle(spin_req))
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    native::run().await
}

#[cfg(target_arch = "wasm32")]
fn main() {}
