use actix_web::{web, HttpResponse};

/// `GET /orders-api/docs/*`. Serves the static OpenAPI document checked into
/// the service; this workspace doesn't generate or annotate it at compile
/// time.
pub async fn serve_spec() -> HttpResponse {
    match std::fs::read_to_string("docs/openapi.yaml") {
        Ok(body) => HttpResponse::Ok().content_type("application/yaml").body(body),
        Err(_) => HttpResponse::NotFound().json(serde_json::json!({
            "error": "NotFoundError",
            "message": "no OpenAPI document has been published for this service",
        })),
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/docs/{path:.*}", web::get().to(serve_spec));
}
