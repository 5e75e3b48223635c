use actix_web::{get, http::header, web, HttpRequest, HttpResponse};
use tokio_util::io::ReaderStream;
use tracing::warn;
use uuid::Uuid;

use crate::error::RetrievalError;

use super::AppState;

/// `GET /images/{identifier}` (§6). 200 with bytes, 403 if private to
/// another user, 404 if unknown, 5xx on transient DB/storage failure
/// (explicitly caller-retryable). 304 is left to upstream cache middleware.
#[get("/images/{identifier}")]
pub async fn get_image(path: web::Path<String>, req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let identifier = path.into_inner();
    let accept = req
        .headers()
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("*/*");
    let requester = req
        .headers()
        .get("X-User-Id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok());

    match state.retrieval.resolve(&identifier, accept, requester).await {
        Ok(resolved) => HttpResponse::Ok()
            .content_type(resolved.content_type)
            .insert_header((header::CACHE_CONTROL, "public, max-age=86400"))
            .streaming(ReaderStream::new(resolved.body)),
        Err(RetrievalError::NotFound) => HttpResponse::NotFound().finish(),
        Err(RetrievalError::Forbidden) => HttpResponse::Forbidden().finish(),
        Err(RetrievalError::Transient(message)) => {
            warn!(identifier, error = %message, "retrieval failed transiently");
            HttpResponse::InternalServerError().finish()
        }
        Err(RetrievalError::Storage(e)) => {
            warn!(identifier, error = %e, "retrieval storage failure");
            HttpResponse::InternalServerError().finish()
        }
    }
}
