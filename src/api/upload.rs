use actix_multipart::Multipart;
use actix_web::{post, web, HttpRequest, HttpResponse};
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::error::UploadError;

use super::AppState;

#[derive(Serialize)]
struct UploadLinks {
    url: String,
    html: String,
    bbcode: String,
    markdown: String,
    #[serde(rename = "markdownWithLink")]
    markdown_with_link: String,
}

#[derive(Serialize)]
struct UploadResponseBody {
    identifier: String,
    url: String,
    links: UploadLinks,
    #[serde(rename = "isDuplicate")]
    is_duplicate: bool,
}

/// `POST /upload` multipart (§6). 200 with JSON on success, 400 on
/// unsupported MIME, 413 if the `image` part exceeds `upload_max_size_mb`.
#[post("/upload")]
pub async fn upload_image(mut payload: Multipart, req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    let max_bytes = state.config.upload_max_size_mb * 1024 * 1024;
    let (data, filename) = match read_image_part(&mut payload, max_bytes).await {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let owner_user_id = req
        .headers()
        .get("X-User-Id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);
    let is_public = req
        .headers()
        .get("X-Is-Public")
        .and_then(|v| v.to_str().ok())
        .map(|s| s != "false")
        .unwrap_or(true);

    match state.upload.upload_single(data, &filename, owner_user_id, is_public).await {
        Ok(result) => HttpResponse::Ok().json(build_response(&state.config.public_base_url, result)),
        Err(UploadError::TooLarge) => HttpResponse::PayloadTooLarge().finish(),
        Err(UploadError::UnsupportedMime) => HttpResponse::BadRequest().finish(),
        Err(e) => {
            warn!(error = %e, "upload failed");
            HttpResponse::InternalServerError().finish()
        }
    }
}

fn build_response(base_url: &str, result: crate::upload::UploadResult) -> UploadResponseBody {
    let url = format!("{base_url}/images/{}", result.identifier);
    let links = UploadLinks {
        url: url.clone(),
        html: format!(r#"<img src="{url}" alt="{}">"#, result.identifier),
        bbcode: format!("[img]{url}[/img]"),
        markdown: format!("![{}]({url})", result.identifier),
        markdown_with_link: format!("[![{}]({url})]({url})", result.identifier),
    };
    UploadResponseBody {
        identifier: result.identifier,
        url,
        links,
        is_duplicate: result.is_duplicate,
    }
}

/// Reads the multipart field named `image` into memory, bailing out early
/// (without buffering the rest of the part) once `max_bytes` is exceeded.
async fn read_image_part(payload: &mut Multipart, max_bytes: u64) -> Result<(Vec<u8>, String), HttpResponse> {
    while let Ok(Some(mut field)) = payload.try_next().await {
        let content_disposition = field.content_disposition().cloned();
        let Some(content_disposition) = content_disposition else {
            continue;
        };
        if content_disposition.get_name() != Some("image") {
            continue;
        }
        let filename = content_disposition
            .get_filename()
            .map(sanitize_filename::sanitize)
            .unwrap_or_else(|| "upload".to_string());

        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(_) => return Err(HttpResponse::BadRequest().finish()),
            };
            data.extend_from_slice(&chunk);
            if data.len() as u64 > max_bytes {
                return Err(HttpResponse::PayloadTooLarge().finish());
            }
        }
        return Ok((data, filename));
    }
    Err(HttpResponse::BadRequest().finish())
}
