//! The HTTP shell (§6): the only layer that knows about actix-web. Routes
//! translate `GET /images/{identifier}` and `POST /upload` into calls on the
//! retrieval and upload services and map their typed errors onto status
//! codes; none of the pipeline's own logic lives here.

pub mod retrieve;
pub mod upload;

use std::sync::Arc;

use crate::config::Config;
use crate::retrieval::RetrievalService;
use crate::upload::UploadService;

#[derive(Clone)]
pub struct AppState {
    pub upload: Arc<UploadService>,
    pub retrieval: Arc<RetrievalService>,
    pub config: Arc<Config>,
}

pub fn configure(cfg: &mut actix_web::web::ServiceConfig) {
    cfg.service(retrieve::get_image);
    cfg.service(upload::upload_image);
}
