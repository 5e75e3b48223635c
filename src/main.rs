mod api;
mod cache;
mod config;
mod error;
mod health;
mod images;
mod negotiator;
mod pipeline;
mod retrieval;
mod scanner;
mod storage;
mod upload;
mod variants;
mod worker_pool;

use actix_web::{web, App, HttpServer};
use redis::aio::ConnectionManager;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use api::AppState;
use cache::CacheProvider;
use config::{CacheBackendKind, Config, StorageBackendKind};
use images::{postgres::ImageStorePostgres, ImageStore};
use pipeline::PipelineContext;
use retrieval::RetrievalService;
use scanner::RetryScanner;
use storage::{local_fs::LocalFsStorage, s3::S3Storage, webdav::WebDavStorage, StorageProvider};
use upload::UploadService;
use variants::{postgres::VariantStorePostgres, VariantStore};
use worker_pool::{CancelToken, DecodeSemaphore, WorkerPool};

#[actix_web::main]
#[cfg(not(tarpaulin_include))]
async fn start() -> std::io::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting application...");

    dotenvy::dotenv().ok();

    let config = Arc::new(Config::from_env());
    let server_url = format!("{}:{}", config.bind_host, config.bind_port);
    info!(server_url = %server_url, "binding server");

    // 1. establish connection to database
    let mut opt = ConnectOptions::new(config.database_url.clone());
    opt.max_connections(50)
        .min_connections(10)
        .connect_timeout(Duration::from_secs(5))
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(300))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(false);

    let conn = Database::connect(opt)
        .await
        .expect("Failed to connect to database");
    let db_arc: Arc<DatabaseConnection> = Arc::new(conn);

    // Always available for the readiness probe, independent of which cache
    // backend the pipeline itself uses.
    let redis_client = redis::Client::open(config.redis_url.clone()).expect("invalid REDIS_URL");
    let redis_conn_manager: Arc<Mutex<ConnectionManager>> = Arc::new(Mutex::new(
        redis_client
            .get_connection_manager()
            .await
            .expect("failed to connect to redis"),
    ));

    let storage: Arc<dyn StorageProvider> = build_storage(&config).await;
    let cache: Arc<dyn CacheProvider> = build_cache(&config).await;

    let images: Arc<dyn ImageStore> = Arc::new(ImageStorePostgres::new(Arc::clone(&db_arc)));
    let variants: Arc<dyn VariantStore> = Arc::new(VariantStorePostgres::new(Arc::clone(&db_arc)));

    let pool = Arc::new(WorkerPool::new(config.worker_count, config.queue_capacity));
    let semaphore = Arc::new(DecodeSemaphore::new(config.max_concurrent_decodes));

    let pipeline_ctx = PipelineContext {
        storage: Arc::clone(&storage),
        variants: Arc::clone(&variants),
        images: Arc::clone(&images),
        cache: Arc::clone(&cache),
        config: Arc::clone(&config),
        semaphore,
    };

    let upload_service = UploadService::new(
        Arc::clone(&storage),
        Arc::clone(&images),
        Arc::clone(&variants),
        Arc::clone(&cache),
        Arc::clone(&config),
        Arc::clone(&pool),
        pipeline_ctx.clone(),
    );

    let retrieval_service = RetrievalService::new(
        Arc::clone(&cache),
        Arc::clone(&images),
        Arc::clone(&variants),
        Arc::clone(&storage),
        Arc::clone(&config),
    );

    let scanner = RetryScanner::new(
        Arc::clone(&variants),
        Arc::clone(&images),
        Arc::clone(&pool),
        pipeline_ctx,
        Arc::clone(&config),
    );
    let scanner_cancel = CancelToken::new();
    tokio::spawn({
        let cancel = scanner_cancel.clone();
        async move { scanner.run(cancel).await }
    });

    let state = AppState {
        upload: Arc::new(upload_service),
        retrieval: Arc::new(retrieval_service),
        config: Arc::clone(&config),
    };

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .app_data(web::Data::new(Arc::clone(&db_arc)))
            .app_data(web::Data::new(Arc::clone(&redis_conn_manager)))
            .configure(init_routes)
    })
    .bind(server_url)?
    .run()
    .await
}

async fn build_storage(config: &Config) -> Arc<dyn StorageProvider> {
    match config.storage_backend {
        StorageBackendKind::Local => Arc::new(LocalFsStorage::new(
            config.local_storage_root.clone(),
            config.storage_backend_id,
        )),
        StorageBackendKind::S3 => Arc::new(
            S3Storage::new(
                config.s3_bucket.clone(),
                config.s3_region.clone(),
                config.s3_endpoint.clone(),
                config.storage_backend_id,
            )
            .await,
        ),
        StorageBackendKind::WebDav => Arc::new(WebDavStorage::new(
            config.webdav_base_url.clone(),
            config.webdav_username.clone(),
            config.webdav_password.clone(),
            config.storage_backend_id,
        )),
    }
}

async fn build_cache(config: &Config) -> Arc<dyn CacheProvider> {
    match config.cache_backend {
        CacheBackendKind::Memory => Arc::new(cache::memory::MemoryCache::new(10_000)),
        CacheBackendKind::Redis => {
            let pool = deadpool_redis::Config::from_url(&config.redis_url)
                .create_pool(Some(deadpool_redis::Runtime::Tokio1))
                .expect("failed to build redis pool");
            Arc::new(cache::redis_cache::RedisCache::new(Arc::new(pool)))
        }
    }
}

#[cfg(not(tarpaulin_include))]
fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health::health);
    cfg.service(health::readiness);
    cfg.configure(api::configure);
}

#[cfg(not(tarpaulin_include))]
fn main() {
    if let Err(e) = start() {
        eprintln!("Error starting app: {e}");
    }
}
