use std::sync::Arc;

use axum::{Router, extract::DefaultBodyLimit};
use sqlx::SqlitePool;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tower_sessions::{Expiry, SessionManagerLayer, SessionStore, cookie::time::Duration};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    api::{self, ApiDoc},
    config::Config,
    course::lesson::LessonStore,
    enrollment::{
        certificate::{CERTIFICATES_PREFIX, CertificateIssuer},
        progress::ProgressTracker,
    },
    media::{MediaStore, UPLOADS_PREFIX},
};

/// Shared handles given to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub database: SqlitePool,
    pub media: MediaStore,
    pub lessons: Arc<LessonStore>,
    pub progress: Arc<ProgressTracker>,
    pub certificates: Arc<CertificateIssuer>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(database: SqlitePool, config: Config) -> Self {
        let media = MediaStore::new(&config.upload_dir);
        Self {
            lessons: Arc::new(LessonStore::new(database.clone(), media.clone())),
            progress: Arc::new(ProgressTracker::new(database.clone())),
            certificates: Arc::new(CertificateIssuer::new(
                database.clone(),
                &config.certificate_dir,
            )),
            media,
            database,
            config: Arc::new(config),
        }
    }
}

/// The whole application: API routes, static media, Swagger UI.
pub fn build_router<S>(state: AppState, store: S) -> Router
where
    S: SessionStore + Clone,
{
    let config = state.config.clone();
    let session_layer = SessionManagerLayer::new(store)
        .with_secure(config.secure_cookies)
        .with_expiry(Expiry::OnInactivity(Duration::days(config.session_ttl_days)));

    Router::new()
        .merge(api::router().layer(session_layer))
        .nest_service(UPLOADS_PREFIX, ServeDir::new(&config.upload_dir))
        .nest_service(CERTIFICATES_PREFIX, ServeDir::new(&config.certificate_dir))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes()))
        .layer(CorsLayer::very_permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
