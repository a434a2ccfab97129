//! Route table

use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::api::handlers;
use crate::api::schema::{BatchPayload, ReviewPayload};
use crate::middleware::{AuthLayer, RateLimitLayer};
use crate::review::types::CheckType;
use crate::AppState;

/// `/v1/{check}` and `/v1/{check}/batch` for each check
fn atomic_routes(mut router: Router<Arc<AppState>>) -> Router<Arc<AppState>> {
    for check in CheckType::ALL {
        router = router
            .route(
                &format!("/{}", check),
                post(
                    move |State(state): State<Arc<AppState>>,
                          payload: Result<Json<ReviewPayload>, JsonRejection>| {
                        handlers::atomic_review(state, payload, check)
                    },
                ),
            )
            .route(
                &format!("/{}/batch", check),
                post(
                    move |State(state): State<Arc<AppState>>,
                          payload: Result<Json<BatchPayload>, JsonRejection>| {
                        handlers::atomic_batch(state, payload, check)
                    },
                ),
            );
    }
    router
}

/// Build the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let settings = state.settings.clone();

    let v1 = atomic_routes(
        Router::new()
            .route("/review", post(handlers::review))
            .route("/review/batch", post(handlers::review_batch)),
    );

    let mut router = Router::new()
        .nest("/v1", v1)
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/stats", get(handlers::stats))
        .with_state(state);

    if settings.rate_limit.enabled {
        router = router.layer(RateLimitLayer::new(
            settings.rate_limit.requests_per_second,
            settings.rate_limit.burst_size,
        ));
    }

    if settings.auth.enabled {
        router = router.layer(AuthLayer::new(settings.auth.api_keys.clone()));
    }

    router
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(settings.server.max_body_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
