//! Route configuration.

use crate::auth::auth_middleware;
use crate::handlers::{self, pages};
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Headroom for multipart framing and text fields around the file part.
const FORM_OVERHEAD: usize = 64 * 1024;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Health check (unauthenticated for load balancers and probes)
        .route("/api/health", get(handlers::health_check))
        .route("/api/debug/session", get(handlers::debug_session))
        // Sessions
        .route("/api/auth/login", post(handlers::login))
        .route("/api/auth/logout", post(handlers::logout))
        .route("/api/auth/register", post(handlers::register))
        .route("/api/auth/refresh", post(handlers::refresh))
        .route("/api/auth/me", get(handlers::me))
        // Documents
        .route(
            "/api/rituals",
            get(handlers::list_rituals).post(handlers::create_ritual),
        )
        .route("/api/rituals/stats", get(handlers::ritual_stats))
        .route(
            "/api/rituals/{id}",
            get(handlers::get_ritual).delete(handlers::delete_ritual),
        )
        .route("/api/upload", post(handlers::upload_file))
        // Members
        .route(
            "/api/users",
            get(handlers::list_users).post(handlers::create_user),
        )
        .route(
            "/api/users/{id}",
            get(handlers::get_user)
                .put(handlers::update_user)
                .delete(handlers::delete_user),
        )
        // Public object URLs
        .route("/files/{*key}", get(handlers::serve_file));

    let page_routes = Router::new()
        .route("/", get(pages::dashboard))
        .route("/rituals", get(pages::rituals_page))
        .route("/rituals/{id}", get(pages::ritual_page))
        .route("/admin/users", get(pages::admin_users_page))
        .route("/login", get(pages::login_page).post(pages::login_submit))
        .route(
            "/register",
            get(pages::register_page).post(pages::register_submit),
        )
        .route("/logout", post(pages::logout_submit))
        .route("/auth-debug", get(pages::auth_debug_page));

    let mut router = Router::new().merge(api_routes).merge(page_routes);

    // SECURITY: When enabled, restrict /metrics to the scraper at the network
    // level. See crate::metrics.
    if state.config.server.metrics_enabled {
        router = router.route("/metrics", get(metrics_handler));
    }

    let body_limit = usize::try_from(state.config.server.max_upload_size)
        .unwrap_or(usize::MAX)
        .saturating_add(FORM_OVERHEAD);

    // Order of execution: TraceLayer -> body limit -> gatekeeper -> handler
    router
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
