//! HTTP route table

mod admin;
mod alerts;
mod dashboard;
mod data_management;
mod issues;
mod setup;
mod users;
mod webhooks;

use crate::state::AppState;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn router(state: AppState) -> Router {
    Router::new()
        // inbound provider webhooks (no bearer auth; signature-verified)
        .route("/webhooks/:org_slug/:source", post(webhooks::receive))
        // onboarding & connection setup
        .route("/setup/org", post(setup::create_org))
        .route("/setup/:source", post(setup::upsert_connection))
        .route("/setup/verify/:source", post(setup::verify_connection))
        .route("/setup/status", get(setup::status))
        .route("/setup/backfill/:source", post(setup::trigger_backfill))
        .route("/setup/backfill/progress", get(setup::backfill_progress))
        // issues
        .route("/api/v1/issues", get(issues::list))
        .route("/api/v1/issues/:id", get(issues::get_one))
        .route("/api/v1/issues/:id/acknowledge", post(issues::acknowledge))
        .route("/api/v1/issues/:id/resolve", post(issues::resolve))
        .route("/api/v1/issues/:id/dismiss", post(issues::dismiss))
        // users
        .route("/api/v1/users", get(users::list))
        .route("/api/v1/users/:user_id", get(users::get_one))
        .route("/api/v1/users/:user_id/timeline", get(users::timeline))
        .route("/api/v1/users/:user_id/entitlements", get(users::entitlements))
        .route("/api/v1/users/:user_id/identities", get(users::identities))
        .route("/api/v1/users/:user_id/issues", get(users::issues))
        // dashboards
        .route("/api/v1/dashboard/first-look", get(dashboard::first_look))
        .route("/api/v1/dashboard/revenue-impact", get(dashboard::revenue_impact))
        .route(
            "/api/v1/dashboard/entitlement-health",
            get(dashboard::entitlement_health),
        )
        // admin
        .route("/api/v1/admin/scans/trigger", post(admin::trigger_scan))
        .route("/api/v1/admin/scans/history", get(admin::scan_history))
        .route("/api/v1/admin/scans/schedules", get(admin::scan_schedules))
        .route("/api/v1/admin/queues", get(admin::queues))
        // alerts
        .route("/api/v1/alerts", get(alerts::list).post(alerts::create))
        .route(
            "/api/v1/alerts/:id",
            get(alerts::get_one).put(alerts::update).delete(alerts::remove),
        )
        .route("/api/v1/alerts/:id/test", post(alerts::test))
        .route("/api/v1/alerts/:id/signing-secret", get(alerts::signing_secret))
        // tier-2 access reports & GDPR tooling
        .route("/api/v1/access-checks", post(data_management::record_access_check))
        .route(
            "/api/v1/data-management/users/:user_id/data",
            delete(data_management::delete_user_data),
        )
        .route(
            "/api/v1/data-management/users/:user_id/data-export",
            get(data_management::export_user_data),
        )
        .route("/healthz", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
