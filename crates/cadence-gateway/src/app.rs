use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use cadence_core::CadenceConfig;
use cadence_runtime::{ScheduleHost, WorkloadRegistry};

/// Central shared state, passed as Arc<AppState> to all Axum handlers.
pub struct AppState {
    pub config: CadenceConfig,
    pub host: Arc<ScheduleHost>,
    pub workloads: Arc<WorkloadRegistry>,
}

impl AppState {
    pub fn new(
        config: CadenceConfig,
        host: Arc<ScheduleHost>,
        workloads: Arc<WorkloadRegistry>,
    ) -> Self {
        Self {
            config,
            host,
            workloads,
        }
    }
}

/// Assemble the full Axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    use crate::http::{health, schedules};

    Router::new()
        .route("/health", get(health::health_handler))
        .route(
            "/schedules",
            get(schedules::list_schedules)
                .post(schedules::create_schedule)
                .put(schedules::update_schedule)
                .delete(schedules::delete_schedule),
        )
        .route("/schedules/pause", post(schedules::pause_schedule))
        .route("/schedules/resume", post(schedules::resume_schedule))
        .route("/schedules/{id}", get(schedules::get_schedule))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
