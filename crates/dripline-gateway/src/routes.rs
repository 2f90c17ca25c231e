//! Route handlers.

use axum::{Json, extract::State};
use std::sync::Arc;

use super::server::AppState;

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "dripline-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Run one marketing poll cycle and report the counts.
pub async fn run_marketing_cron(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let report = state.poller.poll_once().await;
    Json(serde_json::json!({
        "ok": true,
        "automatizaciones": report.automations,
        "campanas": report.campaigns,
        "errores": report.errors,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dripline_core::config::PollerConfig;
    use dripline_core::traits::MarketingStore;
    use dripline_core::types::{AutomationDefinition, AutomationExecution, Step};
    use dripline_scheduler::{Gateways, Poller, SqliteStore};

    fn test_state(store: Arc<SqliteStore>) -> State<Arc<AppState>> {
        let poller = Arc::new(Poller::new(store, Gateways::new(), PollerConfig::default()));
        State(Arc::new(AppState::new(poller, None)))
    }

    #[tokio::test]
    async fn test_health_check() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let json = health_check(test_state(store)).await.0;
        assert_eq!(json["status"], "ok");
        assert!(json["uptime_secs"].is_number());
    }

    #[tokio::test]
    async fn test_cron_runs_due_executions() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        store
            .upsert_automation(&AutomationDefinition {
                id: "a1".into(),
                name: "Seguimiento".into(),
                active: true,
                steps: vec![Step::wait(60)],
                total_runs: 0,
                total_completed: 0,
            })
            .unwrap();
        store
            .save_execution(&AutomationExecution::new("e1", "a1", "c1", Utc::now()))
            .unwrap();

        let json = run_marketing_cron(test_state(store.clone())).await.0;
        assert_eq!(json["ok"], true);
        assert_eq!(json["automatizaciones"], 1);
        assert_eq!(json["campanas"], 0);
        assert_eq!(json["errores"], 0);

        let exec = store.execution("e1").unwrap().unwrap();
        assert_eq!(exec.current_step, 0);
        assert!(exec.next_action_at.is_some());
    }
}
