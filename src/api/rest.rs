use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::error::ApiError;
use crate::domain::control_plane::{ControlPlane, PlatformStatus, UpgradeLaunch, UpgradeStatus};
use crate::domain::health_report::{Check, HealthReport};
use crate::domain::repocheck::RepositoryCheckReport;
use crate::domain::role_applicability::RoleDecision;
use crate::domain::stored_report::StoredReport;

/// Shared application state for all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub plane: Arc<ControlPlane>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/status", get(status))
        .route("/api/v1/upgrade", get(upgrade).post(start_upgrade))
        .route("/api/v1/checks", get(report))
        .route("/api/v1/checks/refresh", post(refresh_report))
        .route("/api/v1/checks/{name}", get(run_check))
        .route("/api/v1/repocheck/{version}", get(repocheck))
        .route(
            "/api/v1/nodes/{node}/roles/{barclamp}/{role}",
            get(role_decision),
        )
        .route("/api/v1/inventory/reload", post(reload_inventory))
        .with_state(state)
}

#[derive(Serialize)]
struct Liveness {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<Liveness> {
    Json(Liveness {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn status(State(state): State<AppState>) -> Json<PlatformStatus> {
    Json(state.plane.status().await)
}

async fn upgrade(State(state): State<AppState>) -> Json<UpgradeStatus> {
    Json(state.plane.upgrade_status().await)
}

/// Launch the upgrade detached; poll `GET /api/v1/upgrade` for progress.
async fn start_upgrade(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<UpgradeLaunch>), ApiError> {
    let launch = state.plane.start_upgrade().await?;
    Ok((StatusCode::ACCEPTED, Json(launch)))
}

/// Serve the cached report from memory. Never runs checks.
async fn report(State(state): State<AppState>) -> Result<Json<StoredReport>, ApiError> {
    state
        .plane
        .cached_report()
        .await
        .map(Json)
        .ok_or(ApiError::ReportPending)
}

async fn refresh_report(State(state): State<AppState>) -> Result<Json<StoredReport>, ApiError> {
    Ok(Json(state.plane.refresh().await?))
}

async fn run_check(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<HealthReport>, ApiError> {
    let check: Check = name.parse().map_err(ApiError::UnknownCheck)?;
    Ok(Json(state.plane.run_check(check).await))
}

async fn repocheck(
    State(state): State<AppState>,
    Path(version): Path<String>,
) -> Result<Json<RepositoryCheckReport>, ApiError> {
    Ok(Json(state.plane.repocheck(&version).await?))
}

async fn role_decision(
    State(state): State<AppState>,
    Path((node, barclamp, role)): Path<(String, String, String)>,
) -> Result<Json<RoleDecision>, ApiError> {
    state
        .plane
        .role_decision(&node, &barclamp, &role)
        .await
        .map(Json)
        .ok_or(ApiError::UnknownNode(node))
}

async fn reload_inventory(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let nodes = state.plane.reload_inventory().await?;
    Ok(Json(json!({ "nodes": nodes })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::domain::fleet::Inventory;
    use crate::domain::remote::fake::ScriptedExecutor;
    use crate::domain::repocheck::fixtures::LOCKED;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const INVENTORY: &str = r#"
nodes:
  - name: admin
    state: ready
    admin: true
    roles: [crowbar]
  - name: k1
    state: ready
    roles: [nova-compute-kvm]
    attributes:
      nova: { element_states: { nova-compute-kvm: [ready] } }
"#;

    fn app(dir: &std::path::Path) -> Router {
        let mut config = Config::default();
        config.daemon.report_file = dir.join("report.json");
        config.upgrade.state_dir = dir.join("install");
        config.upgrade.launcher = dir.join("missing.sh");
        config.repositories.products_command = "products".into();

        let executor = ScriptedExecutor::new().reply("admin", "products", 7, LOCKED);
        let plane = ControlPlane::with_inventory(
            config,
            Inventory::from_yaml(INVENTORY).unwrap(),
            Arc::new(executor),
        );
        router(AppState {
            plane: Arc::new(plane),
        })
    }

    async fn call(app: Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn cached_report_pending_until_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(dir.path());

        let (status, body) = call(app.clone(), "GET", "/api/v1/checks").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "report_pending");

        let (status, body) = call(app.clone(), "POST", "/api/v1/checks/refresh").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["report"]["ha_not_installed"], true);

        let (status, cached) = call(app, "GET", "/api/v1/checks").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cached["checksum"], body["checksum"]);
    }

    #[tokio::test]
    async fn single_check_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = call(app(dir.path()), "GET", "/api/v1/checks/compute_status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["no_resources"][0],
            "Found only one compute node of kvm type; non-disruptive upgrade is not possible"
        );

        let (status, body) = call(app(dir.path()), "GET", "/api/v1/checks/bogus").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "unknown_check");
    }

    #[tokio::test]
    async fn locked_package_manager_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = call(app(dir.path()), "GET", "/api/v1/repocheck/7").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "zypper_locked");
        assert!(body["message"]
            .as_str()
            .unwrap()
            .contains("System management is locked"));
    }

    #[tokio::test]
    async fn upgrade_without_launcher_is_unprocessable() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = call(app(dir.path()), "POST", "/api/v1/upgrade").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "upgrade_script_missing");

        let (status, body) = call(app(dir.path()), "GET", "/api/v1/upgrade").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["phase"], "idle");
        assert_eq!(body["upgrade"]["upgrading"], false);
    }

    #[tokio::test]
    async fn role_applicability_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = call(
            app(dir.path()),
            "GET",
            "/api/v1/nodes/k1/roles/nova/nova-compute-kvm",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["applicable"], true);

        let (status, _) = call(app(dir.path()), "GET", "/api/v1/nodes/ghost/roles/nova/nova-compute-kvm").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
