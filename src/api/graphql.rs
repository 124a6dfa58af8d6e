use async_graphql::{Context, EmptySubscription, ErrorExtensions, Json, Object, Schema, SimpleObject};
use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::error::ApiError;
use crate::domain::control_plane::{ControlPlane, PlatformStatus, UpgradeLaunch, UpgradeStatus};
use crate::domain::health_report::{Check, HealthReport};
use crate::domain::stored_report::StoredReport;

pub type FleetgateSchema = Schema<QueryRoot, MutationRoot, EmptySubscription>;

/// A readiness report with its integrity metadata. Findings are passed
/// through as JSON, keyed like the REST representation.
#[derive(SimpleObject)]
pub struct ReadinessReport {
    pub checksum: String,
    pub collected_at: DateTime<Utc>,
    pub collector_version: String,
    /// No findings at all.
    pub ready: bool,
    pub findings: Json<HealthReport>,
}

impl From<StoredReport> for ReadinessReport {
    fn from(stored: StoredReport) -> Self {
        Self {
            ready: stored.ready(),
            checksum: stored.checksum,
            collected_at: stored.collected_at,
            collector_version: stored.collector_version,
            findings: Json(stored.report),
        }
    }
}

fn gql_error(e: impl Into<ApiError>) -> async_graphql::Error {
    let e = e.into();
    let key = e.key().to_string();
    async_graphql::Error::new(e.to_string()).extend_with(|_, ext| ext.set("key", key))
}

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    /// Installed version and deployed add-ons.
    async fn status(&self, ctx: &Context<'_>) -> async_graphql::Result<PlatformStatus> {
        let plane = ctx.data::<Arc<ControlPlane>>()?;
        Ok(plane.status().await)
    }

    async fn upgrade(&self, ctx: &Context<'_>) -> async_graphql::Result<UpgradeStatus> {
        let plane = ctx.data::<Arc<ControlPlane>>()?;
        Ok(plane.upgrade_status().await)
    }

    /// The cached report from the last full run. Never runs checks.
    async fn health_report(
        &self,
        ctx: &Context<'_>,
    ) -> async_graphql::Result<Option<ReadinessReport>> {
        let plane = ctx.data::<Arc<ControlPlane>>()?;
        Ok(plane.cached_report().await.map(ReadinessReport::from))
    }

    /// Run one check by name, e.g. `ha_config`.
    async fn check(&self, ctx: &Context<'_>, name: String) -> async_graphql::Result<Json<HealthReport>> {
        let plane = ctx.data::<Arc<ControlPlane>>()?;
        let check: Check = name.parse().map_err(|e| gql_error(ApiError::UnknownCheck(e)))?;
        Ok(Json(plane.run_check(check).await))
    }
}

pub struct MutationRoot;

#[Object]
impl MutationRoot {
    async fn start_upgrade(&self, ctx: &Context<'_>) -> async_graphql::Result<UpgradeLaunch> {
        let plane = ctx.data::<Arc<ControlPlane>>()?;
        plane.start_upgrade().await.map_err(gql_error)
    }

    /// Run every check, persist and cache the result.
    async fn refresh_report(&self, ctx: &Context<'_>) -> async_graphql::Result<ReadinessReport> {
        let plane = ctx.data::<Arc<ControlPlane>>()?;
        plane
            .refresh()
            .await
            .map(ReadinessReport::from)
            .map_err(gql_error)
    }
}

pub fn build_schema(plane: Arc<ControlPlane>) -> FleetgateSchema {
    Schema::build(QueryRoot, MutationRoot, EmptySubscription)
        .data(plane)
        .finish()
}
