pub mod catalog;
pub mod control_plane;
pub mod fleet;
pub mod health_check;
pub mod health_report;
pub mod node;
pub mod proposal;
pub mod remote;
pub mod repocheck;
pub mod report_store;
pub mod role_applicability;
pub mod stored_report;
pub mod upgrade_state;
