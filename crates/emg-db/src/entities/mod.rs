pub mod audit_events;
pub mod deployments;
pub mod device_kinds;
pub mod device_statuses;
pub mod devices;
pub mod maintenance_kinds;
pub mod maintenance_records;
pub mod orders;
pub mod profiles;
pub mod refresh_tokens;
