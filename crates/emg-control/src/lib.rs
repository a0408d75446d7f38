pub mod audit;
pub mod auth;
pub mod config;
pub mod dashboard;
pub mod geocoding;
pub mod reference_guard;
pub mod request_meta;
pub mod rpc;
pub mod security;
pub mod sequencing;
pub mod state;
pub mod workflow;
