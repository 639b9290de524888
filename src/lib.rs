pub mod actors;
pub mod alerts;
pub mod cache;
pub mod compactor;
pub mod config;
pub mod monitors;
pub mod notify;
pub mod orchestrator;
pub mod probe;
pub mod request;
pub mod util;
