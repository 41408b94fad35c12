//! Integration tests for translation request orchestration

mod cancellation;
mod config_loading;
mod conversational_flow;
mod scenarios;
mod single_flight;
mod streaming;
mod structured_backend;
pub mod test_utils;
