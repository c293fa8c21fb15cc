pub mod app_config;
pub mod copy;
pub mod digest;
pub mod notifications;
pub mod orchestrator;
pub mod repository;
pub mod result_error;
pub mod retention;
pub mod save_game;
pub mod schedule;
pub mod store;
pub mod validate;
