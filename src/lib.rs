pub mod auth;
pub mod billing;
pub mod calendar;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod mailer;
pub mod models;
pub mod routes;
pub mod s3;
pub mod scheduling;
pub mod schema;
pub mod signing;
pub mod state;
pub mod storage;
pub mod utils;
pub mod workers;

pub use workers::{default_handlers, JobExecution, JobHandler, Worker};
