pub mod app;
pub mod compliance;
pub mod config;
pub mod db;
pub mod error;
pub mod policies;
pub mod routes;
pub mod schema;
pub mod state;
pub mod telemetry;
pub mod users;
