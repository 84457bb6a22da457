pub mod auth;
pub mod blob;
pub mod clients;
pub mod config;
pub mod db;
pub mod error;
pub mod feedback;
pub mod models;
pub mod ownership;
pub mod quota;
pub mod routes;
pub mod schema;
pub mod state;
pub mod store;
pub mod tenant;
pub mod workflow;
