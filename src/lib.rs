pub mod auth;
pub mod config;
pub mod directory;
pub mod error;
pub mod gateway;
pub mod link;
pub mod payload;
pub mod routes;
pub mod session;
pub mod state;
