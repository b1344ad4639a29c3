//! HTTP transport for the Mines service
//!
//! Every game route identifies the caller from `Authorization: Bearer <token>`.

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;

pub use server::ApiServer;
