//! HTTP API - routes, handlers and wire types

pub mod handlers;
pub mod routes;
pub mod schema;

pub use routes::create_router;
