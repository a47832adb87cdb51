//! HTTP surface of the queue processor: run endpoints, queue inspection,
//! authentication, DTOs, and OpenAPI documentation.

pub mod auth;
pub mod dto;
pub mod error;
pub mod openapi;
pub mod routes;
pub mod state;
