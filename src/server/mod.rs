//! HTTP server exposing cached table queries and cache administration.
//!
//! - [`api`]: Request/response types and route handlers

pub mod api;
