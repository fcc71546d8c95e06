//! Middleware modules for the acceptor service

pub mod auth;

pub use auth::{AUTH_TOKEN_HEADER, SharedToken, auth_middleware};
