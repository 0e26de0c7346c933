//! Greenlight Server - Events API with per-client rate limiting.
//!
//! This crate provides the Greenlight HTTP server, responsible for:
//! - Serving CRUD endpoints for calendar events
//! - Admitting or rejecting each request through a per-client token bucket
//! - Evicting idle clients from the limiter in the background
//!
//! # Architecture
//!
//! Every request is identified by the IP address of the peer that opened the
//! connection. The admission gate in [`middleware`] looks that client up in
//! the shared [`rate_limit::ClientRegistry`] and takes one token from its
//! bucket before the router sees the request. Events live in an in-memory
//! [`store::EventStore`].

pub mod config;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod middleware;
pub mod rate_limit;
pub mod routes;
pub mod store;
pub mod types;
pub mod validator;
