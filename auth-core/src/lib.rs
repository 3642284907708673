//! Core of the zanix authentication and authorization library.
//!
//! The pieces compose in request order: the guard layer (see the
//! `actix-middleware` crate) extracts a bearer token, resolves the
//! verification key through [`keys`], verifies it with [`jwt`], consults
//! [`blocklist`] and [`rate_limit`], and attaches a [`session::Session`] to
//! the request. [`headers`] serializes that session back onto the response.

pub mod anonymous;
pub mod blocklist;
pub mod config;
pub mod headers;
pub mod jwt;
pub mod keys;
pub mod oauth;
pub mod otp;
pub mod rate_limit;
pub mod scope;
pub mod session;
pub mod store;
pub mod ttl;

pub use error_types::{codes, messages, AuthError, AuthErrorKind, AuthResult, ErrorResponse};
