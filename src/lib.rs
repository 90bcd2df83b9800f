//! Microsoft Graph from the command line.
//!
//! Acquires a bearer token from the Microsoft identity platform with one of
//! three OAuth2 flows (app-only, device code, authorization code), keeps it
//! in a JSON token cache on disk, and uses it for a handful of Graph calls.
//!
//! # Modules
//!
//! - [`credentials`] - `APPLICATION_ID` / `TENANT_ID` / `CLIENT_SECRET` from the environment.
//! - [`auth`] - OAuth2 endpoints, interactive flows and the cache-aware acquirer.
//! - [`cache`] - Serializable token cache persisted between invocations.
//! - [`graph`] - Graph REST client (profile, drive listing, upload, mail, users).
//! - [`config`] - Embedded defaults with environment overrides.
//! - [`error`] - Typed errors per boundary.

#![deny(clippy::all)]

pub mod auth;
pub mod cache;
pub mod config;
pub mod credentials;
pub mod error;
pub mod graph;
pub mod secure;
