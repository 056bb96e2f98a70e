// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token Auth - Single Sign-On Service
//!
//! Logs users in from an external identity provider, either through an
//! encrypted and signed login token or through a SAML 2.0 assertion, and
//! keeps the local user table in step with the identity provider.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Token codec, replay guard, backends and user resolution
//! - `config` - Settings loaded from the environment
//! - `logging` - Tracing subscriber setup
//! - `storage` - Users and consumed tokens (redb)

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod shutdown;
pub mod state;
pub mod storage;
