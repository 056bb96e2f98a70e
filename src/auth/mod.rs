// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Single sign-on through an external identity provider.
//!
//! ## Auth Flow
//!
//! 1. Frontend asks `/api/sso/redirect` for the identity provider URL
//! 2. Identity provider sends the browser back with a credential:
//!    - token backend: an AES-CBC + HMAC-SHA1 login token
//!    - SAML backend: a `SAMLResponse` posted to the ACS endpoint
//! 3. Server:
//!    - rejects tokens that were already used
//!    - verifies the MAC before decrypting, then checks expiry
//!    - finds or creates the local user and applies allow-listed attributes
//!    - records the consumed token in the same transaction
//! 4. Browser is redirected with a session JWT
//!
//! ## Security
//!
//! - Tokens are single use; the database rejects a second insert
//! - MAC comparison is constant time
//! - Only allow-listed user fields can be written by an identity provider
//! - Configuration problems fail at startup, never during a login

pub mod attributes;
pub mod backend;
pub mod error;
pub mod replay;
pub mod resolver;
pub mod saml;
pub mod session;
pub mod token;
pub mod token_backend;

pub use attributes::{IdentityAttributes, UserField};
pub use backend::{authenticate, get_auth, AuthRequest, Authentication, AuthenticationBackend, Backend};
pub use error::AuthError;
pub use replay::ReplayGuard;
pub use saml::{RedirectBindingToolkit, SamlBackend, SamlRequest, SamlSettings, SamlToolkit};
pub use session::{Session, SessionClaims, SessionIssuer};
pub use token::{LoginData, TokenCodec};
pub use token_backend::TokenBackend;
