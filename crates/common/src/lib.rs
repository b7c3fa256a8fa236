//! Common utilities and shared types for postbox.
//!
//! This crate provides foundational components used across all postbox crates:
//!
//! - **Configuration**: Application settings via [`Config`]
//! - **Error handling**: Unified error types via [`AppError`] and [`AppResult`]
//! - **Cryptography**: RSA key generation for `ActivityPub` signatures
//! - **ID Generation**: ULID-based unique identifiers via [`IdGenerator`]

pub mod config;
pub mod crypto;
pub mod error;
pub mod id;

pub use config::Config;
pub use crypto::{RsaKeypair, generate_rsa_keypair, parse_private_key, parse_public_key};
pub use error::{AppError, AppResult};
pub use id::IdGenerator;
