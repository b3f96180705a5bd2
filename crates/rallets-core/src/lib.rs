//! `Rallets` Core Library
//!
//! Shared functionality for the `Rallets` client:
//! - Endpoint descriptors and profile comparison
//! - Roster selection (short-id prefix lookup, drift detection)
//! - System notifications and version comparison
//! - Session persistence
//! - Common error types

pub mod config;
pub mod endpoint;
pub mod error;
pub mod notification;
pub mod roster;
pub mod session;
pub mod tracing_init;

pub use config::ClientConfig;
pub use endpoint::{EndpointDescriptor, Profile, profile_identical};
pub use error::{Error, Result};
pub use notification::{SystemNotification, is_newer_version};
pub use roster::{Roster, contains_profile, find_by_id_prefix};
pub use session::{Session, SessionStore};
