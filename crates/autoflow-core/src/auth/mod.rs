//! Authentication module for managing the user session and its tokens.
//!
//! This module provides:
//! - `claims`: bearer token decoding
//! - `TokenStore`: persistence of the access/refresh token pair
//! - `RefreshCoordinator`: single-flight token renewal and the proactive refresh timer
//! - `SessionManager`: login, logout and startup restore
//!
//! Access tokens are refreshed 60 seconds before they expire by default.

pub mod claims;
pub mod credentials;
pub mod manager;
pub mod refresh;
pub mod session;

pub use claims::Claims;
pub use credentials::{
    FileTokenStore, KeyringTokenStore, MemoryTokenStore, StoredCredentials, TokenStore,
};
pub use manager::SessionManager;
pub use refresh::{RefreshCoordinator, RefreshSettings, DEFAULT_REFRESH_LEAD_SECS};
pub use session::{Session, SessionState, UserInfo};
