//! Authentication module for managing the client session.
//!
//! This module provides:
//! - `CredentialStore`: durable token/identity pair over a `StorageBackend`
//!   (file, OS keychain, or memory)
//! - `SessionManager`: the single owner of session state and its transitions
//! - `SessionEvents`: broadcast channel announcing sign-in and sign-out
//! - `LogoutRedirect`: sends the user to login once per forced logout

pub mod credentials;
pub mod events;
pub mod redirect;
pub mod session;

pub use credentials::{CredentialStore, FileBackend, KeyringBackend, MemoryBackend, StorageBackend};
pub use events::{SessionEvent, SessionEvents, SignOutReason};
pub use redirect::{LogoutRedirect, Navigator, RedirectListener};
pub use session::{Role, Session, SessionManager, SessionStatus, UserIdentity};
