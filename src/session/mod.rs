//! Session identity and storage.
//!
//! [`RequestedSessionId`] records what the client asked for (URL or cookie);
//! a [`SessionStore`] decides whether that id names a live [`Session`].

pub mod resolver;
pub mod store;

pub use resolver::{strip_session_from_path, RequestedSessionId, SessionIdSource};
pub use store::{InMemorySessionStore, Session, SessionStore};
