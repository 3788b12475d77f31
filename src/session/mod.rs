//! Protocol sessions
//!
//! Sessions are created by a successful `initialize` handshake and ended by
//! an explicit DELETE, a dropped push stream, the idle reaper or shutdown.
//! All of these converge on [`SessionRegistry::end_session`].

pub mod registry;

pub use registry::{Handshake, Session, SessionRegistry};
