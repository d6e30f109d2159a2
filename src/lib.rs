pub mod config;
pub mod error;
pub mod logger;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod utils;

pub use config::SessionConfig;
pub use error::{Result, SessionError, Severity};
pub use logger::{Reporter, SessionNotice};
pub use session::{Session, SessionCommand, SessionHandle, SessionOutcome};
