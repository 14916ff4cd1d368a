//! Query sessions and their results.

pub mod result;
pub mod session;

pub use result::{Query, ResultSet};
pub use session::{ExternalRequest, Pull, Reply, Session, SessionMode, SessionState};
