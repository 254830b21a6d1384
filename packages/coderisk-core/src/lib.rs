//! Cross-cutting concerns shared by every CodeRisk crate: the error
//! taxonomy of §7, tracing bootstrap, rolling-window arithmetic, and the
//! identity newtypes entities are keyed on.

pub mod error;
pub mod ids;
pub mod logging;
pub mod window;

pub use error::{CoreError, ErrorKind};
pub use ids::{CanonicalPath, RepoId, Sha};
