//! Process-wide logging setup shared by the refund sync binaries.

pub mod tracing;

pub use crate::tracing::LogFormat;

/// Install the global subscriber using `RUST_LOG` and `LOG_FORMAT`.
///
/// Calling it again is a no-op.
pub fn init() {
    crate::tracing::init(LogFormat::from_env());
}
