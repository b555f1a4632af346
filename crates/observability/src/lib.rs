//! Process-wide logging setup shared by KeyGate binaries and tests.

pub mod tracing;

pub use tracing::LogFormat;

/// Install the global subscriber using `RUST_LOG` and `KEYGATE_LOG_FORMAT`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    tracing::init(LogFormat::from_env());
}
