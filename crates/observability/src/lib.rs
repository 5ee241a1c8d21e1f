//! Process-wide logging setup shared by the jobflow binaries.

/// Initialize tracing with the default settings.
///
/// Safe to call multiple times; only the first call installs a subscriber.
pub fn init() {
    tracing::init(&tracing::LogSettings::from_env());
}

/// Subscriber configuration (filter and output format).
pub mod tracing;
