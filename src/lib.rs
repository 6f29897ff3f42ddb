/// DB Audit - a transparent MySQL relay that records executed queries
///
/// This is the root crate that provides workspace-level documentation.
/// Actual implementation is in the subcrates:
/// - `db-audit-proxy`: Relay server, protocol decoder and audit sink

/// Returns the version of the package.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
