/// Client ID used by default in gateway handshakes.
pub const DEFAULT_CLIENT_ID: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
