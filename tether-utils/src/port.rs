//! Listening port derivation
//!
//! When no fixed port is configured, the server and the console derive the
//! same port from the application name so a client only needs to know which
//! application it is attaching to.

use crate::{Result, TetherError};

/// First port of the default derivation range
pub const DEFAULT_BEGIN_PORT: u16 = 60100;
/// End (exclusive) of the default derivation range
pub const DEFAULT_END_PORT: u16 = 60200;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Derive a port for `app_name` within `[begin, end)`
///
/// The hash is FNV-1a, so the result is stable across builds and platforms.
pub fn derive_port(app_name: &str, begin: u16, end: u16) -> Result<u16> {
    if app_name.trim().is_empty() {
        return Err(TetherError::config("app_name must not be empty"));
    }
    if begin >= end {
        return Err(TetherError::config(format!(
            "invalid port range [{}, {})",
            begin, end
        )));
    }

    let hash = app_name.bytes().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    });
    let width = end - begin;
    let offset = u16::try_from(hash % u64::from(width))
        .map_err(|_| TetherError::internal("port offset out of range"))?;
    Ok(begin + offset)
}
