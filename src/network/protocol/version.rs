//! Game version packing.
//!
//! A version is packed as `major << 22 | minor << 12 | patch` (10, 10 and 12 bits).

/// Version of this server.
pub const GAME_VERSION: u32 = encode_version(0, 3, 0);

/// Oldest client version accepted.
pub const MIN_CLIENT_VERSION: u32 = encode_version(0, 3, 0);

/// Newest client version accepted.
pub const MAX_CLIENT_VERSION: u32 = GAME_VERSION;

/// Packs a version number.
pub const fn encode_version(major: u32, minor: u32, patch: u32) -> u32 {
    (major & 0x3FF) << 22 | (minor & 0x3FF) << 12 | (patch & 0xFFF)
}

/// Unpacks a version number into `(major, minor, patch)`.
pub const fn decode_version(version: u32) -> (u32, u32, u32) {
    (version >> 22, (version >> 12) & 0x3FF, version & 0xFFF)
}

/// Formats a packed version as `major.minor.patch`.
pub fn version_string(version: u32) -> String {
    let (major, minor, patch) = decode_version(version);
    format!("{major}.{minor}.{patch}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_pack_and_order() {
        assert_eq!(encode_version(0, 3, 0), 3 << 12);
        assert_eq!(decode_version(encode_version(1, 2, 3)), (1, 2, 3));
        assert!(encode_version(0, 2, 9) < MIN_CLIENT_VERSION);
        assert!(encode_version(1, 0, 0) > MAX_CLIENT_VERSION);
        assert_eq!(version_string(GAME_VERSION), "0.3.0");
    }
}
