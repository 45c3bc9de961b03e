//! Random bearer values handed to customers.

use rand::RngCore;
use rand::rngs::OsRng;

/// 24 bytes -> 48 hex chars.
pub const DOWNLOAD_TOKEN_BYTES: usize = 24;

/// 6 bytes -> 12 uppercase hex chars. Short enough to type in.
pub const GIFT_CODE_BYTES: usize = 6;

/// Download tokens stay valid for 7 days after issue.
pub const DOWNLOAD_TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;

pub fn download_token() -> String {
    let mut bytes = [0u8; DOWNLOAD_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn gift_code() -> String {
    let mut bytes = [0u8; GIFT_CODE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode_upper(bytes)
}
