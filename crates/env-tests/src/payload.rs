//! Random payloads for key-value round trips.

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Payload length used by the key-value checks.
pub const PAYLOAD_LEN: usize = 30;

/// Random alphanumeric string of `PAYLOAD_LEN` characters.
pub fn random_payload() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(PAYLOAD_LEN)
        .map(char::from)
        .collect()
}
