//! Base64 helpers. Envelope byte fields use URL-safe without padding; frame hashes and
//! chunk data in JSON frames use the standard alphabet.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;

pub use base64::DecodeError;

/// URL-safe, unpadded on encode; tolerant of padding on decode.
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub fn url_encode(data: &[u8]) -> String {
    URL_SAFE_LENIENT.encode(data)
}

pub fn url_decode(s: &str) -> Result<Vec<u8>, DecodeError> {
    URL_SAFE_LENIENT.decode(s)
}

pub fn std_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

pub fn std_decode(s: &str) -> Result<Vec<u8>, DecodeError> {
    STANDARD.decode(s)
}
