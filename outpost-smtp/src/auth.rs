//! SASL PLAIN (RFC 4616) and LOGIN response decoding.

use base64::{Engine as _, engine::general_purpose::STANDARD};

/// `Username:` in base64, the first LOGIN challenge.
pub const LOGIN_USERNAME_PROMPT: &str = "VXNlcm5hbWU6";
/// `Password:` in base64, the second LOGIN challenge.
pub const LOGIN_PASSWORD_PROMPT: &str = "UGFzc3dvcmQ6";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthDecodeError {
    #[error("Invalid base64 in authentication response")]
    Base64,
    #[error("Authentication response is not valid UTF-8")]
    Utf8,
    #[error("Malformed PLAIN response")]
    Malformed,
}

fn decode(encoded: &str) -> Result<String, AuthDecodeError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|_| AuthDecodeError::Base64)?;
    String::from_utf8(bytes).map_err(|_| AuthDecodeError::Utf8)
}

/// Decodes `base64(authzid NUL authcid NUL passwd)`. The authorization identity is ignored.
pub fn decode_plain(encoded: &str) -> Result<Credentials, AuthDecodeError> {
    let decoded = decode(encoded)?;
    let mut parts = decoded.split('\0');

    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(_authzid), Some(username), Some(password), None) if !username.is_empty() => {
            Ok(Credentials {
                username: username.to_string(),
                password: password.to_string(),
            })
        }
        _ => Err(AuthDecodeError::Malformed),
    }
}

/// Decodes one LOGIN response line (either the username or the password).
pub fn decode_login(encoded: &str) -> Result<String, AuthDecodeError> {
    decode(encoded)
}
