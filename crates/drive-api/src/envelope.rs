//! Response envelope decoding
//!
//! Every JSON endpoint wraps its payload in `{Code, Error?, ...fields}`. A
//! request is successful only when the HTTP status is 2xx *and* the code is
//! one of the OK values.

use drive_core::DriveError;
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Envelope code for a plain success.
pub const CODE_OK: u64 = 1000;
/// Envelope code for a multi-part success.
pub const CODE_OK_MANY: u64 = 1001;
/// Envelope code for an accepted asynchronous operation.
pub const CODE_OK_ASYNC: u64 = 1002;
/// Envelope code for a missing entity.
pub const CODE_NOT_FOUND: u64 = 2501;

/// The `{Code, Error?}` prefix of every JSON response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope {
    /// Response code.
    #[serde(rename = "Code")]
    pub code: u64,
    /// Server error message, when the code is not OK.
    #[serde(rename = "Error", default)]
    pub error: Option<String>,
}

impl ApiEnvelope {
    /// Whether the code is one of the OK values.
    pub fn is_ok(&self) -> bool {
        matches!(self.code, CODE_OK | CODE_OK_MANY | CODE_OK_ASYNC)
    }
}

/// Decode a JSON response body into `T`, enforcing the envelope contract.
pub fn decode_body<T: DeserializeOwned>(
    status: u16,
    body: &[u8],
    url: &str,
) -> Result<T, DriveError> {
    let envelope: ApiEnvelope = match serde_json::from_slice(body) {
        Ok(envelope) => envelope,
        Err(err) => {
            return if (200..300).contains(&status) {
                // A 2xx body we cannot parse is a server fault.
                Err(DriveError::server(format!("malformed response from {url}: {err}")))
            } else {
                Err(DriveError::api_http(
                    status,
                    String::from_utf8_lossy(body).into_owned(),
                ))
            };
        }
    };

    if (200..300).contains(&status) && envelope.is_ok() {
        serde_json::from_slice(body).map_err(|err| {
            DriveError::server(format!("malformed payload from {url}: {err}"))
        })
    } else if envelope.is_ok() {
        Err(DriveError::api_http(status, String::new()))
    } else {
        Err(DriveError::api_code(
            envelope.code,
            envelope.error.unwrap_or_default(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Payload {
        #[serde(rename = "Value")]
        value: u32,
    }

    #[test]
    fn ok_codes_yield_the_payload() {
        let body = br#"{"Code":1000,"Value":7}"#;
        let payload: Payload = decode_body(200, body, "u").unwrap();
        assert_eq!(payload.value, 7);

        let body = br#"{"Code":1001,"Value":9}"#;
        let payload: Payload = decode_body(200, body, "u").unwrap();
        assert_eq!(payload.value, 9);
    }

    #[test]
    fn code_2501_maps_to_not_found() {
        let body = br#"{"Code":2501,"Error":"no such link"}"#;
        assert_matches!(
            decode_body::<Payload>(200, body, "u"),
            Err(DriveError::NotFound { .. })
        );
    }

    #[test]
    fn other_codes_map_to_api_code_errors() {
        let body = br#"{"Code":2000,"Error":"invalid name"}"#;
        assert_matches!(
            decode_body::<Payload>(422, body, "u"),
            Err(DriveError::ApiCode { code: 2000, .. })
        );
    }

    #[test]
    fn untyped_bodies_map_to_http_errors() {
        assert_matches!(
            decode_body::<Payload>(404, b"gone", "u"),
            Err(DriveError::ApiHttp { status: 404, .. })
        );
    }

    #[test]
    fn malformed_2xx_is_a_server_fault() {
        assert_matches!(
            decode_body::<Payload>(200, b"\x00\x01", "u"),
            Err(DriveError::Server { .. })
        );
    }
}
