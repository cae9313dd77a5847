//! The stable EC2 error-code catalog and the broker error-payload envelope.
//!
//! Daemon-side failures travel back to the gateway as a JSON object whose
//! `Code` field is non-null; that field alone distinguishes an error reply
//! from a success reply.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable EC2-visible error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ec2ErrorCode {
    InvalidParameterValue,
    MissingParameter,
    InvalidAmiIdMalformed,
    InvalidAmiIdNotFound,
    InvalidInstanceIdMalformed,
    InvalidInstanceType,
    InsufficientInstanceCapacity,
    InvalidKeyPairFormat,
    InvalidKeyPairNotFound,
    InvalidInstanceAttributeValue,
    InvalidEgressOnlyInternetGatewayIdNotFound,
    ValidationError,
    ServerInternal,
    InternalError,
}

impl Ec2ErrorCode {
    /// The wire string for this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Ec2ErrorCode::InvalidParameterValue => "InvalidParameterValue",
            Ec2ErrorCode::MissingParameter => "MissingParameter",
            Ec2ErrorCode::InvalidAmiIdMalformed => "InvalidAMIID.Malformed",
            Ec2ErrorCode::InvalidAmiIdNotFound => "InvalidAMIID.NotFound",
            Ec2ErrorCode::InvalidInstanceIdMalformed => "InvalidInstanceID.Malformed",
            Ec2ErrorCode::InvalidInstanceType => "InvalidInstanceType",
            Ec2ErrorCode::InsufficientInstanceCapacity => "InsufficientInstanceCapacity",
            Ec2ErrorCode::InvalidKeyPairFormat => "InvalidKeyPair.Format",
            Ec2ErrorCode::InvalidKeyPairNotFound => "InvalidKeyPair.NotFound",
            Ec2ErrorCode::InvalidInstanceAttributeValue => "InvalidInstanceAttributeValue",
            Ec2ErrorCode::InvalidEgressOnlyInternetGatewayIdNotFound => {
                "InvalidEgressOnlyInternetGatewayId.NotFound"
            }
            Ec2ErrorCode::ValidationError => "ValidationError",
            Ec2ErrorCode::ServerInternal => "ServerInternal",
            Ec2ErrorCode::InternalError => "InternalError",
        }
    }

    /// Parse a wire string back into a code.
    pub fn parse(s: &str) -> Option<Ec2ErrorCode> {
        Some(match s {
            "InvalidParameterValue" => Ec2ErrorCode::InvalidParameterValue,
            "MissingParameter" => Ec2ErrorCode::MissingParameter,
            "InvalidAMIID.Malformed" => Ec2ErrorCode::InvalidAmiIdMalformed,
            "InvalidAMIID.NotFound" => Ec2ErrorCode::InvalidAmiIdNotFound,
            "InvalidInstanceID.Malformed" => Ec2ErrorCode::InvalidInstanceIdMalformed,
            "InvalidInstanceType" => Ec2ErrorCode::InvalidInstanceType,
            "InsufficientInstanceCapacity" => Ec2ErrorCode::InsufficientInstanceCapacity,
            "InvalidKeyPair.Format" => Ec2ErrorCode::InvalidKeyPairFormat,
            "InvalidKeyPair.NotFound" => Ec2ErrorCode::InvalidKeyPairNotFound,
            "InvalidInstanceAttributeValue" => Ec2ErrorCode::InvalidInstanceAttributeValue,
            "InvalidEgressOnlyInternetGatewayId.NotFound" => {
                Ec2ErrorCode::InvalidEgressOnlyInternetGatewayIdNotFound
            }
            "ValidationError" => Ec2ErrorCode::ValidationError,
            "ServerInternal" => Ec2ErrorCode::ServerInternal,
            "InternalError" => Ec2ErrorCode::InternalError,
            _ => return None,
        })
    }

    /// Whether this code is the caller's fault (4xx) rather than ours (5xx).
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Ec2ErrorCode::ServerInternal | Ec2ErrorCode::InternalError)
    }
}

impl std::fmt::Display for Ec2ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An EC2-visible error: a stable code plus a detail string naming the
/// offending field or value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct Ec2Error {
    pub code: Ec2ErrorCode,
    pub message: String,
}

impl Ec2Error {
    pub fn new(code: Ec2ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Shorthand for the catch-all internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Ec2ErrorCode::ServerInternal, message)
    }
}

/// The wire envelope for error replies. A reply is an error if and only if
/// `Code` is non-null; other fields may be absent.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ErrorPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Serialize an error into the reply envelope.
pub fn generate_error_payload(err: &Ec2Error) -> Vec<u8> {
    let payload = ErrorPayload {
        code: Some(err.code.as_str().to_string()),
        message: Some(err.message.clone()),
    };
    // Two string fields; serialization cannot fail.
    serde_json::to_vec(&payload).expect("error payload serialization")
}

/// Inspect reply bytes for an error envelope.
///
/// Returns `Some` when the bytes parse as a JSON object with a non-null
/// `Code` field. Unknown code strings map to `InternalError` so a newer
/// daemon cannot smuggle an undiagnosable failure past an older gateway.
pub fn validate_error_payload(bytes: &[u8]) -> Option<Ec2Error> {
    let payload: ErrorPayload = serde_json::from_slice(bytes).ok()?;
    let code_str = payload.code?;
    let code = Ec2ErrorCode::parse(&code_str).unwrap_or(Ec2ErrorCode::InternalError);
    Some(Ec2Error {
        code,
        message: payload.message.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_CODES: &[Ec2ErrorCode] = &[
        Ec2ErrorCode::InvalidParameterValue,
        Ec2ErrorCode::MissingParameter,
        Ec2ErrorCode::InvalidAmiIdMalformed,
        Ec2ErrorCode::InvalidAmiIdNotFound,
        Ec2ErrorCode::InvalidInstanceIdMalformed,
        Ec2ErrorCode::InvalidInstanceType,
        Ec2ErrorCode::InsufficientInstanceCapacity,
        Ec2ErrorCode::InvalidKeyPairFormat,
        Ec2ErrorCode::InvalidKeyPairNotFound,
        Ec2ErrorCode::InvalidInstanceAttributeValue,
        Ec2ErrorCode::InvalidEgressOnlyInternetGatewayIdNotFound,
        Ec2ErrorCode::ValidationError,
        Ec2ErrorCode::ServerInternal,
        Ec2ErrorCode::InternalError,
    ];

    #[test]
    fn wire_strings_round_trip() {
        for code in ALL_CODES {
            assert_eq!(Ec2ErrorCode::parse(code.as_str()), Some(*code));
        }
    }

    #[test]
    fn payload_round_trip() {
        for code in ALL_CODES {
            let err = Ec2Error::new(*code, "field Foo is bad");
            let bytes = generate_error_payload(&err);
            let back = validate_error_payload(&bytes).expect("error payload detected");
            assert_eq!(back.code, *code);
            assert_eq!(back.message, "field Foo is bad");
        }
    }

    #[test]
    fn success_payload_is_not_an_error() {
        assert!(validate_error_payload(br#"{"ReservationId":"r-1"}"#).is_none());
        assert!(validate_error_payload(br#"{"Code":null}"#).is_none());
        assert!(validate_error_payload(b"not json").is_none());
        assert!(validate_error_payload(b"[1,2,3]").is_none());
    }

    #[test]
    fn unknown_code_maps_to_internal_error() {
        let err = validate_error_payload(br#"{"Code":"Fancy.NewCode","Message":"hm"}"#).unwrap();
        assert_eq!(err.code, Ec2ErrorCode::InternalError);
    }

    #[test]
    fn client_vs_server_classification() {
        assert!(Ec2ErrorCode::MissingParameter.is_client_error());
        assert!(Ec2ErrorCode::InvalidInstanceType.is_client_error());
        assert!(!Ec2ErrorCode::ServerInternal.is_client_error());
        assert!(!Ec2ErrorCode::InternalError.is_client_error());
    }
}
