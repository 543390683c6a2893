use async_trait::async_trait;
use base64::{
    engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD},
    Engine as _,
};
use thiserror::Error;
use tracing::warn;

/// Integer identifier of an external account, recoverable from a credential
/// without contacting any external service.
pub type Identity = u64;

/// Why the identity segment of a credential could not be decoded. Variants
/// exist for diagnostics only; users see a single validation failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("credential has no identity segment")]
    MissingSegment,
    #[error("identity segment is not valid base64")]
    Base64,
    #[error("identity payload is not utf-8")]
    NotUtf8,
    #[error("identity payload is not an integer")]
    NotInteger,
}

#[derive(Debug, Error)]
#[error("liveness oracle error: {0}")]
pub struct OracleError(pub String);

impl OracleError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// External service confirming that a credential currently authenticates.
#[async_trait]
pub trait LivenessOracle: Send + Sync {
    async fn confirm(&self, credential: &str) -> Result<bool, OracleError>;
}

/// Cheap, local shape check run before any I/O: three dot-separated,
/// non-empty segments over the base64-ish credential alphabet.
pub fn validate_structure(credential: &str) -> bool {
    let segments: Vec<&str> = credential.split('.').collect();
    if segments.len() != 3 {
        return false;
    }
    segments.iter().all(|segment| {
        !segment.is_empty()
            && segment
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'+' | b'/' | b'='))
    })
}

/// Extracts the embedded identity: base64-decode the first segment and
/// parse the payload as an integer. Padding is tolerated either way.
pub fn decode_identity(credential: &str) -> Result<Identity, DecodeError> {
    let segment = credential
        .split('.')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or(DecodeError::MissingSegment)?;
    let segment = segment.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .or_else(|_| STANDARD_NO_PAD.decode(segment))
        .map_err(|_| DecodeError::Base64)?;
    let payload = std::str::from_utf8(&bytes).map_err(|_| DecodeError::NotUtf8)?;
    payload.parse::<Identity>().map_err(|_| DecodeError::NotInteger)
}

/// Fail-closed liveness check: any oracle failure is logged and treated as
/// "not live". Callers never learn whether the oracle errored or the
/// credential is dead.
pub async fn confirm_live(oracle: &dyn LivenessOracle, credential: &str) -> bool {
    match oracle.confirm(credential).await {
        Ok(live) => live,
        Err(err) => {
            warn!(error = %err, "liveness check failed; treating credential as dead");
            false
        }
    }
}

/// Builds a structurally valid credential embedding `identity`. Test
/// fixture helper; real credentials come from the external system.
pub fn encode_for_identity(identity: Identity, suffix: &str) -> String {
    format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(identity.to_string()),
        suffix
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential_for(identity: Identity) -> String {
        encode_for_identity(identity, "Gx01aB.dQw4w9WgXcQ-abc123")
    }

    #[test]
    fn well_formed_credential_passes_structure_check() {
        assert!(validate_structure(&credential_for(1058767448428789814)));
    }

    #[test]
    fn malformed_credentials_fail_structure_check() {
        assert!(!validate_structure(""));
        assert!(!validate_structure("only-one-segment"));
        assert!(!validate_structure("a.b"));
        assert!(!validate_structure("a..c"));
        assert!(!validate_structure("a.b.c.d"));
        assert!(!validate_structure("a b.c.d"));
    }

    #[test]
    fn identity_round_trips_through_the_first_segment() {
        let identity = 123456789012345678;
        assert_eq!(decode_identity(&credential_for(identity)), Ok(identity));
    }

    #[test]
    fn standard_alphabet_and_padding_are_tolerated() {
        // 1234567 encodes to "MTIzNDU2Nw==" with standard padding.
        assert_eq!(decode_identity("MTIzNDU2Nw==.x.y"), Ok(1234567));
    }

    #[test]
    fn decode_failures_are_distinguished() {
        assert_eq!(decode_identity(""), Err(DecodeError::MissingSegment));
        assert_eq!(decode_identity("!!!.x.y"), Err(DecodeError::Base64));
        // Valid base64 of non-utf8 bytes.
        assert_eq!(
            decode_identity(&format!("{}.x.y", URL_SAFE_NO_PAD.encode([0xff, 0xfe]))),
            Err(DecodeError::NotUtf8)
        );
        // Valid base64 of a non-numeric string.
        assert_eq!(
            decode_identity(&format!("{}.x.y", URL_SAFE_NO_PAD.encode("hello"))),
            Err(DecodeError::NotInteger)
        );
    }

    struct FailingOracle;

    #[async_trait]
    impl LivenessOracle for FailingOracle {
        async fn confirm(&self, _credential: &str) -> Result<bool, OracleError> {
            Err(OracleError::new("connection refused"))
        }
    }

    #[tokio::test]
    async fn oracle_errors_are_fail_closed() {
        assert!(!confirm_live(&FailingOracle, "a.b.c").await);
    }
}
