use super::*;

const FOX: &[u8] = b"The quick brown fox jumps over the lazy dog";
const FOX_DIGEST: &str = "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8";

/// Verify against the published HMAC-SHA256 test vector
#[test]
fn test_sign_matches_known_vector() {
    let validator = HmacSignatureValidator::new("key").unwrap();

    assert_eq!(validator.sign(FOX), format!("sha256={}", FOX_DIGEST));
}

#[test]
fn test_verify_accepts_with_and_without_prefix() {
    let validator = HmacSignatureValidator::new("key").unwrap();

    assert!(validator
        .verify(FOX, Some(&format!("sha256={}", FOX_DIGEST)))
        .is_ok());
    assert!(validator.verify(FOX, Some(FOX_DIGEST)).is_ok());
}

#[test]
fn test_verify_rejects_tampered_payload() {
    let validator = HmacSignatureValidator::new("key").unwrap();

    assert_eq!(
        validator.verify(b"tampered", Some(FOX_DIGEST)),
        Err(SignatureError::Mismatch)
    );
}

#[test]
fn test_verify_rejects_missing_and_malformed() {
    let validator = HmacSignatureValidator::new("key").unwrap();

    assert_eq!(validator.verify(FOX, None), Err(SignatureError::Missing));
    assert_eq!(validator.verify(FOX, Some("  ")), Err(SignatureError::Missing));
    assert_eq!(
        validator.verify(FOX, Some("sha256=not-hex")),
        Err(SignatureError::Malformed)
    );
    assert_eq!(
        validator.verify(FOX, Some("sha256=abcd")),
        Err(SignatureError::Mismatch)
    );
}

#[test]
fn test_empty_secret_rejected() {
    assert_eq!(
        HmacSignatureValidator::new("").unwrap_err(),
        SignatureError::EmptySecret
    );
}

#[test]
fn test_debug_redacts_secret() {
    let validator = HmacSignatureValidator::new("super-secret").unwrap();
    let debug = format!("{:?}", validator);

    assert!(debug.contains("<REDACTED>"));
    assert!(!debug.contains("super-secret"));
}
