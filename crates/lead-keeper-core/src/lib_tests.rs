use super::*;

mod identifier_tests {
    use super::*;

    /// Verify that ULID identifiers round-trip through their string form
    #[test]
    fn test_contact_id_parses_its_display_form() {
        let id = ContactId::new();
        let parsed: ContactId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_identifier_rejects_garbage() {
        let result = "not-a-ulid".parse::<DealId>();
        assert!(matches!(result, Err(ParseError::InvalidFormat { .. })));
    }

    /// Verify that later identifiers sort after earlier ones
    #[test]
    fn test_identifiers_sort_by_creation() {
        let first = ReceiptId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = ReceiptId::new();
        assert!(first < second);
    }

    #[test]
    fn test_identifier_serializes_as_plain_string() {
        let id = DealId::new();
        let json = serde_json::to_value(id).unwrap();
        assert_eq!(json, serde_json::Value::String(id.to_string()));
    }

    #[test]
    fn test_user_id_parsing() {
        assert_eq!("42".parse::<UserId>().unwrap(), UserId::new(42));
        assert!("-1".parse::<UserId>().is_err());
    }
}

mod idempotency_key_tests {
    use super::*;

    #[test]
    fn test_accepts_typical_keys() {
        let key = IdempotencyKey::new("form-2024-06-01:abc123").unwrap();
        assert_eq!(key.as_str(), "form-2024-06-01:abc123");
    }

    #[test]
    fn test_rejects_empty_key() {
        assert!(matches!(
            IdempotencyKey::new(""),
            Err(ValidationError::Required { .. })
        ));
    }

    #[test]
    fn test_rejects_whitespace() {
        assert!(matches!(
            IdempotencyKey::new("has space"),
            Err(ValidationError::InvalidCharacters { .. })
        ));
    }

    #[test]
    fn test_rejects_overlong_key() {
        let long = "k".repeat(IdempotencyKey::MAX_LENGTH + 1);
        assert!(matches!(
            IdempotencyKey::new(long),
            Err(ValidationError::TooLong { .. })
        ));
    }

    /// Verify that deserialization enforces the same validation rules
    #[test]
    fn test_deserialization_validates() {
        let result: Result<IdempotencyKey, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());
    }
}

mod timestamp_tests {
    use super::*;

    #[test]
    fn test_rfc3339_round_trip() {
        let ts = Timestamp::from_rfc3339("2024-05-01T10:00:00Z").unwrap();
        assert_eq!(
            Timestamp::from_rfc3339(&ts.to_rfc3339()).unwrap(),
            ts
        );
    }

    #[test]
    fn test_add_and_subtract_duration() {
        let ts = Timestamp::from_rfc3339("2024-05-01T10:00:00Z").unwrap();
        let later = ts.add_duration(Duration::from_secs(60));
        assert_eq!(later.duration_since(ts), Duration::from_secs(60));
        assert_eq!(later.subtract_duration(Duration::from_secs(60)), ts);
    }

    #[test]
    fn test_millis_round_trip() {
        let ts = Timestamp::from_rfc3339("2024-05-01T10:00:00.123Z").unwrap();
        assert_eq!(Timestamp::from_millis(ts.timestamp_millis()), Some(ts));
    }
}

mod error_tests {
    use super::*;

    #[test]
    fn test_validation_errors_are_permanent() {
        let error = LeadKeeperError::Validation(ValidationError::Required {
            field: "email".to_string(),
        });
        assert!(!error.is_transient());
        assert_eq!(error.error_category(), ErrorCategory::Permanent);
    }

    #[test]
    fn test_unavailable_storage_is_transient() {
        let error = LeadKeeperError::Storage(StorageError::Unavailable {
            message: "lock poisoned".to_string(),
        });
        assert!(error.is_transient());
        assert_eq!(error.error_category(), ErrorCategory::Transient);
    }

    #[test]
    fn test_validation_error_exposes_field() {
        let error = ValidationError::TooShort {
            field: "lost_reason".to_string(),
            min_length: 5,
        };
        assert_eq!(error.field(), "lost_reason");
    }
}
