use super::*;
use lead_keeper_core::deal::{DealAction, DealStatus};
use lead_keeper_core::{Capability, ContactId};

async fn body_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

mod status_mapping_tests {
    use super::*;

    #[test]
    fn test_deal_transition_is_conflict() {
        let error: ApiError = DealServiceError::Deal(DealError::InvalidTransition {
            status: DealStatus::Won,
            action: DealAction::MarkLost,
        })
        .into();

        assert_eq!(error.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_deal_validation_is_unprocessable() {
        let error: ApiError = DealServiceError::Deal(DealError::Validation(ValidationError::TooShort {
            field: "lost_reason".to_string(),
            min_length: 5,
        }))
        .into();

        assert_eq!(error.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_contact_conflict() {
        let error: ApiError = ContactError::Conflict {
            field: "email".to_string(),
            value: "a@b.com".to_string(),
        }
        .into();

        assert_eq!(error.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_not_found_and_forbidden() {
        let missing: ApiError = ContactError::NotFound(ContactId::new()).into();
        let denied: ApiError = ContactError::Unauthorized(AuthorizationError {
            actor: "viewer".to_string(),
            capability: Capability::ManageContacts,
        })
        .into();

        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);
    }

    /// Verify that only transient storage failures become 503
    #[test]
    fn test_storage_classification() {
        let transient: ApiError = StorageError::Unavailable {
            message: "disk busy".to_string(),
        }
        .into();
        let permanent: ApiError = StorageError::Serialization {
            message: "bad".to_string(),
        }
        .into();

        assert_eq!(transient.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(permanent.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

mod body_tests {
    use super::*;

    #[tokio::test]
    async fn test_validation_body_lists_fields() {
        let error: ApiError = ValidationError::Required {
            field: "title".to_string(),
        }
        .into();

        let body = body_json(error.into_response()).await;

        assert_eq!(body["status"], 422);
        assert_eq!(body["fields"][0]["field"], "title");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_unavailable_sets_retry_after() {
        let error = ApiError::Unavailable {
            message: "store offline".to_string(),
        };

        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get("Retry-After").unwrap(),
            &RETRY_AFTER_SECONDS.to_string()
        );
    }

    /// Verify that internal details never reach the client
    #[tokio::test]
    async fn test_internal_message_is_generic() {
        let error = ApiError::Internal {
            message: "snapshot path /secret/x unwritable".to_string(),
        };

        let body = body_json(error.into_response()).await;

        assert_eq!(body["status"], 500);
        assert!(!body["error"].as_str().unwrap().contains("/secret/x"));
        assert!(body.get("fields").is_none());
    }
}

#[test]
fn test_service_error_exit_codes() {
    let config = ServiceError::Configuration(ConfigError::Missing {
        key: "webhooks.signing_secret".to_string(),
    });
    let bind = ServiceError::BindFailed {
        address: "0.0.0.0:1".to_string(),
        message: "denied".to_string(),
    };

    assert_eq!(config.exit_code(), 3);
    assert_eq!(bind.exit_code(), 1);
}
