//! Tests for the retry schedule.

use super::*;

mod schedule_tests {
    use super::*;

    /// Verify the default schedule is 1, 5, 15, 60 minutes over 5 attempts
    #[test]
    fn test_default_schedule() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.decide(1), RetryDecision::RetryAfter(Duration::from_secs(60)));
        assert_eq!(policy.decide(2), RetryDecision::RetryAfter(Duration::from_secs(300)));
        assert_eq!(policy.decide(3), RetryDecision::RetryAfter(Duration::from_secs(900)));
        assert_eq!(policy.decide(4), RetryDecision::RetryAfter(Duration::from_secs(3600)));
        assert_eq!(policy.decide(5), RetryDecision::Exhausted);
    }

    #[test]
    fn test_last_delay_repeats_for_long_budgets() {
        let policy = RetryPolicy::new(10, &[Duration::from_secs(1), Duration::from_secs(2)]);

        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(7), Duration::from_secs(2));
    }

    #[test]
    fn test_exhausted_beyond_budget() {
        let policy = RetryPolicy::new(2, &[Duration::from_secs(1)]);

        assert!(policy.can_retry(1));
        assert!(!policy.can_retry(2));
        assert_eq!(policy.decide(3), RetryDecision::Exhausted);
    }
}

mod jitter_tests {
    use super::*;

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(5, &[Duration::from_secs(100)]).with_jitter_percent(0.25);

        for _ in 0..100 {
            let delay = policy.delay_after(1);
            assert!(delay >= Duration::from_secs(75));
            assert!(delay <= Duration::from_secs(125));
        }
    }

    #[test]
    fn test_jitter_percent_is_clamped() {
        let policy = RetryPolicy::default().with_jitter_percent(4.0);
        assert_eq!(policy.jitter_percent, 1.0);
    }
}

mod validation_tests {
    use super::*;

    #[test]
    fn test_default_policy_is_valid() {
        assert!(RetryPolicy::default().validate().is_ok());
    }

    #[test]
    fn test_zero_attempts_is_invalid() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_empty_schedule_is_invalid() {
        let policy = RetryPolicy {
            backoff_seconds: vec![],
            ..Default::default()
        };
        assert!(matches!(
            policy.validate(),
            Err(ValidationError::Required { .. })
        ));
    }

    /// Verify that a partially specified policy falls back to defaults
    #[test]
    fn test_deserializes_with_defaults() {
        let policy: RetryPolicy = serde_json::from_str(r#"{"max_attempts": 3}"#).unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff_seconds, vec![60, 300, 900, 3600]);
    }
}
