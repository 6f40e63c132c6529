use super::*;

#[test]
fn test_retention_cutoff_subtracts_whole_days() {
    let now = Timestamp::from_rfc3339("2024-03-10T12:00:00Z").unwrap();

    let cutoff = retention_cutoff(now, 7);

    assert_eq!(cutoff, Timestamp::from_rfc3339("2024-03-03T12:00:00Z").unwrap());
}

#[test]
fn test_zero_days_cuts_at_now() {
    let now = Timestamp::now();

    assert_eq!(retention_cutoff(now, 0), now);
}
