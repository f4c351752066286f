//! The single retry-backoff formula used by the job queue and, with a
//! different cap, the rate limiters (spec.md §4.1, §4.3).

/// `min(30 * 2^attempts, 3600)` seconds (spec.md §4.1).
pub fn job_retry_backoff_secs(attempts: u32) -> i64 {
    let exp = 2i64.saturating_pow(attempts);
    (30i64.saturating_mul(exp)).min(3600)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_spec_schedule() {
        assert_eq!(job_retry_backoff_secs(0), 30);
        assert_eq!(job_retry_backoff_secs(1), 60);
        assert_eq!(job_retry_backoff_secs(2), 120);
        assert_eq!(job_retry_backoff_secs(6), 1920);
        assert_eq!(job_retry_backoff_secs(10), 3600);
        assert_eq!(job_retry_backoff_secs(20), 3600);
    }
}
