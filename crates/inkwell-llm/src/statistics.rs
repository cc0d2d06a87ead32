//! Per-provider request statistics.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ChatResponse, ResponseStatus};

/// Running counters for one provider.
///
/// `total_requests == successful_requests + failed_requests` always holds.
/// Cancelled requests count as failed. The average response time and the
/// token total cover successful requests only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderStatistics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_tokens: u64,
    pub average_response_time: Option<Duration>,
    pub last_request_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    average_ms: f64,
}

impl ProviderStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one finished request into the counters.
    pub fn record(&mut self, response: &ChatResponse) {
        self.record_at(response, Utc::now());
    }

    pub(crate) fn record_at(&mut self, response: &ChatResponse, at: DateTime<Utc>) {
        self.total_requests += 1;
        self.last_request_at = Some(at);

        match response.status {
            ResponseStatus::Success => {
                self.successful_requests += 1;
                let elapsed_ms = response.response_time.as_secs_f64() * 1000.0;
                // Incremental mean avoids keeping every sample.
                self.average_ms += (elapsed_ms - self.average_ms) / self.successful_requests as f64;
                self.average_response_time = Some(Duration::from_secs_f64(
                    (self.average_ms / 1000.0).max(0.0),
                ));
                if let Some(usage) = &response.usage {
                    self.total_tokens += u64::from(usage.total_tokens);
                }
            }
            ResponseStatus::Failed | ResponseStatus::Cancelled => {
                self.failed_requests += 1;
            }
        }
    }

    /// Fraction of requests that succeeded, if any were made.
    pub fn success_rate(&self) -> Option<f64> {
        (self.total_requests > 0)
            .then(|| self.successful_requests as f64 / self.total_requests as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenUsage;
    use proptest::prelude::*;

    fn ok(ms: u64) -> ChatResponse {
        ChatResponse::success("x", "m").with_response_time(Duration::from_millis(ms))
    }

    #[test]
    fn test_average_over_successes_only() {
        let mut stats = ProviderStatistics::new();
        stats.record(&ok(100));
        stats.record(&ChatResponse::failure("boom").with_response_time(Duration::from_secs(9)));
        stats.record(&ok(300));

        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.successful_requests, 2);
        assert_eq!(stats.failed_requests, 1);
        assert_eq!(stats.average_response_time, Some(Duration::from_millis(200)));
        assert!(stats.last_request_at.is_some());
    }

    #[test]
    fn test_cancelled_counts_as_failed() {
        let mut stats = ProviderStatistics::new();
        stats.record(&ChatResponse::cancelled());
        assert_eq!(stats.failed_requests, 1);
        assert_eq!(stats.average_response_time, None);
        assert_eq!(stats.success_rate(), Some(0.0));
    }

    #[test]
    fn test_tokens_accumulate() {
        let mut stats = ProviderStatistics::new();
        stats.record(&ok(10).with_usage(Some(TokenUsage::new(3, 4))));
        stats.record(&ok(10).with_usage(Some(TokenUsage::new(1, 1))));
        assert_eq!(stats.total_tokens, 9);
    }

    #[test]
    fn test_tokens_ignored_for_failures() {
        let mut stats = ProviderStatistics::new();
        stats.record(&ChatResponse::failure("e").with_usage(Some(TokenUsage::new(5, 5))));
        stats.record(&ChatResponse::cancelled().with_usage(Some(TokenUsage::new(2, 2))));
        assert_eq!(stats.total_tokens, 0);
        assert_eq!(stats.failed_requests, 2);

        stats.record(&ok(10).with_usage(Some(TokenUsage::new(1, 2))));
        assert_eq!(stats.total_tokens, 3);
    }

    proptest! {
        #[test]
        fn counters_stay_consistent(outcomes in proptest::collection::vec((any::<bool>(), 0u64..5_000), 0..64)) {
            let mut stats = ProviderStatistics::new();
            let mut successes = Vec::new();
            for (success, ms) in &outcomes {
                if *success {
                    stats.record(&ok(*ms));
                    successes.push(*ms as f64);
                } else {
                    stats.record(&ChatResponse::failure("e"));
                }
            }

            prop_assert_eq!(stats.total_requests, outcomes.len() as u64);
            prop_assert_eq!(
                stats.total_requests,
                stats.successful_requests + stats.failed_requests
            );

            if successes.is_empty() {
                prop_assert!(stats.average_response_time.is_none());
            } else {
                let mean = successes.iter().sum::<f64>() / successes.len() as f64;
                let avg = stats.average_response_time.unwrap().as_secs_f64() * 1000.0;
                prop_assert!((avg - mean).abs() < 0.01, "avg {} mean {}", avg, mean);
            }
        }
    }
}
