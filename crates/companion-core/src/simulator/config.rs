//! Simulation parameters.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    config::SimulatorConfig,
    topology::{FieldTable, TopologyId},
    Error, Result,
};

/// Parameters of one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Topology the run exercises; informational, the live broker topology is authoritative
    pub topology_id: Option<TopologyId>,
    pub message_count: usize,
    /// Payload size in bytes
    pub message_size: usize,
    /// Full routing key; its first dot segment names the target exchange
    pub routing_key_pattern: String,
    pub concurrent_publishers: usize,
    /// Probability in `[0, 1]` that a publish attempt is synthetically rejected
    pub failure_rate: f64,
    /// Per-publisher throttle; 0 disables throttling
    pub publish_rate_per_second: u32,
    pub headers: FieldTable,
    /// Queue drained by a consumer task while publishers run
    pub consume_queue: Option<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            topology_id: None,
            message_count: 100,
            message_size: 1024,
            routing_key_pattern: String::new(),
            concurrent_publishers: 1,
            failure_rate: 0.0,
            publish_rate_per_second: 0,
            headers: FieldTable::new(),
            consume_queue: None,
        }
    }
}

impl SimulationConfig {
    /// Config publishing `message_count` messages with `routing_key_pattern`.
    #[must_use]
    pub fn new(routing_key_pattern: impl Into<String>, message_count: usize) -> Self {
        Self {
            routing_key_pattern: routing_key_pattern.into(),
            message_count,
            ..Self::default()
        }
    }

    /// Exchange named by the first segment of the routing-key pattern.
    #[must_use]
    pub fn target_exchange(&self) -> &str {
        self.routing_key_pattern
            .split('.')
            .next()
            .unwrap_or_default()
    }

    /// Pause between publishes in one loop, if throttled.
    #[must_use]
    pub fn publish_delay(&self) -> Option<Duration> {
        (self.publish_rate_per_second > 0)
            .then(|| Duration::from_millis(1000 / u64::from(self.publish_rate_per_second)))
            .filter(|delay| !delay.is_zero())
    }

    /// Messages published by loop `index`; shares always sum to `message_count`.
    #[must_use]
    pub const fn share_for(&self, index: usize) -> usize {
        let n = self.concurrent_publishers;
        if n == 0 {
            return 0;
        }
        self.message_count / n + if index < self.message_count % n { 1 } else { 0 }
    }

    /// Check the config against simulator limits.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSimulation` describing the first violated constraint
    pub fn validate(&self, limits: &SimulatorConfig) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidSimulation(msg));

        if self.routing_key_pattern.trim().is_empty() || self.target_exchange().is_empty() {
            return invalid("routing key pattern must name a target exchange".to_string());
        }
        if self.message_count == 0 {
            return invalid("message count must be at least 1".to_string());
        }
        if self.concurrent_publishers == 0 || self.concurrent_publishers > limits.max_publishers {
            return invalid(format!(
                "concurrent publishers must be between 1 and {}",
                limits.max_publishers
            ));
        }
        if self.message_size > limits.max_message_size {
            return invalid(format!(
                "message size {} exceeds the maximum of {} bytes",
                self.message_size, limits.max_message_size
            ));
        }
        if !(0.0..=1.0).contains(&self.failure_rate) {
            return invalid(format!(
                "failure rate {} must be between 0 and 1",
                self.failure_rate
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_target_exchange_is_first_segment() {
        let config = SimulationConfig::new("orders.created.eu", 1);
        assert_eq!(config.target_exchange(), "orders");
    }

    #[test]
    fn test_publish_delay() {
        let mut config = SimulationConfig::new("orders", 1);
        assert_eq!(config.publish_delay(), None);
        config.publish_rate_per_second = 10;
        assert_eq!(config.publish_delay(), Some(Duration::from_millis(100)));
        config.publish_rate_per_second = 5000;
        assert_eq!(config.publish_delay(), None);
    }

    #[test]
    fn test_validate_rejections() {
        let limits = SimulatorConfig::default();
        let ok = SimulationConfig::new("orders.created", 10);
        assert!(ok.validate(&limits).is_ok());

        let cases = [
            SimulationConfig::new("", 10),
            SimulationConfig::new(".created", 10),
            SimulationConfig::new("orders", 0),
            SimulationConfig {
                concurrent_publishers: 0,
                ..ok.clone()
            },
            SimulationConfig {
                concurrent_publishers: limits.max_publishers + 1,
                ..ok.clone()
            },
            SimulationConfig {
                message_size: limits.max_message_size + 1,
                ..ok.clone()
            },
            SimulationConfig {
                failure_rate: 1.5,
                ..ok.clone()
            },
        ];
        for config in cases {
            assert!(
                matches!(config.validate(&limits), Err(Error::InvalidSimulation(_))),
                "{config:?}"
            );
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, ..ProptestConfig::default() })]

        #[test]
        fn prop_shares_sum_to_message_count(count in 1usize..10_000, publishers in 1usize..64) {
            let config = SimulationConfig {
                concurrent_publishers: publishers,
                ..SimulationConfig::new("orders", count)
            };
            let total: usize = (0..publishers).map(|i| config.share_for(i)).sum();
            prop_assert_eq!(total, count);

            let max = (0..publishers).map(|i| config.share_for(i)).max().unwrap_or(0);
            let min = (0..publishers).map(|i| config.share_for(i)).min().unwrap_or(0);
            prop_assert!(max - min <= 1);
        }
    }
}
