//! Tunables for the communication subsystem.

use serde::Deserialize;

/// Configuration for the Broker's quench policy and the SCM loop.
///
/// Deserializable so an embedding application can carry a `[comms]` section
/// in its config file; every field has a default matching the protocol's
/// historical values.
#[derive(Debug, Clone, Deserialize)]
pub struct CommsConfig {
    /// WM-bound data depth at which the Broker stops all tunnel reads.
    #[serde(default = "default_quench_queue_max")]
    pub quench_queue_max: usize,
    /// Delivered-message count that arms the rate envelope.
    #[serde(default = "default_quench_batch_count")]
    pub quench_batch_count: u64,
    /// Milliseconds of envelope credit consumed per delivered message.
    #[serde(default = "default_quench_rate_ms")]
    pub quench_rate_ms_per_msg: u64,
    /// Upper bound on transfer micro-loop iterations per record per wake.
    #[serde(default = "default_transfer_burst")]
    pub transfer_burst: u32,
    /// Poll interval while any tunnel is still establishing.
    #[serde(default = "default_connect_poll_ms")]
    pub connect_poll_ms: u64,
}

impl Default for CommsConfig {
    fn default() -> Self {
        Self {
            quench_queue_max: default_quench_queue_max(),
            quench_batch_count: default_quench_batch_count(),
            quench_rate_ms_per_msg: default_quench_rate_ms(),
            transfer_burst: default_transfer_burst(),
            connect_poll_ms: default_connect_poll_ms(),
        }
    }
}

fn default_quench_queue_max() -> usize {
    50
}

fn default_quench_batch_count() -> u64 {
    100
}

fn default_quench_rate_ms() -> u64 {
    5
}

fn default_transfer_burst() -> u32 {
    20
}

fn default_connect_poll_ms() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: CommsConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.quench_queue_max, 50);
        assert_eq!(config.quench_batch_count, 100);
        assert_eq!(config.quench_rate_ms_per_msg, 5);
        assert_eq!(config.transfer_burst, 20);
        assert_eq!(config.connect_poll_ms, 300);
    }

    #[test]
    fn partial_document_overrides_only_named_fields() {
        let config: CommsConfig =
            serde_json::from_str(r#"{"quench_queue_max": 8, "transfer_burst": 4}"#).unwrap();
        assert_eq!(config.quench_queue_max, 8);
        assert_eq!(config.transfer_burst, 4);
        assert_eq!(config.quench_batch_count, 100);
    }
}
