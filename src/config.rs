use std::time::Duration;
use anyhow::bail;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Time between the original transmission of a reliable packet and its first retry, and
    ///  between subsequent retries.
    pub retry_timeout: Duration,
    /// Number of retransmissions after the original send before delivery is declared failed.
    pub max_retries: u8,

    /// How long a received reliable packet's (origin, sequence) is remembered for duplicate
    ///  suppression. This must cover the sender's whole retry window, otherwise a late retry
    ///  is delivered to the application a second time.
    pub seen_retention: Duration,

    /// Upper bound for reliable sends awaiting acknowledgement. Sequence numbers of pending
    ///  sends are never reused, so this must stay below the number of usable sequence numbers.
    pub max_pending: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            retry_timeout: Duration::from_millis(200),
            max_retries: 3,
            seen_retention: Duration::from_secs(2),
            max_pending: 256,
        }
    }
}

impl EngineConfig {
    pub const MAX_RETRY_TIMEOUT: Duration = Duration::from_secs(3600);

    /// the time from the original send until the last retransmission has had a full timeout
    pub fn retry_window(&self) -> Duration {
        self.retry_timeout.saturating_mul(self.max_retries as u32 + 1)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.retry_timeout.is_zero() {
            bail!("retry timeout must be positive");
        }
        if self.retry_timeout > Self::MAX_RETRY_TIMEOUT {
            bail!("retry timeout must not exceed {:?}, was {:?}", Self::MAX_RETRY_TIMEOUT, self.retry_timeout);
        }
        let Some(retry_window) = self.retry_timeout.checked_mul(self.max_retries as u32 + 1) else {
            bail!("retry window overflows for timeout {:?} and {} retries", self.retry_timeout, self.max_retries);
        };
        if self.seen_retention <= retry_window {
            bail!("seen retention {:?} must exceed the retry window of {:?}", self.seen_retention, retry_window);
        }
        if self.max_pending == 0 || self.max_pending >= u16::MAX as usize {
            bail!("max pending must be between 1 and {}, was {}", u16::MAX - 1, self.max_pending);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_default_is_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.retry_window(), Duration::from_millis(800));
    }

    #[test]
    fn test_retry_window_saturates() {
        let config = EngineConfig { retry_timeout: Duration::MAX, ..Default::default() };
        assert_eq!(config.retry_window(), Duration::MAX);
    }

    #[rstest]
    #[case::zero_timeout(EngineConfig { retry_timeout: Duration::ZERO, ..Default::default() })]
    #[case::retention_equals_window(EngineConfig { seen_retention: Duration::from_millis(800), ..Default::default() })]
    #[case::retention_too_short(EngineConfig { seen_retention: Duration::from_millis(100), ..Default::default() })]
    #[case::no_pending(EngineConfig { max_pending: 0, ..Default::default() })]
    #[case::pending_exhausts_sequences(EngineConfig { max_pending: 65535, ..Default::default() })]
    #[case::huge_timeout(EngineConfig { retry_timeout: Duration::MAX, seen_retention: Duration::MAX, ..Default::default() })]
    #[case::timeout_above_bound(EngineConfig { retry_timeout: Duration::from_secs(3601), seen_retention: Duration::MAX, ..Default::default() })]
    fn test_invalid(#[case] config: EngineConfig) {
        assert!(config.validate().is_err());
    }

    #[rstest]
    #[case::max_pending_bound(EngineConfig { max_pending: 65534, ..Default::default() })]
    #[case::no_retries(EngineConfig { max_retries: 0, seen_retention: Duration::from_millis(201), ..Default::default() })]
    #[case::max_timeout(EngineConfig { retry_timeout: EngineConfig::MAX_RETRY_TIMEOUT, max_retries: u8::MAX, seen_retention: Duration::MAX, ..Default::default() })]
    fn test_valid(#[case] config: EngineConfig) {
        config.validate().unwrap();
    }
}
