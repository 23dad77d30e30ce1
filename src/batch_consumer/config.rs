use tokio::time::Duration;

use crate::constants::DEFAULT_TOPIC;

/// Configuration of a [`super::BatchConsumer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Topics to subscribe to.
    pub topics: Vec<String>,

    /// When set, windows close only once they exceed [`Self::batch_size`];
    /// otherwise, every poll iteration closes the window of each partition it touched.
    pub continuous: bool,

    /// Records a partition window has to exceed before it closes.
    pub batch_size: u64,

    /// Poll iterations to run before stopping, `0` meaning "no limit".
    pub run_budget: u64,

    pub poll_timeout: Duration,

    /// Pause after dispatching the records of each partition.
    pub partition_pause: Duration,

    pub checkpoint_interval: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            topics: vec![DEFAULT_TOPIC.to_string()],
            continuous: true,
            batch_size: 1000,
            run_budget: 0,
            poll_timeout: Duration::from_secs(1),
            partition_pause: Duration::from_secs(1),
            checkpoint_interval: Duration::from_secs(1),
        }
    }
}

impl ConsumerConfig {
    /// Whether another poll iteration should run, after `runs` have already.
    ///
    /// Without a [`Self::run_budget`], continuous mode runs forever, and single-shot mode runs once.
    pub fn should_run(&self, runs: u64) -> bool {
        if self.run_budget > 0 {
            runs < self.run_budget
        } else {
            self.continuous || runs == 0
        }
    }

    /// Whether a partition window holding `window_count` records should close.
    pub fn should_close_window(&self, window_count: u64) -> bool {
        !self.continuous || window_count > self.batch_size
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn should_run_forever_when_continuous_without_budget() {
        let config = ConsumerConfig::default();

        assert!(config.should_run(0));
        assert!(config.should_run(1_000_000));
    }

    #[test]
    fn should_run_once_when_single_shot_without_budget() {
        let config = ConsumerConfig {
            continuous: false,
            ..Default::default()
        };

        assert!(config.should_run(0));
        assert!(!config.should_run(1));
    }

    #[test]
    fn should_honour_run_budget() {
        for continuous in [true, false] {
            let config = ConsumerConfig {
                continuous,
                run_budget: 3,
                ..Default::default()
            };

            assert!(config.should_run(2));
            assert!(!config.should_run(3));
        }
    }

    #[test]
    fn should_close_window_strictly_above_batch_size() {
        let config = ConsumerConfig {
            batch_size: 2,
            ..Default::default()
        };
        assert!(!config.should_close_window(2));
        assert!(config.should_close_window(3));

        let single_shot = ConsumerConfig {
            continuous: false,
            ..config
        };
        assert!(single_shot.should_close_window(0));
    }
}
