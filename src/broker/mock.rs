use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::time::Duration;

use super::errors::{BrokerError, BrokerResult, PollError};
use super::{group_records, BrokerClient, PolledBatch};
use crate::kafka_types::{Record, TopicPartition};
use crate::rebalance::{ReadPosition, RebalanceListener};

/// What the next [`MockBroker::poll`] should do.
pub enum MockEvent {
    Assign(Vec<TopicPartition>),
    Revoke(Vec<TopicPartition>),
    Records(Vec<Record>),
    Fail(PollError),
}

/// A [`BrokerClient`] that plays back a script of [`MockEvent`]s.
///
/// Rebalance events are delivered to the listener from within [`BrokerClient::poll`], like a real
/// client does; once the script is exhausted, every poll returns an empty batch.
#[derive(Default)]
pub struct MockBroker {
    script: Mutex<VecDeque<MockEvent>>,
    listener: Mutex<Option<Arc<dyn RebalanceListener>>>,
    owned: Mutex<BTreeSet<TopicPartition>>,
    positions: Mutex<Vec<(TopicPartition, ReadPosition)>>,
    polls: Mutex<usize>,
    stopped: Mutex<bool>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MockBroker {
    pub fn new<I: IntoIterator<Item = MockEvent>>(script: I) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Default::default()
        }
    }

    /// Every position applied so far, by assignment or seek, in order.
    pub fn positions(&self) -> Vec<(TopicPartition, ReadPosition)> {
        lock(&self.positions).clone()
    }

    pub fn poll_count(&self) -> usize {
        *lock(&self.polls)
    }

    pub fn is_stopped(&self) -> bool {
        *lock(&self.stopped)
    }

    fn listener(&self) -> Option<Arc<dyn RebalanceListener>> {
        lock(&self.listener).clone()
    }
}

#[async_trait]
impl BrokerClient for MockBroker {
    async fn subscribe(&self, _topics: &[String], listener: Arc<dyn RebalanceListener>) -> BrokerResult<()> {
        let mut current = lock(&self.listener);
        if current.is_some() {
            return Err(BrokerError::AlreadySubscribed);
        }
        *current = Some(listener);
        Ok(())
    }

    async fn poll(&self, _timeout: Duration) -> Result<PolledBatch, PollError> {
        *lock(&self.polls) += 1;

        loop {
            let next = lock(&self.script).pop_front();
            match next {
                None => return Ok(PolledBatch::new()),
                Some(MockEvent::Records(records)) => return Ok(group_records(records)),
                Some(MockEvent::Fail(e)) => return Err(e),
                Some(MockEvent::Assign(tps)) => {
                    lock(&self.owned).extend(tps.iter().cloned());
                    if let Some(listener) = self.listener() {
                        let positions = listener.on_partitions_assigned(&tps).await;
                        lock(&self.positions).extend(positions);
                    }
                },
                Some(MockEvent::Revoke(tps)) => {
                    if let Some(listener) = self.listener() {
                        listener.on_partitions_revoked(&tps).await;
                    }
                    let mut owned = lock(&self.owned);
                    for tp in &tps {
                        owned.remove(tp);
                    }
                },
            }
        }
    }

    async fn seek_to_earliest(&self, tps: &[TopicPartition]) -> BrokerResult<()> {
        lock(&self.positions).extend(tps.iter().map(|tp| (tp.clone(), ReadPosition::Earliest)));
        Ok(())
    }

    async fn seek(&self, tp: &TopicPartition, offset: i64) -> BrokerResult<()> {
        lock(&self.positions).push((tp.clone(), ReadPosition::Offset(offset)));
        Ok(())
    }

    async fn stop(&self) {
        let owned: Vec<TopicPartition> = std::mem::take(&mut *lock(&self.owned)).into_iter().collect();
        if let (false, Some(listener)) = (owned.is_empty(), self.listener()) {
            listener.on_partitions_revoked(&owned).await;
        }
        *lock(&self.stopped) = true;
    }
}
