use crate::checkpoint_store::Checkpoint;

/// Offset value meaning "no progress".
pub const NO_OFFSET: i64 = -1;

/// In-memory progress of a single, owned Topic Partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionState {
    /// Offset of the last record processed, or [`NO_OFFSET`].
    pub last_offset: i64,
    /// Records accounted for by closed windows (and by the checkpoint this state was loaded from).
    pub cumulative_count: u64,
    /// Records processed in the current, still open, window.
    pub window_count: u64,
}

impl Default for PartitionState {
    fn default() -> Self {
        Self {
            last_offset: NO_OFFSET,
            cumulative_count: 0,
            window_count: 0,
        }
    }
}

impl PartitionState {
    /// State of a partition just (re)assigned, resuming from `checkpoint`.
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
        Self {
            last_offset: checkpoint.last_offset.unwrap_or(NO_OFFSET),
            cumulative_count: checkpoint.counts,
            window_count: 0,
        }
    }

    /// Total records processed while owned: closed windows plus the open one.
    pub fn total_count(&self) -> u64 {
        self.cumulative_count.saturating_add(self.window_count)
    }

    /// The [`Checkpoint`] to persist for this state.
    ///
    /// The open window is included in the persisted counts, but not folded:
    /// flushing never alters the in-memory state.
    pub fn to_checkpoint(&self) -> Checkpoint {
        Checkpoint {
            last_offset: Some(self.last_offset),
            counts: self.total_count(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn should_start_from_no_offset() {
        let s = PartitionState::default();
        assert_eq!(s.last_offset, NO_OFFSET);
        assert_eq!(s.total_count(), 0);
    }

    #[test]
    fn should_load_from_checkpoint_with_empty_window() {
        let s = PartitionState::from_checkpoint(&Checkpoint::new(42, 300));
        assert_eq!(
            s,
            PartitionState {
                last_offset: 42,
                cumulative_count: 300,
                window_count: 0
            }
        );

        let absent = PartitionState::from_checkpoint(&Checkpoint::absent());
        assert_eq!(absent, PartitionState::default());
    }

    #[test]
    fn should_include_open_window_in_checkpoint() {
        let s = PartitionState {
            last_offset: 99,
            cumulative_count: 10,
            window_count: 5,
        };
        assert_eq!(s.to_checkpoint(), Checkpoint::new(99, 15));
    }
}
