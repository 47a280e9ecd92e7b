//! Checkpoint tracker
//!
//! Owns the shard's [`ShardState`] and flushes it to the store synchronously
//! after every index advance. Entering a level either resumes it (keeping the
//! descendant indices loaded from the checkpoint) or starts it fresh (resetting
//! every descendant index to zero).

use crate::checkpoint::{CheckpointKey, Position, ShardState, TraversalLayout};
use crate::partition::{ShardSpec, YearCounts};
use crate::storage::{CheckpointStore, StorageError, StorageResult};
use chrono::Utc;

pub struct Tracker<C: CheckpointStore> {
    store: C,
    state: ShardState,
}

impl<C: CheckpointStore> Tracker<C> {
    /// Loads the checkpoint for `key`, or creates and saves a fresh one
    ///
    /// Returns the tracker and whether an existing checkpoint was resumed.
    /// A checkpoint partitioned for a different shard count is refused, since
    /// its year map no longer matches the other shards' slices. An unfinished
    /// checkpoint recorded under a different layout is refused too: its
    /// window, page and batch indices would point at other units.
    pub fn open(
        mut store: C,
        key: &CheckpointKey,
        shard: &ShardSpec,
        layout: TraversalLayout,
    ) -> StorageResult<(Self, bool)> {
        match store.load_shard_state(key)? {
            Some(mut state) => {
                if state.shard_count != shard.count {
                    return Err(StorageError::ShardMismatch {
                        key: key.to_string(),
                        stored: state.shard_count,
                        requested: shard.count,
                    });
                }
                match state.layout {
                    Some(stored) if stored != layout && !state.completed => {
                        return Err(StorageError::LayoutMismatch {
                            key: key.to_string(),
                            stored: stored.to_string(),
                            requested: layout.to_string(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        tracing::warn!(
                            "Checkpoint {} has no recorded layout; adopting {}",
                            key,
                            layout
                        );
                        state.layout = Some(layout);
                        store.save_shard_state(&state)?;
                    }
                }
                tracing::info!(
                    "Resuming shard {} at {} (completed: {})",
                    key,
                    state.position(),
                    state.completed
                );
                Ok((Self { store, state }, true))
            }
            None => {
                let state = ShardState::with_layout(key, shard.count, layout);
                store.save_shard_state(&state)?;
                tracing::info!("Initialized new checkpoint for shard {}", key);
                Ok((Self { store, state }, false))
            }
        }
    }

    /// Discards any saved checkpoint for `key` and starts from zero
    pub fn open_fresh(
        mut store: C,
        key: &CheckpointKey,
        shard: &ShardSpec,
        layout: TraversalLayout,
    ) -> StorageResult<Self> {
        if store.delete_shard_state(key)? {
            tracing::info!("Discarded previous checkpoint for shard {}", key);
        }
        let state = ShardState::with_layout(key, shard.count, layout);
        store.save_shard_state(&state)?;
        Ok(Self { store, state })
    }

    pub fn state(&self) -> &ShardState {
        &self.state
    }

    pub fn position(&self) -> Position {
        self.state.position()
    }

    pub fn is_completed(&self) -> bool {
        self.state.completed
    }

    pub fn store(&self) -> &C {
        &self.store
    }

    /// Records this shard's slice of the year histogram
    pub fn assign_year_counts(&mut self, counts: YearCounts) -> StorageResult<()> {
        self.ensure_active()?;
        self.state.year_counts = counts;
        self.state.current_year_index = 0;
        self.reset_below_year();
        self.commit()
    }

    /// Enters YEAR `index`; `resume` keeps the loaded window/page/batch
    pub fn enter_year(&mut self, index: usize, resume: bool) -> StorageResult<()> {
        self.ensure_active()?;
        self.state.current_year_index = index;
        if !resume {
            self.reset_below_year();
        }
        self.commit()
    }

    /// Enters WINDOW `index`; `resume` keeps the loaded page/batch
    pub fn enter_window(&mut self, index: usize, resume: bool) -> StorageResult<()> {
        self.ensure_active()?;
        self.state.current_window_index = index;
        if !resume {
            self.state.current_page_index = 0;
            self.state.current_batch_index = 0;
        }
        self.commit()
    }

    /// Enters PAGE `index`; `resume` keeps the loaded batch
    pub fn enter_page(&mut self, index: usize, resume: bool) -> StorageResult<()> {
        self.ensure_active()?;
        self.state.current_page_index = index;
        if !resume {
            self.state.current_batch_index = 0;
        }
        self.commit()
    }

    pub fn enter_batch(&mut self, index: usize) -> StorageResult<()> {
        self.ensure_active()?;
        self.state.current_batch_index = index;
        self.commit()
    }

    /// Moves past the current year with every lower index reset
    pub fn finish_year(&mut self) -> StorageResult<()> {
        self.ensure_active()?;
        self.state.current_year_index += 1;
        self.reset_below_year();
        self.commit()
    }

    /// Sets the terminal flag
    pub fn mark_completed(&mut self) -> StorageResult<()> {
        self.ensure_active()?;
        self.state.completed = true;
        self.commit()
    }

    fn reset_below_year(&mut self) {
        self.state.current_window_index = 0;
        self.state.current_page_index = 0;
        self.state.current_batch_index = 0;
    }

    fn ensure_active(&self) -> StorageResult<()> {
        if self.state.completed {
            return Err(StorageError::Completed(self.state.key().to_string()));
        }
        Ok(())
    }

    fn commit(&mut self) -> StorageResult<()> {
        self.state.last_updated = Utc::now();
        self.store.save_shard_state(&self.state)?;
        tracing::trace!("Checkpoint saved at {}", self.state.position());
        Ok(())
    }
}
