//! Heap reconstruction by replaying trace events in order.
//!
//! Every query starts from an empty [`HeapState`] and folds the events into it
//! one at a time, so queries never share state and can run in parallel over
//! the same event slice.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    event::{Event, Operation},
    stats::{Anomaly, HeapSummary, Layout, LayoutEntry, UsageSample, UsageSeries},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveBlock {
    pub size: u64,
    pub function: String,
}

/// Blocks allocated and not yet freed, keyed by base address.
#[derive(Debug, Default, Clone)]
pub struct LiveTable {
    blocks: HashMap<u64, LiveBlock>,
    bytes: u64,
}

impl LiveTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a block, returning the one previously live at `address`.
    pub fn insert(&mut self, address: u64, block: LiveBlock) -> Option<LiveBlock> {
        let size = block.size;
        let replaced = self.blocks.insert(address, block);
        if let Some(old) = &replaced {
            self.bytes = self.bytes.saturating_sub(old.size);
        }
        self.bytes = self.bytes.saturating_add(size);
        replaced
    }

    pub fn remove(&mut self, address: u64) -> Option<LiveBlock> {
        let removed = self.blocks.remove(&address)?;
        self.bytes = self.bytes.saturating_sub(removed.size);
        Some(removed)
    }

    pub fn get(&self, address: u64) -> Option<&LiveBlock> {
        self.blocks.get(&address)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Sum of the sizes of all live blocks.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Live blocks in ascending address order.
    pub fn sorted(&self) -> Vec<LayoutEntry> {
        let mut entries: Vec<LayoutEntry> = self
            .blocks
            .iter()
            .map(|(&address, block)| LayoutEntry {
                address,
                size: block.size,
                function: block.function.clone(),
            })
            .collect();
        entries.sort_unstable_by_key(|e| e.address);
        entries
    }
}

/// Effect of replaying a single event.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Allocated {
        size: u64,
        /// Size of a block that was still live at the same address
        replaced: Option<u64>,
    },
    Freed {
        size: u64,
    },
    Anomaly(Anomaly),
}

/// Replay state: the live table plus the counters every query needs.
#[derive(Debug, Default, Clone)]
pub struct HeapState {
    live: LiveTable,
    alloc_count: usize,
    free_count: usize,
    total_bytes_allocated: u64,
    anomalies: Vec<Anomaly>,
}

impl HeapState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay `event`, the `index`-th event of the trace.
    ///
    /// A free of an address that is not live is recorded as an [`Anomaly`] and
    /// does not fail. An allocation without a size fails with
    /// [`Error::MalformedEvent`] and leaves the state untouched.
    pub fn apply(&mut self, index: usize, event: &Event) -> Result<Step> {
        match event.operation() {
            Operation::Free => {
                self.free_count += 1;
                match self.live.remove(event.address) {
                    Some(block) => Ok(Step::Freed { size: block.size }),
                    None => {
                        let anomaly = Anomaly {
                            index,
                            line: event.line,
                            timestamp: event.timestamp,
                            address: event.address,
                        };
                        warn!("{anomaly}");
                        self.anomalies.push(anomaly.clone());
                        Ok(Step::Anomaly(anomaly))
                    }
                }
            }
            Operation::Allocate => {
                let size = event.size.ok_or_else(|| Error::MalformedEvent {
                    index,
                    line: event.line,
                    function: event.function.clone(),
                    address: event.address,
                })?;

                self.alloc_count += 1;
                self.total_bytes_allocated = self.total_bytes_allocated.saturating_add(size);
                let replaced = self
                    .live
                    .insert(
                        event.address,
                        LiveBlock {
                            size,
                            function: event.function.clone(),
                        },
                    )
                    .map(|old| old.size);
                if let Some(old) = replaced {
                    debug!(
                        address = event.address,
                        old_size = old,
                        new_size = size,
                        "allocation reuses a live address"
                    );
                }
                Ok(Step::Allocated { size, replaced })
            }
        }
    }

    pub fn live(&self) -> &LiveTable {
        &self.live
    }

    /// Bytes currently live.
    pub fn current_bytes(&self) -> u64 {
        self.live.bytes()
    }

    pub fn alloc_count(&self) -> usize {
        self.alloc_count
    }

    pub fn free_count(&self) -> usize {
        self.free_count
    }

    pub fn total_bytes_allocated(&self) -> u64 {
        self.total_bytes_allocated
    }

    pub fn anomalies(&self) -> &[Anomaly] {
        &self.anomalies
    }

    pub fn into_summary(self) -> HeapSummary {
        HeapSummary {
            alloc_count: self.alloc_count,
            free_count: self.free_count,
            total_bytes_allocated: self.total_bytes_allocated,
            live_block_count: self.live.len(),
            live_bytes: self.live.bytes(),
            live: self.live.sorted(),
            anomalies: self.anomalies,
        }
    }
}

/// Lifetime statistics over the whole trace.
pub fn summarize(events: &[Event]) -> Result<HeapSummary> {
    let mut state = HeapState::new();
    for (index, event) in events.iter().enumerate() {
        state.apply(index, event)?;
    }

    debug!(
        events = events.len(),
        allocs = state.alloc_count(),
        frees = state.free_count(),
        anomalies = state.anomalies().len(),
        "heap summary replay finished"
    );
    Ok(state.into_summary())
}

/// The live heap built from every event strictly before `cutoff`.
///
/// `cutoff` is in seconds since the start of the trace; it must not be
/// negative or NaN. `f64::INFINITY` replays the whole trace.
pub fn layout_at(events: &[Event], cutoff: f64) -> Result<Layout> {
    validate_cutoff(cutoff)?;

    let mut state = HeapState::new();
    let mut replayed = 0;
    for (index, event) in events.iter().enumerate() {
        if event.timestamp < cutoff {
            state.apply(index, event)?;
            replayed += 1;
        }
    }

    debug!(cutoff, replayed, live = state.live().len(), "layout replay finished");
    Ok(Layout {
        cutoff,
        entries: state.live().sorted(),
        anomalies: state.anomalies,
    })
}

/// Live bytes after every event, one sample per event.
pub fn usage_over_time(events: &[Event]) -> Result<UsageSeries> {
    let mut state = HeapState::new();
    let mut samples = Vec::with_capacity(events.len());
    for (index, event) in events.iter().enumerate() {
        state.apply(index, event)?;
        samples.push(UsageSample {
            time: event.timestamp,
            bytes: state.current_bytes(),
        });
    }

    debug!(samples = samples.len(), "usage replay finished");
    Ok(UsageSeries {
        samples,
        anomalies: state.anomalies,
    })
}

fn validate_cutoff(cutoff: f64) -> Result<()> {
    if cutoff.is_nan() {
        return Err(Error::InvalidQuery {
            name: "cutoff",
            reason: "not a number".to_string(),
        });
    }
    if cutoff < 0.0 {
        return Err(Error::InvalidQuery {
            name: "cutoff",
            reason: format!("{cutoff} is negative; times are seconds since the first event"),
        });
    }
    Ok(())
}
