use std::{
    path::Path,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use fxprof_processed_profile::{
    CategoryColor, CategoryPairHandle, Frame as FxFrame,
    FrameFlags as FxFrameFlags, FrameInfo as FxFrameInfo, ProcessHandle, Profile,
    ReferenceTimestamp, SamplingInterval, StackHandle, ThreadHandle, Timestamp,
};
use serde_json::Error as SerdeError;
use tracing::debug;

use crate::{
    error::Result,
    event::{Operation, Trace},
    heap::{HeapState, Step},
};

/// Wrapper around `fxprof_processed_profile::Profile` produced from a heap trace.
///
/// Every allocation becomes a native allocation sample with a positive size and
/// every successful free a sample with the negated size of the released block,
/// so the profiler's allocation tracks show retained memory over time.
#[derive(Debug)]
pub struct FirefoxProfile {
    inner: Profile,
}

impl FirefoxProfile {
    /// Build a Firefox profile by replaying the trace.
    pub fn from_trace(trace: &Trace) -> Result<Self> {
        let mut builder = FirefoxProfileBuilder::new(trace.origin);
        builder.ingest(trace)?;
        Ok(Self {
            inner: builder.finish(),
        })
    }

    /// Serialize the Firefox profile to the given JSON file path.
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let writer = std::io::BufWriter::new(std::fs::File::create(path)?);
        serde_json::to_writer(writer, &self.inner).map_err(std::io::Error::other)
    }

    /// Serialize the profile into a JSON string.
    pub fn to_json_string(&self) -> std::result::Result<String, SerdeError> {
        serde_json::to_string(&self.inner)
    }

    pub fn as_profile(&self) -> &Profile {
        &self.inner
    }

    pub fn into_profile(self) -> Profile {
        self.inner
    }
}

struct FirefoxProfileBuilder {
    profile: Profile,
    process: ProcessHandle,
    thread: ThreadHandle,
    categories: CategoryHandles,
    last_timestamp: Timestamp,
}

impl FirefoxProfileBuilder {
    fn new(origin: Option<(u64, u64)>) -> Self {
        let reference = match origin {
            Some((secs, nanos)) => {
                UNIX_EPOCH + Duration::from_secs(secs) + Duration::from_nanos(nanos)
            }
            None => SystemTime::now(),
        };
        let mut profile = Profile::new(
            "heaptrail memory profile",
            ReferenceTimestamp::from(reference),
            SamplingInterval::from_millis(1),
        );
        profile.set_symbolicated(true);

        let process =
            profile.add_process("traced process", 1, Timestamp::from_millis_since_reference(0.0));
        let thread = profile.add_thread(
            process,
            1,
            Timestamp::from_millis_since_reference(0.0),
            true,
        );
        profile.set_thread_name(thread, "Heap");
        profile.add_initial_visible_thread(thread);
        profile.add_initial_selected_thread(thread);

        let categories = CategoryHandles::new(&mut profile);

        Self {
            profile,
            process,
            thread,
            categories,
            last_timestamp: Timestamp::from_nanos_since_reference(0),
        }
    }

    fn ingest(&mut self, trace: &Trace) -> Result<()> {
        let mut state = HeapState::new();
        let mut samples = 0usize;
        for (index, event) in trace.events.iter().enumerate() {
            let size = match state.apply(index, event)? {
                Step::Allocated { size, .. } => size_to_i64(size),
                Step::Freed { size } => -size_to_i64(size),
                Step::Anomaly(_) => continue,
            };
            if size == 0 {
                continue;
            }

            self.last_timestamp = Timestamp::from_nanos_since_reference(seconds_to_nanos(
                event.timestamp,
            ));
            let stack = self.build_stack(&event.function, event.operation());
            self.profile.add_allocation_sample(
                self.thread,
                self.last_timestamp,
                stack,
                event.address,
                size,
            );
            samples += 1;
        }

        debug!(samples, "built firefox allocation samples");
        Ok(())
    }

    fn finish(mut self) -> Profile {
        self.profile
            .set_process_end_time(self.process, self.last_timestamp);
        self.profile
            .set_thread_end_time(self.thread, self.last_timestamp);
        self.profile
    }

    fn build_stack(&mut self, function: &str, operation: Operation) -> Option<StackHandle> {
        let label = self.profile.intern_string(function);
        let frame = FxFrameInfo {
            frame: FxFrame::Label(label),
            category_pair: self.categories.get(operation),
            flags: FxFrameFlags::empty(),
        };
        self.profile
            .intern_stack_frames(self.thread, std::iter::once(frame))
    }
}

fn seconds_to_nanos(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1e9).round() as u64
    } else {
        0
    }
}

fn size_to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

struct CategoryHandles {
    allocation: CategoryPairHandle,
    free: CategoryPairHandle,
}

impl CategoryHandles {
    fn new(profile: &mut Profile) -> Self {
        let allocation = profile
            .add_category("Allocation", CategoryColor::Green)
            .into();
        let free = profile.add_category("Free", CategoryColor::Blue).into();
        Self { allocation, free }
    }

    fn get(&self, operation: Operation) -> CategoryPairHandle {
        match operation {
            Operation::Allocate => self.allocation,
            Operation::Free => self.free,
        }
    }
}
