use serde::Serialize;

/// Function name the instrumented allocator logs for a release.
pub const FREE_FUNCTION: &str = "free";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Allocate,
    Free,
}

impl Operation {
    /// Only the literal `free` releases memory; every other entry point
    /// (`malloc`, `calloc`, `realloc`, ...) produces a block.
    pub fn from_function(name: &str) -> Self {
        if name == FREE_FUNCTION {
            Operation::Free
        } else {
            Operation::Allocate
        }
    }
}

/// One record of a heap trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    /// Seconds since the first event of the trace
    pub timestamp: f64,
    /// Allocator entry point that produced the record
    pub function: String,
    /// Base address of the block
    pub address: u64,
    /// Requested bytes, absent for frees
    pub size: Option<u64>,
    /// 1-based line in the source trace, when the event was parsed from one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl Event {
    pub fn new(
        timestamp: f64,
        function: impl Into<String>,
        address: u64,
        size: Option<u64>,
    ) -> Self {
        Event {
            timestamp,
            function: function.into(),
            address,
            size,
            line: None,
        }
    }

    pub fn alloc(timestamp: f64, function: impl Into<String>, address: u64, size: u64) -> Self {
        Event::new(timestamp, function, address, Some(size))
    }

    pub fn free(timestamp: f64, address: u64) -> Self {
        Event::new(timestamp, FREE_FUNCTION, address, None)
    }

    pub fn with_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    pub fn operation(&self) -> Operation {
        Operation::from_function(&self.function)
    }
}

/// A parsed trace: events in source order plus the absolute time of the first one.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Trace {
    /// `(seconds, nanoseconds)` of the first event, the trace's time zero
    pub origin: Option<(u64, u64)>,
    pub events: Vec<Event>,
}

impl Trace {
    pub fn new(events: Vec<Event>) -> Self {
        Trace {
            origin: None,
            events,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }
}
