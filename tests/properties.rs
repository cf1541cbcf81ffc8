use std::collections::HashMap;

use heaptrail::{Event, layout_at, summarize, usage_over_time};
use proptest::prelude::*;

/// Small address pool so frees, reuse and double frees all show up.
fn event_strategy() -> impl Strategy<Value = (bool, u64, u64)> {
    (any::<bool>(), 0u64..8, 1u64..4096)
}

fn build_trace(raw: Vec<(bool, u64, u64)>) -> Vec<Event> {
    raw.into_iter()
        .enumerate()
        .map(|(i, (is_free, slot, size))| {
            let timestamp = i as f64 * 0.01;
            let address = 0x1000 + slot * 0x100;
            if is_free {
                Event::free(timestamp, address)
            } else {
                Event::alloc(timestamp, "malloc", address, size)
            }
        })
        .collect()
}

/// Straightforward model of the heap: last live size per address.
fn model_live(events: &[Event]) -> (HashMap<u64, u64>, usize) {
    let mut live = HashMap::new();
    let mut anomalies = 0;
    for event in events {
        match event.size {
            Some(size) if event.function != "free" => {
                live.insert(event.address, size);
            }
            _ => {
                if live.remove(&event.address).is_none() {
                    anomalies += 1;
                }
            }
        }
    }
    (live, anomalies)
}

proptest! {
    #[test]
    fn live_bytes_match_unfreed_allocations(raw in proptest::collection::vec(event_strategy(), 0..200)) {
        let events = build_trace(raw);
        let summary = summarize(&events).unwrap();
        let (live, anomalies) = model_live(&events);

        prop_assert_eq!(summary.live_block_count, live.len());
        prop_assert_eq!(summary.live_bytes, live.values().sum::<u64>());
        prop_assert_eq!(summary.anomalies.len(), anomalies);
        prop_assert_eq!(summary.alloc_count + summary.free_count, events.len());
        prop_assert_eq!(
            summary.total_bytes_allocated,
            events.iter().filter_map(|e| e.size).sum::<u64>()
        );
    }

    #[test]
    fn replay_is_deterministic(raw in proptest::collection::vec(event_strategy(), 0..100)) {
        let events = build_trace(raw);
        prop_assert_eq!(summarize(&events).unwrap(), summarize(&events).unwrap());
        prop_assert_eq!(layout_at(&events, 0.5).unwrap(), layout_at(&events, 0.5).unwrap());
        prop_assert_eq!(usage_over_time(&events).unwrap(), usage_over_time(&events).unwrap());
    }

    #[test]
    fn unbounded_layout_equals_final_live_table(raw in proptest::collection::vec(event_strategy(), 0..200)) {
        let events = build_trace(raw);
        let summary = summarize(&events).unwrap();
        let layout = layout_at(&events, f64::INFINITY).unwrap();

        prop_assert_eq!(&layout.entries, &summary.live);
        prop_assert!(layout.entries.windows(2).all(|w| w[0].address < w[1].address));
    }

    #[test]
    fn layout_before_first_event_is_empty(raw in proptest::collection::vec(event_strategy(), 1..50)) {
        let events = build_trace(raw);
        let layout = layout_at(&events, events[0].timestamp).unwrap();
        prop_assert!(layout.is_empty());
        prop_assert!(layout.anomalies.is_empty());
    }

    #[test]
    fn usage_tracks_every_event(raw in proptest::collection::vec(event_strategy(), 0..200)) {
        let events = build_trace(raw);
        let summary = summarize(&events).unwrap();
        let usage = usage_over_time(&events).unwrap();

        prop_assert_eq!(usage.len(), events.len());
        prop_assert_eq!(usage.last().map(|s| s.bytes).unwrap_or(0), summary.live_bytes);
        prop_assert_eq!(usage.anomalies, summary.anomalies);
    }

    #[test]
    fn untracked_free_changes_nothing(
        raw in proptest::collection::vec(event_strategy(), 0..100),
        stray in 0x10_0000u64..0x20_0000,
    ) {
        let events = build_trace(raw);
        let before = summarize(&events).unwrap();

        let mut with_stray = events.clone();
        with_stray.push(Event::free(10.0, stray));
        let after = summarize(&with_stray).unwrap();

        prop_assert_eq!(after.live_block_count, before.live_block_count);
        prop_assert_eq!(after.live_bytes, before.live_bytes);
        prop_assert_eq!(after.anomalies.len(), before.anomalies.len() + 1);
    }
}
