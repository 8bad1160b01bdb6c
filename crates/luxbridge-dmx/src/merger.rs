//! Priority-based DMX source merging
//!
//! When multiple sources feed the same universe, the highest priority
//! wins (the sACN model: 0..=200, higher wins; ArtNet sources carry the
//! fixed priority 50). Sources that stop sending age out after the E1.31
//! data-loss timeout.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use luxbridge_core::DmxFrame;

/// E1.31 data-loss timeout
pub const SOURCE_TIMEOUT: Duration = Duration::from_millis(2500);

/// Per-universe source table with winner selection.
///
/// Not internally synchronised; the owning engine serialises `merge`
/// calls behind one lock.
#[derive(Default)]
pub struct PriorityMerger {
    /// universe -> source_id -> last frame
    active: HashMap<u16, HashMap<String, DmxFrame>>,
    /// universe -> source_id of the last winner, for flap-free ties
    last_winner: HashMap<u16, String>,
}

impl PriorityMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold `frame` into the universe's source table and return the
    /// winning frame if this frame's source won, else `None`.
    ///
    /// On a priority tie the current winner keeps the universe; on cold
    /// start the first arrival wins.
    pub fn merge(&mut self, frame: DmxFrame) -> Option<DmxFrame> {
        let universe = frame.universe;
        let now = frame.timestamp;

        self.remove_stale_sources(universe, now);

        let sources = self.active.entry(universe).or_default();
        sources.insert(frame.source_id.clone(), frame.clone());

        let mut winner = sources
            .values()
            .max_by_key(|f| f.priority)
            .expect("just inserted");

        // Sticky winner on ties
        if let Some(previous) = self.last_winner.get(&universe) {
            if let Some(previous_frame) = sources.get(previous) {
                if previous_frame.priority == winner.priority {
                    winner = previous_frame;
                }
            }
        }

        let winner_id = winner.source_id.clone();
        let winner_protocol = winner.source_protocol;
        let winner_priority = winner.priority;
        let source_count = sources.len();

        if self.last_winner.get(&universe) != Some(&winner_id) {
            self.last_winner.insert(universe, winner_id.clone());
            info!(
                universe,
                winner = %winner_protocol,
                priority = winner_priority,
                source_count,
                "DMX source priority change"
            );
        }

        if winner_id == frame.source_id {
            Some(frame)
        } else {
            debug!(
                universe,
                this = %frame.source_protocol,
                this_priority = frame.priority,
                winner = %winner_protocol,
                winner_priority,
                "DMX frame rejected (lower priority)"
            );
            None
        }
    }

    fn remove_stale_sources(&mut self, universe: u16, now: Instant) {
        let Some(sources) = self.active.get_mut(&universe) else {
            return;
        };

        let stale: Vec<String> = sources
            .iter()
            .filter(|(_, frame)| frame.age(now) > SOURCE_TIMEOUT)
            .map(|(id, _)| id.clone())
            .collect();

        for source_id in stale {
            if let Some(frame) = sources.remove(&source_id) {
                info!(
                    universe,
                    protocol = %frame.source_protocol,
                    source_id = %source_id,
                    "DMX source timed out"
                );
            }
        }

        if sources.is_empty() {
            self.active.remove(&universe);
            self.last_winner.remove(&universe);
        }
    }

    pub fn active_source_count(&self, universe: u16) -> usize {
        self.active.get(&universe).map_or(0, HashMap::len)
    }

    pub fn active_universes(&self) -> Vec<u16> {
        self.active.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luxbridge_core::{SourceProtocol, ARTNET_FIXED_PRIORITY, DMX_CHANNELS};

    fn frame(universe: u16, protocol: SourceProtocol, priority: u8, source_id: &str) -> DmxFrame {
        DmxFrame::new(
            universe,
            [0u8; DMX_CHANNELS],
            0,
            protocol,
            priority,
            source_id,
        )
        .unwrap()
    }

    fn aged(mut f: DmxFrame, age: Duration) -> DmxFrame {
        f.timestamp -= age;
        f
    }

    #[test]
    fn test_first_arrival_wins() {
        let mut merger = PriorityMerger::new();
        let f = frame(0, SourceProtocol::Artnet, ARTNET_FIXED_PRIORITY, "artnet-a");
        assert!(merger.merge(f).is_some());
    }

    #[test]
    fn test_higher_priority_takes_over() {
        let mut merger = PriorityMerger::new();
        assert!(merger
            .merge(frame(0, SourceProtocol::Artnet, 50, "artnet-a"))
            .is_some());
        assert!(merger
            .merge(frame(0, SourceProtocol::Sacn, 100, "sacn-b"))
            .is_some());
        // ArtNet keeps losing while the sACN source is live
        assert!(merger
            .merge(frame(0, SourceProtocol::Artnet, 50, "artnet-a"))
            .is_none());
        assert_eq!(merger.active_source_count(0), 2);
    }

    #[test]
    fn test_tie_keeps_current_winner() {
        let mut merger = PriorityMerger::new();
        assert!(merger
            .merge(frame(0, SourceProtocol::Artnet, 50, "artnet-a"))
            .is_some());
        // Same priority from another source does not steal the universe
        assert!(merger
            .merge(frame(0, SourceProtocol::Sacn, 50, "sacn-b"))
            .is_none());
        assert!(merger
            .merge(frame(0, SourceProtocol::Artnet, 50, "artnet-a"))
            .is_some());
    }

    #[test]
    fn test_stale_source_ages_out() {
        let mut merger = PriorityMerger::new();
        let old = aged(
            frame(0, SourceProtocol::Sacn, 100, "sacn-b"),
            Duration::from_secs(3),
        );
        merger.merge(old);

        // By the time the next ArtNet frame arrives, the sACN source is
        // past the 2.5 s timeout and the lower-priority source wins.
        assert!(merger
            .merge(frame(0, SourceProtocol::Artnet, 50, "artnet-a"))
            .is_some());
        assert_eq!(merger.active_source_count(0), 1);
    }

    #[test]
    fn test_universe_entry_removed_when_empty() {
        let mut merger = PriorityMerger::new();
        let old = aged(
            frame(3, SourceProtocol::Sacn, 100, "sacn-b"),
            Duration::from_secs(3),
        );
        merger.merge(old);
        // A frame for another universe triggers no eviction on universe 3
        merger.merge(frame(4, SourceProtocol::Artnet, 50, "artnet-a"));
        // A fresh frame on universe 3 evicts and becomes sole source
        merger.merge(frame(3, SourceProtocol::Artnet, 50, "artnet-c"));
        assert_eq!(merger.active_source_count(3), 1);

        let mut universes = merger.active_universes();
        universes.sort_unstable();
        assert_eq!(universes, vec![3, 4]);
    }

    #[test]
    fn test_universes_are_independent() {
        let mut merger = PriorityMerger::new();
        assert!(merger
            .merge(frame(0, SourceProtocol::Sacn, 100, "sacn-a"))
            .is_some());
        assert!(merger
            .merge(frame(1, SourceProtocol::Artnet, 50, "artnet-b"))
            .is_some());
    }
}
