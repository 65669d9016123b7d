//! Change detection between consecutive button words

use super::button::{ButtonId, ButtonMap};
use super::word::ButtonWord;
use crate::sink::{InputSink, SinkError};
use tracing::{debug, trace};

/// One button changing state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TransitionEvent {
    pub button: ButtonId,
    pub pressed: bool,
}

impl TransitionEvent {
    pub const fn new(button: ButtonId, pressed: bool) -> Self {
        Self { button, pressed }
    }
}

/// Transitions from `previous` to `current`, in map order.
///
/// A mapped bit yields exactly one event when it differs between the two
/// words and none otherwise. Unmapped bits never produce events.
pub fn diff(previous: ButtonWord, current: ButtonWord, map: &ButtonMap) -> Vec<TransitionEvent> {
    let changed = previous.changed(current);
    if changed == 0 {
        return Vec::new();
    }

    map.iter()
        .filter(|entry| (changed >> entry.bit) & 1 == 1)
        .map(|entry| TransitionEvent::new(entry.button, current.is_pressed(entry.bit)))
        .collect()
}

/// Summary of one published frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublishReport {
    pub events: usize,
}

/// Holds the last published word and turns new words into sink calls.
///
/// The previous word starts as "nothing pressed" and only changes in
/// [`StateDiffer::publish`], after the sink accepted the whole frame.
#[derive(Clone, Debug)]
pub struct StateDiffer {
    map: ButtonMap,
    previous: ButtonWord,
}

impl StateDiffer {
    pub fn new(map: ButtonMap) -> Self {
        Self {
            map,
            previous: ButtonWord::EMPTY,
        }
    }

    pub fn map(&self) -> &ButtonMap {
        &self.map
    }

    pub fn previous(&self) -> ButtonWord {
        self.previous
    }

    /// Reports every transition towards `current`, then one sync.
    ///
    /// The sync is sent even when nothing changed so consumers can tell a
    /// live idle pad from a dead one. On a sink error the previous word is
    /// kept, and the same transitions are reported again with the next
    /// frame.
    pub fn publish<S: InputSink + ?Sized>(
        &mut self,
        current: ButtonWord,
        sink: &mut S,
    ) -> Result<PublishReport, SinkError> {
        let events = diff(self.previous, current, &self.map);

        for event in &events {
            trace!("Transition {:?} pressed={}", event.button, event.pressed);
            sink.report(event.button, event.pressed)?;
        }
        sink.sync()?;

        if !events.is_empty() {
            debug!(
                "Published {} transitions ({:#06x} -> {:#06x})",
                events.len(),
                self.previous.bits(),
                current.bits()
            );
        }
        self.previous = current;

        Ok(PublishReport {
            events: events.len(),
        })
    }
}
