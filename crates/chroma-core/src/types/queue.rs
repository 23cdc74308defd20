//! Queue management types.
//!
//! The queue keeps items in their natural (insertion) order and plays them
//! through an *active order*: the identity permutation when shuffle is off,
//! a pseudo-random permutation when it is on. All navigation happens on the
//! active order, so toggling shuffle never changes which item is current.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::{Millis, Track};

/// A single item in the playback queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    /// Unique identifier for this queue entry (the same track may appear twice).
    pub id: Uuid,
    /// The track to play.
    pub track: Arc<Track>,
}

impl QueueItem {
    pub fn new(track: Arc<Track>) -> Self {
        Self {
            id: Uuid::new_v4(),
            track,
        }
    }
}

impl From<Arc<Track>> for QueueItem {
    fn from(track: Arc<Track>) -> Self {
        Self::new(track)
    }
}

/// Result of a navigation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The item at this natural index is now current.
    Moved(usize),
    /// The current item (at this natural index) should restart from the top.
    Restart(usize),
    /// Nothing in that direction. Not an error.
    End,
}

impl Step {
    /// Natural index the step lands on, if any.
    pub const fn index(self) -> Option<usize> {
        match self {
            Self::Moved(i) | Self::Restart(i) => Some(i),
            Self::End => None,
        }
    }
}

/// Outcome of removing an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removed {
    /// The entry that was removed.
    pub item: QueueItem,
    /// Whether the removed entry was the current one.
    pub was_current: bool,
}

/// The playback queue.
#[derive(Debug, Clone, Default)]
pub struct Queue {
    /// All items in natural order.
    items: Vec<QueueItem>,
    /// Active play order (indices into `items`).
    order: Vec<usize>,
    /// Position of the current item within `order`.
    cursor: Option<usize>,
    /// Repeat mode.
    repeat_mode: RepeatMode,
    /// Shuffle enabled.
    shuffle: bool,
    /// State of the shuffle generator.
    rng_state: u64,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all items in natural order.
    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    /// Get the item at a natural index.
    pub fn get(&self, index: usize) -> Option<&QueueItem> {
        self.items.get(index)
    }

    /// The active play order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Get the current item.
    pub fn current(&self) -> Option<&QueueItem> {
        self.current_index().and_then(|i| self.items.get(i))
    }

    /// Get the current natural index.
    pub fn current_index(&self) -> Option<usize> {
        self.cursor.map(|c| self.order[c])
    }

    /// Get the number of items in the queue.
    pub const fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the queue is empty.
    pub const fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Set the queue contents, replacing everything.
    pub fn set(&mut self, items: Vec<QueueItem>, start_index: usize) {
        self.items = items;
        let start = if self.items.is_empty() {
            None
        } else {
            Some(start_index.min(self.items.len() - 1))
        };
        self.rebuild_order(start);
    }

    /// Add a track to the end of the queue.
    pub fn push(&mut self, item: QueueItem) {
        let index = self.items.len();
        self.insert(index, item);
    }

    /// Insert an item at a natural index (clamped to the queue length).
    pub fn insert(&mut self, index: usize, item: QueueItem) {
        let index = index.min(self.items.len());
        self.items.insert(index, item);

        for entry in &mut self.order {
            if *entry >= index {
                *entry += 1;
            }
        }

        let position = if self.shuffle {
            // Somewhere after the current item so it still gets played.
            let first = self.cursor.map_or(0, |c| c + 1);
            let span = self.order.len() - first + 1;
            #[allow(clippy::cast_possible_truncation)]
            let offset = (self.next_random() % span as u64) as usize;
            first + offset
        } else {
            index
        };
        self.order.insert(position, index);

        match self.cursor {
            Some(c) if position <= c => self.cursor = Some(c + 1),
            Some(_) => {}
            None => self.cursor = Some(position),
        }
    }

    /// Remove an entry by its id.
    pub fn remove(&mut self, id: Uuid) -> Option<Removed> {
        let index = self.items.iter().position(|item| item.id == id)?;
        self.remove_at(index)
    }

    /// Remove the entry at a natural index.
    ///
    /// Removing the current entry makes the entry that followed it in the
    /// active order current, or the one before it when it was last.
    pub fn remove_at(&mut self, index: usize) -> Option<Removed> {
        if index >= self.items.len() {
            return None;
        }

        let position = self.position_of(index)?;
        let item = self.items.remove(index);
        self.order.remove(position);
        for entry in &mut self.order {
            if *entry > index {
                *entry -= 1;
            }
        }

        let was_current = self.cursor == Some(position);
        self.cursor = match self.cursor {
            _ if self.order.is_empty() => None,
            Some(c) if position < c => Some(c - 1),
            Some(c) if position == c => Some(c.min(self.order.len() - 1)),
            other => other,
        };

        Some(Removed { item, was_current })
    }

    /// Move an entry to another natural index, keeping the current item current.
    pub fn move_item(&mut self, from: usize, to: usize) -> bool {
        let len = self.items.len();
        if from >= len || to >= len {
            return false;
        }
        if from == to {
            return true;
        }

        let current = self.current_index().map(|i| remap_moved(i, from, to));
        let item = self.items.remove(from);
        self.items.insert(to, item);

        if self.shuffle {
            for entry in &mut self.order {
                *entry = remap_moved(*entry, from, to);
            }
        } else {
            self.order = (0..len).collect();
            self.cursor = current;
        }
        true
    }

    /// Clear the entire queue.
    pub fn clear(&mut self) {
        self.items.clear();
        self.order.clear();
        self.cursor = None;
    }

    /// Move to the next entry according to the repeat mode.
    ///
    /// Repeat-one stays on the current entry; repeat-all wraps at the end of
    /// the active order; repeat-off returns [`Step::End`] at the end.
    pub fn advance(&mut self) -> Step {
        self.step_forward(self.repeat_mode)
    }

    /// Like [`advance`](Self::advance), but repeat-one does not pin the
    /// current entry. Used to skip past a track that cannot be played.
    pub fn skip(&mut self) -> Step {
        let mode = match self.repeat_mode {
            RepeatMode::One => RepeatMode::Off,
            mode => mode,
        };
        self.step_forward(mode)
    }

    /// Move to the previous entry.
    ///
    /// When `position` is past `restart_threshold` the current entry restarts
    /// instead. At the start of the order with repeat off, the current entry
    /// restarts as well.
    pub fn previous(&mut self, position: Millis, restart_threshold: Millis) -> Step {
        let (Some(c), Some(current)) = (self.cursor, self.current_index()) else {
            return Step::End;
        };

        if position > restart_threshold {
            return Step::Restart(current);
        }

        match self.repeat_mode {
            RepeatMode::One => Step::Restart(current),
            RepeatMode::All => {
                let prev = if c == 0 { self.order.len() - 1 } else { c - 1 };
                self.cursor = Some(prev);
                Step::Moved(self.order[prev])
            }
            RepeatMode::Off => {
                if c > 0 {
                    self.cursor = Some(c - 1);
                    Step::Moved(self.order[c - 1])
                } else {
                    Step::Restart(current)
                }
            }
        }
    }

    /// Whether [`advance`](Self::advance) would land on an entry.
    pub fn has_next(&self) -> bool {
        self.peek_forward(self.repeat_mode).is_some()
    }

    /// Whether there is an earlier entry to go back to.
    pub fn has_previous(&self) -> bool {
        match (self.cursor, self.repeat_mode) {
            (None, _) => false,
            (Some(_), RepeatMode::All) => self.order.len() > 1,
            (Some(c), _) => c > 0,
        }
    }

    /// Jump to a specific natural index.
    pub fn jump_to(&mut self, index: usize) -> Option<&QueueItem> {
        let position = self.position_of(index)?;
        self.cursor = Some(position);
        self.items.get(index)
    }

    /// Get repeat mode.
    pub const fn repeat_mode(&self) -> RepeatMode {
        self.repeat_mode
    }

    /// Set repeat mode.
    pub fn set_repeat_mode(&mut self, mode: RepeatMode) {
        self.repeat_mode = mode;
    }

    /// Cycle through repeat modes.
    pub fn cycle_repeat(&mut self) -> RepeatMode {
        self.repeat_mode = match self.repeat_mode {
            RepeatMode::Off => RepeatMode::All,
            RepeatMode::All => RepeatMode::One,
            RepeatMode::One => RepeatMode::Off,
        };
        self.repeat_mode
    }

    /// Check if shuffle is enabled.
    pub const fn is_shuffle(&self) -> bool {
        self.shuffle
    }

    /// Set shuffle mode. Turning shuffle on always draws a fresh order.
    pub fn set_shuffle(&mut self, shuffle: bool) {
        self.shuffle = shuffle;
        let current = self.current_index();
        self.rebuild_order(current);
    }

    /// Toggle shuffle mode.
    pub fn toggle_shuffle(&mut self) -> bool {
        self.set_shuffle(!self.shuffle);
        self.shuffle
    }

    fn step_forward(&mut self, mode: RepeatMode) -> Step {
        match self.peek_forward(mode) {
            Some(position) => {
                self.cursor = Some(position);
                Step::Moved(self.order[position])
            }
            None => Step::End,
        }
    }

    fn peek_forward(&self, mode: RepeatMode) -> Option<usize> {
        let c = self.cursor?;
        match mode {
            RepeatMode::One => Some(c),
            RepeatMode::All => Some((c + 1) % self.order.len()),
            RepeatMode::Off => (c + 1 < self.order.len()).then_some(c + 1),
        }
    }

    fn position_of(&self, index: usize) -> Option<usize> {
        self.order.iter().position(|&i| i == index)
    }

    /// Rebuild the active order, keeping `current` as the current item.
    fn rebuild_order(&mut self, current: Option<usize>) {
        self.order = (0..self.items.len()).collect();

        if self.shuffle && self.order.len() > 1 {
            self.reseed();
            for i in (1..self.order.len()).rev() {
                #[allow(clippy::cast_possible_truncation)]
                let j = (self.next_random() % (i as u64 + 1)) as usize;
                self.order.swap(i, j);
            }

            // The current item leads the new order so the rest still plays.
            if let Some(current) = current {
                if let Some(position) = self.position_of(current) {
                    self.order.remove(position);
                    self.order.insert(0, current);
                }
            }
            debug!("Shuffled {} queue items", self.order.len());
        }

        self.cursor = current.and_then(|i| self.position_of(i));
    }

    fn reseed(&mut self) {
        let mut hasher = DefaultHasher::new();
        self.rng_state.hash(&mut hasher);
        for item in &self.items {
            item.id.hash(&mut hasher);
        }
        self.rng_state = hasher.finish();
    }

    fn next_random(&mut self) -> u64 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.rng_state >> 33
    }
}

/// Where natural index `index` ends up after moving `from` to `to`.
const fn remap_moved(index: usize, from: usize, to: usize) -> usize {
    if index == from {
        to
    } else if from < to && index > from && index <= to {
        index - 1
    } else if to < from && index >= to && index < from {
        index + 1
    } else {
        index
    }
}

/// Repeat mode for playback.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    /// No repeat.
    #[default]
    Off,
    /// Repeat the entire queue.
    All,
    /// Repeat the current track.
    One,
}
