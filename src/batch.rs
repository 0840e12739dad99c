//! Batch windows and grouping by destination.
//!
//! A [`BatchWindow`] collects encoded lines until either `batch_size` lines
//! have arrived or its deadline passes. Closing a window partitions its lines
//! by [`DestinationKey`] into [`Batch`]es, one per key, in the order each key
//! first appeared. Lines keep their arrival order within a batch, and windows
//! are never merged.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::types::DestinationKey;

/// Lines bound for one destination, ready to send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Batch {
    key: DestinationKey,
    payload: String,
    lines: usize,
}

impl Batch {
    /// Join `lines` into a single request body.
    pub fn new(key: DestinationKey, lines: Vec<String>) -> Self {
        Self {
            key,
            lines: lines.len(),
            payload: lines.join("\n"),
        }
    }

    /// Destination of the batch.
    pub fn key(&self) -> &DestinationKey {
        &self.key
    }

    /// Newline-joined lines.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Number of lines in the payload.
    pub fn len(&self) -> usize {
        self.lines
    }

    /// True when the batch carries no line.
    pub fn is_empty(&self) -> bool {
        self.lines == 0
    }
}

/// Partition `entries` by key.
///
/// One batch per distinct key, ordered by each key's first appearance.
pub fn group_by_key(entries: Vec<(DestinationKey, String)>) -> Vec<Batch> {
    let mut index: HashMap<DestinationKey, usize> = HashMap::new();
    let mut groups: Vec<(DestinationKey, Vec<String>)> = Vec::new();

    for (key, line) in entries {
        match index.get(&key) {
            Some(&i) => groups[i].1.push(line),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push((key, vec![line]));
            }
        }
    }

    groups
        .into_iter()
        .map(|(key, lines)| Batch::new(key, lines))
        .collect()
}

/// Count- and time-bounded accumulation window.
#[derive(Debug)]
pub struct BatchWindow {
    batch_size: usize,
    flush_interval: Duration,
    entries: Vec<(DestinationKey, String)>,
    deadline: Instant,
}

impl BatchWindow {
    /// Open a window whose deadline is `flush_interval` from now.
    pub fn new(batch_size: usize, flush_interval: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            flush_interval,
            entries: Vec::with_capacity(batch_size.min(1_024)),
            deadline: Instant::now() + flush_interval,
        }
    }

    /// Add a line. Returns the closed window's batches when this line fills it.
    pub fn push(&mut self, key: DestinationKey, line: String) -> Option<Vec<Batch>> {
        self.entries.push((key, line));
        (self.entries.len() >= self.batch_size).then(|| self.close())
    }

    /// Close the window and open the next one.
    ///
    /// Returns no batch when the window was empty.
    pub fn close(&mut self) -> Vec<Batch> {
        self.deadline = Instant::now() + self.flush_interval;
        group_by_key(std::mem::take(&mut self.entries))
    }

    /// When the current window closes on time.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Lines in the open window.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the open window holds no line.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
