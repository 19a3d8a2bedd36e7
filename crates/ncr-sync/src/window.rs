//! Windowing accumulator: groups a record stream into fixed-size batches.

use ncr_state::Record;

/// A group of records dispatched together.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// 1-based batch number within the run
    pub index: u64,
    pub records: Vec<Record>,
    /// `true` when the batch reached the window size, `false` for the final
    /// partial flush
    pub full: bool,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Collects records until `size` is reached.
#[derive(Debug)]
pub struct Window {
    size: usize,
    buffer: Vec<Record>,
    seq: u64,
    emitted: u64,
}

impl Window {
    /// `size` below 1 is treated as 1.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            buffer: Vec::with_capacity(size),
            seq: 0,
            emitted: 0,
        }
    }

    /// Append a record; returns the batch when the window fills.
    pub fn offer(&mut self, record: Record) -> Option<Batch> {
        self.seq += 1;
        self.buffer.push(record);
        if self.buffer.len() >= self.size {
            Some(self.emit(true))
        } else {
            None
        }
    }

    /// Drain the partial window; `None` when nothing is pending.
    pub fn flush(&mut self) -> Option<Batch> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.emit(false))
        }
    }

    fn emit(&mut self, full: bool) -> Batch {
        self.emitted += 1;
        let records = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.size));
        Batch {
            index: self.emitted,
            records,
            full,
        }
    }

    /// Records offered so far.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Number the next batch will carry.
    pub fn batch_index(&self) -> u64 {
        self.emitted + 1
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn size(&self) -> usize {
        self.size
    }
}
