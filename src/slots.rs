//! Slot allocation for tape variables.
//!
//! Every registered variable owns a slot in the derivative vector. The
//! allocator hands slots out from a bump cursor and, under the range-reuse
//! policy, reclaims interior slots through an ordered list of free ranges so
//! long-running recordings with variable churn keep the derivative vector
//! compact.

use std::fmt;

/// Sentinel for "not a slot".
pub const INVALID_SLOT: u32 = u32::MAX;

/// How freed slots are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SlotPolicy {
    /// Only the highest slot is reclaimed, by retracting the cursor.
    Watermark,
    /// Interior slots are pooled in free ranges and reissued.
    #[default]
    RangeReuse,
}

/// Outcome of trying to grow a free range by one adjacent slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expand {
    /// Slot was not adjacent to the range.
    Failed,
    /// Range grew downward at its start.
    Start,
    /// Range grew upward at its end.
    End,
}

/// A half-open range `[first, second)` of free slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReusableRange {
    first: u32,
    second: u32,
}

impl ReusableRange {
    pub fn new(first: u32, second: u32) -> Self {
        debug_assert!(first <= second);
        ReusableRange { first, second }
    }

    #[inline]
    pub fn first(&self) -> u32 {
        self.first
    }

    #[inline]
    pub fn second(&self) -> u32 {
        self.second
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.second - self.first
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.first == self.second
    }

    /// Take the lowest free slot out of the range.
    #[inline]
    pub fn take(&mut self) -> u32 {
        debug_assert!(!self.is_closed());
        let slot = self.first;
        self.first += 1;
        slot
    }

    /// Try to absorb `slot` at either edge of the range.
    pub fn expand(&mut self, slot: u32) -> Expand {
        if slot + 1 == self.first {
            self.first = slot;
            Expand::Start
        } else if slot == self.second {
            self.second += 1;
            Expand::End
        } else {
            Expand::Failed
        }
    }

    fn clamp_end(&mut self, end: u32) {
        self.second = end;
    }
}

impl fmt::Display for ReusableRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.first, self.second)
    }
}

/// Counter snapshot taken when a nested recording begins.
///
/// Restoring a frame discards every slot and free range created after the
/// snapshot, resuming the outer recording exactly where it left off.
#[derive(Debug, Clone, Copy)]
pub struct SlotFrame {
    num_live: u32,
    cursor: u32,
    watermark: u32,
    range_floor: usize,
    range_len: usize,
}

/// Issues and reclaims slot ids.
///
/// Invariant: the live slots are exactly `[0, cursor)` minus the free ranges.
#[derive(Debug)]
pub struct SlotAllocator {
    policy: SlotPolicy,
    ranges: Vec<ReusableRange>,
    /// Ranges below this index belong to enclosing recordings and are
    /// off-limits for reuse.
    range_floor: usize,
    num_live: u32,
    cursor: u32,
    watermark: u32,
}

impl SlotAllocator {
    pub fn new(policy: SlotPolicy) -> Self {
        SlotAllocator {
            policy,
            ranges: Vec::new(),
            range_floor: 0,
            num_live: 0,
            cursor: 0,
            watermark: 0,
        }
    }

    pub fn policy(&self) -> SlotPolicy {
        self.policy
    }

    /// Number of currently live slots.
    pub fn num_live(&self) -> u32 {
        self.num_live
    }

    /// Next slot the bump cursor would hand out.
    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    /// Highest slot count ever reached; bounds the derivative vector.
    pub fn watermark(&self) -> u32 {
        self.watermark
    }

    pub(crate) fn set_watermark(&mut self, watermark: u32) {
        self.watermark = watermark;
    }

    /// Total slots currently pooled in free ranges.
    pub fn num_free_slots(&self) -> u32 {
        self.ranges.iter().map(ReusableRange::size).sum()
    }

    pub fn num_free_ranges(&self) -> usize {
        self.ranges.len()
    }

    /// Claim a slot, reusing a freed one when the policy allows it.
    pub fn register(&mut self) -> u32 {
        self.num_live += 1;
        if self.policy == SlotPolicy::RangeReuse && self.ranges.len() > self.range_floor {
            let range = &mut self.ranges[self.range_floor];
            let slot = range.take();
            if range.is_closed() {
                self.ranges.remove(self.range_floor);
            }
            return slot;
        }
        let slot = self.cursor;
        self.cursor += 1;
        if self.cursor > self.watermark {
            self.watermark = self.cursor;
        }
        slot
    }

    /// Return a slot to the allocator.
    pub fn unregister(&mut self, slot: u32) {
        debug_assert!(slot < self.cursor);
        self.num_live -= 1;
        if slot + 1 == self.cursor {
            // Shrink from the top, then fold in a free range that now abuts
            // the cursor.
            self.cursor -= 1;
            if self.policy == SlotPolicy::RangeReuse && self.ranges.len() > self.range_floor {
                if let Some(last) = self.ranges.last() {
                    if last.second == self.cursor {
                        self.cursor = last.first;
                        self.ranges.pop();
                    }
                }
            }
            return;
        }
        if self.policy != SlotPolicy::RangeReuse {
            return;
        }
        // Ranges are kept ordered; find the first one ending at or past the
        // freed slot.
        let floor = self.range_floor;
        let i = floor + self.ranges[floor..].partition_point(|r| r.second < slot);
        if i == self.ranges.len() {
            self.ranges.push(ReusableRange::new(slot, slot + 1));
            return;
        }
        match self.ranges[i].expand(slot) {
            Expand::Start => {
                if i > floor && self.ranges[i - 1].second == self.ranges[i].first {
                    self.ranges[i - 1].second = self.ranges[i].second;
                    self.ranges.remove(i);
                }
            }
            Expand::End => {
                if i + 1 < self.ranges.len() && self.ranges[i].second == self.ranges[i + 1].first {
                    self.ranges[i].second = self.ranges[i + 1].second;
                    self.ranges.remove(i + 1);
                }
            }
            Expand::Failed => {
                self.ranges.insert(i, ReusableRange::new(slot, slot + 1));
            }
        }
    }

    /// Snapshot the counters and fence off existing ranges for a nested
    /// recording.
    pub fn push_frame(&mut self) -> SlotFrame {
        let frame = SlotFrame {
            num_live: self.num_live,
            cursor: self.cursor,
            watermark: self.watermark,
            range_floor: self.range_floor,
            range_len: self.ranges.len(),
        };
        self.range_floor = self.ranges.len();
        frame
    }

    /// Restore a snapshot, discarding everything allocated since.
    pub fn pop_frame(&mut self, frame: SlotFrame) {
        self.num_live = frame.num_live;
        self.cursor = frame.cursor;
        self.watermark = frame.watermark;
        self.ranges.truncate(frame.range_len);
        self.range_floor = frame.range_floor;
    }

    /// Drop or clip free ranges extending past `end`, after a tape rollback
    /// lowered the watermark.
    pub(crate) fn clamp_ranges_to(&mut self, end: u32) {
        while let Some(last) = self.ranges.last_mut() {
            if last.second <= end {
                break;
            }
            if last.first >= end {
                self.ranges.pop();
            } else {
                last.clamp_end(end);
                break;
            }
        }
        if self.cursor > end {
            self.cursor = end;
        }
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
        self.range_floor = 0;
        self.num_live = 0;
        self.cursor = 0;
        self.watermark = 0;
    }

    /// Human-readable free-range list for diagnostics.
    pub fn ranges_string(&self) -> String {
        let mut s = String::new();
        for r in &self.ranges {
            s.push_str(&format!("{r} "));
        }
        s
    }
}
