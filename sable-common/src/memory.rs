//! Boot Memory Regions
//!
//! The boot collaborator hands the kernel a sorted list of free physical
//! regions. The kernel carves its root-server objects out of that list and
//! converts whatever remains into untyped capabilities, each covering a
//! naturally aligned power-of-two block.

use core::fmt;

use crate::addr::PhysAddr;

/// Maximum number of disjoint regions tracked by a [`RegionList`].
pub const MAX_FREE_REGIONS: usize = 64;

/// Half-open physical range `[base, end)`.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Region {
    /// First byte of the region.
    pub base: PhysAddr,
    /// One past the last byte of the region.
    pub end: PhysAddr,
}

impl Region {
    /// Create a region from its bounds.
    #[inline]
    #[must_use]
    pub const fn new(base: PhysAddr, end: PhysAddr) -> Self {
        Self { base, end }
    }

    /// Create a region from a base and a size in bytes.
    #[inline]
    #[must_use]
    pub const fn with_size(base: PhysAddr, size: u64) -> Self {
        Self {
            base,
            end: base.offset(size),
        }
    }

    /// Size in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.end.0.saturating_sub(self.base.0)
    }

    /// Whether the region covers no bytes.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end.0 <= self.base.0
    }

    /// Whether `addr` falls inside the region.
    #[inline]
    #[must_use]
    pub const fn contains(&self, addr: PhysAddr) -> bool {
        addr.0 >= self.base.0 && addr.0 < self.end.0
    }

    /// Whether the two regions share at least one byte, or touch.
    #[inline]
    #[must_use]
    pub const fn touches(&self, other: &Region) -> bool {
        self.base.0 <= other.end.0 && other.base.0 <= self.end.0
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}..{:#x})", self.base.0, self.end.0)
    }
}

/// Returned when a [`RegionList`] has no room for another disjoint region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionListFull;

impl fmt::Display for RegionListFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("free region list is full")
    }
}

/// Sorted, non-overlapping list of free physical regions.
///
/// Adjacent and overlapping inserts are merged, so the list always holds
/// maximal disjoint ranges ordered by base address.
#[derive(Clone)]
pub struct RegionList {
    regions: [Region; MAX_FREE_REGIONS],
    count: usize,
}

impl RegionList {
    /// Create an empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            regions: [Region::new(PhysAddr(0), PhysAddr(0)); MAX_FREE_REGIONS],
            count: 0,
        }
    }

    /// Build a list from an arbitrary slice of regions.
    pub fn from_regions(regions: &[Region]) -> Result<Self, RegionListFull> {
        let mut list = Self::new();
        for region in regions {
            list.insert(*region)?;
        }
        Ok(list)
    }

    /// Number of disjoint regions.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    /// Whether the list holds no memory.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Iterate regions in ascending address order.
    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions[..self.count].iter()
    }

    /// Total bytes across all regions.
    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.iter().map(Region::size).sum()
    }

    /// Insert a region, merging it with any neighbours it touches.
    pub fn insert(&mut self, region: Region) -> Result<(), RegionListFull> {
        if region.is_empty() {
            return Ok(());
        }

        let mut merged = region;
        let mut i = 0;
        while i < self.count {
            if self.regions[i].touches(&merged) {
                merged.base = PhysAddr(merged.base.0.min(self.regions[i].base.0));
                merged.end = PhysAddr(merged.end.0.max(self.regions[i].end.0));
                self.remove_at(i);
            } else {
                i += 1;
            }
        }

        if self.count == MAX_FREE_REGIONS {
            return Err(RegionListFull);
        }

        let pos = self
            .iter()
            .position(|r| r.base.0 > merged.base.0)
            .unwrap_or(self.count);
        self.regions.copy_within(pos..self.count, pos + 1);
        self.regions[pos] = merged;
        self.count += 1;
        Ok(())
    }

    /// Remove and return the first naturally aligned `2^size_bits` block
    /// that fits entirely inside one region.
    ///
    /// The remainder on either side of the block stays in the list.
    pub fn take_aligned(&mut self, size_bits: u32) -> Option<PhysAddr> {
        let size = 1u64.checked_shl(size_bits)?;
        let index = self.iter().position(|r| {
            let start = r.base.align_up(size_bits);
            start.0 >= r.base.0 && start.0.checked_add(size).is_some_and(|e| e <= r.end.0)
        })?;

        let region = self.regions[index];
        let start = region.base.align_up(size_bits);
        let tail = Region::new(start.offset(size), region.end);
        let head = Region::new(region.base, start);

        self.remove_at(index);
        // Splitting one region into at most two never needs more than the
        // slot just freed plus one.
        if self.insert(head).is_err() || self.insert(tail).is_err() {
            return None;
        }
        Some(start)
    }

    fn remove_at(&mut self, index: usize) {
        self.regions.copy_within(index + 1..self.count, index);
        self.count -= 1;
    }
}

impl Default for RegionList {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RegionList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Iterator over the naturally aligned power-of-two blocks that tile a
/// region, largest first at each position.
///
/// Blocks smaller than `min_bits` are skipped; blocks are capped at
/// `max_bits`.
#[derive(Clone, Debug)]
pub struct AlignedBlocks {
    cursor: u64,
    end: u64,
    min_bits: u32,
    max_bits: u32,
}

impl AlignedBlocks {
    /// Tile `region` with blocks of `2^min_bits..=2^max_bits` bytes.
    #[must_use]
    pub const fn new(region: Region, min_bits: u32, max_bits: u32) -> Self {
        Self {
            cursor: region.base.0,
            end: region.end.0,
            min_bits,
            max_bits,
        }
    }
}

impl Iterator for AlignedBlocks {
    /// `(base, size_bits)` of the next block.
    type Item = (PhysAddr, u32);

    fn next(&mut self) -> Option<Self::Item> {
        while self.cursor < self.end {
            let remaining = self.end - self.cursor;
            let align_bits = self.cursor.trailing_zeros();
            let fit_bits = 63 - remaining.leading_zeros();
            let bits = align_bits.min(fit_bits).min(self.max_bits);
            let base = self.cursor;
            self.cursor += 1u64 << bits;
            if bits >= self.min_bits {
                return Some((PhysAddr(base), bits));
            }
        }
        None
    }
}
