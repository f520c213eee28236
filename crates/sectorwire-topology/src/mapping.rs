//! Logical-to-physical address mapping over an ordered extent list.
//!
//! The map is immutable after construction and safe for concurrent reads.
//! [`ExtentMap::locate`] is a pure function with no side effects; it binary
//! searches the cumulative extent boundaries.

use crate::{ExtentDescriptor, Result, TopologyError, MAX_EXTENTS, MIN_SECTOR_SIZE};

/// Physical address of one logical byte offset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalLocation {
    /// Physical drive number
    pub drive: u32,
    /// Sector on that drive
    pub sector: u64,
    /// Byte offset within the sector
    pub offset_in_sector: u32,
}

/// A contiguous physical run starting at a logical sector, clipped to the
/// extent that contains it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorRun {
    /// Physical drive number
    pub drive: u32,
    /// First physical sector of the run
    pub start_sector: u64,
    /// Contiguous sectors available before the next extent boundary
    pub sectors: u64,
}

/// Immutable mapping from logical partition offsets to physical sectors
#[derive(Debug, Clone)]
pub struct ExtentMap {
    bytes_per_sector: u32,
    extents: Vec<ExtentDescriptor>,
    /// Cumulative logical end sector of each extent; `bounds[i]` is the
    /// first logical sector NOT covered by extent `i`.
    bounds: Vec<u64>,
}

impl ExtentMap {
    /// Build a map over an ordered extent list.
    ///
    /// The order of `extents` is preserved; it is the volume-manager order
    /// for spanned volumes.
    pub fn new(bytes_per_sector: u32, extents: Vec<ExtentDescriptor>) -> Result<Self> {
        if extents.is_empty() || extents.len() > MAX_EXTENTS {
            return Err(TopologyError::InvalidExtentCount(extents.len()));
        }
        if bytes_per_sector < MIN_SECTOR_SIZE || !bytes_per_sector.is_power_of_two() {
            return Err(TopologyError::InvalidSectorSize {
                size: u64::from(bytes_per_sector),
                sector_size: MIN_SECTOR_SIZE,
            });
        }

        let mut bounds = Vec::with_capacity(extents.len());
        let mut total = 0u64;
        for extent in &extents {
            if extent.length_sectors == 0 {
                return Err(TopologyError::InvalidExtentCount(extents.len()));
            }
            total += extent.length_sectors;
            bounds.push(total);
        }

        Ok(Self {
            bytes_per_sector,
            extents,
            bounds,
        })
    }

    /// Sector size in bytes
    pub fn bytes_per_sector(&self) -> u32 {
        self.bytes_per_sector
    }

    /// Partition size in sectors
    pub fn total_sectors(&self) -> u64 {
        *self.bounds.last().unwrap_or(&0)
    }

    /// Partition size in bytes
    pub fn total_bytes(&self) -> u64 {
        self.total_sectors() * u64::from(self.bytes_per_sector)
    }

    /// The backing extents, in volume-manager order
    pub fn extents(&self) -> &[ExtentDescriptor] {
        &self.extents
    }

    /// Reject I/O lengths that are not whole sectors
    pub fn check_io_len(&self, len: u64) -> Result<()> {
        if len == 0 || len % u64::from(self.bytes_per_sector) != 0 {
            return Err(TopologyError::InvalidSectorSize {
                size: len,
                sector_size: self.bytes_per_sector,
            });
        }
        Ok(())
    }

    /// Map a logical byte offset to its physical address.
    ///
    /// Pure: no side effects, total over `[0, total_bytes())`.
    pub fn locate(&self, byte_offset: u64) -> Result<PhysicalLocation> {
        let logical_sector = byte_offset / u64::from(self.bytes_per_sector);
        let offset_in_sector = (byte_offset % u64::from(self.bytes_per_sector)) as u32;

        let (index, local_sector) = self.extent_of(logical_sector)?;
        let extent = &self.extents[index];
        Ok(PhysicalLocation {
            drive: extent.drive,
            sector: extent.start_sector + local_sector,
            offset_in_sector,
        })
    }

    /// Map a logical sector to the contiguous physical run that contains
    /// it, clipped at the extent boundary
    pub fn run_at(&self, logical_sector: u64) -> Result<SectorRun> {
        let (index, local_sector) = self.extent_of(logical_sector)?;
        let extent = &self.extents[index];
        Ok(SectorRun {
            drive: extent.drive,
            start_sector: extent.start_sector + local_sector,
            sectors: extent.length_sectors - local_sector,
        })
    }

    /// Binary search for the extent containing a logical sector; returns
    /// the extent index and the sector offset local to that extent.
    fn extent_of(&self, logical_sector: u64) -> Result<(usize, u64)> {
        if logical_sector >= self.total_sectors() {
            return Err(TopologyError::OffsetOutOfRange {
                offset: logical_sector * u64::from(self.bytes_per_sector),
                size: self.total_bytes(),
            });
        }

        let index = self.bounds.partition_point(|end| *end <= logical_sector);
        let extent_start = if index == 0 { 0 } else { self.bounds[index - 1] };
        Ok((index, logical_sector - extent_start))
    }
}
