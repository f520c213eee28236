//! # Sectorwire Topology
//!
//! Resolves a raw physical-drive enumeration into addressable logical
//! partitions.
//!
//! A logical partition is backed by one extent on a basic or
//! dynamic-simple drive, or by an ordered list of extents across possibly
//! different physical drives for a spanned dynamic volume. The resolved
//! [`ExtentMap`] is immutable and exposes a pure mapping from logical byte
//! offsets to physical sector addresses, which the sector stream uses to
//! split I/O across extent boundaries.
//!
//! Partition boundaries for basic drives come from the drive's raw MBR or
//! GPT table bytes; spanned-volume extent lists come from the volume
//! manager's records and are concatenated in the order recorded there,
//! never re-sorted by physical drive number.

#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod mapping;
pub mod resolver;
pub mod table;

pub use mapping::{ExtentMap, PhysicalLocation, SectorRun};
pub use resolver::{resolve, DriveEnumeration, DriveRecord, LogicalPartition, SpannedRecord};
pub use table::{inspect_table, PartitionSummary, TableSummary};

/// Maximum number of extents backing one logical partition
pub const MAX_EXTENTS: usize = 16;

/// Minimum device sector size; every real sector size is a power-of-two
/// multiple of this
pub const MIN_SECTOR_SIZE: u32 = 512;

/// Topology resolution and addressing errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TopologyError {
    /// I/O size or offset is not compatible with the device sector size
    #[error("I/O size {size} is not a multiple of the {sector_size}-byte sector size")]
    InvalidSectorSize {
        /// Requested size or offset in bytes
        size: u64,
        /// Device sector size in bytes
        sector_size: u32,
    },

    /// Declared partition size exceeds what its extents cover
    #[error("partition declares {declared} sectors but extents cover only {covered}")]
    PartitionOverflow {
        /// Sectors the partition claims to hold
        declared: u64,
        /// Sectors actually covered by the extent list
        covered: u64,
    },

    /// An extent reaches past the end of its physical drive
    #[error("extent [{start}, +{length}) exceeds drive {drive} ({total} sectors)")]
    ExtentBounds {
        /// Physical drive number
        drive: u32,
        /// Extent start sector
        start: u64,
        /// Extent length in sectors
        length: u64,
        /// Drive capacity in sectors
        total: u64,
    },

    /// An extent references a drive absent from the enumeration
    #[error("extent references unknown drive {0}")]
    UnknownDrive(u32),

    /// Extent list is empty or longer than [`MAX_EXTENTS`]
    #[error("invalid extent count {0} (1..={MAX_EXTENTS})")]
    InvalidExtentCount(usize),

    /// Logical offset past the end of the partition
    #[error("offset {offset} is beyond the partition end ({size} bytes)")]
    OffsetOutOfRange {
        /// Requested logical byte offset
        offset: u64,
        /// Partition size in bytes
        size: u64,
    },

    /// Raw partition table bytes could not be parsed
    #[error("partition table parse error: {0}")]
    TableParse(String),
}

/// Result type alias using the topology error type
pub type Result<T> = std::result::Result<T, TopologyError>;

/// How a physical drive is organized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriveKind {
    /// Basic disk with a plain partition table
    Basic,
    /// Dynamic disk, simple volume (one extent)
    DynSimple,
    /// Dynamic disk, spanned volume (extents across drives)
    DynSpanned,
}

/// Partition table format on a physical drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableKind {
    /// Master Boot Record (legacy)
    Mbr,
    /// GUID Partition Table (modern)
    Gpt,
}

impl std::fmt::Display for TableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableKind::Mbr => write!(f, "MBR"),
            TableKind::Gpt => write!(f, "GPT"),
        }
    }
}

/// Static sector geometry of one physical drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveGeometry {
    /// Sector size in bytes; power-of-two multiple of [`MIN_SECTOR_SIZE`]
    pub bytes_per_sector: u32,
    /// Drive capacity in sectors
    pub total_sectors: u64,
}

impl DriveGeometry {
    /// Validate the sector-size invariant
    pub fn validate(&self) -> Result<()> {
        let bps = self.bytes_per_sector;
        if bps < MIN_SECTOR_SIZE || !bps.is_power_of_two() {
            return Err(TopologyError::InvalidSectorSize {
                size: u64::from(bps),
                sector_size: MIN_SECTOR_SIZE,
            });
        }
        Ok(())
    }
}

/// A contiguous run of sectors on one physical drive backing part of a
/// logical partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtentDescriptor {
    /// Physical drive number
    pub drive: u32,
    /// Starting sector on that drive
    pub start_sector: u64,
    /// Extent length in sectors
    pub length_sectors: u64,
}
