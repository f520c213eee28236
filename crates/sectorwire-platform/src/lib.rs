//! # Sectorwire Platform
//!
//! Platform-specific raw disk device access.
//!
//! The [`DiskDevice`] trait is the disk collaborator the rest of the
//! system consumes: sector-aligned, sector-sized reads and writes plus
//! static geometry. The Windows implementation opens physical drives
//! directly; [`FileDisk`] backs the same contract with a regular file for
//! image-file targets and tests.
//!
//! ## Safety
//!
//! Raw device I/O can destroy data. Callers are expected to have validated
//! the target drive before opening it here.

#![warn(missing_docs)]
#![warn(clippy::all)]

use thiserror::Error;

mod file;

pub use file::FileDisk;

/// Minimum device sector size in bytes
pub const MIN_SECTOR_SIZE: u32 = 512;

/// Platform-specific errors
#[derive(Error, Debug)]
pub enum PlatformError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Device access denied (need elevated privileges)
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Device is busy or locked
    #[error("Device busy: {0}")]
    DeviceBusy(String),

    /// Device not found
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// I/O length or offset not aligned to the device sector size
    #[error("Alignment error: {0}")]
    AlignmentError(String),

    /// Request reaches past the end of the device
    #[error("Out of range: sector {sector} + {count} exceeds {total} total sectors")]
    OutOfRange {
        /// Requested start sector
        sector: u64,
        /// Requested sector count
        count: u64,
        /// Device capacity in sectors
        total: u64,
    },

    /// Operation not supported on this platform
    #[error("Not supported: {0}")]
    NotSupported(String),
}

/// Result type for platform operations
pub type Result<T> = std::result::Result<T, PlatformError>;

/// Kind of media behind a device handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Fixed disk
    Fixed,
    /// Removable media
    Removable,
    /// Anything the platform could not classify
    Unknown,
}

/// Static geometry of an open device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskInfo {
    /// Media classification
    pub media: MediaKind,
    /// Sector size in bytes; power-of-two multiple of [`MIN_SECTOR_SIZE`]
    pub bytes_per_sector: u32,
    /// Sectors per cylinder, informational only
    pub sectors_per_cylinder: u64,
    /// Device capacity in sectors
    pub total_sectors: u64,
}

impl DiskInfo {
    /// Validate the sector-size invariant
    pub fn validate(&self) -> Result<()> {
        let bps = self.bytes_per_sector;
        if bps < MIN_SECTOR_SIZE || !bps.is_power_of_two() {
            return Err(PlatformError::AlignmentError(format!(
                "sector size {bps} is not a power-of-two multiple of {MIN_SECTOR_SIZE}"
            )));
        }
        Ok(())
    }

    /// Device capacity in bytes
    pub fn total_bytes(&self) -> u64 {
        self.total_sectors * u64::from(self.bytes_per_sector)
    }
}

/// Options for opening a device
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Open for reading
    pub read: bool,
    /// Open for writing
    pub write: bool,
    /// Bypass the OS cache where the platform supports it
    pub direct_io: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            read: true,
            write: false,
            direct_io: true,
        }
    }
}

impl OpenOptions {
    /// Create new options with defaults (read-only, direct I/O)
    pub fn new() -> Self {
        Self::default()
    }

    /// Set read access
    pub fn read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    /// Set write access
    pub fn write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    /// Set direct I/O mode
    pub fn direct_io(mut self, direct: bool) -> Self {
        self.direct_io = direct;
        self
    }
}

/// Sector-addressed raw device collaborator.
///
/// All I/O is whole sectors: buffer lengths must be a multiple of
/// `info().bytes_per_sector`, and implementations reject anything else
/// before touching the device.
pub trait DiskDevice: Send {
    /// Static geometry of the device
    fn info(&self) -> &DiskInfo;

    /// Read whole sectors starting at `start_sector` into `buf`
    fn read_sectors(&mut self, start_sector: u64, buf: &mut [u8]) -> Result<()>;

    /// Write whole sectors from `buf` starting at `start_sector`
    fn write_sectors(&mut self, start_sector: u64, buf: &[u8]) -> Result<()>;

    /// Flush pending writes to the device
    fn sync(&mut self) -> Result<()>;
}

/// Validate a sector I/O request against a device's geometry; returns the
/// sector count on success
pub(crate) fn check_sector_io(info: &DiskInfo, start_sector: u64, len: usize) -> Result<u64> {
    let bps = u64::from(info.bytes_per_sector);
    if len == 0 || len as u64 % bps != 0 {
        return Err(PlatformError::AlignmentError(format!(
            "I/O length {len} is not a multiple of the {bps}-byte sector size"
        )));
    }
    let count = len as u64 / bps;
    match start_sector.checked_add(count) {
        Some(end) if end <= info.total_sectors => Ok(count),
        _ => Err(PlatformError::OutOfRange {
            sector: start_sector,
            count,
            total: info.total_sectors,
        }),
    }
}

/// Align a value up to the given alignment
#[inline]
pub fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return value;
    }
    (value + alignment - 1) & !(alignment - 1)
}

/// Align a value down to the given alignment
#[inline]
pub fn align_down(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return value;
    }
    value & !(alignment - 1)
}

/// Check if a value is aligned to the given alignment
#[inline]
pub fn is_aligned(value: u64, alignment: u64) -> bool {
    if alignment == 0 {
        return true;
    }
    value % alignment == 0
}

// Platform-specific physical-drive access
cfg_if::cfg_if! {
    if #[cfg(target_os = "windows")] {
        mod windows;
        pub use windows::WindowsDisk;

        /// Open a physical drive for sector I/O
        pub fn open_drive(drive: u32, options: OpenOptions) -> Result<Box<dyn DiskDevice>> {
            WindowsDisk::open(drive, options).map(|d| Box::new(d) as Box<dyn DiskDevice>)
        }
    } else {
        /// Open a physical drive (unsupported platform; use [`FileDisk`]
        /// for image files)
        pub fn open_drive(_drive: u32, _options: OpenOptions) -> Result<Box<dyn DiskDevice>> {
            Err(PlatformError::NotSupported(
                "physical drive access requires Windows".to_string(),
            ))
        }
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> DiskInfo {
        DiskInfo {
            media: MediaKind::Fixed,
            bytes_per_sector: 512,
            sectors_per_cylinder: 63,
            total_sectors: 1000,
        }
    }

    // -------------------------------------------------------------------------
    // Alignment tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_align_up_basic() {
        assert_eq!(align_up(0, 512), 0);
        assert_eq!(align_up(1, 512), 512);
        assert_eq!(align_up(511, 512), 512);
        assert_eq!(align_up(512, 512), 512);
        assert_eq!(align_up(513, 512), 1024);
    }

    #[test]
    fn test_align_down_basic() {
        assert_eq!(align_down(0, 512), 0);
        assert_eq!(align_down(511, 512), 0);
        assert_eq!(align_down(512, 512), 512);
        assert_eq!(align_down(1023, 512), 512);
    }

    #[test]
    fn test_is_aligned() {
        assert!(is_aligned(0, 512));
        assert!(is_aligned(1024, 512));
        assert!(!is_aligned(513, 512));
        assert!(is_aligned(100, 0));
    }

    // -------------------------------------------------------------------------
    // Geometry validation tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_disk_info_validation() {
        assert!(info().validate().is_ok());

        let mut bad = info();
        bad.bytes_per_sector = 100;
        assert!(bad.validate().is_err());

        bad.bytes_per_sector = 4096;
        assert!(bad.validate().is_ok());
        assert_eq!(bad.total_bytes(), 1000 * 4096);
    }

    // -------------------------------------------------------------------------
    // Sector I/O validation tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_check_sector_io_accepts_whole_sectors() {
        assert_eq!(check_sector_io(&info(), 0, 512).unwrap(), 1);
        assert_eq!(check_sector_io(&info(), 10, 512 * 8).unwrap(), 8);
        assert_eq!(check_sector_io(&info(), 992, 512 * 8).unwrap(), 8);
    }

    #[test]
    fn test_check_sector_io_rejects_unaligned() {
        assert!(matches!(
            check_sector_io(&info(), 0, 511),
            Err(PlatformError::AlignmentError(_))
        ));
        assert!(matches!(
            check_sector_io(&info(), 0, 513),
            Err(PlatformError::AlignmentError(_))
        ));
        assert!(matches!(
            check_sector_io(&info(), 0, 0),
            Err(PlatformError::AlignmentError(_))
        ));
    }

    #[test]
    fn test_check_sector_io_rejects_past_end() {
        assert!(matches!(
            check_sector_io(&info(), 993, 512 * 8),
            Err(PlatformError::OutOfRange { .. })
        ));
        assert!(matches!(
            check_sector_io(&info(), u64::MAX, 512),
            Err(PlatformError::OutOfRange { .. })
        ));
    }

    // -------------------------------------------------------------------------
    // OpenOptions tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_open_options_builder() {
        let opts = OpenOptions::new().read(true).write(true).direct_io(false);
        assert!(opts.read);
        assert!(opts.write);
        assert!(!opts.direct_io);
    }

    #[test]
    fn test_error_display() {
        let err = PlatformError::PermissionDenied("run as Administrator".to_string());
        assert!(err.to_string().contains("Permission denied"));

        let err = PlatformError::OutOfRange {
            sector: 100,
            count: 10,
            total: 105,
        };
        assert!(err.to_string().contains("100"));
        assert!(err.to_string().contains("105"));
    }
}
