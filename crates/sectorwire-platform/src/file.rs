//! File-backed disk device.
//!
//! Backs the [`DiskDevice`] contract with a regular file: the target for
//! image-file reads and writes, and the device used throughout the test
//! suites. Geometry is supplied by the caller, with capacity defaulting to
//! the file length.

use crate::{check_sector_io, DiskDevice, DiskInfo, MediaKind, PlatformError, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Disk device over a regular file
pub struct FileDisk {
    file: File,
    info: DiskInfo,
}

impl FileDisk {
    /// Open an existing image file; capacity is the file length rounded
    /// down to whole sectors
    pub fn open<P: AsRef<Path>>(path: P, bytes_per_sector: u32) -> Result<Self> {
        let file = File::options().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        let info = DiskInfo {
            media: MediaKind::Unknown,
            bytes_per_sector,
            sectors_per_cylinder: 0,
            total_sectors: len / u64::from(bytes_per_sector),
        };
        Self::with_geometry(file, info)
    }

    /// Wrap an open file with explicit geometry.
    ///
    /// Used for destination files that start empty: writes extend the file
    /// up to `info.total_sectors`.
    pub fn with_geometry(file: File, info: DiskInfo) -> Result<Self> {
        info.validate()?;
        Ok(Self { file, info })
    }

    fn seek_to(&mut self, start_sector: u64) -> Result<()> {
        let offset = start_sector * u64::from(self.info.bytes_per_sector);
        self.file.seek(SeekFrom::Start(offset))?;
        Ok(())
    }
}

impl DiskDevice for FileDisk {
    fn info(&self) -> &DiskInfo {
        &self.info
    }

    fn read_sectors(&mut self, start_sector: u64, buf: &mut [u8]) -> Result<()> {
        check_sector_io(&self.info, start_sector, buf.len())?;
        self.seek_to(start_sector)?;
        self.file.read_exact(buf).map_err(PlatformError::Io)
    }

    fn write_sectors(&mut self, start_sector: u64, buf: &[u8]) -> Result<()> {
        check_sector_io(&self.info, start_sector, buf.len())?;
        self.seek_to(start_sector)?;
        self.file.write_all(buf).map_err(PlatformError::Io)
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_data().map_err(PlatformError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn temp_disk(sectors: u64) -> FileDisk {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&vec![0u8; (sectors * 512) as usize]).unwrap();
        let info = DiskInfo {
            media: MediaKind::Unknown,
            bytes_per_sector: 512,
            sectors_per_cylinder: 0,
            total_sectors: sectors,
        };
        FileDisk::with_geometry(file, info).unwrap()
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let mut disk = temp_disk(64);

        let pattern: Vec<u8> = (0..512 * 4).map(|i| (i % 251) as u8).collect();
        disk.write_sectors(10, &pattern).unwrap();

        let mut back = vec![0u8; 512 * 4];
        disk.read_sectors(10, &mut back).unwrap();
        assert_eq!(pattern, back);

        // Neighboring sectors untouched
        let mut neighbor = vec![0u8; 512];
        disk.read_sectors(9, &mut neighbor).unwrap();
        assert!(neighbor.iter().all(|b| *b == 0));
        disk.read_sectors(14, &mut neighbor).unwrap();
        assert!(neighbor.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_unaligned_io_rejected_without_side_effects() {
        let mut disk = temp_disk(8);

        let mut buf = vec![0u8; 700];
        assert!(matches!(
            disk.read_sectors(0, &mut buf),
            Err(PlatformError::AlignmentError(_))
        ));
        assert!(matches!(
            disk.write_sectors(0, &buf),
            Err(PlatformError::AlignmentError(_))
        ));

        // The rejected write left the device untouched
        let mut sector = vec![0u8; 512];
        disk.read_sectors(0, &mut sector).unwrap();
        assert!(sector.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut disk = temp_disk(8);
        let mut buf = vec![0u8; 512 * 2];
        assert!(matches!(
            disk.read_sectors(7, &mut buf),
            Err(PlatformError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_open_rounds_capacity_down() {
        let mut named = tempfile::NamedTempFile::new().unwrap();
        named.write_all(&[0u8; 512 * 3 + 100]).unwrap();
        named.flush().unwrap();

        let disk = FileDisk::open(named.path(), 512).unwrap();
        assert_eq!(disk.info().total_sectors, 3);
    }

    #[test]
    fn test_sync() {
        let mut disk = temp_disk(4);
        disk.write_sectors(0, &[1u8; 512]).unwrap();
        disk.sync().unwrap();
    }
}
