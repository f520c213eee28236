//! Sector stream over one resolved logical partition.
//!
//! Reads and writes fixed-size sector-aligned buffers, splitting requests
//! that straddle extent boundaries across the backing devices. Alignment
//! is checked before any device is touched, so a rejected request performs
//! no partial I/O. Transient device errors are retried a bounded number of
//! times before surfacing; socket-side errors never pass through here.

use crate::error::{Error, Result};
use crate::TransferConfig;
use sectorwire_platform::{DiskDevice, PlatformError};
use sectorwire_topology::{ExtentMap, TopologyError};
use std::collections::HashMap;
use std::time::Duration;

/// Sequential and random sector access over a logical partition
pub struct SectorStream {
    map: ExtentMap,
    devices: HashMap<u32, Box<dyn DiskDevice>>,
    position_sectors: u64,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl std::fmt::Debug for SectorStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectorStream")
            .field("map", &self.map)
            .field("devices", &self.devices.len())
            .field("position_sectors", &self.position_sectors)
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

impl SectorStream {
    /// Build a stream over `map`, backed by one open device per physical
    /// drive the map references.
    ///
    /// Validates up front that every referenced drive has a device, that
    /// sector sizes agree, and that each extent fits its device.
    pub fn new(map: ExtentMap, devices: Vec<(u32, Box<dyn DiskDevice>)>) -> Result<Self> {
        let defaults = TransferConfig::default();
        Self::with_retry(map, devices, defaults.retry_attempts, defaults.retry_delay)
    }

    /// Build a stream with an explicit retry policy for transient device
    /// errors
    pub fn with_retry(
        map: ExtentMap,
        devices: Vec<(u32, Box<dyn DiskDevice>)>,
        retry_attempts: u32,
        retry_delay: Duration,
    ) -> Result<Self> {
        let devices: HashMap<u32, Box<dyn DiskDevice>> = devices.into_iter().collect();

        for extent in map.extents() {
            let device = devices
                .get(&extent.drive)
                .ok_or(TopologyError::UnknownDrive(extent.drive))?;
            let info = device.info();
            if info.bytes_per_sector != map.bytes_per_sector() {
                return Err(TopologyError::InvalidSectorSize {
                    size: u64::from(info.bytes_per_sector),
                    sector_size: map.bytes_per_sector(),
                }
                .into());
            }
            let end = extent.start_sector.checked_add(extent.length_sectors);
            if end.map_or(true, |end| end > info.total_sectors) {
                return Err(TopologyError::ExtentBounds {
                    drive: extent.drive,
                    start: extent.start_sector,
                    length: extent.length_sectors,
                    total: info.total_sectors,
                }
                .into());
            }
        }

        Ok(Self {
            map,
            devices,
            position_sectors: 0,
            retry_attempts,
            retry_delay,
        })
    }

    /// The partition mapping this stream covers
    pub fn map(&self) -> &ExtentMap {
        &self.map
    }

    /// Current sequential position in sectors
    pub fn position_sectors(&self) -> u64 {
        self.position_sectors
    }

    /// Remaining bytes from the sequential position to the partition end
    pub fn remaining_bytes(&self) -> u64 {
        (self.map.total_sectors() - self.position_sectors) * u64::from(self.map.bytes_per_sector())
    }

    /// Move the sequential position
    pub fn seek_sectors(&mut self, sector: u64) -> Result<()> {
        if sector > self.map.total_sectors() {
            return Err(TopologyError::OffsetOutOfRange {
                offset: sector * u64::from(self.map.bytes_per_sector()),
                size: self.map.total_bytes(),
            }
            .into());
        }
        self.position_sectors = sector;
        Ok(())
    }

    /// Read whole sectors starting at `logical_sector`, splitting across
    /// extents as needed
    pub fn read_at(&mut self, logical_sector: u64, buf: &mut [u8]) -> Result<()> {
        self.map.check_io_len(buf.len() as u64)?;
        let bps = u64::from(self.map.bytes_per_sector());
        let total = buf.len() as u64 / bps;

        let mut done = 0u64;
        while done < total {
            let run = self.map.run_at(logical_sector + done)?;
            let take = run.sectors.min(total - done);
            let start = (done * bps) as usize;
            let end = start + (take * bps) as usize;

            let device = self
                .devices
                .get_mut(&run.drive)
                .ok_or(TopologyError::UnknownDrive(run.drive))?;
            retry_io(self.retry_attempts, self.retry_delay, || {
                device.read_sectors(run.start_sector, &mut buf[start..end])
            })?;
            done += take;
        }
        Ok(())
    }

    /// Write whole sectors starting at `logical_sector`
    pub fn write_at(&mut self, logical_sector: u64, buf: &[u8]) -> Result<()> {
        self.map.check_io_len(buf.len() as u64)?;
        let bps = u64::from(self.map.bytes_per_sector());
        let total = buf.len() as u64 / bps;

        let mut done = 0u64;
        while done < total {
            let run = self.map.run_at(logical_sector + done)?;
            let take = run.sectors.min(total - done);
            let start = (done * bps) as usize;
            let end = start + (take * bps) as usize;

            let device = self
                .devices
                .get_mut(&run.drive)
                .ok_or(TopologyError::UnknownDrive(run.drive))?;
            retry_io(self.retry_attempts, self.retry_delay, || {
                device.write_sectors(run.start_sector, &buf[start..end])
            })?;
            done += take;
        }
        Ok(())
    }

    /// Sequential read of up to `buf.len()` bytes; returns the bytes read,
    /// zero at end of stream. The final block may be shorter than `buf`
    /// but is always a whole number of sectors.
    pub fn read_next(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.map.check_io_len(buf.len() as u64)?;
        let remaining = self.remaining_bytes();
        if remaining == 0 {
            return Ok(0);
        }

        let take = (buf.len() as u64).min(remaining) as usize;
        let position = self.position_sectors;
        self.read_at(position, &mut buf[..take])?;
        self.position_sectors += take as u64 / u64::from(self.map.bytes_per_sector());
        Ok(take)
    }

    /// Sequential write of `buf`; rejects writes past the partition end
    pub fn write_next(&mut self, buf: &[u8]) -> Result<()> {
        self.map.check_io_len(buf.len() as u64)?;
        if (buf.len() as u64) > self.remaining_bytes() {
            return Err(TopologyError::OffsetOutOfRange {
                offset: self.position_sectors * u64::from(self.map.bytes_per_sector())
                    + buf.len() as u64,
                size: self.map.total_bytes(),
            }
            .into());
        }
        let position = self.position_sectors;
        self.write_at(position, buf)?;
        self.position_sectors += buf.len() as u64 / u64::from(self.map.bytes_per_sector());
        Ok(())
    }

    /// Flush every backing device
    pub fn sync(&mut self) -> Result<()> {
        for device in self.devices.values_mut() {
            device.sync()?;
        }
        Ok(())
    }
}

/// Retry a device operation a bounded number of times on transient I/O
/// errors; contract violations surface immediately
fn retry_io<F>(attempts: u32, delay: Duration, mut op: F) -> Result<()>
where
    F: FnMut() -> sectorwire_platform::Result<()>,
{
    let mut tries = 0;
    loop {
        match op() {
            Ok(()) => return Ok(()),
            Err(PlatformError::Io(e)) if tries < attempts => {
                tries += 1;
                tracing::warn!("transient device error (attempt {tries}/{attempts}): {e}");
                std::thread::sleep(delay);
            }
            Err(e) => return Err(Error::Device(e)),
        }
    }
}
