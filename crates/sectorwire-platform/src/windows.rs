//! Windows physical-drive implementation.
//!
//! Opens `\\.\PhysicalDriveN` with CreateFile and queries geometry through
//! DeviceIoControl. All transfers go through the handle with explicit
//! positioning; direct I/O maps to FILE_FLAG_NO_BUFFERING, which is why
//! the sector-alignment contract is enforced before every call.

#![allow(unsafe_code)]

use crate::{
    check_sector_io, DiskDevice, DiskInfo, MediaKind, OpenOptions, PlatformError, Result,
};
use std::ptr;
use windows_sys::Win32::Foundation::{
    CloseHandle, GENERIC_READ, GENERIC_WRITE, HANDLE, INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, FlushFileBuffers, ReadFile, SetFilePointerEx, WriteFile, FILE_BEGIN,
    FILE_FLAG_NO_BUFFERING, FILE_FLAG_WRITE_THROUGH, FILE_SHARE_READ, FILE_SHARE_WRITE,
    OPEN_EXISTING,
};
use windows_sys::Win32::System::Ioctl::{
    DISK_GEOMETRY_EX, GET_LENGTH_INFORMATION, IOCTL_DISK_GET_DRIVE_GEOMETRY_EX,
    IOCTL_DISK_GET_LENGTH_INFO, FixedMedia, RemovableMedia,
};
use windows_sys::Win32::System::IO::DeviceIoControl;

/// Physical drive opened for sector I/O
pub struct WindowsDisk {
    handle: HANDLE,
    info: DiskInfo,
}

// The handle is used only behind &mut self.
unsafe impl Send for WindowsDisk {}

impl WindowsDisk {
    /// Open `\\.\PhysicalDriveN` for raw sector I/O
    pub fn open(drive: u32, options: OpenOptions) -> Result<Self> {
        let device_path = format!("\\\\.\\PhysicalDrive{drive}");
        let wide_path: Vec<u16> = device_path
            .encode_utf16()
            .chain(std::iter::once(0))
            .collect();

        let mut access = 0u32;
        if options.read {
            access |= GENERIC_READ;
        }
        if options.write {
            access |= GENERIC_WRITE;
        }

        let mut flags = 0u32;
        if options.direct_io {
            flags |= FILE_FLAG_NO_BUFFERING | FILE_FLAG_WRITE_THROUGH;
        }

        let handle = unsafe {
            CreateFileW(
                wide_path.as_ptr(),
                access,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                ptr::null(),
                OPEN_EXISTING,
                flags,
                0,
            )
        };

        if handle == INVALID_HANDLE_VALUE {
            let error = std::io::Error::last_os_error();
            return Err(match error.raw_os_error() {
                Some(5) => PlatformError::PermissionDenied(format!(
                    "cannot open {device_path}; run as Administrator"
                )),
                Some(32) => PlatformError::DeviceBusy(device_path),
                Some(2) | Some(3) => PlatformError::DeviceNotFound(device_path),
                _ => PlatformError::Io(error),
            });
        }

        let info = match query_geometry(handle) {
            Ok(info) => info,
            Err(e) => {
                unsafe { CloseHandle(handle) };
                return Err(e);
            }
        };
        info.validate()?;

        tracing::debug!(
            "opened {} ({} sectors of {} bytes)",
            device_path,
            info.total_sectors,
            info.bytes_per_sector
        );

        Ok(Self { handle, info })
    }

    fn seek_to(&mut self, start_sector: u64) -> Result<()> {
        let offset = (start_sector * u64::from(self.info.bytes_per_sector)) as i64;
        let mut new_pos: i64 = 0;
        let result = unsafe { SetFilePointerEx(self.handle, offset, &mut new_pos, FILE_BEGIN) };
        if result == 0 {
            return Err(PlatformError::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }
}

impl Drop for WindowsDisk {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.handle);
        }
    }
}

impl DiskDevice for WindowsDisk {
    fn info(&self) -> &DiskInfo {
        &self.info
    }

    fn read_sectors(&mut self, start_sector: u64, buf: &mut [u8]) -> Result<()> {
        check_sector_io(&self.info, start_sector, buf.len())?;
        self.seek_to(start_sector)?;

        let mut bytes_read: u32 = 0;
        let result = unsafe {
            ReadFile(
                self.handle,
                buf.as_mut_ptr(),
                buf.len() as u32,
                &mut bytes_read,
                ptr::null_mut(),
            )
        };

        if result == 0 {
            Err(PlatformError::Io(std::io::Error::last_os_error()))
        } else if bytes_read as usize != buf.len() {
            Err(PlatformError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("short read: {bytes_read} of {}", buf.len()),
            )))
        } else {
            Ok(())
        }
    }

    fn write_sectors(&mut self, start_sector: u64, buf: &[u8]) -> Result<()> {
        check_sector_io(&self.info, start_sector, buf.len())?;
        self.seek_to(start_sector)?;

        let mut bytes_written: u32 = 0;
        let result = unsafe {
            WriteFile(
                self.handle,
                buf.as_ptr(),
                buf.len() as u32,
                &mut bytes_written,
                ptr::null_mut(),
            )
        };

        if result == 0 {
            Err(PlatformError::Io(std::io::Error::last_os_error()))
        } else if bytes_written as usize != buf.len() {
            Err(PlatformError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                format!("short write: {bytes_written} of {}", buf.len()),
            )))
        } else {
            Ok(())
        }
    }

    fn sync(&mut self) -> Result<()> {
        let result = unsafe { FlushFileBuffers(self.handle) };
        if result == 0 {
            Err(PlatformError::Io(std::io::Error::last_os_error()))
        } else {
            Ok(())
        }
    }
}

/// Query drive geometry and exact capacity
fn query_geometry(handle: HANDLE) -> Result<DiskInfo> {
    let mut geometry: DISK_GEOMETRY_EX = unsafe { std::mem::zeroed() };
    let mut bytes_returned: u32 = 0;

    let result = unsafe {
        DeviceIoControl(
            handle,
            IOCTL_DISK_GET_DRIVE_GEOMETRY_EX,
            ptr::null(),
            0,
            &mut geometry as *mut _ as *mut _,
            std::mem::size_of::<DISK_GEOMETRY_EX>() as u32,
            &mut bytes_returned,
            ptr::null_mut(),
        )
    };
    if result == 0 {
        return Err(PlatformError::Io(std::io::Error::last_os_error()));
    }

    let media = match geometry.Geometry.MediaType {
        t if t == FixedMedia => MediaKind::Fixed,
        t if t == RemovableMedia => MediaKind::Removable,
        _ => MediaKind::Unknown,
    };
    let bytes_per_sector = geometry.Geometry.BytesPerSector;
    let sectors_per_cylinder =
        u64::from(geometry.Geometry.TracksPerCylinder) * u64::from(geometry.Geometry.SectorsPerTrack);

    // DiskSize from the geometry query is authoritative, but prefer the
    // exact length ioctl when it answers; some USB bridges round the
    // former to cylinder boundaries.
    let mut size = geometry.DiskSize as u64;
    let mut length_info: GET_LENGTH_INFORMATION = unsafe { std::mem::zeroed() };
    let result = unsafe {
        DeviceIoControl(
            handle,
            IOCTL_DISK_GET_LENGTH_INFO,
            ptr::null(),
            0,
            &mut length_info as *mut _ as *mut _,
            std::mem::size_of::<GET_LENGTH_INFORMATION>() as u32,
            &mut bytes_returned,
            ptr::null_mut(),
        )
    };
    if result != 0 && length_info.Length > 0 {
        size = length_info.Length as u64;
    }

    Ok(DiskInfo {
        media,
        bytes_per_sector,
        sectors_per_cylinder,
        total_sectors: size / u64::from(bytes_per_sector.max(1)),
    })
}
