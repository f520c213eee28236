//! Drive-enumeration resolution.
//!
//! Input is the raw enumeration a drive scan produces: per-drive geometry
//! and table bytes, plus the volume manager's records for dynamic volumes.
//! Output is an ordered list of logical partitions, each carrying an
//! immutable [`ExtentMap`].

use crate::table::{inspect_table, TableSummary};
use crate::{
    DriveGeometry, DriveKind, ExtentDescriptor, ExtentMap, Result, TableKind, TopologyError,
};

/// One physical drive as seen by the enumeration
#[derive(Debug, Clone)]
pub struct DriveRecord {
    /// Physical drive number
    pub drive: u32,
    /// Basic or dynamic organization
    pub kind: DriveKind,
    /// Partition table format
    pub table: TableKind,
    /// Sector geometry
    pub geometry: DriveGeometry,
    /// Raw partition-table bytes (at least the first sector; the first 34
    /// sectors for GPT)
    pub table_bytes: Vec<u8>,
}

/// Volume-manager record for one spanned dynamic volume.
///
/// Extents appear in the order the volume manager concatenates them, which
/// is unrelated to physical drive numbering.
#[derive(Debug, Clone)]
pub struct SpannedRecord {
    /// Declared volume size in sectors; zero when unknown
    pub declared_sectors: u64,
    /// Backing extents in volume-manager order
    pub extents: Vec<ExtentDescriptor>,
}

/// Complete raw enumeration handed to [`resolve`]
#[derive(Debug, Clone, Default)]
pub struct DriveEnumeration {
    /// Physical drives, in drive-number order
    pub drives: Vec<DriveRecord>,
    /// Spanned dynamic volumes reported by the volume manager
    pub spanned: Vec<SpannedRecord>,
}

/// One resolved, addressable logical partition
#[derive(Debug, Clone)]
pub struct LogicalPartition {
    /// Stable index in resolution order
    pub index: u32,
    /// Organization of the backing drive(s)
    pub kind: DriveKind,
    /// Table format of the anchor drive
    pub table: TableKind,
    /// Human-readable partition type from the table, when known
    pub type_name: Option<String>,
    /// Immutable logical-to-physical mapping
    pub map: ExtentMap,
}

/// Resolve a raw enumeration into logical partitions.
///
/// Basic and dynamic-simple drives contribute one single-extent partition
/// per table entry; spanned records contribute one multi-extent partition
/// each. Partition order is: all table partitions in drive order, then
/// spanned volumes in record order.
pub fn resolve(enumeration: &DriveEnumeration) -> Result<Vec<LogicalPartition>> {
    let mut partitions = Vec::new();
    let mut index = 0u32;

    for record in &enumeration.drives {
        record.geometry.validate()?;
        if record.kind == DriveKind::DynSpanned {
            // Spanned members carry no addressable table partitions of
            // their own; their sectors surface through spanned records.
            continue;
        }

        let summary = inspect_table(&record.table_bytes)?;
        for partition in table_partitions(record, &summary)? {
            partitions.push(LogicalPartition {
                index,
                kind: record.kind,
                table: summary.table,
                type_name: Some(partition.0),
                map: partition.1,
            });
            index += 1;
        }
    }

    for record in &enumeration.spanned {
        let map = spanned_map(enumeration, record)?;
        let anchor = map.extents()[0].drive;
        let table = enumeration
            .drives
            .iter()
            .find(|d| d.drive == anchor)
            .map_or(TableKind::Mbr, |d| d.table);
        partitions.push(LogicalPartition {
            index,
            kind: DriveKind::DynSpanned,
            table,
            type_name: None,
            map,
        });
        index += 1;
    }

    tracing::debug!(
        "resolved {} logical partitions from {} drives and {} spanned records",
        partitions.len(),
        enumeration.drives.len(),
        enumeration.spanned.len()
    );

    Ok(partitions)
}

/// Convert one drive's table entries into single-extent maps
fn table_partitions(
    record: &DriveRecord,
    summary: &TableSummary,
) -> Result<Vec<(String, ExtentMap)>> {
    let bps = u64::from(record.geometry.bytes_per_sector);
    let mut out = Vec::with_capacity(summary.partitions.len());

    for partition in &summary.partitions {
        if partition.first_byte % bps != 0 {
            return Err(TopologyError::InvalidSectorSize {
                size: partition.first_byte,
                sector_size: record.geometry.bytes_per_sector,
            });
        }
        if partition.len % bps != 0 {
            return Err(TopologyError::InvalidSectorSize {
                size: partition.len,
                sector_size: record.geometry.bytes_per_sector,
            });
        }

        let extent = ExtentDescriptor {
            drive: record.drive,
            start_sector: partition.first_byte / bps,
            length_sectors: partition.len / bps,
        };
        check_extent_bounds(&extent, &record.geometry)?;

        out.push((
            partition.type_name.clone(),
            ExtentMap::new(record.geometry.bytes_per_sector, vec![extent])?,
        ));
    }

    Ok(out)
}

/// Build the multi-extent map for one spanned record, preserving
/// volume-manager order
fn spanned_map(enumeration: &DriveEnumeration, record: &SpannedRecord) -> Result<ExtentMap> {
    if record.extents.is_empty() || record.extents.len() > crate::MAX_EXTENTS {
        return Err(TopologyError::InvalidExtentCount(record.extents.len()));
    }

    let mut bytes_per_sector = None;
    for extent in &record.extents {
        let drive = enumeration
            .drives
            .iter()
            .find(|d| d.drive == extent.drive)
            .ok_or(TopologyError::UnknownDrive(extent.drive))?;
        check_extent_bounds(extent, &drive.geometry)?;

        // All members of one volume must share a sector size.
        match bytes_per_sector {
            None => bytes_per_sector = Some(drive.geometry.bytes_per_sector),
            Some(bps) if bps == drive.geometry.bytes_per_sector => {}
            Some(bps) => {
                return Err(TopologyError::InvalidSectorSize {
                    size: u64::from(drive.geometry.bytes_per_sector),
                    sector_size: bps,
                });
            }
        }
    }
    let bytes_per_sector = bytes_per_sector.ok_or(TopologyError::InvalidExtentCount(0))?;

    let covered: u64 = record.extents.iter().map(|e| e.length_sectors).sum();
    let extents = match record.declared_sectors {
        0 => record.extents.clone(),
        declared if declared > covered => {
            return Err(TopologyError::PartitionOverflow { declared, covered });
        }
        declared if declared == covered => record.extents.clone(),
        declared => trim_extents(&record.extents, declared),
    };

    ExtentMap::new(bytes_per_sector, extents)
}

/// Clip an extent list to a declared sector count, dropping the tail.
/// The volume manager rounds volume sizes down to allocation units, so a
/// declared size slightly under the covered total is normal.
fn trim_extents(extents: &[ExtentDescriptor], declared: u64) -> Vec<ExtentDescriptor> {
    let mut remaining = declared;
    let mut out = Vec::new();
    for extent in extents {
        if remaining == 0 {
            break;
        }
        let take = extent.length_sectors.min(remaining);
        out.push(ExtentDescriptor {
            drive: extent.drive,
            start_sector: extent.start_sector,
            length_sectors: take,
        });
        remaining -= take;
    }
    out
}

fn check_extent_bounds(extent: &ExtentDescriptor, geometry: &DriveGeometry) -> Result<()> {
    let end = extent.start_sector.checked_add(extent.length_sectors);
    match end {
        Some(end) if end <= geometry.total_sectors => Ok(()),
        _ => Err(TopologyError::ExtentBounds {
            drive: extent.drive,
            start: extent.start_sector,
            length: extent.length_sectors,
            total: geometry.total_sectors,
        }),
    }
}
