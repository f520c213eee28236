//! Raw partition-table parsing.
//!
//! Only partition boundaries and identities are extracted here; filesystem
//! contents are out of scope. GPT tables occupy LBA 0-33, so callers should
//! hand over at least the first 34 sectors of the drive.

use crate::{Result, TableKind, TopologyError};
use bootsector::{list_partitions, Attributes, Options};
use serde::{Deserialize, Serialize};

/// One partition's boundaries and identity as read from the table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionSummary {
    /// Partition number (1-indexed for display)
    pub number: u32,
    /// Start offset on the drive, in bytes
    pub first_byte: u64,
    /// Partition length in bytes
    pub len: u64,
    /// Human-readable partition type
    pub type_name: String,
    /// Raw type identifier (MBR type code or GPT type GUID)
    pub type_id: String,
    /// Partition label, GPT only
    pub name: Option<String>,
    /// Bootable / active flag
    pub bootable: bool,
}

/// Parsed view of one drive's partition table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSummary {
    /// Detected table format
    pub table: TableKind,
    /// Partitions in table order
    pub partitions: Vec<PartitionSummary>,
}

/// Parse raw partition-table bytes into partition boundaries.
///
/// The table kind is detected from the bytes themselves; a drive whose
/// protective MBR fronts a GPT reports as GPT.
pub fn inspect_table(bytes: &[u8]) -> Result<TableSummary> {
    if bytes.len() < 512 {
        return Err(TopologyError::TableParse(format!(
            "need at least one sector of table bytes, got {}",
            bytes.len()
        )));
    }

    let partitions = list_partitions(bytes, &Options::default())
        .map_err(|e| TopologyError::TableParse(e.to_string()))?;

    let mut table = TableKind::Mbr;
    let mut summaries = Vec::with_capacity(partitions.len());

    for (idx, partition) in partitions.iter().enumerate() {
        let summary = match &partition.attributes {
            Attributes::GPT {
                type_uuid,
                name,
                attributes,
                ..
            } => {
                table = TableKind::Gpt;
                // Legacy BIOS bootable flag is bit 2 of the attribute word
                let attr_flags = u64::from_le_bytes(*attributes);
                PartitionSummary {
                    number: (idx + 1) as u32,
                    first_byte: partition.first_byte,
                    len: partition.len,
                    type_name: gpt_type_name(type_uuid),
                    type_id: format_guid(type_uuid),
                    name: if name.is_empty() {
                        None
                    } else {
                        Some(name.clone())
                    },
                    bootable: (attr_flags & 0x04) != 0,
                }
            }
            Attributes::MBR {
                type_code,
                bootable,
            } => PartitionSummary {
                number: (idx + 1) as u32,
                first_byte: partition.first_byte,
                len: partition.len,
                type_name: mbr_type_name(*type_code),
                type_id: format!("0x{type_code:02X}"),
                name: None,
                bootable: *bootable,
            },
        };
        summaries.push(summary);
    }

    tracing::debug!(
        "parsed {} table with {} partitions",
        table,
        summaries.len()
    );

    Ok(TableSummary {
        table,
        partitions: summaries,
    })
}

/// Format a GPT GUID in its canonical mixed-endian text form
fn format_guid(guid: &[u8; 16]) -> String {
    format!(
        "{:02X}{:02X}{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
        guid[3], guid[2], guid[1], guid[0],
        guid[5], guid[4],
        guid[7], guid[6],
        guid[8], guid[9],
        guid[10], guid[11], guid[12], guid[13], guid[14], guid[15]
    )
}

/// Human-readable name for a GPT partition type GUID
fn gpt_type_name(guid: &[u8; 16]) -> String {
    match format_guid(guid).as_str() {
        "C12A7328-F81F-11D2-BA4B-00A0C93EC93B" => "EFI System".to_string(),
        "EBD0A0A2-B9E5-4433-87C0-68B6B72699C7" => "Microsoft Basic Data".to_string(),
        "E3C9E316-0B5C-4DB8-817D-F92DF00215AE" => "Microsoft Reserved".to_string(),
        "5808C8AA-7E8F-42E0-85D2-E1E90434CFB3" => "LDM Metadata".to_string(),
        "AF9B60A0-1431-4F62-BC68-3311714A69AD" => "LDM Data".to_string(),
        "0FC63DAF-8483-4772-8E79-3D69D8477DE4" => "Linux filesystem".to_string(),
        "0657FD6D-A4AB-43C4-84E5-0933C84B4F4F" => "Linux swap".to_string(),
        "21686148-6449-6E6F-744E-656564454649" => "BIOS boot".to_string(),
        _ => "Unknown".to_string(),
    }
}

/// Human-readable name for an MBR partition type code
fn mbr_type_name(type_code: u8) -> String {
    match type_code {
        0x00 => "Empty".to_string(),
        0x01 => "FAT12".to_string(),
        0x04 | 0x06 => "FAT16".to_string(),
        0x05 | 0x0F => "Extended".to_string(),
        0x07 => "NTFS/HPFS".to_string(),
        0x0B | 0x0C => "FAT32".to_string(),
        0x0E => "FAT16 (LBA)".to_string(),
        0x42 => "Dynamic disk".to_string(),
        0x82 => "Linux swap".to_string(),
        0x83 => "Linux".to_string(),
        0xEE => "GPT protective".to_string(),
        0xEF => "EFI System".to_string(),
        _ => format!("Type 0x{type_code:02X}"),
    }
}
