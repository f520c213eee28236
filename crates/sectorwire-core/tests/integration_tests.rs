//! End-to-end transfer tests over the loopback engine.
//!
//! These drive the full stack: topology resolution, sector streams over
//! file-backed disks, the digest session, and the completion-driven socket
//! engine, in both directions.

use sectorwire_core::{Error, SectorStream, TransferConfig, TransferPipeline};
use sectorwire_digest::{digest, registry, DigestKind};
use sectorwire_net::{
    AsyncSocketEngine, LoopbackDriver, OverlappedBuffer, SocketId,
};
use sectorwire_platform::{DiskDevice, DiskInfo, FileDisk, MediaKind};
use sectorwire_topology::{
    resolve, DriveEnumeration, DriveGeometry, DriveKind, DriveRecord, ExtentDescriptor, ExtentMap,
    SpannedRecord, TableKind,
};
use std::io::Write as _;

const SECTOR: usize = 512;

fn file_disk(sectors: u64) -> FileDisk {
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(&vec![0u8; sectors as usize * SECTOR]).unwrap();
    let info = DiskInfo {
        media: MediaKind::Unknown,
        bytes_per_sector: SECTOR as u32,
        sectors_per_cylinder: 0,
        total_sectors: sectors,
    };
    FileDisk::with_geometry(file, info).unwrap()
}

fn patterned_disk(sectors: u64, seed: u8) -> FileDisk {
    let mut file = tempfile::tempfile().unwrap();
    let data: Vec<u8> = (0..sectors as usize * SECTOR)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect();
    file.write_all(&data).unwrap();
    let info = DiskInfo {
        media: MediaKind::Unknown,
        bytes_per_sector: SECTOR as u32,
        sectors_per_cylinder: 0,
        total_sectors: sectors,
    };
    FileDisk::with_geometry(file, info).unwrap()
}

fn single_extent_stream(disk: FileDisk, sectors: u64) -> SectorStream {
    let map = ExtentMap::new(
        SECTOR as u32,
        vec![ExtentDescriptor {
            drive: 0,
            start_sector: 0,
            length_sectors: sectors,
        }],
    )
    .unwrap();
    SectorStream::new(map, vec![(0, Box::new(disk) as Box<dyn DiskDevice>)]).unwrap()
}

fn pipeline_over(driver: &LoopbackDriver, config: TransferConfig) -> TransferPipeline {
    TransferPipeline::new(AsyncSocketEngine::new(Box::new(driver.clone())), config)
}

fn small_config() -> TransferConfig {
    // Block size at the minimum so small partitions still span several
    // blocks.
    TransferConfig::new().block_size(4096).max_in_flight(4)
}

#[test]
fn transfer_round_trip_preserves_data_and_digest() {
    let driver = LoopbackDriver::new();
    let (a, b) = driver.socket_pair();
    let mut pipeline = pipeline_over(&driver, small_config());

    let sectors = 64u64;
    let mut source = single_extent_stream(patterned_disk(sectors, 7), sectors);
    let mut dest = single_extent_stream(file_disk(sectors), sectors);

    let sent = pipeline.send(&mut source, DigestKind::Sha256, a).unwrap();
    assert_eq!(sent.bytes, sectors * SECTOR as u64);
    assert_eq!(sent.digest.len(), 32);

    let received = pipeline.receive(&mut dest, DigestKind::Sha256, b).unwrap();
    assert_eq!(received.bytes, sent.bytes);
    assert_eq!(received.digest, sent.digest);

    // Destination bytes equal the source bytes.
    let mut expected = vec![0u8; sectors as usize * SECTOR];
    source.read_at(0, &mut expected).unwrap();
    let mut actual = vec![0u8; sectors as usize * SECTOR];
    dest.read_at(0, &mut actual).unwrap();
    assert_eq!(expected, actual);

    // And the reported digest is the real digest of the payload.
    let descriptor = registry::lookup_by_kind(DigestKind::Sha256).unwrap();
    assert_eq!(sent.digest, digest(descriptor, &expected).unwrap());
}

#[test]
fn transfer_into_spanned_destination() {
    let driver = LoopbackDriver::new();
    let (a, b) = driver.socket_pair();
    let mut pipeline = pipeline_over(&driver, small_config());

    let sectors = 350u64;
    let mut source = single_extent_stream(patterned_disk(sectors, 3), sectors);

    // Destination spans {100, 50, 200} sectors across three drives in
    // volume-manager order.
    let map = ExtentMap::new(
        SECTOR as u32,
        vec![
            ExtentDescriptor {
                drive: 2,
                start_sector: 8,
                length_sectors: 100,
            },
            ExtentDescriptor {
                drive: 0,
                start_sector: 0,
                length_sectors: 50,
            },
            ExtentDescriptor {
                drive: 1,
                start_sector: 16,
                length_sectors: 200,
            },
        ],
    )
    .unwrap();
    let mut dest = SectorStream::new(
        map,
        vec![
            (0, Box::new(file_disk(64)) as Box<dyn DiskDevice>),
            (1, Box::new(file_disk(256)) as Box<dyn DiskDevice>),
            (2, Box::new(file_disk(128)) as Box<dyn DiskDevice>),
        ],
    )
    .unwrap();

    pipeline.send(&mut source, DigestKind::Sha512, a).unwrap();
    let report = pipeline.receive(&mut dest, DigestKind::Sha512, b).unwrap();
    assert_eq!(report.bytes, sectors * SECTOR as u64);

    let mut expected = vec![0u8; sectors as usize * SECTOR];
    source.read_at(0, &mut expected).unwrap();
    let mut actual = vec![0u8; sectors as usize * SECTOR];
    dest.read_at(0, &mut actual).unwrap();
    assert_eq!(expected, actual);
}

/// Capture a pipeline send as raw wire bytes by receiving it manually
fn capture_wire_bytes(
    driver: &LoopbackDriver,
    pipeline: &mut TransferPipeline,
    source: &mut SectorStream,
    kind: DigestKind,
    total_len: usize,
) -> Vec<u8> {
    let (a, b) = driver.socket_pair();
    pipeline.send(source, kind, a).unwrap();

    let engine = pipeline.engine_mut();
    let mut wire = Vec::with_capacity(total_len);
    while wire.len() < total_len {
        engine
            .submit_receive(b, OverlappedBuffer::with_capacity(total_len))
            .unwrap();
        for completion in engine.poll_completions(None).unwrap() {
            if completion.socket == b && completion.bytes > 0 {
                let buffer = completion.buffer.unwrap();
                wire.extend_from_slice(&buffer.contiguous(completion.bytes));
            }
        }
    }
    wire
}

/// Replay raw wire bytes into a socket in fixed-size chunks
fn replay_wire_bytes(pipeline: &mut TransferPipeline, socket: SocketId, wire: &[u8]) {
    let engine = pipeline.engine_mut();
    for chunk in wire.chunks(4096) {
        engine
            .submit_send(socket, OverlappedBuffer::from_vec(chunk.to_vec()))
            .unwrap();
    }
    // Reap the send completions so the receive loop only sees its own.
    let mut outstanding = wire.chunks(4096).count();
    while outstanding > 0 {
        outstanding -= engine
            .poll_completions(None)
            .unwrap()
            .iter()
            .filter(|c| c.socket == socket)
            .count();
    }
}

#[test]
fn corrupted_block_yields_integrity_mismatch_never_success() {
    let driver = LoopbackDriver::new();
    let mut pipeline = pipeline_over(&driver, small_config());

    // 10 blocks of 4096 bytes = 80 sectors.
    let sectors = 80u64;
    let payload_len = sectors as usize * SECTOR;
    let trailer_len = 1 + 32;
    let mut source = single_extent_stream(patterned_disk(sectors, 9), sectors);

    let mut wire = capture_wire_bytes(
        &driver,
        &mut pipeline,
        &mut source,
        DigestKind::Sha256,
        payload_len + trailer_len,
    );
    assert_eq!(wire.len(), payload_len + trailer_len);

    // Corrupt one byte in the middle of block 5.
    let offset = 5 * 4096 + 123;
    wire[offset] ^= 0x01;

    let (c, d) = driver.socket_pair();
    replay_wire_bytes(&mut pipeline, c, &wire);

    let mut dest = single_extent_stream(file_disk(sectors), sectors);
    let err = pipeline
        .receive(&mut dest, DigestKind::Sha256, d)
        .unwrap_err();
    assert!(
        matches!(err, Error::IntegrityMismatch { .. }),
        "expected integrity mismatch, got {err:?}"
    );
}

#[test]
fn corrupted_trailer_yields_integrity_mismatch() {
    let driver = LoopbackDriver::new();
    let mut pipeline = pipeline_over(&driver, small_config());

    let sectors = 16u64;
    let payload_len = sectors as usize * SECTOR;
    let mut source = single_extent_stream(patterned_disk(sectors, 1), sectors);

    let mut wire = capture_wire_bytes(
        &driver,
        &mut pipeline,
        &mut source,
        DigestKind::Sha256,
        payload_len + 33,
    );
    // Flip the last digest byte.
    let last = wire.len() - 1;
    wire[last] ^= 0xFF;

    let (c, d) = driver.socket_pair();
    replay_wire_bytes(&mut pipeline, c, &wire);

    let mut dest = single_extent_stream(file_disk(sectors), sectors);
    let err = pipeline
        .receive(&mut dest, DigestKind::Sha256, d)
        .unwrap_err();
    assert!(matches!(err, Error::IntegrityMismatch { .. }));
}

#[test]
fn premature_close_reports_peer_closed() {
    let driver = LoopbackDriver::new();
    let mut pipeline = pipeline_over(&driver, small_config());

    let sectors = 16u64;
    let mut source = single_extent_stream(patterned_disk(sectors, 5), sectors);
    let wire = capture_wire_bytes(
        &driver,
        &mut pipeline,
        &mut source,
        DigestKind::Sha256,
        sectors as usize * SECTOR + 33,
    );

    // Deliver only the first half, then close.
    let (c, d) = driver.socket_pair();
    replay_wire_bytes(&mut pipeline, c, &wire[..wire.len() / 2]);
    driver.close(c).unwrap();

    let mut dest = single_extent_stream(file_disk(sectors), sectors);
    let err = pipeline
        .receive(&mut dest, DigestKind::Sha256, d)
        .unwrap_err();
    assert!(matches!(err, Error::PeerClosed { .. }), "got {err:?}");
}

#[test]
fn block_size_must_match_sector_size() {
    let driver = LoopbackDriver::new();
    let (a, _b) = driver.socket_pair();

    // 4096-byte sectors with a 5120-byte block: not a whole number of
    // sectors per block.
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(&vec![0u8; 4096 * 8]).unwrap();
    let info = DiskInfo {
        media: MediaKind::Unknown,
        bytes_per_sector: 4096,
        sectors_per_cylinder: 0,
        total_sectors: 8,
    };
    let disk = FileDisk::with_geometry(file, info).unwrap();
    let map = ExtentMap::new(
        4096,
        vec![ExtentDescriptor {
            drive: 0,
            start_sector: 0,
            length_sectors: 8,
        }],
    )
    .unwrap();
    let mut stream =
        SectorStream::new(map, vec![(0, Box::new(disk) as Box<dyn DiskDevice>)]).unwrap();

    let config = TransferConfig::new().block_size(5120);
    let mut pipeline = pipeline_over(&driver, config);
    let err = pipeline
        .send(&mut stream, DigestKind::Sha256, a)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Topology(sectorwire_topology::TopologyError::InvalidSectorSize { .. })
    ));
}

#[test]
fn resolved_mbr_partition_transfers_end_to_end() {
    // A basic drive image with one NTFS partition at sector 4, 32 sectors
    // long, resolved from its real MBR bytes and then transferred.
    let total_sectors = 64u64;
    let part_start = 4u32;
    let part_len = 32u32;

    let mut image = vec![0u8; total_sectors as usize * SECTOR];
    // Partition entry 0
    image[446] = 0x80;
    image[446 + 4] = 0x07;
    image[446 + 8..446 + 12].copy_from_slice(&part_start.to_le_bytes());
    image[446 + 12..446 + 16].copy_from_slice(&part_len.to_le_bytes());
    image[510] = 0x55;
    image[511] = 0xAA;
    // Recognizable partition contents
    for (i, byte) in image
        [part_start as usize * SECTOR..(part_start + part_len) as usize * SECTOR]
        .iter_mut()
        .enumerate()
    {
        *byte = (i % 251) as u8;
    }

    let enumeration = DriveEnumeration {
        drives: vec![DriveRecord {
            drive: 0,
            kind: DriveKind::Basic,
            table: TableKind::Mbr,
            geometry: DriveGeometry {
                bytes_per_sector: SECTOR as u32,
                total_sectors,
            },
            table_bytes: image[..SECTOR].to_vec(),
        }],
        spanned: vec![],
    };
    let partitions = resolve(&enumeration).unwrap();
    assert_eq!(partitions.len(), 1);
    assert_eq!(partitions[0].type_name.as_deref(), Some("NTFS/HPFS"));

    let mut source_file = tempfile::tempfile().unwrap();
    source_file.write_all(&image).unwrap();
    let info = DiskInfo {
        media: MediaKind::Unknown,
        bytes_per_sector: SECTOR as u32,
        sectors_per_cylinder: 0,
        total_sectors,
    };
    let source_disk = FileDisk::with_geometry(source_file, info).unwrap();
    let mut source = SectorStream::new(
        partitions[0].map.clone(),
        vec![(0, Box::new(source_disk) as Box<dyn DiskDevice>)],
    )
    .unwrap();

    let driver = LoopbackDriver::new();
    let (a, b) = driver.socket_pair();
    let mut pipeline = pipeline_over(&driver, small_config());

    let mut dest = single_extent_stream(file_disk(u64::from(part_len)), u64::from(part_len));
    pipeline.send(&mut source, DigestKind::Sha384, a).unwrap();
    let report = pipeline.receive(&mut dest, DigestKind::Sha384, b).unwrap();
    assert_eq!(report.bytes, u64::from(part_len) * SECTOR as u64);

    let mut actual = vec![0u8; part_len as usize * SECTOR];
    dest.read_at(0, &mut actual).unwrap();
    let expected =
        &image[part_start as usize * SECTOR..(part_start + part_len) as usize * SECTOR];
    assert_eq!(actual.as_slice(), expected);
}

#[test]
fn spanned_record_resolution_matches_transfer_addressing() {
    // The volume manager reports extents out of drive order; the resolved
    // map must preserve that order, and a read of sectors [120, 140) must
    // land entirely in the second extent.
    let member = |drive: u32| DriveRecord {
        drive,
        kind: DriveKind::DynSpanned,
        table: TableKind::Mbr,
        geometry: DriveGeometry {
            bytes_per_sector: SECTOR as u32,
            total_sectors: 4096,
        },
        table_bytes: Vec::new(),
    };
    let enumeration = DriveEnumeration {
        drives: vec![member(0), member(1), member(2)],
        spanned: vec![SpannedRecord {
            declared_sectors: 350,
            extents: vec![
                ExtentDescriptor {
                    drive: 2,
                    start_sector: 100,
                    length_sectors: 100,
                },
                ExtentDescriptor {
                    drive: 0,
                    start_sector: 200,
                    length_sectors: 50,
                },
                ExtentDescriptor {
                    drive: 1,
                    start_sector: 300,
                    length_sectors: 200,
                },
            ],
        }],
    };

    let partitions = resolve(&enumeration).unwrap();
    let map = &partitions[0].map;

    for logical in 120..140u64 {
        let loc = map.locate(logical * SECTOR as u64).unwrap();
        assert_eq!(loc.drive, 0);
        assert_eq!(loc.sector, 200 + (logical - 100));
    }
}
