use log::debug;
use thiserror::Error;

use crate::catalog::ImageDescriptor;
use crate::storage::Storage;

/// Transfer failures in the vocabulary the host observes. Backend trouble
/// on a read collapses to `RecordNotFound`; anything that stops a write
/// collapses to `WriteProtected` unless the record itself was bad.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayError {
    #[error("record not found")]
    RecordNotFound,
    #[error("write protected")]
    WriteProtected,
}

/// Byte offset of logical (track, sector) in the image file. `sector` is
/// 1-indexed and must already be validated against the geometry.
pub fn sector_offset(disk: &ImageDescriptor, track: u8, sector: u8) -> u64 {
    let ssz = disk.sector_size as u64;
    let spt = disk.sectors_per_track as u64;
    let track = track as u64;
    let slot = sector as u64 - 1;
    match disk.header {
        Some(header) => {
            let track_stride = header.track_header + spt * ssz;
            header.disk_header + track * track_stride + header.track_header + slot * ssz
        }
        None => (track * spt + slot) * ssz,
    }
}

fn locate(disk: &ImageDescriptor, track: u8, sector: u8) -> Result<u64, GatewayError> {
    if sector < 1 || sector > disk.sectors_per_track {
        return Err(GatewayError::RecordNotFound);
    }
    let offset = sector_offset(disk, track, sector);
    if offset + disk.sector_size as u64 > disk.size {
        return Err(GatewayError::RecordNotFound);
    }
    Ok(offset)
}

/// Fill `buf` (exactly one sector) from the image. `buf.len()` must equal
/// the descriptor's sector size.
pub fn read_sector(
    storage: &mut dyn Storage,
    disk: &ImageDescriptor,
    track: u8,
    sector: u8,
    buf: &mut [u8],
) -> Result<(), GatewayError> {
    let offset = locate(disk, track, sector)?;
    debug!("read {} T{} S{} @{}", disk.name, track, sector, offset);
    match storage.read_at(&disk.name, offset, buf) {
        Ok(n) if n == buf.len() => Ok(()),
        _ => Err(GatewayError::RecordNotFound),
    }
}

/// Persist `buf` (exactly one sector) into the image, flushed before
/// returning.
pub fn write_sector(
    storage: &mut dyn Storage,
    disk: &ImageDescriptor,
    track: u8,
    sector: u8,
    buf: &[u8],
) -> Result<(), GatewayError> {
    if disk.write_protected {
        return Err(GatewayError::WriteProtected);
    }
    let offset = locate(disk, track, sector)?;
    debug!("write {} T{} S{} @{}", disk.name, track, sector, offset);
    storage
        .write_at(&disk.name, offset, buf)
        .map_err(|_| GatewayError::WriteProtected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{HeaderLayout, ImageDescriptor};
    use crate::storage::MemStorage;

    fn flat_disk(name: &str, tracks: u8, spt: u8, ssz: usize) -> ImageDescriptor {
        ImageDescriptor {
            name: name.to_string(),
            size: tracks as u64 * spt as u64 * ssz as u64,
            tracks,
            sectors_per_track: spt,
            sector_size: ssz,
            double_density: ssz >= 512,
            write_protected: false,
            header: None,
            guessed: false,
        }
    }

    fn headered_disk(name: &str, tracks: u8, spt: u8, ssz: usize) -> ImageDescriptor {
        let track_stride = 256 + spt as u64 * ssz as u64;
        ImageDescriptor {
            size: 256 + tracks as u64 * track_stride,
            header: Some(HeaderLayout { disk_header: 256, track_header: 256 }),
            ..flat_disk(name, tracks, spt, ssz)
        }
    }

    #[test]
    fn flat_offsets() {
        let disk = flat_disk("T.IMG", 40, 16, 256);
        assert_eq!(sector_offset(&disk, 0, 1), 0);
        assert_eq!(sector_offset(&disk, 0, 2), 256);
        assert_eq!(sector_offset(&disk, 1, 1), 16 * 256);
        assert_eq!(sector_offset(&disk, 39, 16), disk.size - 256);
    }

    #[test]
    fn headered_offsets() {
        let disk = headered_disk("E.DSK", 40, 9, 512);
        // 256 + 3*(256 + 9*512) + 256 + 3*512
        assert_eq!(sector_offset(&disk, 3, 4), 15_680);
        assert_eq!(sector_offset(&disk, 0, 1), 512);
    }

    #[test]
    fn every_in_range_sector_fits_in_the_file() {
        for disk in [flat_disk("A.IMG", 80, 9, 512), headered_disk("B.DSK", 40, 9, 512)] {
            for track in 0..disk.tracks {
                for sector in 1..=disk.sectors_per_track {
                    let end = sector_offset(&disk, track, sector) + disk.sector_size as u64;
                    assert!(end <= disk.size, "{} T{} S{}", disk.name, track, sector);
                }
            }
        }
    }

    #[test]
    fn read_fills_exactly_one_sector() {
        let disk = flat_disk("T.IMG", 40, 16, 256);
        let mut storage = MemStorage::new();
        let content: Vec<u8> = (0..disk.size).map(|i| (i % 251) as u8).collect();
        storage.insert("T.IMG", content.clone());

        let mut buf = [0u8; 256];
        read_sector(&mut storage, &disk, 2, 5, &mut buf).unwrap();
        let offset = sector_offset(&disk, 2, 5) as usize;
        assert_eq!(&buf[..], &content[offset..offset + 256]);
    }

    #[test]
    fn out_of_range_records_are_not_found() {
        let disk = flat_disk("T.IMG", 40, 16, 256);
        let mut storage = MemStorage::new();
        storage.insert("T.IMG", vec![0u8; disk.size as usize]);

        let mut buf = [0u8; 256];
        assert_eq!(
            read_sector(&mut storage, &disk, 0, 0, &mut buf),
            Err(GatewayError::RecordNotFound)
        );
        assert_eq!(
            read_sector(&mut storage, &disk, 0, 17, &mut buf),
            Err(GatewayError::RecordNotFound)
        );
        // Track past the end of the file underruns.
        assert_eq!(
            read_sector(&mut storage, &disk, 40, 1, &mut buf),
            Err(GatewayError::RecordNotFound)
        );
        assert_eq!(
            write_sector(&mut storage, &disk, 40, 1, &buf),
            Err(GatewayError::RecordNotFound)
        );
    }

    #[test]
    fn short_backing_file_underruns() {
        let mut disk = flat_disk("T.IMG", 40, 16, 256);
        let mut storage = MemStorage::new();
        // File claims full geometry but is truncated on the medium.
        storage.insert("T.IMG", vec![0u8; 1000]);
        disk.size = 40 * 16 * 256;

        let mut buf = [0u8; 256];
        assert_eq!(
            read_sector(&mut storage, &disk, 0, 4, &mut buf),
            Err(GatewayError::RecordNotFound)
        );
    }

    #[test]
    fn write_protect_policy() {
        let mut disk = flat_disk("T.IMG", 40, 16, 256);
        let mut storage = MemStorage::new();
        storage.insert("T.IMG", vec![0u8; disk.size as usize]);

        disk.write_protected = true;
        assert_eq!(
            write_sector(&mut storage, &disk, 0, 1, &[0xAA; 256]),
            Err(GatewayError::WriteProtected)
        );
        assert!(storage.contents("T.IMG").unwrap().iter().all(|&b| b == 0));

        // Backend refusal maps to the same error.
        disk.write_protected = false;
        let mut ro = MemStorage::new();
        ro.insert_read_only("T.IMG", vec![0u8; disk.size as usize]);
        assert_eq!(
            write_sector(&mut ro, &disk, 0, 1, &[0xAA; 256]),
            Err(GatewayError::WriteProtected)
        );
    }

    #[test]
    fn sector_round_trip() {
        let disk = headered_disk("E.DSK", 40, 9, 512);
        let mut storage = MemStorage::new();
        storage.insert("E.DSK", vec![0u8; disk.size as usize]);

        let pattern: Vec<u8> = (0..512).map(|i| (i * 7 % 256) as u8).collect();
        write_sector(&mut storage, &disk, 3, 4, &pattern).unwrap();

        let mut buf = [0u8; 512];
        read_sector(&mut storage, &disk, 3, 4, &mut buf).unwrap();
        assert_eq!(&buf[..], &pattern[..]);

        // Writing back what was read leaves the file bit-identical.
        let before = storage.contents("E.DSK").unwrap().to_vec();
        write_sector(&mut storage, &disk, 3, 4, &buf).unwrap();
        assert_eq!(storage.contents("E.DSK").unwrap(), &before[..]);
    }
}
