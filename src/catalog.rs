use log::{debug, info, warn};
use thiserror::Error;

use crate::storage::Storage;

/// At most this many images are catalogued from the medium.
const MAX_IMAGES: usize = 100;

/// Persisted slot bindings, one line: `name0,name1\n` with `NONE` for empty.
const BINDINGS_FILE: &str = "lastimg.cfg";

const IMAGE_EXTENSIONS: [&str; 4] = [".DSK", ".IMG", ".ST", ".HFE"];

const DISK_HEADER_LEN: u64 = 256;
const TRACK_HEADER_LEN: u64 = 256;

/// Known flat-image sizes: (bytes, tracks, sectors/track, sector size, double density).
const KNOWN_FORMATS: [(u64, u8, u8, usize, bool); 6] = [
    (163_840, 40, 16, 256, false), // Timex FDD 3000 SS
    (327_680, 80, 16, 256, false), // Timex FDD 3000 DS
    (184_320, 40, 9, 512, true),   // Amstrad/Spectrum raw
    (368_640, 40, 9, 512, true),   // 5.25" DD
    (737_280, 80, 9, 512, true),   // 3.5" DD
    (174_336, 40, 9, 512, true),   // Extended DSK, 40 tracks
];

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("image index out of range")]
    BadIndex,
    #[error("{name}: {sides}-sided header images are not supported")]
    MultiSided { name: String, sides: u8 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Header prefix layout of an Extended-DSK / CPCEMU image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderLayout {
    pub disk_header: u64,
    pub track_header: u64,
}

/// Geometry and flags of one catalogued image. Immutable once classified.
#[derive(Clone, Debug)]
pub struct ImageDescriptor {
    pub name: String,
    pub size: u64,
    pub tracks: u8,
    pub sectors_per_track: u8,
    pub sector_size: usize,
    pub double_density: bool,
    pub write_protected: bool,
    pub header: Option<HeaderLayout>,
    pub guessed: bool,
}

/// A bound drive slot: the catalog index it came from plus the resolved
/// descriptor.
#[derive(Clone, Debug)]
pub struct SlotBinding {
    pub index: usize,
    pub disk: ImageDescriptor,
}

/// The image catalog: the enumerated image list plus the two drive slots.
pub struct Catalog {
    storage: Box<dyn Storage>,
    images: Vec<String>,
    slots: [Option<SlotBinding>; 2],
    write_protect_names: Vec<String>,
}

fn has_image_extension(name: &str) -> bool {
    let upper = name.to_ascii_uppercase();
    IMAGE_EXTENSIONS.iter().any(|ext| upper.ends_with(ext))
}

fn exact_size_geometry(size: u64) -> Option<(u8, u8, usize, bool)> {
    KNOWN_FORMATS
        .iter()
        .find(|(bytes, ..)| *bytes == size)
        .map(|&(_, tracks, spt, ssz, dd)| (tracks, spt, ssz, dd))
}

impl Catalog {
    pub fn new(storage: Box<dyn Storage>) -> Catalog {
        Catalog {
            storage,
            images: Vec::new(),
            slots: [None, None],
            write_protect_names: Vec::new(),
        }
    }

    /// Images named here get a write-protected descriptor when bound.
    pub fn set_write_protect_names(&mut self, names: Vec<String>) {
        self.write_protect_names = names;
    }

    /// Walk the backend root and collect image files, preserving backend
    /// order, capped at [`MAX_IMAGES`].
    pub fn scan(&mut self) -> Result<(), CatalogError> {
        self.images.clear();
        for name in self.storage.list()? {
            if !has_image_extension(&name) {
                continue;
            }
            if self.images.len() >= MAX_IMAGES {
                warn!("catalog full, ignoring {}", name);
                continue;
            }
            debug!("found {}", name);
            self.images.push(name);
        }
        info!("found {} disk images", self.images.len());
        Ok(())
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn image_name(&self, index: usize) -> Option<&str> {
        self.images.get(index).map(String::as_str)
    }

    pub fn binding(&self, slot: usize) -> Option<&SlotBinding> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Resolved descriptor of a bound slot, cloned for use while the
    /// storage backend is borrowed elsewhere.
    pub fn descriptor(&self, slot: usize) -> Option<ImageDescriptor> {
        self.binding(slot).map(|b| b.disk.clone())
    }

    pub fn loaded_index(&self, slot: usize) -> Option<usize> {
        self.binding(slot).map(|b| b.index)
    }

    pub fn storage_mut(&mut self) -> &mut dyn Storage {
        self.storage.as_mut()
    }

    /// Bind a slot to a catalogued image, classifying it fresh. Contents
    /// are not preloaded.
    pub fn load(&mut self, slot: usize, index: usize) -> Result<(), CatalogError> {
        if slot >= self.slots.len() || index >= self.images.len() {
            return Err(CatalogError::BadIndex);
        }
        let name = self.images[index].clone();
        let mut disk = classify(self.storage.as_mut(), &name)?;
        if self.write_protect_names.iter().any(|n| n == &name) {
            disk.write_protected = true;
        }
        info!(
            "drive {}: loaded {} ({} bytes, {}T/{}S/{}B{})",
            slot,
            disk.name,
            disk.size,
            disk.tracks,
            disk.sectors_per_track,
            disk.sector_size,
            if disk.header.is_some() { ", headered" } else { "" }
        );
        self.slots[slot] = Some(SlotBinding { index, disk });
        Ok(())
    }

    pub fn eject(&mut self, slot: usize) {
        if slot < self.slots.len() && self.slots[slot].take().is_some() {
            info!("drive {} ejected", slot);
        }
    }

    /// Persist the current bindings as `name0,name1\n`.
    pub fn save_bindings(&mut self) -> Result<(), CatalogError> {
        fn name_for(slot: &Option<SlotBinding>) -> &str {
            match slot {
                Some(b) => b.disk.name.as_str(),
                None => "NONE",
            }
        }
        let line = format!("{},{}\n", name_for(&self.slots[0]), name_for(&self.slots[1]));
        self.storage.save(BINDINGS_FILE, line.as_bytes())?;
        info!("saved bindings: {}", line.trim_end());
        Ok(())
    }

    /// Re-bind the slots recorded at the last save. A missing record or a
    /// name no longer in the catalog leaves the slot empty; neither is an
    /// error.
    pub fn restore_bindings(&mut self) {
        let record = match self.storage.load(BINDINGS_FILE) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => {
                info!("no bindings record found, starting with empty drives");
                return;
            }
        };
        let line = record.lines().next().unwrap_or("");
        let Some((name0, name1)) = line.split_once(',') else {
            warn!("malformed bindings record: {:?}", line);
            return;
        };
        for (slot, name) in [(0, name0), (1, name1)] {
            let name = name.trim();
            if name == "NONE" || name.is_empty() {
                continue;
            }
            match self.images.iter().position(|n| n == name) {
                Some(index) => {
                    if let Err(err) = self.load(slot, index) {
                        warn!("drive {}: could not restore {}: {}", slot, name, err);
                    }
                }
                None => warn!("drive {}: {} is no longer on the medium", slot, name),
            }
        }
    }
}

/// Resolve the geometry of a named image: exact-size table first, then
/// divisibility guessing, then an Extended-DSK header overlay for `.DSK`
/// and `.HFE` files.
pub fn classify(storage: &mut dyn Storage, name: &str) -> Result<ImageDescriptor, CatalogError> {
    let size = storage.len(name)?;

    let mut disk = match exact_size_geometry(size) {
        Some((tracks, spt, ssz, dd)) => ImageDescriptor {
            name: name.to_string(),
            size,
            tracks,
            sectors_per_track: spt,
            sector_size: ssz,
            double_density: dd,
            write_protected: false,
            header: None,
            guessed: false,
        },
        None => guess_geometry(name, size),
    };

    let upper = name.to_ascii_uppercase();
    if upper.ends_with(".DSK") || upper.ends_with(".HFE") {
        apply_header_overlay(storage, &mut disk)?;
    }

    Ok(disk)
}

fn guess_geometry(name: &str, size: u64) -> ImageDescriptor {
    let mut disk = ImageDescriptor {
        name: name.to_string(),
        size,
        tracks: 0,
        sectors_per_track: 0,
        sector_size: 512,
        double_density: true,
        write_protected: false,
        header: None,
        guessed: true,
    };

    // 256-byte sector layouts first, then fall back to 512.
    let sectors_256 = size / 256;
    if size % 256 == 0 && sectors_256 == 640 {
        disk.tracks = 40;
        disk.sectors_per_track = 16;
        disk.sector_size = 256;
        disk.double_density = false;
    } else if size % 256 == 0 && sectors_256 == 1280 {
        disk.tracks = 80;
        disk.sectors_per_track = 16;
        disk.sector_size = 256;
        disk.double_density = false;
    } else {
        let sectors_512 = size / 512;
        disk.tracks = if sectors_512 < 720 { 40 } else { 80 };
        disk.sectors_per_track = (sectors_512 / disk.tracks as u64) as u8;
    }

    warn!(
        "{}: unknown size {} bytes, guessing {}T/{}S/{}B",
        name, size, disk.tracks, disk.sectors_per_track, disk.sector_size
    );
    disk
}

/// Check for an `EXTENDED CPC DSK` / `MV - CPCEMU Disk` prefix and, if
/// present, take geometry from the disk and first-track information
/// blocks instead of the file size.
fn apply_header_overlay(
    storage: &mut dyn Storage,
    disk: &mut ImageDescriptor,
) -> Result<(), CatalogError> {
    let mut header = [0u8; 512];
    let n = storage.read_at(&disk.name, 0, &mut header)?;
    if n < 512 {
        return Ok(());
    }
    let (disk_header, track_header) = header.split_at(256);

    if &disk_header[..16] != b"EXTENDED CPC DSK" && &disk_header[..16] != b"MV - CPCEMU Disk" {
        return Ok(());
    }

    let tracks = disk_header[0x30];
    let sides = disk_header[0x31];
    if sides > 1 {
        return Err(CatalogError::MultiSided {
            name: disk.name.clone(),
            sides,
        });
    }

    if &track_header[..10] != b"Track-Info" {
        warn!("{}: missing Track-Info signature, keeping size-based geometry", disk.name);
        return Ok(());
    }

    disk.tracks = tracks;
    disk.sectors_per_track = track_header[0x15];
    disk.sector_size = 128usize << track_header[0x14];
    disk.double_density = disk.sector_size >= 512;
    disk.header = Some(HeaderLayout {
        disk_header: DISK_HEADER_LEN,
        track_header: TRACK_HEADER_LEN,
    });
    disk.guessed = false;
    debug!(
        "{}: header geometry {}T/{}S/{}B",
        disk.name, disk.tracks, disk.sectors_per_track, disk.sector_size
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStorage;

    fn extended_dsk(tracks: u8, sides: u8, spt: u8, size_code: u8) -> Vec<u8> {
        let sector_size = 128usize << size_code;
        let track_data = 256 + spt as usize * sector_size;
        let mut image = vec![0u8; 256 + tracks as usize * track_data];
        image[..16].copy_from_slice(b"EXTENDED CPC DSK");
        image[0x30] = tracks;
        image[0x31] = sides;
        for t in 0..tracks as usize {
            let base = 256 + t * track_data;
            image[base..base + 10].copy_from_slice(b"Track-Info");
            image[base + 0x14] = size_code;
            image[base + 0x15] = spt;
        }
        image
    }

    fn catalog_with(files: Vec<(&str, Vec<u8>)>) -> Catalog {
        let mut storage = MemStorage::new();
        for (name, data) in files {
            storage.insert(name, data);
        }
        let mut catalog = Catalog::new(Box::new(storage));
        catalog.scan().unwrap();
        catalog
    }

    #[test]
    fn classifies_known_sizes() {
        let cases = [
            (163_840, 40, 16, 256, false),
            (327_680, 80, 16, 256, false),
            (184_320, 40, 9, 512, true),
            (368_640, 40, 9, 512, true),
            (737_280, 80, 9, 512, true),
        ];
        for (size, tracks, spt, ssz, dd) in cases {
            let mut storage = MemStorage::new();
            storage.insert("X.IMG", vec![0u8; size]);
            let disk = classify(&mut storage, "X.IMG").unwrap();
            assert_eq!(disk.tracks, tracks, "{} bytes", size);
            assert_eq!(disk.sectors_per_track, spt);
            assert_eq!(disk.sector_size, ssz);
            assert_eq!(disk.double_density, dd);
            assert!(!disk.guessed);
            assert!(disk.header.is_none());
        }
    }

    #[test]
    fn guesses_unknown_sizes() {
        let mut storage = MemStorage::new();
        storage.insert("ODD.IMG", vec![0u8; 102_400]);
        let disk = classify(&mut storage, "ODD.IMG").unwrap();
        assert!(disk.guessed);
        assert_eq!(disk.tracks, 40);
        assert_eq!(disk.sectors_per_track, 5);
        assert_eq!(disk.sector_size, 512);
    }

    #[test]
    fn header_overlay_takes_precedence() {
        let mut storage = MemStorage::new();
        storage.insert("CPC.DSK", extended_dsk(40, 1, 9, 2));
        let disk = classify(&mut storage, "CPC.DSK").unwrap();
        assert_eq!(disk.tracks, 40);
        assert_eq!(disk.sectors_per_track, 9);
        assert_eq!(disk.sector_size, 512);
        assert!(disk.double_density);
        assert_eq!(
            disk.header,
            Some(HeaderLayout { disk_header: 256, track_header: 256 })
        );
    }

    #[test]
    fn multi_side_header_images_are_rejected() {
        let mut catalog = catalog_with(vec![("TWOSIDE.DSK", extended_dsk(40, 2, 9, 2))]);
        let err = catalog.load(0, 0).unwrap_err();
        assert!(matches!(err, CatalogError::MultiSided { sides: 2, .. }));
        assert!(catalog.binding(0).is_none());
    }

    #[test]
    fn scan_filters_by_extension_and_keeps_order() {
        let catalog = catalog_with(vec![
            ("GAME.DSK", vec![0u8; 16]),
            ("README.TXT", vec![0u8; 16]),
            ("blank.img", vec![0u8; 16]),
            ("demo.st", vec![0u8; 16]),
        ]);
        assert_eq!(catalog.image_count(), 3);
        assert_eq!(catalog.image_name(0), Some("GAME.DSK"));
        assert_eq!(catalog.image_name(1), Some("blank.img"));
        assert_eq!(catalog.image_name(2), Some("demo.st"));
    }

    #[test]
    fn load_and_eject_transitions() {
        let mut catalog = catalog_with(vec![
            ("A.IMG", vec![0u8; 163_840]),
            ("B.IMG", vec![0u8; 737_280]),
        ]);
        catalog.load(0, 0).unwrap();
        assert_eq!(catalog.loaded_index(0), Some(0));

        // bound -> bound replace
        catalog.load(0, 1).unwrap();
        assert_eq!(catalog.binding(0).unwrap().disk.name, "B.IMG");

        catalog.eject(0);
        assert!(catalog.binding(0).is_none());
        assert!(catalog.load(0, 5).is_err());
    }

    #[test]
    fn bindings_round_trip_through_the_record() {
        let mut storage = MemStorage::new();
        storage.insert("GAME.DSK", vec![0u8; 737_280]);
        storage.insert("BLANK.IMG", vec![0u8; 163_840]);
        let mut catalog = Catalog::new(Box::new(storage));
        catalog.scan().unwrap();
        catalog.load(0, 0).unwrap();
        catalog.save_bindings().unwrap();

        let record = catalog.storage_mut().load("lastimg.cfg").unwrap();
        assert_eq!(record, b"GAME.DSK,NONE\n");

        // Empty the drives and come back from the record alone.
        catalog.eject(0);
        catalog.restore_bindings();
        let disk = catalog.descriptor(0).unwrap();
        assert_eq!(disk.name, "GAME.DSK");
        assert_eq!(disk.tracks, 80);
        assert_eq!(disk.sectors_per_track, 9);
        assert_eq!(disk.sector_size, 512);
        assert!(disk.double_density);
        assert!(catalog.binding(1).is_none());
    }

    #[test]
    fn restoring_a_vanished_name_leaves_the_slot_empty() {
        let mut storage = MemStorage::new();
        storage.insert("HERE.IMG", vec![0u8; 163_840]);
        storage.insert("lastimg.cfg", b"GONE.DSK,HERE.IMG\n".to_vec());
        let mut catalog = Catalog::new(Box::new(storage));
        catalog.scan().unwrap();
        catalog.restore_bindings();
        assert!(catalog.binding(0).is_none());
        assert_eq!(catalog.binding(1).unwrap().disk.name, "HERE.IMG");
    }
}
