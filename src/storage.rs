use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Error, ErrorKind, Read, Result, Seek, SeekFrom, Write};
use std::path::PathBuf;

/// Random access to named byte files on the removable medium.
///
/// The emulator opens and closes a file for every sector transfer, so the
/// backend keeps no long-lived handles. Positioned writes must be durable
/// before they return.
pub trait Storage {
    /// Names of the regular files in the backend root, in backend order.
    fn list(&mut self) -> Result<Vec<String>>;

    /// Byte length of a named file.
    fn len(&mut self, name: &str) -> Result<u64>;

    /// Read into `buf` starting at `offset`. Returns the bytes read, which
    /// may be fewer than `buf.len()` near end of file.
    fn read_at(&mut self, name: &str, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Write all of `buf` at `offset` and flush to the medium.
    fn write_at(&mut self, name: &str, offset: u64, buf: &[u8]) -> Result<()>;

    /// Replace the whole file with `data`, creating it if needed.
    fn save(&mut self, name: &str, data: &[u8]) -> Result<()>;

    /// Read the whole file.
    fn load(&mut self, name: &str) -> Result<Vec<u8>>;
}

/// Storage backend over a host directory.
pub struct DirStorage {
    root: PathBuf,
}

impl DirStorage {
    pub fn new<P: Into<PathBuf>>(root: P) -> DirStorage {
        DirStorage { root: root.into() }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl Storage for DirStorage {
    fn list(&mut self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Ok(name) = entry.file_name().into_string() {
                    names.push(name);
                }
            }
        }
        Ok(names)
    }

    fn len(&mut self, name: &str) -> Result<u64> {
        Ok(fs::metadata(self.path(name))?.len())
    }

    fn read_at(&mut self, name: &str, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut file = File::open(self.path(name))?;
        file.seek(SeekFrom::Start(offset))?;
        let mut total = 0;
        while total < buf.len() {
            match file.read(&mut buf[total..])? {
                0 => break,
                n => total += n,
            }
        }
        Ok(total)
    }

    fn write_at(&mut self, name: &str, offset: u64, buf: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new().write(true).open(self.path(name))?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        file.sync_data()
    }

    fn save(&mut self, name: &str, data: &[u8]) -> Result<()> {
        let mut file = File::create(self.path(name))?;
        file.write_all(data)?;
        file.sync_data()
    }

    fn load(&mut self, name: &str) -> Result<Vec<u8>> {
        fs::read(self.path(name))
    }
}

/// In-memory backend for tests and diagnostics. Entries marked read-only
/// refuse positioned writes the way a read-only medium would.
pub struct MemStorage {
    files: Vec<(String, Vec<u8>)>,
    read_only: HashMap<String, bool>,
}

impl MemStorage {
    pub fn new() -> MemStorage {
        MemStorage {
            files: Vec::new(),
            read_only: HashMap::new(),
        }
    }

    pub fn insert(&mut self, name: &str, data: Vec<u8>) {
        self.remove(name);
        self.files.push((name.to_string(), data));
    }

    pub fn insert_read_only(&mut self, name: &str, data: Vec<u8>) {
        self.insert(name, data);
        self.read_only.insert(name.to_string(), true);
    }

    pub fn remove(&mut self, name: &str) {
        self.files.retain(|(n, _)| n != name);
        self.read_only.remove(name);
    }

    pub fn contents(&self, name: &str) -> Option<&[u8]> {
        self.files
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d.as_slice())
    }

    fn entry(&mut self, name: &str) -> Result<&mut Vec<u8>> {
        self.files
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d)
            .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("no such file: {}", name)))
    }
}

impl Storage for MemStorage {
    fn list(&mut self) -> Result<Vec<String>> {
        Ok(self.files.iter().map(|(n, _)| n.clone()).collect())
    }

    fn len(&mut self, name: &str) -> Result<u64> {
        Ok(self.entry(name)?.len() as u64)
    }

    fn read_at(&mut self, name: &str, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let data = self.entry(name)?;
        let start = (offset as usize).min(data.len());
        let count = buf.len().min(data.len() - start);
        buf[..count].copy_from_slice(&data[start..start + count]);
        Ok(count)
    }

    fn write_at(&mut self, name: &str, offset: u64, buf: &[u8]) -> Result<()> {
        if self.read_only.get(name).copied().unwrap_or(false) {
            return Err(Error::new(
                ErrorKind::PermissionDenied,
                format!("read-only file: {}", name),
            ));
        }
        let data = self.entry(name)?;
        let end = offset as usize + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[offset as usize..end].copy_from_slice(buf);
        Ok(())
    }

    fn save(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.insert(name, data.to_vec());
        Ok(())
    }

    fn load(&mut self, name: &str) -> Result<Vec<u8>> {
        Ok(self.entry(name)?.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_storage_positioned_io() {
        let mut storage = MemStorage::new();
        storage.insert("A.IMG", vec![0u8; 64]);

        storage.write_at("A.IMG", 16, &[1, 2, 3, 4]).unwrap();
        let mut buf = [0u8; 4];
        let n = storage.read_at("A.IMG", 16, &mut buf).unwrap();
        assert_eq!(n, 4);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(storage.len("A.IMG").unwrap(), 64);
    }

    #[test]
    fn mem_storage_short_read_at_end() {
        let mut storage = MemStorage::new();
        storage.insert("B.IMG", vec![7u8; 10]);

        let mut buf = [0u8; 8];
        let n = storage.read_at("B.IMG", 6, &mut buf).unwrap();
        assert_eq!(n, 4);
        assert_eq!(&buf[..4], &[7, 7, 7, 7]);
    }

    #[test]
    fn mem_storage_read_only_refuses_writes() {
        let mut storage = MemStorage::new();
        storage.insert_read_only("C.IMG", vec![0u8; 32]);

        let err = storage.write_at("C.IMG", 0, &[1]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }
}
