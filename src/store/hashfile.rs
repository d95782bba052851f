//! Single-file hashed record store.
//!
//! On disk: a fixed header, a bucket table of file offsets, and chained
//! CRC-checked records. The whole table is materialised into an
//! `im::OrdMap` at load; a transaction snapshots the map, and commit
//! rewrites the file atomically (temp file + rename) under an exclusive
//! whole-file lock held on a sidecar lock file. A header generation
//! counter lets other processes detect the swap and reload.

use crate::store::{StoreError, WriteMode};
use im::OrdMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

const MAGIC: u32 = 0x5442_4831; // "TBH1"
const FORMAT_VERSION: u32 = 1;
const HEADER_BYTES: usize = 32;
const LOCK_RETRY: Duration = Duration::from_millis(2);

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub hash_size: u32,
    pub read_only: bool,
    pub no_sync: bool,
    pub no_mmap: bool,
    pub create_perms: u32,
    pub lock_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            hash_size: 10_000,
            read_only: false,
            no_sync: false,
            no_mmap: false,
            create_perms: 0o644,
            lock_timeout: Duration::from_millis(5_000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    hash_size: u32,
    generation: u64,
    record_count: u64,
}

#[derive(Debug)]
pub struct HashFile {
    path: PathBuf,
    lock_file: File,
    opts: StoreOptions,
    table: OrdMap<Vec<u8>, Vec<u8>>,
    generation: u64,
    tx_snapshot: Option<OrdMap<Vec<u8>, Vec<u8>>>,
}

impl HashFile {
    pub fn open(path: impl AsRef<Path>, opts: StoreOptions) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let lock_file = open_lock_file(&path, &opts)?;
        let mut store = Self {
            path,
            lock_file,
            opts,
            table: OrdMap::new(),
            generation: 0,
            tx_snapshot: None,
        };
        lock_exclusive(&store.lock_file, store.opts.lock_timeout)?;
        let created = store.create_if_missing();
        match created {
            Ok(()) => {}
            Err(e) => {
                unlock(&store.lock_file);
                return Err(e);
            }
        }
        let loaded = store.load();
        unlock(&store.lock_file);
        loaded?;
        Ok(store)
    }

    pub fn in_transaction(&self) -> bool {
        self.tx_snapshot.is_some()
    }

    pub fn fetch(&mut self, key: &[u8]) -> Result<Vec<u8>, StoreError> {
        if self.tx_snapshot.is_none() {
            self.reload_if_stale()?;
        }
        self.table.get(key).cloned().ok_or(StoreError::NotFound)
    }

    pub fn put(&mut self, key: &[u8], data: &[u8], mode: WriteMode) -> Result<(), StoreError> {
        if self.tx_snapshot.is_some() {
            return self.apply_put(key, data, mode);
        }
        self.autocommit(|s| s.apply_put(key, data, mode))
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        if self.tx_snapshot.is_some() {
            return self.apply_delete(key);
        }
        self.autocommit(|s| s.apply_delete(key))
    }

    /// A structurally shared snapshot of the current table, cheap to take.
    pub fn snapshot(&self) -> OrdMap<Vec<u8>, Vec<u8>> {
        self.table.clone()
    }

    pub fn begin(&mut self) -> Result<(), StoreError> {
        if self.tx_snapshot.is_some() {
            return Err(StoreError::Busy);
        }
        if self.opts.read_only {
            return Err(StoreError::ReadOnly);
        }
        lock_exclusive(&self.lock_file, self.opts.lock_timeout)?;
        if let Err(e) = self.reload_if_stale() {
            unlock(&self.lock_file);
            return Err(e);
        }
        self.tx_snapshot = Some(self.table.clone());
        Ok(())
    }

    pub fn commit(&mut self) -> Result<(), StoreError> {
        if self.tx_snapshot.is_none() {
            return Err(StoreError::Invalid("commit without transaction".into()));
        }
        match self.write_table() {
            Ok(()) => {
                self.generation += 1;
                self.tx_snapshot = None;
                unlock(&self.lock_file);
                Ok(())
            }
            Err(e) => {
                // leave the transaction open; the caller cancels
                Err(e)
            }
        }
    }

    pub fn cancel(&mut self) -> Result<(), StoreError> {
        let snapshot = self
            .tx_snapshot
            .take()
            .ok_or_else(|| StoreError::Invalid("cancel without transaction".into()))?;
        self.table = snapshot;
        unlock(&self.lock_file);
        Ok(())
    }

    fn apply_put(&mut self, key: &[u8], data: &[u8], mode: WriteMode) -> Result<(), StoreError> {
        if self.opts.read_only {
            return Err(StoreError::ReadOnly);
        }
        let present = self.table.contains_key(key);
        match mode {
            WriteMode::Insert if present => return Err(StoreError::Exists),
            WriteMode::Modify if !present => return Err(StoreError::NotFound),
            _ => {}
        }
        self.table.insert(key.to_vec(), data.to_vec());
        Ok(())
    }

    fn apply_delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        if self.opts.read_only {
            return Err(StoreError::ReadOnly);
        }
        self.table.remove(key).ok_or(StoreError::NotFound)?;
        Ok(())
    }

    fn autocommit(
        &mut self,
        op: impl FnOnce(&mut Self) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        self.begin()?;
        match op(self).and_then(|()| self.commit()) {
            Ok(()) => Ok(()),
            Err(e) => {
                if self.tx_snapshot.is_some() {
                    let _ = self.cancel();
                }
                Err(e)
            }
        }
    }

    fn create_if_missing(&mut self) -> Result<(), StoreError> {
        if self.path.exists() {
            return Ok(());
        }
        if self.opts.read_only {
            return Err(StoreError::Io(format!(
                "{} does not exist",
                self.path.display()
            )));
        }
        debug!(path = %self.path.display(), hash_size = self.opts.hash_size, "creating store file");
        self.write_table()
    }

    fn reload_if_stale(&mut self) -> Result<(), StoreError> {
        let mut file = File::open(&self.path)?;
        let mut head = [0u8; HEADER_BYTES];
        file.read_exact(&mut head)
            .map_err(|_| StoreError::Corrupt("short header".into()))?;
        let header = parse_header(&head)?;
        if header.generation != self.generation {
            debug!(
                from = self.generation,
                to = header.generation,
                "store generation changed, reloading"
            );
            self.load()?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), StoreError> {
        let bytes = self.read_file()?;
        if bytes.len() < HEADER_BYTES {
            return Err(StoreError::Corrupt("short header".into()));
        }
        let header = parse_header(&bytes[..HEADER_BYTES])?;
        let hash_size = header.hash_size as usize;
        let bucket_end = HEADER_BYTES
            .checked_add(hash_size.checked_mul(8).ok_or_else(corrupt_layout)?)
            .ok_or_else(corrupt_layout)?;
        if bytes.len() < bucket_end {
            return Err(StoreError::Corrupt("truncated bucket table".into()));
        }

        let mut table = OrdMap::new();
        let mut seen = 0u64;
        for b in 0..hash_size {
            let at = HEADER_BYTES + b * 8;
            let mut off = read_u64(&bytes, at)?;
            while off != 0 {
                if seen >= header.record_count {
                    return Err(StoreError::Corrupt("bucket chain cycle".into()));
                }
                let (key, data, next) = parse_record(&bytes, off as usize)?;
                table.insert(key, data);
                seen += 1;
                off = next;
            }
        }
        if seen != header.record_count {
            return Err(StoreError::Corrupt(format!(
                "record count mismatch: header {} walked {}",
                header.record_count, seen
            )));
        }
        self.table = table;
        self.generation = header.generation;
        Ok(())
    }

    fn read_file(&self) -> Result<Vec<u8>, StoreError> {
        let file = File::open(&self.path)?;
        if self.opts.no_mmap {
            let mut buf = Vec::new();
            let mut file = file;
            file.read_to_end(&mut buf)?;
            return Ok(buf);
        }
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(Vec::new());
        }
        // the mapping is copied out; the file may be replaced underneath
        // us at any time after load
        let map = unsafe { memmap2::Mmap::map(&file) }?;
        Ok(map.to_vec())
    }

    /// Serialises the full table to a temp file and renames it over the
    /// live one. The caller holds the exclusive lock.
    fn write_table(&mut self) -> Result<(), StoreError> {
        let hash_size = self.opts.hash_size.max(1) as usize;
        let mut buckets = vec![0u64; hash_size];
        let mut records = Vec::new();
        let mut offset = (HEADER_BYTES + hash_size * 8) as u64;
        for (key, data) in self.table.iter() {
            let b = (bucket_hash(key) % hash_size as u64) as usize;
            let mut rec = Vec::with_capacity(24 + key.len() + data.len());
            rec.extend_from_slice(&buckets[b].to_be_bytes());
            rec.extend_from_slice(&(key.len() as u32).to_be_bytes());
            rec.extend_from_slice(&(data.len() as u32).to_be_bytes());
            let mut crc_input = Vec::with_capacity(key.len() + data.len());
            crc_input.extend_from_slice(key);
            crc_input.extend_from_slice(data);
            rec.extend_from_slice(&crc32c::crc32c(&crc_input).to_be_bytes());
            rec.extend_from_slice(key);
            rec.extend_from_slice(data);
            buckets[b] = offset;
            offset += rec.len() as u64;
            records.push(rec);
        }

        let mut out = Vec::with_capacity(offset as usize);
        out.extend_from_slice(&MAGIC.to_be_bytes());
        out.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
        out.extend_from_slice(&(hash_size as u32).to_be_bytes());
        out.extend_from_slice(&(self.generation + 1).to_be_bytes());
        out.extend_from_slice(&(self.table.len() as u64).to_be_bytes());
        out.resize(HEADER_BYTES, 0);
        for head in &buckets {
            out.extend_from_slice(&head.to_be_bytes());
        }
        for rec in &records {
            out.extend_from_slice(rec);
        }

        let tmp_path = self.path.with_extension("tdb.tmp");
        let mut open = OpenOptions::new();
        open.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            open.mode(self.opts.create_perms);
        }
        let mut tmp = open.open(&tmp_path)?;
        tmp.write_all(&out)?;
        if !self.opts.no_sync {
            tmp.sync_all()?;
        }
        drop(tmp);
        fs::rename(&tmp_path, &self.path)?;
        if !self.opts.no_sync {
            if let Some(parent) = self.path.parent() {
                if !parent.as_os_str().is_empty() {
                    File::open(parent)?.sync_all()?;
                }
            }
        }
        Ok(())
    }
}

impl Drop for HashFile {
    fn drop(&mut self) {
        if self.tx_snapshot.take().is_some() {
            unlock(&self.lock_file);
        }
    }
}

fn open_lock_file(path: &Path, opts: &StoreOptions) -> Result<File, StoreError> {
    let lock_path = path.with_extension("tdb.lock");
    let mut open = OpenOptions::new();
    open.read(true).write(true).create(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        open.mode(opts.create_perms);
    }
    #[cfg(not(unix))]
    let _ = opts;
    Ok(open.open(lock_path)?)
}

#[cfg(unix)]
fn lock_exclusive(file: &File, timeout: Duration) -> Result<(), StoreError> {
    use std::os::unix::io::AsRawFd;
    let deadline = Instant::now() + timeout;
    loop {
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc == 0 {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(StoreError::LockTimeout);
        }
        std::thread::sleep(LOCK_RETRY);
    }
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File, _timeout: Duration) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(unix)]
fn unlock(file: &File) {
    use std::os::unix::io::AsRawFd;
    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}

#[cfg(not(unix))]
fn unlock(_file: &File) {}

fn parse_header(bytes: &[u8]) -> Result<Header, StoreError> {
    let magic = u32::from_be_bytes(bytes[0..4].try_into().expect("header slice"));
    let version = u32::from_be_bytes(bytes[4..8].try_into().expect("header slice"));
    if magic != MAGIC {
        return Err(StoreError::Corrupt("bad magic".into()));
    }
    if version != FORMAT_VERSION {
        return Err(StoreError::Corrupt(format!(
            "unsupported format version {version}"
        )));
    }
    Ok(Header {
        hash_size: u32::from_be_bytes(bytes[8..12].try_into().expect("header slice")),
        generation: u64::from_be_bytes(bytes[12..20].try_into().expect("header slice")),
        record_count: u64::from_be_bytes(bytes[20..28].try_into().expect("header slice")),
    })
}

fn parse_record(bytes: &[u8], at: usize) -> Result<(Vec<u8>, Vec<u8>, u64), StoreError> {
    let next = read_u64(bytes, at)?;
    let key_len = read_u32(bytes, at + 8)? as usize;
    let data_len = read_u32(bytes, at + 12)? as usize;
    let stored_crc = read_u32(bytes, at + 16)?;
    let key_at = at + 20;
    let data_at = key_at.checked_add(key_len).ok_or_else(corrupt_layout)?;
    let end = data_at.checked_add(data_len).ok_or_else(corrupt_layout)?;
    if end > bytes.len() {
        return Err(StoreError::Corrupt("record overruns file".into()));
    }
    let key = &bytes[key_at..data_at];
    let data = &bytes[data_at..end];
    let mut crc_input = Vec::with_capacity(key_len + data_len);
    crc_input.extend_from_slice(key);
    crc_input.extend_from_slice(data);
    if crc32c::crc32c(&crc_input) != stored_crc {
        return Err(StoreError::Corrupt("record checksum mismatch".into()));
    }
    Ok((key.to_vec(), data.to_vec(), next))
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32, StoreError> {
    let end = at.checked_add(4).ok_or_else(corrupt_layout)?;
    if end > bytes.len() {
        return Err(StoreError::Corrupt("short read".into()));
    }
    Ok(u32::from_be_bytes(
        bytes[at..end].try_into().expect("bounded slice"),
    ))
}

fn read_u64(bytes: &[u8], at: usize) -> Result<u64, StoreError> {
    let end = at.checked_add(8).ok_or_else(corrupt_layout)?;
    if end > bytes.len() {
        return Err(StoreError::Corrupt("short read".into()));
    }
    Ok(u64::from_be_bytes(
        bytes[at..end].try_into().expect("bounded slice"),
    ))
}

fn corrupt_layout() -> StoreError {
    StoreError::Corrupt("record offset overflow".into())
}

fn bucket_hash(key: &[u8]) -> u64 {
    // FNV-1a
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in key {
        h ^= b as u64;
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    h
}
