use alloc::vec::Vec;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("access of {len} bytes at offset {offset} exceeds capacity {capacity}")]
    OutOfBounds { offset: usize, len: usize, capacity: usize },
}

/// Byte-addressed non-volatile storage. Writes are synchronous and atomic
/// per call.
pub trait NvStorage {
    fn capacity(&self) -> usize;
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError>;
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError>;
}

/// RAM-backed storage, initialised to the erased state (0xFF).
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    bytes: Vec<u8>,
    writes: u32,
}

impl MemoryStorage {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: alloc::vec![0xFF; capacity],
            writes: 0,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn write_count(&self) -> u32 {
        self.writes
    }

    fn check(&self, offset: usize, len: usize) -> Result<(), StorageError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.bytes.len() => Ok(()),
            _ => Err(StorageError::OutOfBounds { offset, len, capacity: self.bytes.len() }),
        }
    }
}

impl NvStorage for MemoryStorage {
    fn capacity(&self) -> usize {
        self.bytes.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        self.check(offset, buf.len())?;
        buf.copy_from_slice(&self.bytes[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError> {
        self.check(offset, data.len())?;
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
        self.writes = self.writes.wrapping_add(1);
        Ok(())
    }
}

/// Little-endian field writer for fixed-layout records.
#[derive(Debug, Default)]
pub struct RecordWriter {
    bytes: Vec<u8>,
}

impl RecordWriter {
    pub fn put_u8(&mut self, v: u8) {
        self.bytes.push(v);
    }

    pub fn put_bool(&mut self, v: bool) {
        self.bytes.push(u8::from(v));
    }

    pub fn put_u32(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }
}

#[derive(Debug)]
pub struct RecordReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> RecordReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let slice = self.bytes.get(self.pos..self.pos + N)?;
        self.pos += N;
        slice.try_into().ok()
    }

    pub fn get_u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|b| b[0])
    }

    /// Only 0 and 1 decode; anything else marks the record as corrupt.
    pub fn get_bool(&mut self) -> Option<bool> {
        match self.get_u8()? {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        }
    }

    pub fn get_u32(&mut self) -> Option<u32> {
        self.take().map(u32::from_le_bytes)
    }
}

/// A fixed-layout, versioned record stored at a fixed offset.
pub trait PersistedState: Clone {
    const VERSION: u8;
    /// Encoded size in bytes, including the leading version byte.
    const SIZE: usize;

    fn encode(&self, out: &mut RecordWriter);
    fn decode(input: &mut RecordReader<'_>) -> Option<Self>;
}

pub fn save_record<S: PersistedState>(
    storage: &mut dyn NvStorage,
    offset: usize,
    state: &S,
) -> Result<(), StorageError> {
    let mut writer = RecordWriter::default();
    writer.put_u8(S::VERSION);
    state.encode(&mut writer);
    debug_assert!(writer.bytes.len() <= S::SIZE, "record encodes past its declared size");
    writer.bytes.resize(S::SIZE, 0);
    storage.write(offset, &writer.bytes)
}

/// Reads a record back. The inner `Err` carries the stored version byte when
/// it does not match (or the record does not decode); the caller must then
/// fall back to defaults.
pub fn load_record<S: PersistedState>(
    storage: &dyn NvStorage,
    offset: usize,
) -> Result<Result<S, u8>, StorageError> {
    let mut bytes = alloc::vec![0u8; S::SIZE];
    storage.read(offset, &mut bytes)?;
    let mut reader = RecordReader::new(&bytes);
    let stored_version = reader.get_u8().unwrap_or(0);
    if stored_version != S::VERSION {
        return Ok(Err(stored_version));
    }
    Ok(S::decode(&mut reader).ok_or(stored_version))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored,
    /// Stored record was unusable; defaults were restored and written back.
    Healed { stored_version: u8 },
    /// No offset assigned yet (component not registered).
    Unassigned,
}

/// Persisted state plus its compiled defaults and assigned offset.
#[derive(Debug, Clone)]
pub struct StateSlot<S: PersistedState> {
    offset: Option<usize>,
    value: S,
    defaults: S,
}

impl<S: PersistedState> StateSlot<S> {
    pub fn new(defaults: S) -> Self {
        Self {
            offset: None,
            value: defaults.clone(),
            defaults,
        }
    }

    pub fn size(&self) -> usize {
        S::SIZE
    }

    pub fn assign_offset(&mut self, offset: usize) {
        self.offset = Some(offset);
    }

    pub fn offset(&self) -> Option<usize> {
        self.offset
    }

    pub fn get(&self) -> &S {
        &self.value
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.value
    }

    pub fn defaults(&self) -> &S {
        &self.defaults
    }

    pub fn reset(&mut self) {
        self.value = self.defaults.clone();
    }

    pub fn save(&self, storage: &mut dyn NvStorage) -> Result<(), StorageError> {
        match self.offset {
            Some(offset) => {
                save_record(storage, offset, &self.value)?;
                debug!(offset, version = S::VERSION, "state saved");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Restores the stored record, or reverts to defaults and persists them
    /// when the stored version does not match.
    pub fn restore(&mut self, storage: &mut dyn NvStorage) -> Result<RestoreOutcome, StorageError> {
        let Some(offset) = self.offset else {
            return Ok(RestoreOutcome::Unassigned);
        };
        match load_record::<S>(storage, offset)? {
            Ok(value) => {
                self.value = value;
                Ok(RestoreOutcome::Restored)
            }
            Err(stored_version) => {
                warn!(
                    offset,
                    stored_version,
                    expected_version = S::VERSION,
                    "stored state unusable, reverting to defaults"
                );
                self.reset();
                save_record(storage, offset, &self.value)?;
                Ok(RestoreOutcome::Healed { stored_version })
            }
        }
    }
}
