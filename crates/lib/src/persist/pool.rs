//! Pool-indexed binary encoding.
//!
//! Strings and shared objects are written once and referenced by a small integer
//! id afterwards. Shared objects are keyed by `Arc` pointer identity, so two
//! owners of the same `Arc` before storing still share one `Arc` after loading.
//!
//! # Layout
//!
//! ```text
//! header   := "QRBG" u32(version)
//! string   := u32(id) [u32(len) bytes]      -- payload only on first occurrence
//! path     := string of the platform's native bytes (UTF-16LE units on Windows)
//! object   := u32(id) [payload]             -- u32::MAX encodes "absent"
//! sequence := u32(count) element*
//! ```
//!
//! All integers are little-endian. Loaders must read fields in exactly the order
//! writers wrote them.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

pub const MAGIC: &[u8; 4] = b"QRBG";

/// Bumped whenever any entity changes its field order or encoding.
pub const FORMAT_VERSION: u32 = 2;

const NULL_ID: u32 = u32::MAX;

type SharedAny = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Error)]
pub enum PersistError {
  #[error("not a build graph (bad magic)")]
  BadMagic,

  #[error("unsupported build graph format version {found} (expected {expected})")]
  UnsupportedVersion { found: u32, expected: u32 },

  #[error("unexpected end of data at offset {0}")]
  UnexpectedEof(usize),

  #[error("invalid UTF-8 in stored string: {0}")]
  InvalidUtf8(#[from] std::string::FromUtf8Error),

  #[error("invalid string id {id} (pool holds {known})")]
  InvalidStringId { id: u32, known: usize },

  #[error("invalid object id {id} (pool holds {known})")]
  InvalidObjectId { id: u32, known: usize },

  #[error("object {0} refers to itself while loading")]
  CyclicObject(u32),

  #[error("object {id} is not a {expected}")]
  TypeMismatch { id: u32, expected: &'static str },

  #[error("invalid {what} tag {tag}")]
  InvalidTag { what: &'static str, tag: u8 },

  #[error("invalid stored {what} '{value}'")]
  InvalidValue { what: &'static str, value: String },

  #[error("required object is absent")]
  MissingObject,

  #[error("{0} trailing bytes after payload")]
  TrailingData(usize),
}

/// A value with a symmetric binary representation.
///
/// `load` must read exactly what `store` wrote, in the same order.
pub trait Persistent: Sized {
  fn store(&self, pool: &mut PoolWriter);
  fn load(pool: &mut PoolReader<'_>) -> Result<Self, PersistError>;
}

/// Encodes `value` with a file header.
pub fn encode<T: Persistent>(value: &T) -> Vec<u8> {
  let mut pool = PoolWriter::new();
  pool.write_header();
  value.store(&mut pool);
  pool.into_bytes()
}

/// Decodes a value written by [`encode`], rejecting trailing bytes.
pub fn decode<T: Persistent>(bytes: &[u8]) -> Result<T, PersistError> {
  let mut pool = PoolReader::new(bytes);
  pool.read_header()?;
  let value = T::load(&mut pool)?;
  pool.finish()?;
  Ok(value)
}

#[derive(Default)]
pub struct PoolWriter {
  buf: Vec<u8>,
  strings: HashMap<Vec<u8>, u32>,
  objects: HashMap<usize, u32>,
  // Stored objects stay alive until the writer is done so their addresses are not reused.
  keep_alive: Vec<SharedAny>,
}

impl PoolWriter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn write_header(&mut self) {
    self.buf.extend_from_slice(MAGIC);
    self.write_u32(FORMAT_VERSION);
  }

  pub fn write_u8(&mut self, value: u8) {
    self.buf.push(value);
  }

  pub fn write_bool(&mut self, value: bool) {
    self.write_u8(value as u8);
  }

  pub fn write_u32(&mut self, value: u32) {
    self.buf.extend_from_slice(&value.to_le_bytes());
  }

  pub fn write_i64(&mut self, value: i64) {
    self.buf.extend_from_slice(&value.to_le_bytes());
  }

  pub fn write_f64(&mut self, value: f64) {
    self.buf.extend_from_slice(&value.to_le_bytes());
  }

  /// Writes a container element count.
  pub fn write_len(&mut self, len: usize) {
    debug_assert!(len < NULL_ID as usize);
    self.write_u32(len as u32);
  }

  pub fn store_string(&mut self, value: &str) {
    self.store_bytes(value.as_bytes());
  }

  fn store_bytes(&mut self, value: &[u8]) {
    if let Some(&id) = self.strings.get(value) {
      self.write_u32(id);
      return;
    }
    let id = self.strings.len() as u32;
    self.strings.insert(value.to_vec(), id);
    self.write_u32(id);
    self.write_len(value.len());
    self.buf.extend_from_slice(value);
  }

  /// Stores the path's native encoding, so paths that are not valid UTF-8 survive.
  #[cfg(unix)]
  pub fn store_path(&mut self, path: &Path) {
    use std::os::unix::ffi::OsStrExt;
    self.store_bytes(path.as_os_str().as_bytes());
  }

  /// Stores the path as little-endian UTF-16 units, unpaired surrogates included.
  #[cfg(windows)]
  pub fn store_path(&mut self, path: &Path) {
    use std::os::windows::ffi::OsStrExt;
    let bytes: Vec<u8> = path.as_os_str().encode_wide().flat_map(u16::to_le_bytes).collect();
    self.store_bytes(&bytes);
  }

  pub fn store_string_list(&mut self, list: &[String]) {
    self.write_len(list.len());
    for s in list {
      self.store_string(s);
    }
  }

  pub fn store_string_set(&mut self, set: &BTreeSet<String>) {
    self.write_len(set.len());
    for s in set {
      self.store_string(s);
    }
  }

  pub fn store_string_map(&mut self, map: &BTreeMap<String, String>) {
    self.write_len(map.len());
    for (key, value) in map {
      self.store_string(key);
      self.store_string(value);
    }
  }

  /// Stores a shared object, writing its payload only the first time this `Arc` is seen.
  pub fn store_shared<T>(&mut self, object: &Arc<T>)
  where
    T: Persistent + Send + Sync + 'static,
  {
    let key = Arc::as_ptr(object) as *const () as usize;
    if let Some(&id) = self.objects.get(&key) {
      self.write_u32(id);
      return;
    }
    let id = self.objects.len() as u32;
    self.objects.insert(key, id);
    self.keep_alive.push(object.clone());
    self.write_u32(id);
    object.store(self);
  }

  pub fn store_optional<T>(&mut self, object: Option<&Arc<T>>)
  where
    T: Persistent + Send + Sync + 'static,
  {
    match object {
      Some(object) => self.store_shared(object),
      None => self.write_u32(NULL_ID),
    }
  }

  /// Stores a homogeneous sequence of shared objects, preserving order and count.
  pub fn store_container<T>(&mut self, items: &[Arc<T>])
  where
    T: Persistent + Send + Sync + 'static,
  {
    self.write_len(items.len());
    for item in items {
      self.store_shared(item);
    }
  }

  /// Stores a sequence of plain (unshared) values.
  pub fn store_values<T: Persistent>(&mut self, items: &[T]) {
    self.write_len(items.len());
    for item in items {
      item.store(self);
    }
  }

  pub fn len(&self) -> usize {
    self.buf.len()
  }

  pub fn is_empty(&self) -> bool {
    self.buf.is_empty()
  }

  pub fn into_bytes(self) -> Vec<u8> {
    self.buf
  }
}

pub struct PoolReader<'a> {
  data: &'a [u8],
  pos: usize,
  strings: Vec<Vec<u8>>,
  objects: Vec<Option<SharedAny>>,
}

impl<'a> PoolReader<'a> {
  pub fn new(data: &'a [u8]) -> Self {
    Self {
      data,
      pos: 0,
      strings: Vec::new(),
      objects: Vec::new(),
    }
  }

  pub fn read_header(&mut self) -> Result<(), PersistError> {
    if self.take(MAGIC.len())? != MAGIC {
      return Err(PersistError::BadMagic);
    }
    let found = self.read_u32()?;
    if found != FORMAT_VERSION {
      return Err(PersistError::UnsupportedVersion {
        found,
        expected: FORMAT_VERSION,
      });
    }
    Ok(())
  }

  fn take(&mut self, n: usize) -> Result<&'a [u8], PersistError> {
    let end = self
      .pos
      .checked_add(n)
      .filter(|&end| end <= self.data.len())
      .ok_or(PersistError::UnexpectedEof(self.pos))?;
    let bytes = &self.data[self.pos..end];
    self.pos = end;
    Ok(bytes)
  }

  fn take_array<const N: usize>(&mut self) -> Result<[u8; N], PersistError> {
    let mut out = [0u8; N];
    out.copy_from_slice(self.take(N)?);
    Ok(out)
  }

  pub fn read_u8(&mut self) -> Result<u8, PersistError> {
    Ok(self.take_array::<1>()?[0])
  }

  pub fn read_bool(&mut self) -> Result<bool, PersistError> {
    match self.read_u8()? {
      0 => Ok(false),
      1 => Ok(true),
      tag => Err(PersistError::InvalidTag { what: "bool", tag }),
    }
  }

  pub fn read_u32(&mut self) -> Result<u32, PersistError> {
    Ok(u32::from_le_bytes(self.take_array()?))
  }

  pub fn read_i64(&mut self) -> Result<i64, PersistError> {
    Ok(i64::from_le_bytes(self.take_array()?))
  }

  pub fn read_f64(&mut self) -> Result<f64, PersistError> {
    Ok(f64::from_le_bytes(self.take_array()?))
  }

  pub fn read_len(&mut self) -> Result<usize, PersistError> {
    Ok(self.read_u32()? as usize)
  }

  pub fn load_string(&mut self) -> Result<String, PersistError> {
    Ok(String::from_utf8(self.load_bytes()?)?)
  }

  fn load_bytes(&mut self) -> Result<Vec<u8>, PersistError> {
    let id = self.read_u32()?;
    let idx = id as usize;
    if idx < self.strings.len() {
      return Ok(self.strings[idx].clone());
    }
    if idx != self.strings.len() {
      return Err(PersistError::InvalidStringId {
        id,
        known: self.strings.len(),
      });
    }
    let len = self.read_len()?;
    let value = self.take(len)?.to_vec();
    self.strings.push(value.clone());
    Ok(value)
  }

  #[cfg(unix)]
  pub fn load_path(&mut self) -> Result<PathBuf, PersistError> {
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;
    Ok(PathBuf::from(OsString::from_vec(self.load_bytes()?)))
  }

  #[cfg(windows)]
  pub fn load_path(&mut self) -> Result<PathBuf, PersistError> {
    use std::ffi::OsString;
    use std::os::windows::ffi::OsStringExt;
    let bytes = self.load_bytes()?;
    if bytes.len() % 2 != 0 {
      return Err(PersistError::InvalidValue {
        what: "path",
        value: format!("{} bytes of UTF-16", bytes.len()),
      });
    }
    let wide: Vec<u16> = bytes.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect();
    Ok(PathBuf::from(OsString::from_wide(&wide)))
  }

  pub fn load_string_list(&mut self) -> Result<Vec<String>, PersistError> {
    let count = self.read_len()?;
    (0..count).map(|_| self.load_string()).collect()
  }

  pub fn load_string_set(&mut self) -> Result<BTreeSet<String>, PersistError> {
    let count = self.read_len()?;
    (0..count).map(|_| self.load_string()).collect()
  }

  pub fn load_string_map(&mut self) -> Result<BTreeMap<String, String>, PersistError> {
    let count = self.read_len()?;
    let mut map = BTreeMap::new();
    for _ in 0..count {
      let key = self.load_string()?;
      let value = self.load_string()?;
      map.insert(key, value);
    }
    Ok(map)
  }

  pub fn load_optional<T>(&mut self) -> Result<Option<Arc<T>>, PersistError>
  where
    T: Persistent + Send + Sync + 'static,
  {
    let id = self.read_u32()?;
    if id == NULL_ID {
      return Ok(None);
    }

    let idx = id as usize;
    if idx < self.objects.len() {
      let object = self.objects[idx].clone().ok_or(PersistError::CyclicObject(id))?;
      return object.downcast::<T>().map(Some).map_err(|_| PersistError::TypeMismatch {
        id,
        expected: std::any::type_name::<T>(),
      });
    }
    if idx != self.objects.len() {
      return Err(PersistError::InvalidObjectId {
        id,
        known: self.objects.len(),
      });
    }

    // Reserve the slot first: nested objects in the payload take the following ids.
    self.objects.push(None);
    let object = Arc::new(T::load(self)?);
    self.objects[idx] = Some(object.clone() as SharedAny);
    Ok(Some(object))
  }

  pub fn load_shared<T>(&mut self) -> Result<Arc<T>, PersistError>
  where
    T: Persistent + Send + Sync + 'static,
  {
    self.load_optional()?.ok_or(PersistError::MissingObject)
  }

  pub fn load_container<T>(&mut self) -> Result<Vec<Arc<T>>, PersistError>
  where
    T: Persistent + Send + Sync + 'static,
  {
    let count = self.read_len()?;
    (0..count).map(|_| self.load_shared()).collect()
  }

  pub fn load_values<T: Persistent>(&mut self) -> Result<Vec<T>, PersistError> {
    let count = self.read_len()?;
    (0..count).map(|_| T::load(self)).collect()
  }

  /// Fails if bytes remain after the last value.
  pub fn finish(self) -> Result<(), PersistError> {
    let remaining = self.data.len() - self.pos;
    if remaining != 0 {
      return Err(PersistError::TrailingData(remaining));
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Debug, PartialEq)]
  struct Leaf {
    name: String,
    weight: i64,
  }

  impl Persistent for Leaf {
    fn store(&self, pool: &mut PoolWriter) {
      pool.store_string(&self.name);
      pool.write_i64(self.weight);
    }

    fn load(pool: &mut PoolReader<'_>) -> Result<Self, PersistError> {
      Ok(Self {
        name: pool.load_string()?,
        weight: pool.read_i64()?,
      })
    }
  }

  #[derive(Debug)]
  struct Pair {
    left: Arc<Leaf>,
    right: Arc<Leaf>,
    extra: Option<Arc<Leaf>>,
  }

  impl Persistent for Pair {
    fn store(&self, pool: &mut PoolWriter) {
      pool.store_shared(&self.left);
      pool.store_shared(&self.right);
      pool.store_optional(self.extra.as_ref());
    }

    fn load(pool: &mut PoolReader<'_>) -> Result<Self, PersistError> {
      Ok(Self {
        left: pool.load_shared()?,
        right: pool.load_shared()?,
        extra: pool.load_optional()?,
      })
    }
  }

  #[test]
  fn repeated_strings_are_written_once() {
    let mut pool = PoolWriter::new();
    pool.store_string("/src/main.cpp");
    let after_first = pool.len();
    pool.store_string("/src/main.cpp");
    assert_eq!(pool.len() - after_first, 4, "second occurrence is a bare id");

    let bytes = pool.into_bytes();
    let mut reader = PoolReader::new(&bytes);
    assert_eq!(reader.load_string().unwrap(), "/src/main.cpp");
    assert_eq!(reader.load_string().unwrap(), "/src/main.cpp");
    reader.finish().unwrap();
  }

  #[test]
  fn sharing_survives_round_trip() {
    let shared = Arc::new(Leaf {
      name: "common".to_string(),
      weight: 7,
    });
    let pair = Pair {
      left: shared.clone(),
      right: shared,
      extra: None,
    };

    let loaded: Pair = decode(&encode(&pair)).unwrap();
    assert!(Arc::ptr_eq(&loaded.left, &loaded.right));
    assert_eq!(*loaded.left, *pair.left);
    assert!(loaded.extra.is_none());
  }

  #[test]
  fn distinct_objects_stay_distinct() {
    let pair = Pair {
      left: Arc::new(Leaf {
        name: "a".to_string(),
        weight: 1,
      }),
      right: Arc::new(Leaf {
        name: "a".to_string(),
        weight: 1,
      }),
      extra: Some(Arc::new(Leaf {
        name: "b".to_string(),
        weight: -3,
      })),
    };

    let loaded: Pair = decode(&encode(&pair)).unwrap();
    assert!(!Arc::ptr_eq(&loaded.left, &loaded.right));
    assert_eq!(loaded.extra.as_deref(), pair.extra.as_deref());
  }

  #[test]
  fn rejects_bad_magic() {
    let err = decode::<Leaf>(b"NOPE\x01\x00\x00\x00").unwrap_err();
    assert!(matches!(err, PersistError::BadMagic));
  }

  #[test]
  fn rejects_other_versions() {
    let mut bytes = MAGIC.to_vec();
    bytes.extend_from_slice(&(FORMAT_VERSION + 1).to_le_bytes());
    let err = decode::<Leaf>(&bytes).unwrap_err();
    assert!(matches!(err, PersistError::UnsupportedVersion { found, .. } if found == FORMAT_VERSION + 1));
  }

  #[test]
  fn truncated_payload_is_an_error() {
    let leaf = Leaf {
      name: "x".to_string(),
      weight: 99,
    };
    let bytes = encode(&leaf);
    let err = decode::<Leaf>(&bytes[..bytes.len() - 3]).unwrap_err();
    assert!(matches!(err, PersistError::UnexpectedEof(_)));
  }

  #[test]
  fn trailing_bytes_are_an_error() {
    let mut bytes = encode(&Leaf {
      name: "x".to_string(),
      weight: 1,
    });
    bytes.push(0);
    assert!(matches!(decode::<Leaf>(&bytes), Err(PersistError::TrailingData(1))));
  }

  #[test]
  fn forward_string_reference_is_rejected() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&5u32.to_le_bytes());
    let mut reader = PoolReader::new(&bytes);
    assert!(matches!(
      reader.load_string(),
      Err(PersistError::InvalidStringId { id: 5, known: 0 })
    ));
  }

  #[test]
  fn string_map_round_trip() {
    let mut map = BTreeMap::new();
    map.insert("PATH".to_string(), "/usr/bin".to_string());
    map.insert("CC".to_string(), "gcc".to_string());

    let mut pool = PoolWriter::new();
    pool.store_string_map(&map);
    let bytes = pool.into_bytes();
    let mut reader = PoolReader::new(&bytes);
    assert_eq!(reader.load_string_map().unwrap(), map);
  }
}
