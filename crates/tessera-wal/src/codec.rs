//! Binary layout of log records
//!
//! Every record is a (LogKey, LogValue) pair with a fixed little-endian
//! layout. Encoding is deterministic: the same record always produces the
//! same bytes. Strings and byte arrays are u32-length-prefixed; optional
//! fields carry a one-byte presence flag.
//!
//! ```text
//! KEY   := u8  event_tag
//!          i64 sequence
//!          i32 tablet_id
//!          opt extent      (utf8 table_id, opt bytes end_row, opt bytes prev_end_row)
//!          opt utf8 filename
//!          opt utf8 session_id
//! VALUE := u32 mutation_count
//!          mutation_count x { u32 row_len, row,
//!                             u32 update_count,
//!                             update_count x { utf8 family, utf8 qualifier, bytes value } }
//! ```
//!
//! Unknown event tags on read are a fatal decode error.

use std::io::Read;

use crate::error::{WalError, WalResult};

/// Magic line opening every current-format log file
pub const V3_MAGIC: &[u8] = b"--- Log File Header (v3) ---";

/// Magic line of the legacy format, still supported on read
pub const V2_MAGIC: &[u8] = b"--- Log File Header (v2) ---";

/// Largest single field (row, value, string) a reader will allocate for
const MAX_FIELD_SIZE: u32 = 32 * 1024 * 1024;

/// Sanity bound on per-record mutation and update counts
const MAX_COUNT: u32 = 1 << 24;

/// Event tag of a log record key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogEvent {
    /// First record of every file; carries the writer session id
    Open = 1,
    /// Binds a tablet id to its extent for the rest of the file
    DefineTablet = 2,
    /// A minor compaction began writing the named file
    CompactionStart = 3,
    /// The most recent compaction for the tablet is durable
    CompactionFinish = 4,
    /// One batch of row mutations for a tablet
    ManyMutations = 5,
}

impl LogEvent {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(LogEvent::Open),
            2 => Some(LogEvent::DefineTablet),
            3 => Some(LogEvent::CompactionStart),
            4 => Some(LogEvent::CompactionFinish),
            5 => Some(LogEvent::ManyMutations),
            _ => None,
        }
    }
}

/// Range of rows a tablet covers: (prev_end_row, end_row]. None means
/// unbounded on that side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabletExtent {
    pub table_id: String,
    pub end_row: Option<Vec<u8>>,
    pub prev_end_row: Option<Vec<u8>>,
}

impl TabletExtent {
    pub fn new(
        table_id: impl Into<String>,
        end_row: Option<Vec<u8>>,
        prev_end_row: Option<Vec<u8>>,
    ) -> Self {
        Self {
            table_id: table_id.into(),
            end_row,
            prev_end_row,
        }
    }
}

/// One column write within a mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnUpdate {
    pub family: String,
    pub qualifier: String,
    pub value: Vec<u8>,
}

/// All updates to a single row, applied atomically
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub row: Vec<u8>,
    pub updates: Vec<ColumnUpdate>,
}

impl Mutation {
    pub fn new(row: impl Into<Vec<u8>>) -> Self {
        Self {
            row: row.into(),
            updates: Vec::new(),
        }
    }

    /// Builder-style column write
    pub fn put(mut self, family: &str, qualifier: &str, value: &[u8]) -> Self {
        self.updates.push(ColumnUpdate {
            family: family.to_string(),
            qualifier: qualifier.to_string(),
            value: value.to_vec(),
        });
        self
    }
}

/// Key half of a log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogKey {
    pub event: LogEvent,
    pub sequence: i64,
    pub tablet_id: i32,
    pub extent: Option<TabletExtent>,
    pub filename: Option<String>,
    pub session_id: Option<String>,
}

impl LogKey {
    pub fn open(session_id: impl Into<String>) -> Self {
        Self {
            event: LogEvent::Open,
            sequence: -1,
            tablet_id: -1,
            extent: None,
            filename: None,
            session_id: Some(session_id.into()),
        }
    }

    pub fn define_tablet(sequence: i64, tablet_id: i32, extent: TabletExtent) -> Self {
        Self {
            event: LogEvent::DefineTablet,
            sequence,
            tablet_id,
            extent: Some(extent),
            filename: None,
            session_id: None,
        }
    }

    pub fn compaction_start(sequence: i64, tablet_id: i32, filename: impl Into<String>) -> Self {
        Self {
            event: LogEvent::CompactionStart,
            sequence,
            tablet_id,
            extent: None,
            filename: Some(filename.into()),
            session_id: None,
        }
    }

    pub fn compaction_finish(sequence: i64, tablet_id: i32) -> Self {
        Self {
            event: LogEvent::CompactionFinish,
            sequence,
            tablet_id,
            extent: None,
            filename: None,
            session_id: None,
        }
    }

    pub fn many_mutations(sequence: i64, tablet_id: i32) -> Self {
        Self {
            event: LogEvent::ManyMutations,
            sequence,
            tablet_id,
            extent: None,
            filename: None,
            session_id: None,
        }
    }
}

/// Value half of a log record. Empty for everything but MANY_MUTATIONS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogValue {
    pub mutations: Vec<Mutation>,
}

impl LogValue {
    pub fn empty() -> Self {
        Self {
            mutations: Vec::new(),
        }
    }

    pub fn new(mutations: Vec<Mutation>) -> Self {
        Self { mutations }
    }
}

/// Serialize one record. Deterministic: field order and widths are fixed.
pub fn encode_record(key: &LogKey, value: &LogValue) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);

    buf.push(key.event.tag());
    buf.extend_from_slice(&key.sequence.to_le_bytes());
    buf.extend_from_slice(&key.tablet_id.to_le_bytes());

    match &key.extent {
        Some(extent) => {
            buf.push(1);
            put_utf8(&mut buf, &extent.table_id);
            put_opt_bytes(&mut buf, extent.end_row.as_deref());
            put_opt_bytes(&mut buf, extent.prev_end_row.as_deref());
        }
        None => buf.push(0),
    }

    put_opt_utf8(&mut buf, key.filename.as_deref());
    put_opt_utf8(&mut buf, key.session_id.as_deref());

    buf.extend_from_slice(&(value.mutations.len() as u32).to_le_bytes());
    for mutation in &value.mutations {
        put_bytes(&mut buf, &mutation.row);
        buf.extend_from_slice(&(mutation.updates.len() as u32).to_le_bytes());
        for update in &mutation.updates {
            put_utf8(&mut buf, &update.family);
            put_utf8(&mut buf, &update.qualifier);
            put_bytes(&mut buf, &update.value);
        }
    }

    buf
}

/// Decode the next record from a plaintext stream.
///
/// Ok(None) on a clean end of stream (no bytes before the next record);
/// Corrupt if the stream ends inside a record.
pub fn read_record(reader: &mut dyn Read) -> WalResult<Option<(LogKey, LogValue)>> {
    let mut tag_buf = [0u8; 1];
    loop {
        match reader.read(&mut tag_buf) {
            Ok(0) => return Ok(None),
            Ok(_) => break,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(map_read_err(e)),
        }
    }

    let event = LogEvent::from_tag(tag_buf[0]).ok_or(WalError::UnknownEvent { tag: tag_buf[0] })?;

    let sequence = i64::from_le_bytes(read_array(reader)?);
    let tablet_id = i32::from_le_bytes(read_array(reader)?);

    let extent = if read_flag(reader)? {
        let table_id = read_utf8(reader)?;
        let end_row = read_opt_bytes(reader)?;
        let prev_end_row = read_opt_bytes(reader)?;
        Some(TabletExtent {
            table_id,
            end_row,
            prev_end_row,
        })
    } else {
        None
    };

    let filename = read_opt_utf8(reader)?;
    let session_id = read_opt_utf8(reader)?;

    let mutation_count = read_u32_count(reader, "mutation count")?;
    let mut mutations = Vec::with_capacity(mutation_count.min(1024) as usize);
    for _ in 0..mutation_count {
        let row = read_bytes(reader)?;
        let update_count = read_u32_count(reader, "column update count")?;
        let mut updates = Vec::with_capacity(update_count.min(1024) as usize);
        for _ in 0..update_count {
            updates.push(ColumnUpdate {
                family: read_utf8(reader)?,
                qualifier: read_utf8(reader)?,
                value: read_bytes(reader)?,
            });
        }
        mutations.push(Mutation { row, updates });
    }

    Ok(Some((
        LogKey {
            event,
            sequence,
            tablet_id,
            extent,
            filename,
            session_id,
        },
        LogValue { mutations },
    )))
}

/// Serialize the plaintext prefix of a v3 file: magic, cipher module name,
/// module parameter blob. Record frames follow.
pub fn encode_file_header(module_name: &str, params: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(V3_MAGIC.len() + 8 + module_name.len() + params.len());
    buf.extend_from_slice(V3_MAGIC);
    put_utf8(&mut buf, module_name);
    put_bytes(&mut buf, params);
    buf
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

fn put_utf8(buf: &mut Vec<u8>, s: &str) {
    put_bytes(buf, s.as_bytes());
}

fn put_opt_bytes(buf: &mut Vec<u8>, bytes: Option<&[u8]>) {
    match bytes {
        Some(b) => {
            buf.push(1);
            put_bytes(buf, b);
        }
        None => buf.push(0),
    }
}

fn put_opt_utf8(buf: &mut Vec<u8>, s: Option<&str>) {
    put_opt_bytes(buf, s.map(|s| s.as_bytes()));
}

fn map_read_err(e: std::io::Error) -> WalError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        WalError::Corrupt {
            reason: "stream ended inside a record".to_string(),
        }
    } else if e.kind() == std::io::ErrorKind::InvalidData {
        WalError::Corrupt {
            reason: e.to_string(),
        }
    } else {
        e.into()
    }
}

fn read_array<const N: usize>(reader: &mut dyn Read) -> WalResult<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf).map_err(map_read_err)?;
    Ok(buf)
}

fn read_flag(reader: &mut dyn Read) -> WalResult<bool> {
    let [flag] = read_array::<1>(reader)?;
    match flag {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(WalError::Corrupt {
            reason: format!("presence flag must be 0 or 1, found {}", other),
        }),
    }
}

pub(crate) fn read_u32_count(reader: &mut dyn Read, what: &str) -> WalResult<u32> {
    let count = u32::from_le_bytes(read_array(reader)?);
    if count > MAX_COUNT {
        return Err(WalError::Corrupt {
            reason: format!("{} {} exceeds limit {}", what, count, MAX_COUNT),
        });
    }
    Ok(count)
}

pub(crate) fn read_bytes(reader: &mut dyn Read) -> WalResult<Vec<u8>> {
    let len = u32::from_le_bytes(read_array(reader)?);
    // Validate before allocating
    if len > MAX_FIELD_SIZE {
        return Err(WalError::Corrupt {
            reason: format!("field length {} exceeds limit {}", len, MAX_FIELD_SIZE),
        });
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).map_err(map_read_err)?;
    Ok(buf)
}

pub(crate) fn read_utf8(reader: &mut dyn Read) -> WalResult<String> {
    let bytes = read_bytes(reader)?;
    String::from_utf8(bytes).map_err(|e| WalError::Corrupt {
        reason: format!("string field is not UTF-8: {}", e),
    })
}

fn read_opt_bytes(reader: &mut dyn Read) -> WalResult<Option<Vec<u8>>> {
    if read_flag(reader)? {
        Ok(Some(read_bytes(reader)?))
    } else {
        Ok(None)
    }
}

fn read_opt_utf8(reader: &mut dyn Read) -> WalResult<Option<String>> {
    if read_flag(reader)? {
        Ok(Some(read_utf8(reader)?))
    } else {
        Ok(None)
    }
}
