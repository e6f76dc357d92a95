use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::common::types::{Lsn, PageId, Rid, TxnId, INVALID_LSN, INVALID_PAGE_ID};

/// Fixed prefix of every record: size, lsn, txn_id, prev_lsn, type
pub const LOG_HEADER_SIZE: usize = 20;

#[derive(Error, Debug)]
pub enum LogRecordError {
    #[error("Log buffer truncated")]
    Truncated,
    #[error("Unknown log record type: {0}")]
    UnknownType(i32),
}

/// Record kinds, stored on the wire as an i32 discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum LogRecordType {
    Invalid = 0,
    Begin = 1,
    Commit = 2,
    Abort = 3,
    Insert = 4,
    Delete = 5,
    Update = 6,
    NewPage = 7,
}

impl LogRecordType {
    fn from_i32(value: i32) -> Result<Self, LogRecordError> {
        Ok(match value {
            0 => LogRecordType::Invalid,
            1 => LogRecordType::Begin,
            2 => LogRecordType::Commit,
            3 => LogRecordType::Abort,
            4 => LogRecordType::Insert,
            5 => LogRecordType::Delete,
            6 => LogRecordType::Update,
            7 => LogRecordType::NewPage,
            other => return Err(LogRecordError::UnknownType(other)),
        })
    }
}

/// Type-specific payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogPayload {
    /// BEGIN / COMMIT / ABORT carry no payload
    None,
    /// Tuple inserted at rid
    Insert { rid: Rid, tuple: Vec<u8> },
    /// Tuple deleted from rid (before-image kept for undo)
    Delete { rid: Rid, tuple: Vec<u8> },
    /// Tuple at rid rewritten
    Update {
        rid: Rid,
        old_tuple: Vec<u8>,
        new_tuple: Vec<u8>,
    },
    /// A fresh page linked after prev_page_id
    NewPage { prev_page_id: PageId, page_id: PageId },
}

/// One WAL entry. Wire format (little-endian):
/// `size:i32 | lsn:i32 | txn_id:i32 | prev_lsn:i32 | type:i32 | payload`.
/// BEGIN/COMMIT/ABORT are exactly the 20-byte header; NEWPAGE adds two page
/// ids (28 bytes total); INSERT/DELETE/UPDATE carry rid(s) and length-prefixed
/// tuple bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub txn_id: TxnId,
    pub prev_lsn: Lsn,
    pub record_type: LogRecordType,
    pub payload: LogPayload,
}

impl LogRecord {
    pub fn new_begin(txn_id: TxnId) -> Self {
        Self {
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn: INVALID_LSN,
            record_type: LogRecordType::Begin,
            payload: LogPayload::None,
        }
    }

    pub fn new_commit(txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self {
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn,
            record_type: LogRecordType::Commit,
            payload: LogPayload::None,
        }
    }

    pub fn new_abort(txn_id: TxnId, prev_lsn: Lsn) -> Self {
        Self {
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn,
            record_type: LogRecordType::Abort,
            payload: LogPayload::None,
        }
    }

    pub fn new_insert(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Vec<u8>) -> Self {
        Self {
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn,
            record_type: LogRecordType::Insert,
            payload: LogPayload::Insert { rid, tuple },
        }
    }

    pub fn new_delete(txn_id: TxnId, prev_lsn: Lsn, rid: Rid, tuple: Vec<u8>) -> Self {
        Self {
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn,
            record_type: LogRecordType::Delete,
            payload: LogPayload::Delete { rid, tuple },
        }
    }

    pub fn new_update(
        txn_id: TxnId,
        prev_lsn: Lsn,
        rid: Rid,
        old_tuple: Vec<u8>,
        new_tuple: Vec<u8>,
    ) -> Self {
        Self {
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn,
            record_type: LogRecordType::Update,
            payload: LogPayload::Update {
                rid,
                old_tuple,
                new_tuple,
            },
        }
    }

    pub fn new_page(txn_id: TxnId, prev_lsn: Lsn, prev_page_id: PageId, page_id: PageId) -> Self {
        Self {
            lsn: INVALID_LSN,
            txn_id,
            prev_lsn,
            record_type: LogRecordType::NewPage,
            payload: LogPayload::NewPage {
                prev_page_id,
                page_id,
            },
        }
    }

    /// Total on-disk size of this record
    pub fn size(&self) -> usize {
        LOG_HEADER_SIZE
            + match &self.payload {
                LogPayload::None => 0,
                LogPayload::Insert { tuple, .. } | LogPayload::Delete { tuple, .. } => {
                    8 + 4 + tuple.len()
                }
                LogPayload::Update {
                    old_tuple,
                    new_tuple,
                    ..
                } => 8 + 4 + old_tuple.len() + 4 + new_tuple.len(),
                LogPayload::NewPage { .. } => 8,
            }
    }

    pub fn serialize(&self, out: &mut Vec<u8>) {
        let start = out.len();
        out.resize(start + LOG_HEADER_SIZE, 0);

        LittleEndian::write_i32(&mut out[start..start + 4], self.size() as i32);
        LittleEndian::write_i32(&mut out[start + 4..start + 8], self.lsn);
        LittleEndian::write_i32(&mut out[start + 8..start + 12], self.txn_id as i32);
        LittleEndian::write_i32(&mut out[start + 12..start + 16], self.prev_lsn);
        LittleEndian::write_i32(&mut out[start + 16..start + 20], self.record_type as i32);

        match &self.payload {
            LogPayload::None => {}
            LogPayload::Insert { rid, tuple } | LogPayload::Delete { rid, tuple } => {
                write_rid(out, rid);
                write_bytes(out, tuple);
            }
            LogPayload::Update {
                rid,
                old_tuple,
                new_tuple,
            } => {
                write_rid(out, rid);
                write_bytes(out, old_tuple);
                write_bytes(out, new_tuple);
            }
            LogPayload::NewPage {
                prev_page_id,
                page_id,
            } => {
                let mut buf = [0u8; 8];
                LittleEndian::write_i32(&mut buf[0..4], *prev_page_id);
                LittleEndian::write_i32(&mut buf[4..8], *page_id);
                out.extend_from_slice(&buf);
            }
        }
    }

    /// Decode one record from the front of `buf`, returning it with the
    /// number of bytes consumed
    pub fn deserialize(buf: &[u8]) -> Result<(Self, usize), LogRecordError> {
        if buf.len() < LOG_HEADER_SIZE {
            return Err(LogRecordError::Truncated);
        }

        let size = LittleEndian::read_i32(&buf[0..4]) as usize;
        if size < LOG_HEADER_SIZE || buf.len() < size {
            return Err(LogRecordError::Truncated);
        }

        let lsn = LittleEndian::read_i32(&buf[4..8]);
        let txn_id = LittleEndian::read_i32(&buf[8..12]) as TxnId;
        let prev_lsn = LittleEndian::read_i32(&buf[12..16]);
        let record_type = LogRecordType::from_i32(LittleEndian::read_i32(&buf[16..20]))?;

        let body = &buf[LOG_HEADER_SIZE..size];
        let payload = match record_type {
            LogRecordType::Invalid | LogRecordType::Begin | LogRecordType::Commit
            | LogRecordType::Abort => LogPayload::None,
            LogRecordType::Insert => {
                let (rid, rest) = read_rid(body)?;
                let (tuple, _) = read_bytes(rest)?;
                LogPayload::Insert { rid, tuple }
            }
            LogRecordType::Delete => {
                let (rid, rest) = read_rid(body)?;
                let (tuple, _) = read_bytes(rest)?;
                LogPayload::Delete { rid, tuple }
            }
            LogRecordType::Update => {
                let (rid, rest) = read_rid(body)?;
                let (old_tuple, rest) = read_bytes(rest)?;
                let (new_tuple, _) = read_bytes(rest)?;
                LogPayload::Update {
                    rid,
                    old_tuple,
                    new_tuple,
                }
            }
            LogRecordType::NewPage => {
                if body.len() < 8 {
                    return Err(LogRecordError::Truncated);
                }
                LogPayload::NewPage {
                    prev_page_id: LittleEndian::read_i32(&body[0..4]),
                    page_id: LittleEndian::read_i32(&body[4..8]),
                }
            }
        };

        Ok((
            Self {
                lsn,
                txn_id,
                prev_lsn,
                record_type,
                payload,
            },
            size,
        ))
    }
}

fn write_rid(out: &mut Vec<u8>, rid: &Rid) {
    let mut buf = [0u8; 8];
    LittleEndian::write_i32(&mut buf[0..4], rid.page_id);
    LittleEndian::write_u32(&mut buf[4..8], rid.slot);
    out.extend_from_slice(&buf);
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    let mut len = [0u8; 4];
    LittleEndian::write_u32(&mut len, bytes.len() as u32);
    out.extend_from_slice(&len);
    out.extend_from_slice(bytes);
}

fn read_rid(buf: &[u8]) -> Result<(Rid, &[u8]), LogRecordError> {
    if buf.len() < 8 {
        return Err(LogRecordError::Truncated);
    }
    let rid = Rid::new(
        LittleEndian::read_i32(&buf[0..4]),
        LittleEndian::read_u32(&buf[4..8]),
    );
    Ok((rid, &buf[8..]))
}

fn read_bytes(buf: &[u8]) -> Result<(Vec<u8>, &[u8]), LogRecordError> {
    if buf.len() < 4 {
        return Err(LogRecordError::Truncated);
    }
    let len = LittleEndian::read_u32(&buf[0..4]) as usize;
    if buf.len() < 4 + len {
        return Err(LogRecordError::Truncated);
    }
    Ok((buf[4..4 + len].to_vec(), &buf[4 + len..]))
}

/// NEWPAGE records reference no predecessor on the first page of a chain
pub const NO_PREV_PAGE: PageId = INVALID_PAGE_ID;
