use std::io;

use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;

use raven_chain::block::{self, Header};
use raven_chain::compactint::CompactInt;
use raven_chain::{RavenDeserialize, SerializationError};

use crate::constants::MAX_HEADERS_PER_MESSAGE;

/// A validated `headers` payload.
///
/// Header records are 81 bytes (an 80-byte header plus a zero VarInt tx
/// count) before the KAWPOW activation time and 121 bytes after it, and a
/// single batch may straddle the boundary. The batch keeps the raw bytes and
/// the scan results, so per-record access picks the right stride without
/// reparsing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeadersBatch {
    /// The record region of the payload, after the leading count.
    raw: Bytes,
    /// Number of header records.
    count: usize,
    /// Index of the first 121-byte record, or `count` if every record is
    /// 81 bytes.
    start_new_header: usize,
    /// Byte offset in `raw` where 121-byte records begin.
    start_new_header_size: usize,
}

/// Strides of the two record layouts, including the trailing tx count.
const OLD_RECORD_LEN: usize = 81;
const NEW_RECORD_LEN: usize = 121;

/// Offset of the timestamp within a record.
const TIME_OFFSET: usize = 68;

impl HeadersBatch {
    /// Parse and validate a raw `headers` payload.
    ///
    /// The stride switches at the first record whose timestamp reaches
    /// `kawpow_activation`; after locating the switch point the total length
    /// must match the record layout exactly, so a batch can never leave
    /// unread trailing bytes.
    pub fn parse(payload: &[u8], kawpow_activation: u32) -> Result<Self, SerializationError> {
        let mut cursor = io::Cursor::new(payload);
        let count = CompactInt::raven_deserialize(&mut cursor)?.value() as usize;
        if count > MAX_HEADERS_PER_MESSAGE {
            return Err(SerializationError::Parse("too many headers in message"));
        }
        let raw = &payload[cursor.position() as usize..];

        let mut start_new_header = count;
        let mut start_new_header_size = raw.len();
        let mut pos = 0;
        for index in 0..count {
            if pos + TIME_OFFSET + 4 > raw.len() {
                return Err(SerializationError::Parse("headers message truncated"));
            }
            let timestamp = LittleEndian::read_u32(&raw[pos + TIME_OFFSET..]);
            if timestamp >= kawpow_activation {
                start_new_header = index;
                start_new_header_size = pos;
                break;
            }
            pos += OLD_RECORD_LEN;
        }

        let expected = if start_new_header == count {
            OLD_RECORD_LEN * count
        } else {
            start_new_header_size + NEW_RECORD_LEN * (count - start_new_header)
        };
        if expected != raw.len() {
            return Err(SerializationError::Parse(
                "headers length does not match record layout",
            ));
        }

        Ok(HeadersBatch {
            raw: Bytes::copy_from_slice(raw),
            count,
            start_new_header,
            start_new_header_size,
        })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Index of the first 121-byte record, or `len()` if there is none.
    pub fn kawpow_start(&self) -> usize {
        self.start_new_header
    }

    fn record_offset(&self, index: usize) -> usize {
        if index < self.start_new_header {
            OLD_RECORD_LEN * index
        } else {
            self.start_new_header_size + NEW_RECORD_LEN * (index - self.start_new_header)
        }
    }

    fn is_new_layout(&self, index: usize) -> bool {
        index >= self.start_new_header
    }

    /// The raw record at `index`, including its trailing tx count.
    pub fn record(&self, index: usize) -> &[u8] {
        assert!(index < self.count);
        let offset = self.record_offset(index);
        let len = if self.is_new_layout(index) {
            NEW_RECORD_LEN
        } else {
            OLD_RECORD_LEN
        };
        &self.raw[offset..offset + len]
    }

    /// The timestamp of the record at `index`.
    pub fn timestamp(&self, index: usize) -> u32 {
        LittleEndian::read_u32(&self.record(index)[TIME_OFFSET..])
    }

    /// Timestamp of the first record, or zero for an empty batch.
    pub fn first_timestamp(&self) -> u32 {
        if self.count > 0 {
            self.timestamp(0)
        } else {
            0
        }
    }

    /// Timestamp of the last record, or zero for an empty batch.
    pub fn last_timestamp(&self) -> u32 {
        if self.count > 0 {
            self.timestamp(self.count - 1)
        } else {
            0
        }
    }

    /// The 80-byte region fed to the era hash functions: the whole classic
    /// header, or the common prefix plus the height field of a KAWPOW record.
    pub fn prefix80(&self, index: usize) -> [u8; 80] {
        let mut prefix = [0u8; 80];
        prefix.copy_from_slice(&self.record(index)[0..80]);
        prefix
    }

    /// The (height, nonce64, mix_hash) trailer of a 121-byte record.
    pub fn kawpow_parts(&self, index: usize) -> Option<(u32, u64, block::Hash)> {
        if !self.is_new_layout(index) {
            return None;
        }
        let record = self.record(index);
        let height = LittleEndian::read_u32(&record[76..80]);
        let nonce64 = LittleEndian::read_u64(&record[80..88]);
        let mut mix = [0u8; 32];
        mix.copy_from_slice(&record[88..120]);
        Some((height, nonce64, block::Hash(mix)))
    }

    /// Parse the record at `index` into a [`Header`].
    pub fn header(&self, index: usize, kawpow_activation: u32) -> Result<Header, SerializationError> {
        Header::parse(self.record(index), kawpow_activation)
    }

    /// Reassemble the payload: the count followed by the raw records.
    pub fn to_payload(&self) -> Vec<u8> {
        use raven_chain::RavenSerialize;

        let mut payload = Vec::with_capacity(9 + self.raw.len());
        CompactInt::from(self.count)
            .raven_serialize(&mut payload)
            .expect("serializing into a Vec is infallible");
        payload.extend_from_slice(&self.raw);
        payload
    }
}
