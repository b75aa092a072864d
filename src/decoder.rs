//! Advertisement field extraction.
//!
//! An advertisement block is a sequence of AD structures:
//! `[length] [type] [data; length - 1]`. Every lookup is bounded by both the
//! block and an explicit maximum field length, and a structure whose declared
//! length runs past the block ends the walk. Anything missing or malformed
//! comes back as "absent", never as an error.

use uuid::Uuid;

use crate::radio::RawAdvertisement;

/// Link-layer limit for legacy advertising payloads.
pub const ADV_MAX_LEN: usize = 31;

/// Shown wherever a device did not advertise a name.
pub const UNKNOWN_NAME: &str = "Unknown";

/// AD type tags from the Bluetooth assigned numbers.
pub mod ad_type {
    pub const SHORT_LOCAL_NAME: u8 = 0x08;
    pub const COMPLETE_LOCAL_NAME: u8 = 0x09;
    pub const SERVICE_DATA_128BIT_UUID: u8 = 0x21;
    pub const MANUFACTURER_SPECIFIC_DATA: u8 = 0xFF;
}

const UUID_LEN: usize = 16;

/// Beacon sub-identifiers carried at the tail of manufacturer data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MajorMinor {
    pub major: u16,
    pub minor: u16,
}

/// Fields decoded from one advertisement. Owns all of its data, so it
/// outlives the scan buffer it was decoded from.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedDevice {
    pub address: String,
    pub rssi: i16,
    pub name: Option<String>,
    pub service_uuids: Vec<Uuid>,
    pub major_minor: Option<MajorMinor>,
}

impl DecodedDevice {
    pub fn decode(raw: &RawAdvertisement) -> Self {
        let block = raw.data();
        DecodedDevice {
            address: raw.address().to_string(),
            rssi: raw.rssi(),
            name: extract_name(block, ADV_MAX_LEN),
            service_uuids: extract_service_uuids(block, ADV_MAX_LEN),
            major_minor: extract_major_minor(block, ADV_MAX_LEN),
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN_NAME)
    }
}

/// Return the payload of the first AD structure tagged `tag`, cut to at most
/// `max_len` bytes. Empty when the tag is absent or the block is malformed
/// before reaching it.
pub fn find_field(block: &[u8], tag: u8, max_len: usize) -> &[u8] {
    let mut pos = 0;
    while pos < block.len() {
        let len = block[pos] as usize;
        // Zero length marks early termination (padding)
        if len == 0 {
            break;
        }
        let end = pos + 1 + len;
        if end > block.len() {
            break;
        }

        if block[pos + 1] == tag {
            let data = &block[pos + 2..end];
            return &data[..data.len().min(max_len)];
        }

        pos = end;
    }

    &[]
}

/// Complete local name, falling back to the shortened name.
pub fn extract_name(block: &[u8], max_len: usize) -> Option<String> {
    let mut field = find_field(block, ad_type::COMPLETE_LOCAL_NAME, max_len);
    if field.is_empty() {
        field = find_field(block, ad_type::SHORT_LOCAL_NAME, max_len);
    }

    if field.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(field).into_owned())
    }
}

/// Consecutive 16-byte records of the 128-bit service data field, in order.
/// A trailing partial record is dropped.
pub fn extract_service_uuids(block: &[u8], max_len: usize) -> Vec<Uuid> {
    find_field(block, ad_type::SERVICE_DATA_128BIT_UUID, max_len)
        .chunks_exact(UUID_LEN)
        .map(uuid_from_le_slice)
        .collect()
}

/// Big-endian major and minor taken from the last four bytes of the
/// manufacturer data, whatever its total length.
pub fn extract_major_minor(block: &[u8], max_len: usize) -> Option<MajorMinor> {
    let field = find_field(block, ad_type::MANUFACTURER_SPECIFIC_DATA, max_len);
    if field.len() < 4 {
        return None;
    }

    let tail = &field[field.len() - 4..];
    Some(MajorMinor {
        major: u16::from_be_bytes([tail[0], tail[1]]),
        minor: u16::from_be_bytes([tail[2], tail[3]]),
    })
}

// UUIDs travel little-endian over the air
fn uuid_from_le_slice(record: &[u8]) -> Uuid {
    let mut bytes = [0u8; UUID_LEN];
    bytes.copy_from_slice(record);
    bytes.reverse();
    Uuid::from_bytes(bytes)
}
