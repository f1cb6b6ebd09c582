//! NVS (Non-Volatile Storage) partition binary builder (spec.md §3, §4.6).
//!
//! Builds a paged, CRC-protected key/value store: each 4 KiB page has a
//! 32-byte header, a 32-byte 2-bit-per-slot state bitmap, and up to 126
//! 32-byte entry slots. Namespace names are themselves stored as `U8`
//! entries in namespace 0, whose value is the namespace index assigned to
//! later entries.

use std::collections::HashMap;

use crate::checksum::crc32;
use crate::error::Error;

const PAGE_SIZE: usize = 4096;
const HEADER_SIZE: usize = 32;
const BITMAP_SIZE: usize = 32;
const SLOT_SIZE: usize = 32;
const SLOTS_PER_PAGE: usize = 126;

/// Default total size of an NVS partition binary.
pub const DEFAULT_PARTITION_SIZE: usize = 0x3000;

const PAGE_STATE_ACTIVE: u32 = 0xFFFF_FFFE;
const PAGE_STATE_FULL: u32 = 0xFFFF_FFFC;
const PAGE_VERSION: u8 = 0xFE;

const MAX_KEY_LEN: usize = 15;
const MAX_STRING_LEN: usize = 4000;
const MAX_NAMESPACES: u8 = 254;
const NON_BLOB_CHUNK: u8 = 0xFF;

/// NVS entry type tags (spec.md §6).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum NvsType {
    U8 = 0x01,
    I8 = 0x11,
    U16 = 0x02,
    I16 = 0x12,
    U32 = 0x04,
    I32 = 0x14,
    U64 = 0x08,
    I64 = 0x18,
    Str = 0x21,
}

/// A value to be written by [`NvsBuilder::write_entry`]. The numeric type
/// actually stored is chosen from the value's range per spec.md §4.6.
#[derive(Debug, Clone)]
pub enum NvsValue {
    I64(i64),
    Str(String),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum SlotState {
    Empty,
    Written,
    Erased,
}

impl SlotState {
    fn bits(self) -> u8 {
        match self {
            SlotState::Empty => 0b11,
            SlotState::Written => 0b10,
            SlotState::Erased => 0b00,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum PageState {
    Active,
    Full,
}

struct Page {
    sequence: u32,
    state: PageState,
    slots: Vec<[u8; SLOT_SIZE]>,
    slot_states: Vec<SlotState>,
    used: usize,
    hash_index: HashMap<u32, usize>,
}

impl Page {
    fn new(sequence: u32) -> Self {
        Self {
            sequence,
            state: PageState::Active,
            slots: vec![[0xFFu8; SLOT_SIZE]; SLOTS_PER_PAGE],
            slot_states: vec![SlotState::Empty; SLOTS_PER_PAGE],
            used: 0,
            hash_index: HashMap::new(),
        }
    }

    fn free_slots(&self) -> usize {
        SLOTS_PER_PAGE - self.used
    }

    fn set_state(&mut self, state: PageState) {
        self.state = state;
    }

    /// Append an entry spanning `span` slots starting at the first free
    /// slot, marking every slot it occupies as `Written`.
    fn append(&mut self, span: usize, header: [u8; SLOT_SIZE], data_slots: &[[u8; SLOT_SIZE]]) {
        debug_assert_eq!(data_slots.len(), span - 1);
        let start = self.used;

        let hash = entry_hash_from_header(&header);
        self.hash_index.entry(hash).or_insert(start);

        self.slots[start] = header;
        self.slot_states[start] = SlotState::Written;
        for (i, data) in data_slots.iter().enumerate() {
            self.slots[start + 1 + i] = *data;
            self.slot_states[start + 1 + i] = SlotState::Written;
        }

        self.used += span;
    }

    fn header_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        let state_value = match self.state {
            PageState::Active => PAGE_STATE_ACTIVE,
            PageState::Full => PAGE_STATE_FULL,
        };
        buf[0..4].copy_from_slice(&state_value.to_le_bytes());
        buf[4..8].copy_from_slice(&self.sequence.to_le_bytes());
        buf[8] = PAGE_VERSION;
        for b in &mut buf[9..28] {
            *b = 0xFF;
        }
        let crc = crc32(&buf[4..28]);
        buf[28..32].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    fn bitmap_bytes(&self) -> [u8; BITMAP_SIZE] {
        let mut buf = [0xFFu8; BITMAP_SIZE];
        for (slot_index, state) in self.slot_states.iter().enumerate() {
            let byte_index = slot_index / 4;
            let bit_offset = (slot_index % 4) * 2;
            let mask = 0b11u8 << bit_offset;
            buf[byte_index] = (buf[byte_index] & !mask) | (state.bits() << bit_offset);
        }
        buf
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PAGE_SIZE);
        out.extend_from_slice(&self.header_bytes());
        out.extend_from_slice(&self.bitmap_bytes());
        for slot in &self.slots {
            out.extend_from_slice(slot);
        }
        debug_assert_eq!(out.len(), PAGE_SIZE);
        out
    }
}

fn entry_header_crc(header: &[u8; SLOT_SIZE]) -> u32 {
    let mut input = Vec::with_capacity(28);
    input.extend_from_slice(&header[0..4]);
    input.extend_from_slice(&header[8..32]);
    crc32(&input)
}

fn encode_key(key: &str) -> [u8; 16] {
    let mut buf = [0u8; 16];
    let bytes = key.as_bytes();
    buf[..bytes.len()].copy_from_slice(bytes);
    buf
}

/// Build a primitive entry header: namespace index, type tag, 8 bytes of
/// little-endian value data, key string.
fn build_primitive_header(ns: u8, key: &str, ty: NvsType, data: [u8; 8]) -> [u8; SLOT_SIZE] {
    let mut buf = [0u8; SLOT_SIZE];
    buf[0] = ns;
    buf[1] = ty as u8;
    buf[2] = 1; // span
    buf[3] = NON_BLOB_CHUNK;
    buf[8..24].copy_from_slice(&encode_key(key));
    buf[24..32].copy_from_slice(&data);
    let crc = entry_header_crc(&buf);
    buf[4..8].copy_from_slice(&crc.to_le_bytes());
    buf
}

fn build_string_header(ns: u8, key: &str, span: u8, len: u16, string_crc: u32) -> [u8; SLOT_SIZE] {
    let mut buf = [0u8; SLOT_SIZE];
    buf[0] = ns;
    buf[1] = NvsType::Str as u8;
    buf[2] = span;
    buf[3] = NON_BLOB_CHUNK;
    buf[8..24].copy_from_slice(&encode_key(key));
    buf[24..26].copy_from_slice(&len.to_le_bytes());
    buf[26..28].copy_from_slice(&[0u8; 2]);
    buf[28..32].copy_from_slice(&string_crc.to_le_bytes());
    let crc = entry_header_crc(&buf);
    buf[4..8].copy_from_slice(&crc.to_le_bytes());
    buf
}

fn entry_hash_from_header(header: &[u8; SLOT_SIZE]) -> u32 {
    let ns = header[0];
    let chunk = header[3];
    let key_bytes = &header[8..24];
    let key_len = key_bytes.iter().position(|&b| b == 0).unwrap_or(16);
    let key = String::from_utf8_lossy(&key_bytes[..key_len]);
    entry_hash(ns, &key, chunk)
}

fn entry_hash(ns: u8, key: &str, chunk: u8) -> u32 {
    let input = format!("{ns}:{key}:{chunk}");
    crc32(input.as_bytes()) & 0x00FF_FFFF
}

/// Choose the numeric `NvsType` for an integer value per spec.md §4.6.
fn numeric_type_for(value: i64) -> NvsType {
    if value >= 0 {
        let v = value as u64;
        if v <= 0xFF {
            NvsType::U8
        } else if v <= 0xFFFF {
            NvsType::U16
        } else if v <= 0xFFFF_FFFF {
            NvsType::U32
        } else {
            NvsType::U64
        }
    } else if value.unsigned_abs() <= (1u64 << 7) {
        NvsType::I8
    } else if value.unsigned_abs() <= (1u64 << 15) {
        NvsType::I16
    } else if value.unsigned_abs() <= (1u64 << 31) {
        NvsType::I32
    } else {
        NvsType::I64
    }
}

fn numeric_data_bytes(ty: NvsType, value: i64) -> [u8; 8] {
    let mut buf = [0u8; 8];
    match ty {
        NvsType::U8 => buf[0] = value as u8,
        NvsType::I8 => buf[0..1].copy_from_slice(&(value as i8).to_le_bytes()),
        NvsType::U16 => buf[0..2].copy_from_slice(&(value as u16).to_le_bytes()),
        NvsType::I16 => buf[0..2].copy_from_slice(&(value as i16).to_le_bytes()),
        NvsType::U32 => buf[0..4].copy_from_slice(&(value as u32).to_le_bytes()),
        NvsType::I32 => buf[0..4].copy_from_slice(&(value as i32).to_le_bytes()),
        NvsType::U64 => buf.copy_from_slice(&(value as u64).to_le_bytes()),
        NvsType::I64 => buf.copy_from_slice(&value.to_le_bytes()),
        NvsType::Str => unreachable!("strings are encoded separately"),
    }
    buf
}

/// A decoded entry, as returned by reparsing a built binary in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEntry {
    pub namespace: u8,
    pub key: String,
    pub value: DecodedValue,
}

/// The value half of a [`DecodedEntry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedValue {
    I64(i64),
    Str(String),
}

/// Builds an NVS partition binary from an ordered sequence of
/// `(namespace, key, value)` writes.
pub struct NvsBuilder {
    partition_size: usize,
    pages: Vec<Page>,
    namespaces: HashMap<String, u8>,
    next_namespace_index: u8,
}

impl NvsBuilder {
    /// Create a builder for a partition of `partition_size` bytes (must be
    /// a multiple of 4 KiB), starting with one empty active page.
    pub fn new(partition_size: usize) -> Self {
        Self {
            partition_size,
            pages: vec![Page::new(0)],
            namespaces: HashMap::new(),
            next_namespace_index: 1,
        }
    }

    fn active_page_index(&self) -> usize {
        self.pages.len() - 1
    }

    fn seal_and_allocate(&mut self) {
        let sequence = self.pages.len() as u32;
        self.pages[self.active_page_index()].set_state(PageState::Full);
        self.pages.push(Page::new(sequence));
    }

    fn resolve_namespace_index(&mut self, namespace: &str) -> Result<u8, Error> {
        if let Some(&index) = self.namespaces.get(namespace) {
            return Ok(index);
        }

        if namespace.as_bytes().len() > MAX_KEY_LEN {
            return Err(Error::InvalidNvs(format!(
                "namespace '{namespace}' exceeds {MAX_KEY_LEN} characters"
            )));
        }

        if self.next_namespace_index > MAX_NAMESPACES {
            return Err(Error::InvalidNvs("too many namespaces".into()));
        }

        let index = self.next_namespace_index;

        loop {
            let header = build_primitive_header(0, namespace, NvsType::U8, {
                let mut buf = [0u8; 8];
                buf[0] = index;
                buf
            });
            let page = &mut self.pages[self.active_page_index()];
            if page.free_slots() >= 1 {
                page.append(1, header, &[]);
                break;
            }
            self.seal_and_allocate();
        }

        self.namespaces.insert(namespace.to_string(), index);
        self.next_namespace_index += 1;
        Ok(index)
    }

    /// Write one `(namespace, key, value)` triple, allocating namespace
    /// indices and pages as needed.
    pub fn write_entry(
        &mut self,
        namespace: &str,
        key: &str,
        value: NvsValue,
    ) -> Result<(), Error> {
        if key.as_bytes().len() > MAX_KEY_LEN {
            return Err(Error::InvalidNvs(format!(
                "key '{key}' exceeds {MAX_KEY_LEN} characters"
            )));
        }

        let ns_index = self.resolve_namespace_index(namespace)?;

        match value {
            NvsValue::I64(v) => {
                let ty = numeric_type_for(v);
                let data = numeric_data_bytes(ty, v);
                let header = build_primitive_header(ns_index, key, ty, data);
                self.append_with_growth(1, header, Vec::new());
                Ok(())
            }
            NvsValue::Str(s) => {
                let mut payload = s.into_bytes();
                payload.push(0); // NUL terminator
                if payload.len() > MAX_STRING_LEN {
                    return Err(Error::InvalidNvs(format!(
                        "string for key '{key}' exceeds {MAX_STRING_LEN} bytes including NUL"
                    )));
                }

                let data_slot_count = payload.len().div_ceil(SLOT_SIZE);
                let span = 1 + data_slot_count;
                let string_crc = crc32(&payload);

                let mut data_slots = Vec::with_capacity(data_slot_count);
                let mut remaining = payload.as_slice();
                for _ in 0..data_slot_count {
                    let mut slot = [0xFFu8; SLOT_SIZE];
                    let take = remaining.len().min(SLOT_SIZE);
                    slot[..take].copy_from_slice(&remaining[..take]);
                    data_slots.push(slot);
                    remaining = &remaining[take..];
                }

                let header =
                    build_string_header(ns_index, key, span as u8, payload.len() as u16, string_crc);
                self.append_with_growth(span, header, data_slots);
                Ok(())
            }
        }
    }

    fn append_with_growth(
        &mut self,
        span: usize,
        header: [u8; SLOT_SIZE],
        data_slots: Vec<[u8; SLOT_SIZE]>,
    ) {
        loop {
            let page = &mut self.pages[self.active_page_index()];
            if page.free_slots() >= span {
                page.append(span, header, &data_slots);
                return;
            }
            self.seal_and_allocate();
        }
    }

    /// Look up an entry by key, namespace and (for blob-style entries)
    /// chunk index, using the per-page hash index with a linear-scan
    /// fallback on collision or miss.
    pub fn find_entry(&self, key: &str, ns: u8, chunk: u8) -> Option<DecodedEntry> {
        let target_hash = entry_hash(ns, key, chunk);

        for page in &self.pages {
            if let Some(&slot_index) = page.hash_index.get(&target_hash) {
                if let Some(entry) = decode_entry_at(page, slot_index) {
                    if entry.namespace == ns && entry.key == key {
                        return Some(entry);
                    }
                }
            }
        }

        // Fallback: linear scan across all pages for matching headers.
        for page in &self.pages {
            let mut slot_index = 0;
            while slot_index < page.used {
                if page.slot_states[slot_index] == SlotState::Written {
                    let header = &page.slots[slot_index];
                    if header[0] == ns && header[3] == chunk {
                        if let Some(entry) = decode_entry_at(page, slot_index) {
                            if entry.key == key {
                                return Some(entry);
                            }
                        }
                    }
                    let span = header[2].max(1) as usize;
                    slot_index += span;
                } else {
                    slot_index += 1;
                }
            }
        }

        None
    }

    /// Serialize every page, then pad with `0xFF` up to the configured
    /// partition size.
    pub fn get_binary(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.partition_size);
        for page in &self.pages {
            out.extend_from_slice(&page.to_bytes());
        }
        out.resize(self.partition_size, 0xFF);
        out
    }

    /// All currently assigned namespaces, for diagnostics/tests.
    pub fn namespaces(&self) -> &HashMap<String, u8> {
        &self.namespaces
    }
}

fn decode_entry_at(page: &Page, slot_index: usize) -> Option<DecodedEntry> {
    let header = &page.slots[slot_index];
    let ns = header[0];
    let ty = header[1];
    let span = header[2].max(1) as usize;
    let key_bytes = &header[8..24];
    let key_len = key_bytes.iter().position(|&b| b == 0).unwrap_or(16);
    let key = String::from_utf8_lossy(&key_bytes[..key_len]).into_owned();

    if ty == NvsType::Str as u8 {
        let len = u16::from_le_bytes([header[24], header[25]]) as usize;
        let mut bytes = Vec::with_capacity(len);
        for slot in &page.slots[slot_index + 1..slot_index + span] {
            bytes.extend_from_slice(slot);
        }
        bytes.truncate(len);
        if bytes.last() == Some(&0) {
            bytes.pop();
        }
        let s = String::from_utf8_lossy(&bytes).into_owned();
        Some(DecodedEntry {
            namespace: ns,
            key,
            value: DecodedValue::Str(s),
        })
    } else {
        let data = &header[24..32];
        let value = match ty {
            t if t == NvsType::U8 as u8 => data[0] as i64,
            t if t == NvsType::I8 as u8 => i8::from_le_bytes([data[0]]) as i64,
            t if t == NvsType::U16 as u8 => u16::from_le_bytes([data[0], data[1]]) as i64,
            t if t == NvsType::I16 as u8 => i16::from_le_bytes([data[0], data[1]]) as i64,
            t if t == NvsType::U32 as u8 => {
                u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as i64
            }
            t if t == NvsType::I32 as u8 => {
                i32::from_le_bytes([data[0], data[1], data[2], data[3]]) as i64
            }
            t if t == NvsType::U64 as u8 => u64::from_le_bytes(data.try_into().ok()?) as i64,
            t if t == NvsType::I64 as u8 => i64::from_le_bytes(data.try_into().ok()?),
            _ => return None,
        };
        Some(DecodedEntry {
            namespace: ns,
            key,
            value: DecodedValue::I64(value),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_and_reads_back_primitive_and_string_entries() {
        let mut nvs = NvsBuilder::new(DEFAULT_PARTITION_SIZE);
        nvs.write_entry("storage", "counter", NvsValue::I64(42))
            .unwrap();
        nvs.write_entry("storage", "name", NvsValue::Str("hello".into()))
            .unwrap();

        let ns = *nvs.namespaces().get("storage").unwrap();
        assert_eq!(ns, 1);

        let counter = nvs.find_entry("counter", ns, 0xFF).unwrap();
        assert_eq!(counter.value, DecodedValue::I64(42));

        let name = nvs.find_entry("name", ns, 0xFF).unwrap();
        assert_eq!(name.value, DecodedValue::Str("hello".into()));
    }

    #[test]
    fn binary_has_partition_size_length() {
        let mut nvs = NvsBuilder::new(DEFAULT_PARTITION_SIZE);
        nvs.write_entry("ns", "k", NvsValue::I64(1)).unwrap();
        assert_eq!(nvs.get_binary().len(), DEFAULT_PARTITION_SIZE);
    }

    #[test]
    fn namespace_definition_always_lives_in_namespace_zero() {
        let mut nvs = NvsBuilder::new(DEFAULT_PARTITION_SIZE);
        nvs.write_entry("storage", "k", NvsValue::I64(1)).unwrap();
        let def = nvs.find_entry("storage", 0, 0xFF).unwrap();
        assert_eq!(def.namespace, 0);
        assert_eq!(def.value, DecodedValue::I64(1));
    }

    #[test]
    fn string_spanning_two_slots_marks_both_written() {
        let mut nvs = NvsBuilder::new(DEFAULT_PARTITION_SIZE);
        // 33 bytes + NUL = 34 bytes -> ceil(34/32) = 2 data slots -> span 3
        let long = "a".repeat(33);
        nvs.write_entry("ns", "k", NvsValue::Str(long.clone()))
            .unwrap();

        let page = &nvs.pages[0];
        // slot 0: namespace def, slots 1..=3: the string entry (header + 2 data slots)
        assert_eq!(page.slot_states[1], SlotState::Written);
        assert_eq!(page.slot_states[2], SlotState::Written);
        assert_eq!(page.slot_states[3], SlotState::Written);

        let ns = *nvs.namespaces().get("ns").unwrap();
        let decoded = nvs.find_entry("k", ns, 0xFF).unwrap();
        assert_eq!(decoded.value, DecodedValue::Str(long));
    }

    #[test]
    fn overflowing_a_page_allocates_a_new_one() {
        let mut nvs = NvsBuilder::new(DEFAULT_PARTITION_SIZE * 4);
        for i in 0..200 {
            nvs.write_entry("ns", &format!("k{i}"), NvsValue::I64(i))
                .unwrap();
        }
        assert!(nvs.pages.len() > 1);
        assert_eq!(nvs.pages[0].state, PageState::Full);

        let ns = *nvs.namespaces().get("ns").unwrap();
        for i in 0..200 {
            let entry = nvs.find_entry(&format!("k{i}"), ns, 0xFF).unwrap();
            assert_eq!(entry.value, DecodedValue::I64(i));
        }
    }

    #[test]
    fn key_too_long_is_rejected() {
        let mut nvs = NvsBuilder::new(DEFAULT_PARTITION_SIZE);
        let err = nvs
            .write_entry("ns", "this_key_is_too_long", NvsValue::I64(1))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidNvs(_)));
    }

    #[test]
    fn namespace_name_too_long_is_rejected() {
        let mut nvs = NvsBuilder::new(DEFAULT_PARTITION_SIZE);
        let err = nvs
            .write_entry("this_namespace_is_way_too_long", "k", NvsValue::I64(1))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidNvs(_)));
    }

    #[test]
    fn every_header_crc_validates() {
        let mut nvs = NvsBuilder::new(DEFAULT_PARTITION_SIZE);
        nvs.write_entry("ns", "a", NvsValue::I64(7)).unwrap();
        nvs.write_entry("ns", "b", NvsValue::Str("hi".into()))
            .unwrap();

        for page in &nvs.pages {
            let mut slot_index = 0;
            while slot_index < page.used {
                let header = &page.slots[slot_index];
                let span = header[2].max(1) as usize;
                let crc = u32::from_le_bytes(header[4..8].try_into().unwrap());
                assert_eq!(crc, entry_header_crc(header));
                slot_index += span;
            }
        }
    }

    #[test]
    fn numeric_type_selection_matches_ranges() {
        assert_eq!(numeric_type_for(0), NvsType::U8);
        assert_eq!(numeric_type_for(0xFF), NvsType::U8);
        assert_eq!(numeric_type_for(0x100), NvsType::U16);
        assert_eq!(numeric_type_for(0x1_0000), NvsType::U32);
        assert_eq!(numeric_type_for(0x1_0000_0000), NvsType::U64);
        assert_eq!(numeric_type_for(-1), NvsType::I8);
        assert_eq!(numeric_type_for(-200), NvsType::I16);
        assert_eq!(numeric_type_for(-40000), NvsType::I32);
        assert_eq!(numeric_type_for(-3_000_000_000), NvsType::I64);
    }
}
