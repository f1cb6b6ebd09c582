//! CRC32 (IEEE/ZIP variant) and MD5 primitives shared by the partition-table
//! and NVS builders, and by the flash-data command checksum.

/// IEEE 802.3 CRC32 (the ZIP/PNG variant), polynomial `0xEDB88320`, initial
/// value `0xFFFFFFFF`, final xor `0xFFFFFFFF`.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// RFC 1321 MD5, returned as the raw 16-byte digest.
pub fn md5(data: &[u8]) -> [u8; 16] {
    md5::compute(data).0
}

/// The XOR checksum used by FLASH_DATA/MEM_DATA payloads, seeded with
/// `0xEF`.
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0xEFu8, |acc, byte| acc ^ byte)
}
