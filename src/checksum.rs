use byteorder::{ByteOrder, LittleEndian};

/// Computes the cabinet checksum of `data`, starting from `seed`.
///
/// Whole 4-byte words are XORed in as little-endian integers; the 1 to 3
/// trailing bytes are packed in the opposite order before being XORed in.
pub(crate) fn checksum(data: &[u8], seed: u32) -> u32 {
    let mut words = data.chunks_exact(4);
    let value = words
        .by_ref()
        .fold(seed, |value, word| value ^ LittleEndian::read_u32(word));
    let tail = words
        .remainder()
        .iter()
        .fold(0u32, |tail, &byte| (tail << 8) | byte as u32);
    value ^ tail
}

/// Computes the checksum stored in a data block header, which covers the
/// block's reserve bytes, its compressed payload, and both size fields.
pub(crate) fn data_block_checksum(
    reserve_data: &[u8],
    payload: &[u8],
    compressed_size: u16,
    uncompressed_size: u16,
) -> u32 {
    let sizes = (compressed_size as u32) | ((uncompressed_size as u32) << 16);
    let body = if reserve_data.is_empty() {
        checksum(payload, 0)
    } else {
        let mut joined = Vec::with_capacity(reserve_data.len() + payload.len());
        joined.extend_from_slice(reserve_data);
        joined.extend_from_slice(payload);
        checksum(&joined, 0)
    };
    body ^ sizes
}
