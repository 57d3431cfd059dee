use std::io::Read;

use byteorder::ReadBytesExt;
use encoding::all::WINDOWS_1252;
use encoding::{DecoderTrap, Encoding};

use crate::consts;
use crate::error::Result;

pub(crate) fn read_null_terminated_bytes<R: Read>(
    reader: &mut R,
) -> Result<Vec<u8>> {
    let mut bytes = Vec::<u8>::with_capacity(consts::MAX_STRING_SIZE);
    loop {
        let byte = reader.read_u8()?;
        if byte == 0 {
            break;
        } else if bytes.len() == consts::MAX_STRING_SIZE {
            format_error!(
                "String longer than maximum of {} bytes",
                consts::MAX_STRING_SIZE
            );
        }
        bytes.push(byte);
    }
    Ok(bytes)
}

/// Decodes a stored name.  Names without the UTF-8 attribute are in the
/// creating machine's 8-bit code page, which is taken to be Windows-1252.
pub(crate) fn decode_name(bytes: &[u8], is_utf8: bool) -> String {
    if is_utf8 || bytes.is_ascii() {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    WINDOWS_1252
        .decode(bytes, DecoderTrap::Replace)
        .unwrap_or_else(|message| message.into_owned())
}
