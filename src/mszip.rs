use flate2::{Decompress, FlushDecompress};

use crate::error::Result;

const MSZIP_SIGNATURE: [u8; 2] = *b"CK";
const DEFLATE_MAX_DICT_LEN: usize = 0x8000;

/// Decodes the data blocks of one MSZIP folder.
///
/// Each block is a separate raw deflate stream, but back-references may
/// reach into the last 32 KiB of output from earlier blocks of the folder.
/// That tail is kept as the dictionary and primed into the inflater before
/// every block.
pub struct MsZipDecompressor {
    inflater: Decompress,
    dictionary: Vec<u8>,
}

impl MsZipDecompressor {
    /// Creates a decompressor with an empty dictionary.
    pub fn new() -> MsZipDecompressor {
        MsZipDecompressor {
            inflater: Decompress::new(false),
            dictionary: Vec::with_capacity(DEFLATE_MAX_DICT_LEN),
        }
    }

    /// Forgets the dictionary, as at the start of a folder.
    pub fn reset(&mut self) {
        self.inflater.reset(false);
        self.dictionary.clear();
    }

    /// The output tail that the next block may refer back into.
    pub fn dictionary(&self) -> &[u8] {
        &self.dictionary
    }

    /// Inflates one data block's payload, which must start with `CK` and
    /// decode to exactly `uncompressed_size` bytes.  The output becomes part
    /// of the dictionary for the next block.
    pub fn decompress_block(
        &mut self,
        data: &[u8],
        uncompressed_size: usize,
    ) -> Result<Vec<u8>> {
        let stream = match data.strip_prefix(&MSZIP_SIGNATURE) {
            Some(stream) => stream,
            None => corrupt_data!("MSZIP block is missing its CK signature"),
        };
        self.inflater.reset(false);
        self.prime_dictionary()?;

        // One spare byte of capacity lets an overlong block show up as a
        // size mismatch instead of being silently truncated.
        let mut out = Vec::<u8>::with_capacity(uncompressed_size + 1);
        if let Err(error) =
            self.inflater.decompress_vec(stream, &mut out, FlushDecompress::Finish)
        {
            corrupt_data!("MSZIP decompression failed: {}", error);
        }
        if out.len() != uncompressed_size {
            corrupt_data!(
                "MSZIP decompression failed: Incorrect uncompressed size \
                 (expected {}, was actually {})",
                uncompressed_size,
                out.len()
            );
        }
        self.remember(&out);
        Ok(out)
    }

    /// Feeds the dictionary to the inflater as a stored deflate block, so
    /// that its window holds the previous output without emitting it again.
    fn prime_dictionary(&mut self) -> Result<()> {
        if self.dictionary.is_empty() {
            return Ok(());
        }
        let length = self.dictionary.len() as u16;
        let mut stored = Vec::with_capacity(5 + self.dictionary.len());
        stored.push(0);
        stored.extend_from_slice(&length.to_le_bytes());
        stored.extend_from_slice(&(!length).to_le_bytes());
        stored.extend_from_slice(&self.dictionary);
        let mut sink = Vec::with_capacity(self.dictionary.len());
        if let Err(error) =
            self.inflater.decompress_vec(&stored, &mut sink, FlushDecompress::Sync)
        {
            corrupt_data!("MSZIP dictionary priming failed: {}", error);
        }
        Ok(())
    }

    fn remember(&mut self, out: &[u8]) {
        if out.len() >= DEFLATE_MAX_DICT_LEN {
            self.dictionary.clear();
            self.dictionary
                .extend_from_slice(&out[out.len() - DEFLATE_MAX_DICT_LEN..]);
            return;
        }
        let total = self.dictionary.len() + out.len();
        if total > DEFLATE_MAX_DICT_LEN {
            self.dictionary.drain(..total - DEFLATE_MAX_DICT_LEN);
        }
        self.dictionary.extend_from_slice(out);
    }
}

impl Default for MsZipDecompressor {
    fn default() -> MsZipDecompressor {
        MsZipDecompressor::new()
    }
}

#[cfg(test)]
mod tests {
    use flate2::{Compress, Compression, FlushCompress};
    use rand::RngCore;

    use super::{MsZipDecompressor, DEFLATE_MAX_DICT_LEN};
    use crate::error::Error;

    /// Splits `data` into MSZIP blocks the way a cabinet writer does: one
    /// compressor for the whole folder, sync-flushed between blocks.
    fn compress_blocks(mut data: &[u8]) -> Vec<(usize, Vec<u8>)> {
        let mut compressor = Compress::new(Compression::best(), false);
        let mut blocks = Vec::new();
        loop {
            let len = data.len().min(DEFLATE_MAX_DICT_LEN);
            let (chunk, rest) = data.split_at(len);
            let is_last = rest.is_empty();
            let mut out = Vec::with_capacity(0xffff);
            out.extend_from_slice(b"CK");
            let flush =
                if is_last { FlushCompress::Finish } else { FlushCompress::Sync };
            compressor.compress_vec(chunk, &mut out, flush).unwrap();
            if !is_last {
                // An empty final block closes this block's deflate stream.
                out.extend_from_slice(&[0x03, 0x00]);
            }
            blocks.push((chunk.len(), out));
            data = rest;
            if is_last {
                return blocks;
            }
        }
    }

    fn decompress_blocks(blocks: &[(usize, Vec<u8>)]) -> Vec<u8> {
        let mut decompressor = MsZipDecompressor::new();
        let mut output = Vec::new();
        for (size, compressed) in blocks {
            output.extend(decompressor.decompress_block(compressed, *size).unwrap());
        }
        output
    }

    fn repeating_data(size: usize) -> Vec<u8> {
        let modulus = 251; // a prime number no bigger than u8::MAX
        (0..size).map(|index| (index % modulus) as u8).collect()
    }

    fn random_data(size: usize) -> Vec<u8> {
        use rand::SeedableRng;

        let mut data = vec![0; size];
        rand::rngs::SmallRng::from_entropy().fill_bytes(&mut data);
        data
    }

    #[test]
    fn read_compressed_data() {
        let input: &[u8] = b"CK%\xcc\xd1\t\x031\x0c\x04\xd1V\xb6\x80#\x95\xa4\
              \t\xc5\x12\xc7\x82e\xfb,\xa9\xff\x18\xee{x\xf3\x9d\xdb\x1c\\Q\
              \x0e\x9d}n\x04\x13\xe2\x96\x17\xda\x1ca--kC\x94\x8b\xd18nX\xe7\
              \x89az\x00\x8c\x15>\x15i\xbe\x0e\xe6hTj\x8dD%\xba\xfc\xce\x1e\
              \x96\xef\xda\xe0r\x0f\x81t>%\x9f?\x12]-\x87";
        let expected: &[u8] =
            b"Lorem ipsum dolor sit amet, consectetur adipiscing elit, sed \
              do eiusmod tempor incididunt ut labore et dolore magna aliqua.";
        let mut decompressor = MsZipDecompressor::new();
        let output =
            decompressor.decompress_block(input, expected.len()).unwrap();
        assert_eq!(output, expected);
        assert_eq!(decompressor.dictionary(), expected);
    }

    #[test]
    fn missing_signature_is_corrupt_data() {
        let mut decompressor = MsZipDecompressor::new();
        let result = decompressor.decompress_block(b"XK\x03\x00", 0);
        assert!(matches!(result, Err(Error::CorruptData(_))));
    }

    #[test]
    fn wrong_declared_size_is_corrupt_data() {
        let blocks = compress_blocks(b"Hello, world!\n");
        let mut decompressor = MsZipDecompressor::new();
        let result = decompressor.decompress_block(&blocks[0].1, 13);
        assert!(matches!(result, Err(Error::CorruptData(_))));
        let result = decompressor.decompress_block(&blocks[0].1, 15);
        assert!(matches!(result, Err(Error::CorruptData(_))));
    }

    #[test]
    fn garbage_stream_is_corrupt_data() {
        let mut decompressor = MsZipDecompressor::new();
        let result = decompressor.decompress_block(b"CK\xff\xff\xff\xff", 10);
        assert!(matches!(result, Err(Error::CorruptData(_))));
    }

    #[test]
    fn later_blocks_depend_on_carried_dictionary() {
        let original = repeating_data(DEFLATE_MAX_DICT_LEN * 3);
        let blocks = compress_blocks(&original);
        assert_eq!(blocks.len(), 3);
        assert_eq!(decompress_blocks(&blocks), original);

        // The second block is mostly back-references into the first one, so
        // a fresh dictionary must not reproduce the right bytes.
        let (size, ref second) = blocks[1];
        let mut fresh = MsZipDecompressor::new();
        match fresh.decompress_block(second, size) {
            Ok(output) => {
                assert_ne!(output, &original[DEFLATE_MAX_DICT_LEN..][..size])
            }
            Err(error) => assert!(matches!(error, Error::CorruptData(_))),
        }
    }

    #[test]
    fn reset_clears_dictionary() {
        let original = repeating_data(DEFLATE_MAX_DICT_LEN + 1000);
        let blocks = compress_blocks(&original);
        let mut decompressor = MsZipDecompressor::new();
        decompressor.decompress_block(&blocks[0].1, blocks[0].0).unwrap();
        assert_eq!(decompressor.dictionary().len(), DEFLATE_MAX_DICT_LEN);
        decompressor.reset();
        assert!(decompressor.dictionary().is_empty());
        let output =
            decompressor.decompress_block(&blocks[0].1, blocks[0].0).unwrap();
        assert_eq!(output, &original[..DEFLATE_MAX_DICT_LEN]);
    }

    macro_rules! round_trip_tests {
        ($name:ident, $data:expr) => {
            #[test]
            fn $name() {
                let original: &[u8] = $data;
                let compressed = compress_blocks(original);
                assert_eq!(decompress_blocks(&compressed).as_slice(), original);
            }
        };
    }

    round_trip_tests!(
        lorem_ipsum,
        b"Lorem ipsum dolor sit amet, consectetur adipiscing elit, sed \
          do eiusmod tempor incididunt ut labore et dolore magna aliqua."
    );
    round_trip_tests!(
        one_block_exactly,
        &repeating_data(DEFLATE_MAX_DICT_LEN)
    );
    round_trip_tests!(
        one_block_plus_a_byte,
        &repeating_data(DEFLATE_MAX_DICT_LEN + 1)
    );
    round_trip_tests!(zeros_many_blocks, &[0u8; DEFLATE_MAX_DICT_LEN * 10]);
    round_trip_tests!(
        random_two_blocks,
        &random_data(DEFLATE_MAX_DICT_LEN + 1000)
    );
}
