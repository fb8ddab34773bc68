//! Compressed buffer format for content-id uploads and downloads.
//!
//! ```text
//! "DDCZ" | version u8 | content hash [20] | uncompressed_len u64
//!        | block_size u32 | block_count u32
//!        | block_count × ( raw_len u32 | compressed_len u32 | crc32 u32 | zstd bytes )
//! ```
//!
//! Integers are big-endian. Each block compresses at most `block_size`
//! uncompressed bytes independently, and the CRC32 covers the compressed
//! bytes. The content hash in the header is the [`ContentId`] of the full
//! uncompressed content and is always verified on decode.
//!
//! Decoding trusts nothing in the header: the block layout must match the
//! declared length, no block may claim more than `block_size` bytes, and
//! zstd output is capped at each block's declared length.

use ddc_crypto::ContentHasher;
use ddc_types::{ContentHash, ContentId, HASH_LEN};

use crate::error::{CodecError, CodecResult};

const MAGIC: &[u8; 4] = b"DDCZ";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 4 + 1 + HASH_LEN + 8 + 4 + 4;

/// Largest block size a buffer may declare.
pub const MAX_BLOCK_SIZE: u32 = 16 * 1024 * 1024;

/// Tunables for [`CompressedCodec`].
#[derive(Clone, Debug)]
pub struct CodecConfig {
    /// zstd compression level.
    pub level: i32,
    /// Uncompressed bytes per block.
    pub block_size: u32,
    /// Largest uncompressed length a buffer may declare.
    pub max_content_len: u64,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            level: 3,
            block_size: 256 * 1024,
            max_content_len: 1024 * 1024 * 1024,
        }
    }
}

/// Parsed fixed header of a compressed buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompressedHeader {
    pub content_id: ContentId,
    pub uncompressed_len: u64,
    pub block_size: u32,
    pub block_count: u32,
}

/// Encoder/decoder for the compressed buffer format.
#[derive(Clone, Debug, Default)]
pub struct CompressedCodec {
    config: CodecConfig,
}

impl CompressedCodec {
    pub fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Compress `data` into a self-describing buffer.
    pub fn compress(&self, data: &[u8]) -> CodecResult<Vec<u8>> {
        let block_size = self.config.block_size.clamp(1, MAX_BLOCK_SIZE) as usize;
        let blocks: Vec<&[u8]> = data.chunks(block_size).collect();

        let mut out = Vec::with_capacity(HEADER_LEN + data.len() / 2);
        out.extend_from_slice(MAGIC);
        out.push(VERSION);
        out.extend_from_slice(ContentHasher::hash(data).as_bytes());
        out.extend_from_slice(&(data.len() as u64).to_be_bytes());
        out.extend_from_slice(&(block_size as u32).to_be_bytes());
        out.extend_from_slice(&(blocks.len() as u32).to_be_bytes());

        for block in blocks {
            let compressed = zstd::encode_all(block, self.config.level)
                .map_err(|e| CodecError::CompressionFailed(e.to_string()))?;
            out.extend_from_slice(&(block.len() as u32).to_be_bytes());
            out.extend_from_slice(&(compressed.len() as u32).to_be_bytes());
            out.extend_from_slice(&crc32fast::hash(&compressed).to_be_bytes());
            out.extend_from_slice(&compressed);
        }
        Ok(out)
    }

    /// Parse only the fixed header.
    pub fn header(buf: &[u8]) -> CodecResult<CompressedHeader> {
        let mut reader = Reader::new(buf);
        if reader.take(4)? != MAGIC {
            return Err(CodecError::InvalidMagic);
        }
        let version = reader.u8()?;
        if version != VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let mut hash = [0u8; HASH_LEN];
        hash.copy_from_slice(reader.take(HASH_LEN)?);
        Ok(CompressedHeader {
            content_id: ContentId::new(ContentHash::from_raw(hash)),
            uncompressed_len: reader.u64()?,
            block_size: reader.u32()?,
            block_count: reader.u32()?,
        })
    }

    /// Decompress and verify a buffer, returning its content id and bytes.
    ///
    /// Fails if any block CRC, the total length, or the content hash does
    /// not match.
    pub fn decompress(&self, buf: &[u8]) -> CodecResult<(ContentId, Vec<u8>)> {
        let header = Self::header(buf)?;
        self.check_layout(&header)?;
        let mut reader = Reader::new(buf);
        reader.take(HEADER_LEN)?;

        let mut out = Vec::with_capacity(header.uncompressed_len.min(64 * 1024 * 1024) as usize);
        for block in 0..header.block_count as usize {
            let raw_len = reader.u32()?;
            let compressed_len = reader.u32()? as usize;
            let crc = reader.u32()?;
            let remaining = header.uncompressed_len - out.len() as u64;
            if raw_len > header.block_size || u64::from(raw_len) > remaining {
                return Err(CodecError::InvalidBlock {
                    block,
                    raw_len,
                    block_size: header.block_size,
                });
            }
            let raw_len = raw_len as usize;
            let compressed = reader.take(compressed_len)?;
            if crc32fast::hash(compressed) != crc {
                return Err(CodecError::CrcMismatch { block });
            }
            let decoded = zstd::bulk::decompress(compressed, raw_len)
                .map_err(|e| CodecError::DecompressionFailed(format!("block {block}: {e}")))?;
            if decoded.len() != raw_len {
                return Err(CodecError::DecompressionFailed(format!(
                    "block {block} decoded to {} bytes, expected {raw_len}",
                    decoded.len()
                )));
            }
            out.extend_from_slice(&decoded);
        }

        if out.len() as u64 != header.uncompressed_len {
            return Err(CodecError::LengthMismatch {
                expected: header.uncompressed_len,
                actual: out.len() as u64,
            });
        }
        let computed = ContentHasher::hash(&out);
        if computed != header.content_id.hash() {
            return Err(CodecError::HashMismatch {
                expected: header.content_id.hash(),
                computed,
            });
        }
        Ok((header.content_id, out))
    }

    /// Reject headers whose block layout cannot describe the declared length.
    fn check_layout(&self, header: &CompressedHeader) -> CodecResult<()> {
        if header.uncompressed_len > self.config.max_content_len {
            return Err(CodecError::InvalidHeader(format!(
                "declared length {} exceeds limit {}",
                header.uncompressed_len, self.config.max_content_len
            )));
        }
        if header.block_size == 0 || header.block_size > MAX_BLOCK_SIZE {
            return Err(CodecError::InvalidHeader(format!(
                "block size {} outside 1..={MAX_BLOCK_SIZE}",
                header.block_size
            )));
        }
        let expected = header
            .uncompressed_len
            .div_ceil(u64::from(header.block_size));
        if u64::from(header.block_count) != expected {
            return Err(CodecError::InvalidHeader(format!(
                "{} blocks cannot hold {} bytes in blocks of {}",
                header.block_count, header.uncompressed_len, header.block_size
            )));
        }
        Ok(())
    }

    /// Check a buffer decodes cleanly, returning its content id.
    pub fn verify(&self, buf: &[u8]) -> CodecResult<ContentId> {
        self.decompress(buf).map(|(id, _)| id)
    }
}

/// Bounds-checked big-endian reader.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> CodecResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or(CodecError::Truncated(self.pos))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> CodecResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> CodecResult<u32> {
        let mut arr = [0u8; 4];
        arr.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(arr))
    }

    fn u64(&mut self) -> CodecResult<u64> {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(arr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn small_blocks() -> CompressedCodec {
        CompressedCodec::new(CodecConfig {
            level: 1,
            block_size: 16,
            ..CodecConfig::default()
        })
    }

    /// Hand-build a buffer with one block and arbitrary header fields.
    fn one_block(declared_len: u64, block_size: u32, raw_len: u32, payload: &[u8]) -> Vec<u8> {
        let compressed = zstd::encode_all(payload, 1).unwrap();
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.push(VERSION);
        buf.extend_from_slice(ContentHasher::hash(payload).as_bytes());
        buf.extend_from_slice(&declared_len.to_be_bytes());
        buf.extend_from_slice(&block_size.to_be_bytes());
        buf.extend_from_slice(&1u32.to_be_bytes());
        buf.extend_from_slice(&raw_len.to_be_bytes());
        buf.extend_from_slice(&(compressed.len() as u32).to_be_bytes());
        buf.extend_from_slice(&crc32fast::hash(&compressed).to_be_bytes());
        buf.extend_from_slice(&compressed);
        buf
    }

    #[test]
    fn hand_built_block_decodes() {
        let buf = one_block(5, 16, 5, b"hello");
        let (_, out) = small_blocks().decompress(&buf).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn block_expanding_past_raw_len_is_capped() {
        // Compresses to a few dozen bytes, expands to 1 MiB.
        let bomb = vec![0u8; 1024 * 1024];
        let buf = one_block(1, 2 * 1024 * 1024, 1, &bomb);
        let err = CompressedCodec::default().decompress(&buf).unwrap_err();
        assert!(matches!(err, CodecError::DecompressionFailed(_)));
    }

    #[test]
    fn raw_len_beyond_block_size_is_rejected() {
        let buf = one_block(32, 16, 32, &[1u8; 32]);
        let err = small_blocks().decompress(&buf).unwrap_err();
        assert!(matches!(err, CodecError::InvalidHeader(_)));

        let buf = one_block(16, 16, 17, &[1u8; 17]);
        let err = small_blocks().decompress(&buf).unwrap_err();
        assert!(matches!(err, CodecError::InvalidBlock { raw_len: 17, .. }));
    }

    #[test]
    fn declared_length_over_limit_is_rejected() {
        let codec = CompressedCodec::new(CodecConfig {
            max_content_len: 4,
            ..CodecConfig::default()
        });
        let buf = one_block(5, 16, 5, b"hello");
        let err = codec.decompress(&buf).unwrap_err();
        assert!(matches!(err, CodecError::InvalidHeader(_)));
    }

    #[test]
    fn oversized_block_size_is_rejected() {
        let buf = one_block(5, MAX_BLOCK_SIZE + 1, 5, b"hello");
        let err = CompressedCodec::default().decompress(&buf).unwrap_err();
        assert!(matches!(err, CodecError::InvalidHeader(_)));
    }

    #[test]
    fn header_describes_content() {
        let data = b"abcdefghijklmnopqrstuvwxyz0123456789".to_vec();
        let buf = small_blocks().compress(&data).unwrap();
        let header = CompressedCodec::header(&buf).unwrap();
        assert_eq!(header.content_id, ContentId::from_bytes(&data));
        assert_eq!(header.uncompressed_len, 36);
        assert_eq!(header.block_size, 16);
        assert_eq!(header.block_count, 3);
    }

    #[test]
    fn decompress_restores_content() {
        let data = vec![7u8; 10_000];
        let codec = CompressedCodec::default();
        let buf = codec.compress(&data).unwrap();
        assert!(buf.len() < data.len());
        let (id, out) = codec.decompress(&buf).unwrap();
        assert_eq!(out, data);
        assert_eq!(id, ContentId::from_bytes(&data));
    }

    #[test]
    fn empty_content_has_no_blocks() {
        let codec = CompressedCodec::default();
        let buf = codec.compress(b"").unwrap();
        assert_eq!(CompressedCodec::header(&buf).unwrap().block_count, 0);
        let (id, out) = codec.decompress(&buf).unwrap();
        assert!(out.is_empty());
        assert_eq!(id, ContentId::from_bytes(b""));
    }

    #[test]
    fn bad_magic() {
        assert_eq!(
            CompressedCodec::header(b"NOPE\x01").unwrap_err(),
            CodecError::InvalidMagic
        );
    }

    #[test]
    fn unsupported_version() {
        let mut buf = CompressedCodec::default().compress(b"x").unwrap();
        buf[4] = 9;
        assert_eq!(
            CompressedCodec::header(&buf).unwrap_err(),
            CodecError::UnsupportedVersion(9)
        );
    }

    #[test]
    fn truncated_buffer() {
        let buf = small_blocks().compress(b"some content to compress").unwrap();
        let err = small_blocks().decompress(&buf[..buf.len() - 3]).unwrap_err();
        assert!(matches!(err, CodecError::Truncated(_)));
    }

    #[test]
    fn corrupted_block_fails_crc() {
        let codec = small_blocks();
        let mut buf = codec.compress(b"corrupt me please, thank you").unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xff;
        assert!(matches!(
            codec.decompress(&buf).unwrap_err(),
            CodecError::CrcMismatch { .. }
        ));
    }

    #[test]
    fn wrong_declared_hash_is_rejected() {
        let codec = CompressedCodec::default();
        let mut buf = codec.compress(b"declared content").unwrap();
        buf[5] ^= 0x01;
        assert!(matches!(
            codec.decompress(&buf).unwrap_err(),
            CodecError::HashMismatch { .. }
        ));
    }

    proptest! {
        #[test]
        fn decompress_inverts_compress(
            data in proptest::collection::vec(any::<u8>(), 0..2048),
            block_size in 1u32..512,
        ) {
            let codec = CompressedCodec::new(CodecConfig {
                level: 1,
                block_size,
                ..CodecConfig::default()
            });
            let buf = codec.compress(&data).unwrap();
            let (id, out) = codec.decompress(&buf).unwrap();
            prop_assert_eq!(out, data.clone());
            prop_assert_eq!(id, ContentId::from_bytes(&data));
        }
    }
}
