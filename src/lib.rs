//! A sentencepiece processor with two faces: the safe [`SentencePieceProcessor`]
//! and a flat C ABI (`spp_*`, see [`ffi`] and `include/spp.h`).
//!
//! Models are regular sentencepiece `.model` files. Unigram, BPE, word and char
//! models are supported; vocabulary training is not.
//!
//! ```no_run
//! use spp::SentencePieceProcessor;
//!
//! let spp = SentencePieceProcessor::open("testdata/toy.model").unwrap();
//! let pieces = spp.encode("I saw a girl with a telescope.").unwrap();
//! let ids = pieces.iter().map(|p| p.id).collect::<Vec<_>>();
//! assert_eq!(spp.decode_piece_ids(&ids).unwrap(), "I saw a girl with a telescope.");
//! ```

#![deny(warnings)]

mod bpe;
mod normalizer;
mod special;
mod unigram;
mod vocab;
mod word;

pub mod config;
pub mod error;
pub mod ffi;
pub mod processor;
pub mod proto;
pub mod status;

#[cfg(test)]
mod test_utils;

use rand::RngCore;
use status::{Status, StatusCode};
use std::ops::Range;
use vocab::Vocab;

pub use config::{ExtraOptions, ProcessorBuilder, ProcessorConfig};
pub use error::{Result, SentencePieceError};
pub use processor::{PieceWithId, SentencePieceProcessor};
pub use proto::{ModelType, PieceType};

/// `utok` for token id.
#[allow(non_camel_case_types)]
pub(crate) type utok = u32;

/// Signed piece id as exchanged through the C ABI; `-1` means unset.
pub type PieceId = i32;

/// 切分结果中的一个词：规范化文本上的字节区间和词序号。
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Segment {
    pub range: Range<usize>,
    pub token: utok,
}

impl Segment {
    #[inline]
    fn shift(self, offset: usize) -> Self {
        Self {
            range: self.range.start + offset..self.range.end + offset,
            token: self.token,
        }
    }
}

/// 切分算法。输入是不含用户定义词的规范化文本片段。
pub(crate) trait Method: Send + Sync {
    fn encode(&self, vocab: &Vocab, text: &str) -> Vec<Segment>;

    fn nbest_encode(
        &self,
        _vocab: &Vocab,
        _text: &str,
        _nbest: usize,
    ) -> Result<Vec<(Vec<Segment>, f32)>, Status> {
        Err(Status::new(
            StatusCode::Unimplemented,
            "NBestEncode is not available for the current model.",
        ))
    }

    fn sample_encode(
        &self,
        _vocab: &Vocab,
        _text: &str,
        _alpha: f32,
        _rng: &mut dyn RngCore,
    ) -> Result<Vec<Segment>, Status> {
        Err(Status::new(
            StatusCode::Unimplemented,
            "SampleEncode is not available for the current model.",
        ))
    }
}

/// 合并相邻的未知词。
fn merge_unknown(unk: utok, segments: Vec<Segment>) -> Vec<Segment> {
    let mut ans = Vec::<Segment>::with_capacity(segments.len());
    for seg in segments {
        match ans.last_mut() {
            Some(last) if last.token == unk && seg.token == unk => last.range.end = seg.range.end,
            _ => ans.push(seg),
        }
    }
    ans
}

const fn as_byte_token(piece: &[u8]) -> Option<u8> {
    // 按结构分解并转换
    match piece {
        &[b'<', b'0', b'x', a, b, b'>'] if a.is_ascii_hexdigit() && b.is_ascii_hexdigit() => {
            // ascii 转数字
            #[inline(always)]
            const fn to_num(c: u8) -> u8 {
                match c {
                    b'0'..=b'9' => c - b'0',
                    b'a'..=b'f' => c - b'a' + 10,
                    b'A'..=b'F' => c - b'A' + 10,
                    _ => unreachable!(),
                }
            }

            Some(to_num(a) * 16 + to_num(b))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_byte_tokens() {
        assert_eq!(as_byte_token(b"<0x41>"), Some(0x41));
        assert_eq!(as_byte_token(b"<0xff>"), Some(0xff));
        assert_eq!(as_byte_token(b"<0x4>"), None);
        assert_eq!(as_byte_token(b"<0xZZ>"), None);
    }

    #[test]
    fn merges_adjacent_unknowns_only() {
        let seg = |range: Range<usize>, token| Segment { range, token };
        let merged = merge_unknown(
            0,
            vec![seg(0..1, 0), seg(1..3, 0), seg(3..4, 5), seg(4..5, 0)],
        );
        assert_eq!(merged, vec![seg(0..3, 0), seg(3..4, 5), seg(4..5, 0)]);
    }
}
