//! 输入文本的规范化。
//!
//! 不包含 sentencepiece 预编译字符映射（NFKC 规则），只实现空白处理：
//! 删除多余空格、添加前缀空格、把空格转义为 `▁`。

use crate::proto::NormalizerSpec;
use std::iter::repeat;

/// 空格的转义符号
pub(crate) const SPACE_SYMBOL: &str = "\u{2581}";

#[derive(Clone, Copy, Debug)]
pub(crate) struct Normalizer {
    add_dummy_prefix: bool,
    remove_extra_whitespaces: bool,
    escape_whitespaces: bool,
    treat_whitespace_as_suffix: bool,
}

/// 规范化的文本，以及从规范化文本到原始输入的字节偏移映射。
///
/// `offsets.len() == text.len() + 1`，最后一项是原始输入的长度。
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Normalized {
    pub text: String,
    pub offsets: Vec<usize>,
}

impl Normalizer {
    pub fn new(spec: Option<&NormalizerSpec>, treat_whitespace_as_suffix: bool) -> Self {
        let default = NormalizerSpec::default();
        let spec = spec.unwrap_or(&default);
        Self {
            add_dummy_prefix: spec.add_dummy_prefix(),
            remove_extra_whitespaces: spec.remove_extra_whitespaces(),
            escape_whitespaces: spec.escape_whitespaces(),
            treat_whitespace_as_suffix,
        }
    }

    /// 解码时是否需要去掉句首（或句尾）的空格。
    #[inline]
    pub fn strips_boundary_space(&self) -> bool {
        self.add_dummy_prefix || self.remove_extra_whitespaces
    }

    #[inline]
    pub fn treat_whitespace_as_suffix(&self) -> bool {
        self.treat_whitespace_as_suffix
    }

    pub fn normalize(&self, input: &[u8]) -> Normalized {
        let space = if self.escape_whitespaces {
            SPACE_SYMBOL
        } else {
            " "
        };

        let mut consumed = 0;
        if self.remove_extra_whitespaces {
            consumed = input.iter().take_while(|&&b| b == b' ').count();
        }
        if consumed == input.len() {
            return Normalized {
                text: String::new(),
                offsets: vec![input.len()],
            };
        }

        let mut out = Normalized {
            text: String::with_capacity(input.len() + space.len()),
            offsets: Vec::with_capacity(input.len() + space.len() + 1),
        };
        if self.add_dummy_prefix && !self.treat_whitespace_as_suffix {
            out.push(space, consumed);
        }

        let mut prev_space = self.remove_extra_whitespaces;
        for chunk in input[consumed..].utf8_chunks() {
            let mut buf = [0u8; 4];
            for c in chunk.valid().chars() {
                if c == ' ' {
                    if !(self.remove_extra_whitespaces && prev_space) {
                        out.push(space, consumed);
                    }
                    prev_space = true;
                } else {
                    out.push(c.encode_utf8(&mut buf), consumed);
                    prev_space = false;
                }
                consumed += c.len_utf8();
            }
            // 无效的 utf-8 序列整体替换为 U+FFFD
            if !chunk.invalid().is_empty() {
                out.push(char::REPLACEMENT_CHARACTER.encode_utf8(&mut buf), consumed);
                consumed += chunk.invalid().len();
                prev_space = false;
            }
        }

        if self.remove_extra_whitespaces {
            while out.text.ends_with(space) {
                let len = out.text.len() - space.len();
                out.text.truncate(len);
                out.offsets.truncate(len);
            }
        }
        if self.add_dummy_prefix && self.treat_whitespace_as_suffix && !out.text.is_empty() {
            out.push(space, consumed);
        }
        out.offsets.push(input.len());
        out
    }
}

impl Normalized {
    fn push(&mut self, s: &str, orig: usize) {
        self.text.push_str(s);
        self.offsets.extend(repeat(orig).take(s.len()));
    }

    /// 规范化文本上的字节区间 -> 原始输入上的字节区间
    #[inline]
    pub fn original_span(&self, begin: usize, end: usize) -> (usize, usize) {
        (self.offsets[begin], self.offsets[end])
    }
}
