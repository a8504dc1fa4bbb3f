//! 按空白切词（word）和按字符切分（char）的模型。

use crate::{merge_unknown, normalizer::SPACE_SYMBOL, utok, vocab::Vocab, Method, Segment};

/// 以 `▁` 为界切分单词，`▁` 附在词首（或词尾）。
pub(crate) struct Word {
    treat_whitespace_as_suffix: bool,
}

/// 每个字符是一个词。
pub(crate) struct Char;

impl Word {
    pub fn new(treat_whitespace_as_suffix: bool) -> Self {
        Self {
            treat_whitespace_as_suffix,
        }
    }
}

impl Method for Word {
    fn encode(&self, vocab: &Vocab, text: &str) -> Vec<Segment> {
        let mut ans = Vec::new();
        let mut start = 0;
        for (pos, _) in text.match_indices(SPACE_SYMBOL) {
            let end = if self.treat_whitespace_as_suffix {
                pos + SPACE_SYMBOL.len()
            } else {
                pos
            };
            if start < end {
                ans.push(lookup(vocab, text, start, end));
                start = end;
            }
        }
        if start < text.len() {
            ans.push(lookup(vocab, text, start, text.len()));
        }
        ans
    }
}

impl Method for Char {
    fn encode(&self, vocab: &Vocab, text: &str) -> Vec<Segment> {
        let segments = text
            .char_indices()
            .map(|(pos, c)| lookup(vocab, text, pos, pos + c.len_utf8()))
            .collect();
        merge_unknown(vocab.unk(), segments)
    }
}

#[inline]
fn lookup(vocab: &Vocab, text: &str, start: usize, end: usize) -> Segment {
    let token: utok = vocab
        .find_segmentable(text[start..end].as_bytes())
        .unwrap_or(vocab.unk());
    Segment {
        range: start..end,
        token,
    }
}
