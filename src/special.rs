//! 用户定义词的匹配。
//!
//! 用户定义词在切分之前从规范化文本中整体识别出来，切分算法永远不会拆开它们。

use crate::utok;
use regex::Regex;
use std::{collections::HashMap, ops::Range};

pub(crate) struct UserDefined {
    pieces: HashMap<String, utok>,
    regex: Option<Regex>,
}

/// 规范化文本中的一段，要么是一个用户定义词，要么是交给切分算法的普通文本。
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Chunk {
    Text(Range<usize>),
    Piece(Range<usize>, utok),
}

impl UserDefined {
    pub fn new<'a>(pieces: impl IntoIterator<Item = (utok, &'a str)>) -> Self {
        let pieces = pieces
            .into_iter()
            .map(|(t, p)| (p.to_string(), t))
            .collect::<HashMap<_, _>>();
        let regex = build_pattern(pieces.keys());
        Self { pieces, regex }
    }

    pub fn split(&self, text: &str) -> Vec<Chunk> {
        let mut ans = Vec::new();
        let mut start = 0;
        if let Some(regex) = &self.regex {
            for m in regex.find_iter(text) {
                if start < m.start() {
                    ans.push(Chunk::Text(start..m.start()));
                }
                ans.push(Chunk::Piece(m.range(), self.pieces[m.as_str()]));
                start = m.end();
            }
        }
        if start < text.len() {
            ans.push(Chunk::Text(start..text.len()));
        }
        ans
    }
}

/// 正则的分支按最左优先匹配，长词排在前面以实现最长匹配。
fn build_pattern<'a>(text: impl IntoIterator<Item = &'a String>) -> Option<Regex> {
    let mut text = text.into_iter().collect::<Vec<_>>();
    if text.is_empty() {
        return None;
    }
    text.sort_unstable_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let pattern = text
        .into_iter()
        .map(|p| regex::escape(p))
        .collect::<Vec<_>>()
        .join("|");
    // 转义后的字面量必定能构造出正则
    Regex::new(&pattern).ok()
}
