use super::Bpe;
use crate::{utok, vocab::Vocab, Segment};
use rand::{Rng, RngCore};
use std::{
    cmp::Ordering::{self, Equal},
    collections::BinaryHeap,
    ops::Range,
};

pub(crate) struct MergeState<'v, 't, 'r> {
    text: &'t str,
    bpe: &'v Bpe,
    vocab: &'v Vocab,
    marks: Vec<Mark>,
    merges: BinaryHeap<Merge>,
    dropout: Option<Dropout<'r>>,
}

/// BPE-dropout：每个合并项以概率 `p` 被丢弃
pub(crate) struct Dropout<'r> {
    pub p: f32,
    pub rng: &'r mut dyn RngCore,
}

pub(crate) struct IntoIter {
    marks: Vec<Mark>,
    i: usize,
}

impl Bpe {
    pub fn begin_merge<'v, 't, 'r>(
        &'v self,
        vocab: &'v Vocab,
        text: &'t str,
        dropout: Option<Dropout<'r>>,
    ) -> MergeState<'v, 't, 'r> {
        let mut marks = vec![Mark::EMPTY; text.len()];
        let mut merges = BinaryHeap::new();

        let mut last = None;
        for (i, c) in text.char_indices() {
            let end = i + c.len_utf8();
            let token = vocab
                .find_segmentable(text[i..end].as_bytes())
                .unwrap_or(vocab.unk());
            marks[i] = Mark {
                token,
                len: (end - i) as _,
                back_distance: 0,
            };
            if let Some(pos) = last.replace(i) {
                marks[i].back_distance = (i - pos) as _;
                if let Some(merge) = self.build_merge(vocab, text, pos..end, (marks[pos].token, token)) {
                    merges.push(merge);
                }
            }
        }

        MergeState {
            text,
            bpe: self,
            vocab,
            marks,
            merges,
            dropout,
        }
    }

    fn build_merge(
        &self,
        vocab: &Vocab,
        text: &str,
        range: Range<usize>,
        pair: (utok, utok),
    ) -> Option<Merge> {
        vocab
            .find_segmentable(text[range.clone()].as_bytes())
            .map(|merged| Merge {
                pos: range.start,
                pair,
                merge: merged,
                rank: self.rank(merged),
            })
    }
}

/// 文本每个字节上的标记。只有词的首字节上的标记有效，`len == 0` 表示不是词首。
#[derive(Clone, Copy, Debug)]
struct Mark {
    token: utok,
    len: u32,
    back_distance: u32,
}

impl Mark {
    const EMPTY: Self = Self {
        token: 0,
        len: 0,
        back_distance: 0,
    };
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct Merge {
    pos: usize,
    pair: (utok, utok),
    merge: utok,
    rank: u32,
}
impl Ord for Merge {
    fn cmp(&self, other: &Self) -> Ordering {
        // 比较顺序：rank -> pos -> merged -> pair
        match self.rank.cmp(&other.rank) {
            Equal => match self.pos.cmp(&other.pos) {
                Equal => match self.merge.cmp(&other.merge) {
                    Equal => self.pair.cmp(&other.pair),
                    other => other,
                },
                other => other,
            },
            other => other,
        }
        .reverse()
    }
}
impl PartialOrd for Merge {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl MergeState<'_, '_, '_> {
    /// 尝试执行一次合并，返回是否成功执行了一次合并。
    pub fn merge(&mut self) -> bool {
        // 一次合并将涉及至多 4 个 token：
        //
        // t0 t1 t2 t3
        // -- -- -- --
        //      ↓
        // t0 merge t3
        // -- ----- --
        //
        // 成功的合并将至少消费合并队列中的 1 个项，
        // 同时至多向合并队列添加 2 个项：
        //
        // t0 merge t3
        //    --------
        // --------

        // 从合并队列消费
        while let Some(Merge {
            pos: p1,
            pair: (t1, t2),
            merge,
            ..
        }) = self.merges.pop()
        {
            // 确认合并项有效性
            let m1 = self.marks[p1];
            if m1.len == 0 || m1.token != t1 {
                continue;
            }
            let p2 = p1 + m1.len as usize;
            match self.marks.get(p2) {
                Some(m2) if m2.len != 0 && m2.token == t2 => {}
                _ => continue,
            }
            // 丢弃的合并项不再重新加入队列
            if let Some(Dropout { p, rng }) = &mut self.dropout {
                if rng.gen::<f32>() < *p {
                    continue;
                }
            }
            // 合并
            let len = m1.len + self.marks[p2].len;
            self.marks[p1].token = merge;
            self.marks[p1].len = len;
            self.marks[p2].len = 0;

            let p3 = p1 + len as usize;
            // 创建 merge + t3 合并项
            if let Some(m3) = self.marks.get_mut(p3) {
                m3.back_distance = len;
                let (t3, p4) = (m3.token, p3 + m3.len as usize);
                if let Some(merge) = self.bpe.build_merge(self.vocab, self.text, p1..p4, (merge, t3)) {
                    self.merges.push(merge);
                }
            }
            // 创建 t0 + merge 合并项
            match self.marks[p1].back_distance as usize {
                0 => {}
                l0 => {
                    let p0 = p1 - l0;
                    let t0 = self.marks[p0].token;
                    if let Some(merge) = self.bpe.build_merge(self.vocab, self.text, p0..p3, (t0, merge)) {
                        self.merges.push(merge);
                    }
                }
            }
            // 成功合并
            return true;
        }
        false
    }
}

impl IntoIterator for MergeState<'_, '_, '_> {
    type Item = Segment;
    type IntoIter = IntoIter;
    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        Self::IntoIter {
            marks: self.marks,
            i: 0,
        }
    }
}

impl Iterator for IntoIter {
    type Item = Segment;

    fn next(&mut self) -> Option<Self::Item> {
        match &self.marks[self.i..] {
            &[Mark { token, len, .. }, ..] => {
                let start = self.i;
                self.i += len as usize;
                Some(Segment {
                    range: start..self.i,
                    token,
                })
            }
            [] => None,
        }
    }
}
