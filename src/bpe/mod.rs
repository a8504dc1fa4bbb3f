mod algorithm;

use crate::{status::Status, utok, vocab::Vocab, Method, Segment};
use algorithm::Dropout;
use rand::RngCore;

/// BPE 模型。合词规则来自词表：两个相邻的词拼接后若仍是词表中的词则可以合并，
/// 评分越高的词越先合并。
pub(crate) struct Bpe {
    /// 词的合并排名，从 0 开始，与 token 一一对应
    ranks: Box<[u32]>,
}

impl Bpe {
    pub fn new(vocab: &Vocab) -> Self {
        let scores = (0..vocab.len() as utok)
            .map(|t| vocab.score(t))
            .collect::<Vec<_>>();
        Self {
            ranks: rank(&scores).into(),
        }
    }

    #[inline(always)]
    fn rank(&self, token: utok) -> u32 {
        self.ranks[token as usize]
    }
}

impl Method for Bpe {
    fn encode(&self, vocab: &Vocab, text: &str) -> Vec<Segment> {
        let mut state = self.begin_merge(vocab, text, None);
        while state.merge() {}
        state.into_iter().collect()
    }

    fn sample_encode(
        &self,
        vocab: &Vocab,
        text: &str,
        alpha: f32,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<Segment>, Status> {
        if !(0. ..=1.).contains(&alpha) {
            return Err(Status::invalid_argument(
                "alpha must be in [0.0, 1.0] for BPE dropout.",
            ));
        }
        let mut state = self.begin_merge(vocab, text, Some(Dropout { p: alpha, rng }));
        while state.merge() {}
        Ok(state.into_iter().collect())
    }
}

/// 对一组评分排序、去重并重新赋权，转换为保持相同顺序的整型序列
fn rank(scores: &[f32]) -> Vec<u32> {
    use std::{
        cmp::Ordering,
        collections::{BTreeMap, BTreeSet},
    };

    #[derive(PartialEq, Debug)]
    struct FloatOrd(f32);
    impl Eq for FloatOrd {}
    impl PartialOrd for FloatOrd {
        #[inline]
        fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
            Some(self.cmp(other))
        }
    }
    impl Ord for FloatOrd {
        #[inline]
        fn cmp(&self, other: &Self) -> Ordering {
            self.0.total_cmp(&other.0)
        }
    }

    let map = scores
        // 排序 + 去重
        .iter()
        .copied()
        .map(FloatOrd)
        .collect::<BTreeSet<_>>()
        // 重新赋权
        .into_iter()
        .rev()
        .enumerate()
        .map(|(i, f)| (f, i as u32))
        .collect::<BTreeMap<_, _>>();

    scores.iter().map(|f| map[&FloatOrd(*f)]).collect()
}
