mod lattice;

use crate::{merge_unknown, proto::PieceType, status::Status, utok, vocab::Vocab, Method, Segment};
use lattice::Lattice;
use patricia_tree::PatriciaMap;
use rand::RngCore;

/// 未知字符的评分低于所有一般词
const UNK_PENALTY: f32 = 10.;

/// Unigram 语言模型。
pub(crate) struct Unigram {
    /// 一般词的前缀树，用于在每个位置枚举所有匹配的词
    trie: PatriciaMap<utok>,
}

impl Unigram {
    pub fn new(vocab: &Vocab) -> Self {
        let trie = vocab
            .iter_kind(PieceType::Normal)
            .map(|(t, piece)| (piece.as_bytes(), t))
            .collect();
        Self { trie }
    }

    fn lattice(&self, vocab: &Vocab, text: &str) -> Lattice {
        let mut lattice = Lattice::new(text.len());
        let unk_score = vocab.min_score() - UNK_PENALTY;
        for (pos, c) in text.char_indices() {
            let char_len = c.len_utf8();
            let mut covered = false;
            for (prefix, &token) in self.trie.common_prefixes(&text.as_bytes()[pos..]) {
                covered |= prefix.len() == char_len;
                lattice.insert(pos, pos + prefix.len(), token, vocab.score(token));
            }
            // 保证每个字符都至少被一个节点覆盖
            if !covered {
                lattice.insert(pos, pos + char_len, vocab.unk(), unk_score);
            }
        }
        lattice
    }
}

impl Method for Unigram {
    fn encode(&self, vocab: &Vocab, text: &str) -> Vec<Segment> {
        let (segments, _) = self.lattice(vocab, text).viterbi();
        merge_unknown(vocab.unk(), segments)
    }

    fn nbest_encode(
        &self,
        vocab: &Vocab,
        text: &str,
        nbest: usize,
    ) -> Result<Vec<(Vec<Segment>, f32)>, Status> {
        Ok(self
            .lattice(vocab, text)
            .nbest(nbest)
            .into_iter()
            .map(|(segments, score)| (merge_unknown(vocab.unk(), segments), score))
            .collect())
    }

    fn sample_encode(
        &self,
        vocab: &Vocab,
        text: &str,
        alpha: f32,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<Segment>, Status> {
        let segments = self.lattice(vocab, text).sample(alpha, rng);
        Ok(merge_unknown(vocab.unk(), segments))
    }
}
