use crate::{utok, Segment};
use rand::{distributions::WeightedIndex, prelude::Distribution, RngCore};

/// 切分网格。`ends[i]` 保存所有在字节位置 `i` 结束的节点。
pub(super) struct Lattice {
    ends: Vec<Vec<Node>>,
}

#[derive(Clone, Copy, Debug)]
struct Node {
    start: usize,
    token: utok,
    score: f32,
}

/// n-best 搜索中一个位置上的假设：到达此处的累计分数，以及回溯信息
#[derive(Clone, Copy, Debug)]
struct Hypothesis {
    score: f32,
    node: usize,
    prev: usize,
}

impl Lattice {
    pub fn new(len: usize) -> Self {
        Self {
            ends: vec![Vec::new(); len + 1],
        }
    }

    #[inline]
    fn len(&self) -> usize {
        self.ends.len() - 1
    }

    pub fn insert(&mut self, start: usize, end: usize, token: utok, score: f32) {
        self.ends[end].push(Node { start, token, score });
    }

    /// 最优切分及其分数。
    pub fn viterbi(&self) -> (Vec<Segment>, f32) {
        let len = self.len();
        // (累计分数, 最优的最后一个节点)
        let mut best = vec![(f32::NEG_INFINITY, usize::MAX); len + 1];
        best[0].0 = 0.;
        for end in 1..=len {
            for (i, node) in self.ends[end].iter().enumerate() {
                let score = best[node.start].0 + node.score;
                if score > best[end].0 {
                    best[end] = (score, i);
                }
            }
        }

        let mut ans = Vec::new();
        let mut pos = len;
        while pos > 0 {
            let node = self.ends[pos][best[pos].1];
            ans.push(Segment {
                range: node.start..pos,
                token: node.token,
            });
            pos = node.start;
        }
        ans.reverse();
        (ans, best[len].0)
    }

    /// 分数最高的至多 `n` 个切分，按分数从高到低排列。
    pub fn nbest(&self, n: usize) -> Vec<(Vec<Segment>, f32)> {
        let len = self.len();
        let mut hyps = vec![Vec::<Hypothesis>::new(); len + 1];
        hyps[0].push(Hypothesis {
            score: 0.,
            node: usize::MAX,
            prev: usize::MAX,
        });
        for end in 1..=len {
            let mut candidates = Vec::new();
            for (i, node) in self.ends[end].iter().enumerate() {
                for (r, h) in hyps[node.start].iter().enumerate() {
                    candidates.push(Hypothesis {
                        score: h.score + node.score,
                        node: i,
                        prev: r,
                    });
                }
            }
            // 稳定排序，同分时保留插入顺序
            candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
            candidates.truncate(n);
            hyps[end] = candidates;
        }

        (0..hyps[len].len())
            .map(|rank| {
                let mut ans = Vec::new();
                let (mut pos, mut r) = (len, rank);
                while pos > 0 {
                    let h = hyps[pos][r];
                    let node = self.ends[pos][h.node];
                    ans.push(Segment {
                        range: node.start..pos,
                        token: node.token,
                    });
                    (pos, r) = (node.start, h.prev);
                }
                ans.reverse();
                (ans, hyps[len][rank].score)
            })
            .collect()
    }

    /// 前向过滤后向采样：按 `exp(theta * score)` 的比例从所有切分中采样一个。
    pub fn sample(&self, theta: f32, rng: &mut dyn RngCore) -> Vec<Segment> {
        let len = self.len();
        let theta = theta as f64;
        // 前向：到达每个位置的所有路径的对数配分函数
        let mut alpha = vec![f64::NEG_INFINITY; len + 1];
        alpha[0] = 0.;
        for end in 1..=len {
            for node in &self.ends[end] {
                alpha[end] = log_sum_exp(alpha[end], alpha[node.start] + theta * node.score as f64);
            }
        }
        // 后向：从末尾按条件概率逐个采样节点
        let mut ans = Vec::new();
        let mut pos = len;
        while pos > 0 {
            let nodes = &self.ends[pos];
            let weights = nodes
                .iter()
                .map(|n| (alpha[n.start] + theta * n.score as f64 - alpha[pos]).exp())
                .collect::<Vec<_>>();
            let i = match WeightedIndex::new(&weights) {
                Ok(dist) => dist.sample(rng),
                Err(_) => 0,
            };
            let node = nodes[i];
            ans.push(Segment {
                range: node.start..pos,
                token: node.token,
            });
            pos = node.start;
        }
        ans.reverse();
        ans
    }
}

fn log_sum_exp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let (hi, lo) = if a > b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}
