//! 这个模块提供对词表的预处理功能，供所有切分算法共享。
//!
//! sentencepiece 的词表中除一般词（*Normal piece*）外，还包含控制词、未知词、用户定义词和单字节词。
//! 单字节词（`<0x41>`）仅在 `byte_fallback` 打开时出现，表示无法由其他词覆盖的原始字节。

use crate::{
    as_byte_token,
    proto::{ModelPiece, PieceType},
    status::Status,
    utok,
};

pub(crate) struct Vocab {
    /// 保存所有词的字符串内容，重复片段只存一次
    text: Box<str>,
    /// 按 token 顺序保存元信息
    tokens: Box<[TokenMeta]>,
    /// 按字符串的字典序排序的 token 索引，用于从字符串二分查找 token
    sorted_pieces: Box<[utok]>,
    /// 字节到单字节词的映射，未定义的字节映射到 <unk>
    bytes: Box<[utok; 256]>,
    /// token: <unk>
    unk: utok,
    /// 一般词的最低评分，用于给未知词估分
    min_score: f32,
}

#[derive(Clone, Copy, Debug)]
struct TokenMeta {
    off: u32,
    len: u32,
    score: f32,
    kind: PieceType,
}

impl Vocab {
    /// 从 `ModelProto` 的词汇部分构造词表，并检查词表的一致性。
    pub fn new(pieces: &[ModelPiece], byte_fallback: bool) -> Result<Self, Status> {
        let mut unk = None;
        let mut bytes_found = 0usize;
        let mut bytes = Box::new([0 as utok; 256]);
        let mut min_score = f32::MAX;

        for (i, p) in pieces.iter().enumerate() {
            let t = i as utok;
            let piece = p.piece();
            if piece.is_empty() {
                return Err(Status::internal("piece must not be empty."));
            }
            match p.r#type() {
                PieceType::Unknown => {
                    if unk.replace(t).is_some() {
                        return Err(Status::internal("unk is already defined."));
                    }
                }
                PieceType::Byte => {
                    if !byte_fallback {
                        return Err(Status::internal(format!(
                            "byte piece {piece} is found although `byte_fallback` is false."
                        )));
                    }
                    let b = as_byte_token(piece.as_bytes()).ok_or_else(|| {
                        Status::internal(format!("{piece} is not a valid byte piece."))
                    })?;
                    bytes[b as usize] = t;
                    bytes_found += 1;
                }
                PieceType::Normal => min_score = min_score.min(p.score()),
                _ => {}
            }
        }

        let unk = unk.ok_or_else(|| Status::internal("unk is not defined."))?;
        if byte_fallback && bytes_found != 256 {
            return Err(Status::internal("there are not 256 byte pieces."));
        }
        if !byte_fallback {
            bytes.fill(unk);
        }
        if min_score == f32::MAX {
            min_score = 0.;
        }

        let CompressedVocab { text, slices } = CompressedVocab::new(pieces);
        let tokens = pieces
            .iter()
            .zip(slices)
            .map(|(p, (off, len))| TokenMeta {
                off: off as _,
                len: len as _,
                score: p.score(),
                kind: p.r#type(),
            })
            .collect::<Box<[_]>>();

        let mut sorted_pieces = (0..tokens.len() as utok).collect::<Box<[_]>>();
        let piece_of = |t: utok| {
            let TokenMeta { off, len, .. } = tokens[t as usize];
            &text[off as usize..][..len as usize]
        };
        sorted_pieces.sort_unstable_by_key(|&t| piece_of(t));
        if let Some(w) = sorted_pieces
            .windows(2)
            .find(|w| piece_of(w[0]) == piece_of(w[1]))
        {
            return Err(Status::internal(format!(
                "\"{}\" is already defined.",
                piece_of(w[0])
            )));
        }

        Ok(Self {
            text,
            tokens,
            sorted_pieces,
            bytes,
            unk,
            min_score,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[inline]
    pub fn unk(&self) -> utok {
        self.unk
    }

    #[inline]
    pub fn min_score(&self) -> f32 {
        self.min_score
    }

    #[inline]
    pub fn contains(&self, token: utok) -> bool {
        (token as usize) < self.tokens.len()
    }

    /// token -> piece
    #[inline]
    pub fn piece(&self, token: utok) -> &str {
        let TokenMeta { off, len, .. } = self.tokens[token as usize];
        &self.text[off as usize..][..len as usize]
    }

    #[inline]
    pub fn score(&self, token: utok) -> f32 {
        self.tokens[token as usize].score
    }

    #[inline]
    pub fn kind(&self, token: utok) -> PieceType {
        self.tokens[token as usize].kind
    }

    /// 可以由切分算法产生的词，即一般词和用户定义词。
    #[inline]
    pub fn is_segmentable(&self, token: utok) -> bool {
        matches!(self.kind(token), PieceType::Normal | PieceType::UserDefined)
    }

    /// byte -> token，未定义单字节词时返回 <unk>
    #[inline]
    pub fn byte_token(&self, b: u8) -> utok {
        self.bytes[b as usize]
    }

    /// 单字节词 -> byte
    #[inline]
    pub fn byte_value(&self, token: utok) -> Option<u8> {
        match self.kind(token) {
            PieceType::Byte => as_byte_token(self.piece(token).as_bytes()),
            _ => None,
        }
    }

    /// piece -> token，在全部词中查找
    pub fn find(&self, piece: &[u8]) -> Option<utok> {
        self.sorted_pieces
            .binary_search_by_key(&piece, |&t| self.piece(t).as_bytes())
            .ok()
            .map(|i| self.sorted_pieces[i])
    }

    /// piece -> token，只查找切分算法可以产生的词
    #[inline]
    pub fn find_segmentable(&self, piece: &[u8]) -> Option<utok> {
        self.find(piece).filter(|&t| self.is_segmentable(t))
    }

    /// 按 token 顺序遍历指定类型的词
    pub fn iter_kind(&self, kind: PieceType) -> impl Iterator<Item = (utok, &str)> + '_ {
        (0..self.tokens.len() as utok)
            .filter(move |&t| self.kind(t) == kind)
            .map(|t| (t, self.piece(t)))
    }
}

/// 利用词表中的重复部分压缩词表。
struct CompressedVocab {
    text: Box<str>,
    slices: Vec<(usize, usize)>,
}

impl CompressedVocab {
    fn new(pieces: &[ModelPiece]) -> Self {
        let total_len = pieces.iter().map(|p| p.piece().len()).sum();
        // 创建字符内容缓存
        let mut slices = vec![(0usize, 0usize); pieces.len()];
        let mut text_buf = String::with_capacity(total_len);
        let mut indices = (0..pieces.len()).collect::<Vec<_>>();
        // 对词按内容长度从长到短排序，因为短的内容有可能是长内容的子串，可以避免重复存储相同内容
        indices.sort_unstable_by_key(|&i| -(pieces[i].piece().len() as isize));
        for i in indices {
            let v = pieces[i].piece();
            // 查找子串，若存在则复用，否则将新的内容追加到缓存
            // utf-8 的首字节不可能是后续字节，所以匹配位置一定在字符边界上
            let off = memchr::memmem::find(text_buf.as_bytes(), v.as_bytes()).unwrap_or_else(|| {
                let off = text_buf.len();
                text_buf.push_str(v);
                off
            });
            slices[i] = (off, v.len());
        }
        Self {
            text: text_buf.into_boxed_str(),
            slices,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::piece;

    fn pieces() -> Vec<ModelPiece> {
        vec![
            piece("<unk>", 0., PieceType::Unknown),
            piece("<s>", 0., PieceType::Control),
            piece("</s>", 0., PieceType::Control),
            piece("▁hello", -1., PieceType::Normal),
            piece("hello", -2., PieceType::Normal),
            piece("ell", -3., PieceType::Normal),
            piece("<sep>", 0., PieceType::UserDefined),
        ]
    }

    #[test]
    fn shared_substrings_resolve_to_their_pieces() {
        let vocab = Vocab::new(&pieces(), false).unwrap();
        assert_eq!(vocab.len(), 7);
        assert_eq!(vocab.piece(3), "▁hello");
        assert_eq!(vocab.piece(4), "hello");
        assert_eq!(vocab.piece(5), "ell");
        assert_eq!(vocab.find("hello".as_bytes()), Some(4));
        assert_eq!(vocab.find(b"<s>"), Some(1));
        assert_eq!(vocab.find(b"he"), None);
    }

    #[test]
    fn segmentable_lookup_skips_reserved_pieces() {
        let vocab = Vocab::new(&pieces(), false).unwrap();
        assert_eq!(vocab.find_segmentable(b"<s>"), None);
        assert_eq!(vocab.find_segmentable(b"<sep>"), Some(6));
        assert_eq!(vocab.min_score(), -3.);
        assert_eq!(vocab.byte_token(b'a'), vocab.unk());
    }

    #[test]
    fn rejects_missing_unk() {
        let mut pieces = pieces();
        pieces.remove(0);
        let err = Vocab::new(&pieces, false).err().unwrap();
        assert_eq!(err.message(), "unk is not defined.");
    }

    #[test]
    fn rejects_duplicated_piece() {
        let mut pieces = pieces();
        pieces.push(piece("ell", -4., PieceType::Normal));
        let err = Vocab::new(&pieces, false).err().unwrap();
        assert_eq!(err.message(), "\"ell\" is already defined.");
    }

    #[test]
    fn byte_pieces_require_byte_fallback() {
        let mut pieces = pieces();
        pieces.push(piece("<0x41>", 0., PieceType::Byte));
        assert!(Vocab::new(&pieces, false).is_err());
        // 打开 byte_fallback 但不足 256 个单字节词
        let err = Vocab::new(&pieces, true).err().unwrap();
        assert_eq!(err.message(), "there are not 256 byte pieces.");
    }

    #[test]
    fn complete_byte_table() {
        let mut pieces = pieces();
        pieces.extend((0..=255u8).map(|b| piece(&format!("<0x{b:02X}>"), 0., PieceType::Byte)));
        let vocab = Vocab::new(&pieces, true).unwrap();
        let t = vocab.byte_token(b'A');
        assert_eq!(vocab.piece(t), "<0x41>");
        assert_eq!(vocab.byte_value(t), Some(b'A'));
        assert_eq!(vocab.byte_value(3), None);
    }
}
