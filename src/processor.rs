//! The safe processor.

use crate::{
    bpe::Bpe,
    config::{ExtraOptions, ProcessorConfig},
    error::{Result, SentencePieceError},
    normalizer::{Normalized, Normalizer, SPACE_SYMBOL},
    proto::{ModelProto, ModelType, NBestSentencePieceText, PieceType, SentencePiece, SentencePieceText},
    special::{Chunk, UserDefined},
    status::{Status, StatusCode},
    unigram::Unigram,
    utok,
    vocab::Vocab,
    word::{Char, Word},
    Method, Segment,
};
use log::{debug, warn};
use prost::Message;
use rand::{distributions::WeightedIndex, prelude::Distribution, rngs::StdRng, RngCore, SeedableRng};
use std::{
    fmt, fs, io,
    path::Path,
    sync::{Mutex, PoisonError},
};

/// Largest `nbest` accepted by sampling and n-best encoding.
pub const MAX_NBEST: i32 = 512;

/// One piece of an encoded text.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PieceWithId {
    /// The piece as stored in the vocabulary (or the normalized text for unknown pieces).
    pub piece: String,
    /// Vocabulary id.
    pub id: u32,
    /// The original input this piece covers.
    pub surface: String,
    /// Byte span of `surface` in the original input.
    pub span: (u32, u32),
}

impl From<&SentencePiece> for PieceWithId {
    fn from(p: &SentencePiece) -> Self {
        Self {
            piece: p.piece().to_string(),
            id: p.id(),
            surface: p.surface().to_string(),
            span: (p.begin(), p.end()),
        }
    }
}

/// A sentencepiece processor.
///
/// Reads take `&self` and may run concurrently; loading and option changes take
/// `&mut self`. A processor starts without a model: every encode or decode call
/// fails with an `Internal` status until [`load`](Self::load) succeeds.
pub struct SentencePieceProcessor {
    model: Option<Model>,
    config: ProcessorConfig,
    rng: Mutex<StdRng>,
}

/// 加载完成的模型。加载要么完整成功，要么不改变处理器的状态。
struct Model {
    serialized: Box<[u8]>,
    model_type: ModelType,
    vocab: Vocab,
    method: Box<dyn Method>,
    normalizer: Normalizer,
    user_defined: UserDefined,
    byte_fallback: bool,
    unk_surface: String,
    bos: Option<utok>,
    eos: Option<utok>,
    pad: Option<utok>,
}

impl Default for SentencePieceProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SentencePieceProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SentencePieceProcessor")
            .field("model_type", &self.model_type())
            .field("pieces", &self.len())
            .field("config", &self.config)
            .finish()
    }
}

impl SentencePieceProcessor {
    /// Creates a processor with no model loaded.
    pub fn new() -> Self {
        Self::with_config(ProcessorConfig::default())
    }

    pub fn with_config(config: ProcessorConfig) -> Self {
        let rng = match config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            model: None,
            config,
            rng: Mutex::new(rng),
        }
    }

    /// Creates a processor and loads the model file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut spp = Self::new();
        spp.load(path)?;
        Ok(spp)
    }

    /// Creates a processor from a serialized `ModelProto`.
    pub fn from_serialized_proto(data: &[u8]) -> Result<Self> {
        let mut spp = Self::new();
        spp.load_from_serialized_proto(data)?;
        Ok(spp)
    }

    /// Loads the model file at `path`, replacing the current model on success.
    ///
    /// A missing file yields `NotFound`, an unreadable one `PermissionDenied`
    /// and a malformed model `Internal`. On failure the previous model stays.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if path.as_os_str().as_encoded_bytes().contains(&0) {
            return Err(SentencePieceError::FilenameContainsNul(path.to_path_buf()));
        }
        let loaded = fs::read(path)
            .map_err(|e| io_status(path, e))
            .and_then(|data| Model::parse(&data));
        match loaded {
            Ok(model) => {
                debug!(
                    "loaded {:?} model with {} pieces from {}",
                    model.model_type,
                    model.vocab.len(),
                    path.display()
                );
                self.model = Some(model);
                Ok(())
            }
            Err(status) => {
                warn!("failed to load {}: {status}", path.display());
                Err(status.into())
            }
        }
    }

    /// Loads a serialized `ModelProto`, replacing the current model on success.
    pub fn load_from_serialized_proto(&mut self, data: &[u8]) -> Result<()> {
        match Model::parse(data) {
            Ok(model) => {
                debug!(
                    "loaded {:?} model with {} pieces from {} bytes",
                    model.model_type,
                    model.vocab.len(),
                    data.len()
                );
                self.model = Some(model);
                Ok(())
            }
            Err(status) => {
                warn!("failed to load serialized model: {status}");
                Err(status.into())
            }
        }
    }

    /// The bytes the current model was loaded from.
    pub fn serialized_model_proto(&self) -> Result<&[u8]> {
        Ok(&self.model()?.serialized)
    }

    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    #[inline]
    pub fn model_type(&self) -> Option<ModelType> {
        self.model.as_ref().map(|m| m.model_type)
    }

    #[inline]
    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Segments `text` into pieces.
    pub fn encode(&self, text: impl AsRef<[u8]>) -> Result<Vec<PieceWithId>> {
        let spt = self.encode_as_proto(text)?;
        Ok(spt.pieces.iter().map(PieceWithId::from).collect())
    }

    pub fn encode_as_proto(&self, text: impl AsRef<[u8]>) -> Result<SentencePieceText> {
        let model = self.model()?;
        let input = text.as_ref();
        let normalized = model.normalizer.normalize(input);
        let segments = model.segment(&normalized.text, |s| Ok(model.method.encode(&model.vocab, s)))?;
        Ok(model.to_proto(input, &normalized, &segments, None, self.config.encode_extra_options)?)
    }

    /// Serialized `SentencePieceText` of [`encode`](Self::encode).
    pub fn encode_as_serialized_proto(&self, text: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        Ok(self.encode_as_proto(text)?.encode_to_vec())
    }

    /// Samples one segmentation of `text`.
    ///
    /// `nbest` of 0 or 1 gives the best segmentation. Greater values sample from
    /// the `nbest` best segmentations with weights `exp(alpha * score)`; negative
    /// values sample from all segmentations with inverse temperature `alpha`
    /// (for BPE models: merge dropout with probability `alpha`).
    pub fn sample_encode(
        &self,
        text: impl AsRef<[u8]>,
        nbest: i32,
        alpha: f32,
    ) -> Result<Vec<PieceWithId>> {
        let spt = self.sample_encode_as_proto(text, nbest, alpha)?;
        Ok(spt.pieces.iter().map(PieceWithId::from).collect())
    }

    pub fn sample_encode_as_proto(
        &self,
        text: impl AsRef<[u8]>,
        nbest: i32,
        alpha: f32,
    ) -> Result<SentencePieceText> {
        let model = self.model()?;
        check_nbest(nbest)?;
        let input = text.as_ref();
        let normalized = model.normalizer.normalize(input);

        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let segments = match nbest {
            0 | 1 => model.segment(&normalized.text, |s| Ok(model.method.encode(&model.vocab, s)))?,
            n if n > 1 => {
                let nbests = model.nbest_segment(&normalized.text, n as usize)?;
                pick_weighted(nbests, alpha, &mut *rng)
            }
            _ => model.segment(&normalized.text, |s| {
                model.method.sample_encode(&model.vocab, s, alpha, &mut *rng)
            })?,
        };
        Ok(model.to_proto(input, &normalized, &segments, None, self.config.encode_extra_options)?)
    }

    pub fn sample_encode_as_serialized_proto(
        &self,
        text: impl AsRef<[u8]>,
        nbest: i32,
        alpha: f32,
    ) -> Result<Vec<u8>> {
        Ok(self.sample_encode_as_proto(text, nbest, alpha)?.encode_to_vec())
    }

    /// The `nbest` best segmentations, best first. Only unigram models support this.
    pub fn nbest_encode(&self, text: impl AsRef<[u8]>, nbest: i32) -> Result<Vec<Vec<PieceWithId>>> {
        let nbests = self.nbest_encode_as_proto(text, nbest)?;
        Ok(nbests
            .nbests
            .iter()
            .map(|spt| spt.pieces.iter().map(PieceWithId::from).collect())
            .collect())
    }

    pub fn nbest_encode_as_proto(
        &self,
        text: impl AsRef<[u8]>,
        nbest: i32,
    ) -> Result<NBestSentencePieceText> {
        let model = self.model()?;
        check_nbest(nbest)?;
        let input = text.as_ref();
        let normalized = model.normalizer.normalize(input);
        let nbests = model
            .nbest_segment(&normalized.text, nbest.max(1) as usize)?
            .into_iter()
            .map(|(segments, score)| {
                model.to_proto(
                    input,
                    &normalized,
                    &segments,
                    Some(score),
                    self.config.encode_extra_options,
                )
            })
            .collect::<Result<Vec<_>, Status>>()?;
        Ok(NBestSentencePieceText { nbests })
    }

    pub fn nbest_encode_as_serialized_proto(
        &self,
        text: impl AsRef<[u8]>,
        nbest: i32,
    ) -> Result<Vec<u8>> {
        Ok(self.nbest_encode_as_proto(text, nbest)?.encode_to_vec())
    }

    /// Reconstructs text from piece ids. Ids outside the vocabulary yield `OutOfRange`.
    pub fn decode_piece_ids(&self, ids: &[u32]) -> Result<String> {
        let model = self.model()?;
        let vocab = &model.vocab;
        if let Some(id) = ids.iter().find(|&&id| !vocab.contains(id)) {
            return Err(Status::new(
                StatusCode::OutOfRange,
                format!("piece id {id} is out of range."),
            )
            .into());
        }
        let mut pieces = ids.iter().map(|&t| (vocab.piece(t), t)).collect::<Vec<_>>();
        Ok(model.decode(&mut pieces, self.config.decode_extra_options))
    }

    /// Reconstructs text from piece strings. Strings missing from the vocabulary
    /// are treated as unknown pieces and kept verbatim.
    pub fn decode_pieces(&self, pieces: &[impl AsRef<str>]) -> Result<String> {
        let model = self.model()?;
        let vocab = &model.vocab;
        let mut pieces = pieces
            .iter()
            .map(|p| {
                let p = p.as_ref();
                (p, vocab.find(p.as_bytes()).unwrap_or(vocab.unk()))
            })
            .collect::<Vec<_>>();
        Ok(model.decode(&mut pieces, self.config.decode_extra_options))
    }

    /// Id of `piece`, the unknown id for pieces outside the vocabulary and
    /// `None` when no model is loaded.
    pub fn piece_to_id(&self, piece: &str) -> Option<u32> {
        let vocab = &self.model.as_ref()?.vocab;
        Some(vocab.find(piece.as_bytes()).unwrap_or(vocab.unk()))
    }

    pub fn id_to_piece(&self, id: u32) -> Result<&str> {
        let vocab = &self.model()?.vocab;
        if !vocab.contains(id) {
            return Err(Status::new(
                StatusCode::OutOfRange,
                format!("piece id {id} is out of range."),
            )
            .into());
        }
        Ok(vocab.piece(id))
    }

    /// Vocabulary size, 0 when no model is loaded.
    #[inline]
    pub fn len(&self) -> usize {
        self.model.as_ref().map_or(0, |m| m.vocab.len())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bos_id(&self) -> Option<u32> {
        self.model.as_ref()?.bos
    }

    pub fn eos_id(&self) -> Option<u32> {
        self.model.as_ref()?.eos
    }

    pub fn pad_id(&self) -> Option<u32> {
        self.model.as_ref()?.pad
    }

    pub fn unk_id(&self) -> Option<u32> {
        self.model.as_ref().map(|m| m.vocab.unk())
    }

    /// Type of the piece `id`, `None` when out of range or unloaded.
    pub fn piece_type(&self, id: u32) -> Option<PieceType> {
        let vocab = &self.model.as_ref()?.vocab;
        vocab.contains(id).then(|| vocab.kind(id))
    }

    #[inline]
    pub fn is_unknown(&self, id: u32) -> bool {
        self.piece_type(id) == Some(PieceType::Unknown)
    }

    #[inline]
    pub fn is_control(&self, id: u32) -> bool {
        self.piece_type(id) == Some(PieceType::Control)
    }

    #[inline]
    pub fn is_unused(&self, id: u32) -> bool {
        self.piece_type(id) == Some(PieceType::Unused)
    }

    #[inline]
    pub fn is_byte(&self, id: u32) -> bool {
        self.piece_type(id) == Some(PieceType::Byte)
    }

    /// Score of the piece `id`, 0 when out of range or unloaded.
    pub fn score(&self, id: u32) -> f32 {
        match &self.model {
            Some(m) if m.vocab.contains(id) => m.vocab.score(id),
            _ => 0.,
        }
    }

    /// Sets the post-processing of encode results from a `"bos:eos:reverse"` list.
    pub fn set_encode_extra_options(&mut self, options: &str) -> Result<()> {
        let options = options.parse::<ExtraOptions>()?;
        if let Some(model) = &self.model {
            model.check_extra_options(options)?;
        }
        debug!("encode extra options: \"{options}\"");
        self.config.encode_extra_options = options;
        Ok(())
    }

    /// Sets the pre-processing of decode inputs; only `reverse` is accepted.
    pub fn set_decode_extra_options(&mut self, options: &str) -> Result<()> {
        let options = options.parse::<ExtraOptions>()?;
        ProcessorConfig {
            decode_extra_options: options,
            ..ProcessorConfig::default()
        }
        .validate()?;
        debug!("decode extra options: \"{options}\"");
        self.config.decode_extra_options = options;
        Ok(())
    }

    /// Reseeds the sampling generator.
    pub fn set_random_seed(&mut self, seed: u64) {
        *self.rng.get_mut().unwrap_or_else(PoisonError::into_inner) = StdRng::seed_from_u64(seed);
        self.config.random_seed = Some(seed);
    }

    fn model(&self) -> Result<&Model, Status> {
        self.model.as_ref().ok_or_else(Status::not_loaded)
    }
}

impl Model {
    fn parse(data: &[u8]) -> Result<Self, Status> {
        let proto = ModelProto::parse(data)
            .map_err(|e| Status::internal(format!("Model file is broken: {e}")))?;
        let trainer = proto.trainer_spec.clone().unwrap_or_default();
        let vocab = Vocab::new(&proto.pieces, trainer.byte_fallback())?;

        let suffix = trainer.treat_whitespace_as_suffix();
        let model_type = trainer.model_type();
        let method: Box<dyn Method> = match model_type {
            ModelType::Unigram => Box::new(Unigram::new(&vocab)),
            ModelType::Bpe => Box::new(Bpe::new(&vocab)),
            ModelType::Word => Box::new(Word::new(suffix)),
            ModelType::Char => Box::new(Char),
        };
        // 特殊词由训练配置中的字符串确定，且必须是控制词
        let control = |piece: &str| {
            vocab
                .find(piece.as_bytes())
                .filter(|&t| vocab.kind(t) == PieceType::Control)
        };
        let (bos, eos, pad) = (
            control(trainer.bos_piece()),
            control(trainer.eos_piece()),
            control(trainer.pad_piece()),
        );

        Ok(Self {
            serialized: data.into(),
            model_type,
            method,
            normalizer: Normalizer::new(proto.normalizer_spec.as_ref(), suffix),
            user_defined: UserDefined::new(vocab.iter_kind(PieceType::UserDefined)),
            byte_fallback: trainer.byte_fallback(),
            unk_surface: trainer.unk_surface().to_string(),
            bos,
            eos,
            pad,
            vocab,
        })
    }

    /// 切出用户定义词，其余片段交给 `f` 切分。
    fn segment(
        &self,
        text: &str,
        mut f: impl FnMut(&str) -> Result<Vec<Segment>, Status>,
    ) -> Result<Vec<Segment>, Status> {
        let mut ans = Vec::new();
        for chunk in self.user_defined.split(text) {
            match chunk {
                Chunk::Piece(range, token) => ans.push(Segment { range, token }),
                Chunk::Text(range) => {
                    let offset = range.start;
                    ans.extend(f(&text[range])?.into_iter().map(|s| s.shift(offset)));
                }
            }
        }
        Ok(ans)
    }

    /// 各片段的 n-best 组合成整句的 n-best。
    fn nbest_segment(&self, text: &str, n: usize) -> Result<Vec<(Vec<Segment>, f32)>, Status> {
        if self.model_type != ModelType::Unigram {
            return Err(Status::new(
                StatusCode::Unimplemented,
                "NBestEncode is not available for the current model.",
            ));
        }
        let mut ans = vec![(Vec::<Segment>::new(), 0f32)];
        for chunk in self.user_defined.split(text) {
            match chunk {
                Chunk::Piece(range, token) => {
                    for (segments, _) in &mut ans {
                        segments.push(Segment {
                            range: range.clone(),
                            token,
                        })
                    }
                }
                Chunk::Text(range) => {
                    let offset = range.start;
                    let list = self.method.nbest_encode(&self.vocab, &text[range], n)?;
                    let mut next = Vec::with_capacity(ans.len() * list.len());
                    for (prefix, s0) in &ans {
                        for (segments, s1) in &list {
                            let mut segments_ = prefix.clone();
                            segments_.extend(segments.iter().cloned().map(|s| s.shift(offset)));
                            next.push((segments_, s0 + s1));
                        }
                    }
                    next.sort_by(|a, b| b.1.total_cmp(&a.1));
                    next.truncate(n);
                    ans = next;
                }
            }
        }
        Ok(ans)
    }

    fn check_extra_options(&self, options: ExtraOptions) -> Result<(), Status> {
        if options.bos && self.bos.is_none() {
            return Err(Status::internal("id for `<s>` is not defined."));
        }
        if options.eos && self.eos.is_none() {
            return Err(Status::internal("id for `</s>` is not defined."));
        }
        Ok(())
    }

    fn to_proto(
        &self,
        input: &[u8],
        normalized: &Normalized,
        segments: &[Segment],
        score: Option<f32>,
        options: ExtraOptions,
    ) -> Result<SentencePieceText, Status> {
        self.check_extra_options(options)?;
        let vocab = &self.vocab;

        let mut pieces = Vec::with_capacity(segments.len() + 2);
        for seg in segments {
            let (begin, end) = normalized.original_span(seg.range.start, seg.range.end);
            let text = &normalized.text[seg.range.clone()];
            let surface = String::from_utf8_lossy(&input[begin..end]);
            if self.byte_fallback && seg.token == vocab.unk() {
                // 未知词展开为单字节词，原始区间记在最后一个字节上
                let bytes = text.as_bytes();
                for (i, &b) in bytes.iter().enumerate() {
                    let t = vocab.byte_token(b);
                    if i + 1 == bytes.len() {
                        pieces.push(record(vocab.piece(t), t, &surface, begin, end));
                    } else {
                        pieces.push(record(vocab.piece(t), t, "", begin, begin));
                    }
                }
            } else {
                pieces.push(record(text, seg.token, &surface, begin, end));
            }
        }

        if let (true, Some(t)) = (options.bos, self.bos) {
            pieces.insert(0, record(vocab.piece(t), t, "", 0, 0));
        }
        if let (true, Some(t)) = (options.eos, self.eos) {
            pieces.push(record(vocab.piece(t), t, "", input.len(), input.len()));
        }
        if options.reverse {
            pieces.reverse();
        }

        Ok(SentencePieceText {
            text: Some(String::from_utf8_lossy(input).into_owned()),
            pieces,
            score,
        })
    }

    fn decode(&self, pieces: &mut [(&str, utok)], options: ExtraOptions) -> String {
        if options.reverse {
            pieces.reverse();
        }
        let vocab = &self.vocab;
        let strip = self.normalizer.strips_boundary_space();
        let suffix = self.normalizer.treat_whitespace_as_suffix();

        let mut text = String::new();
        let mut bytes = Vec::new();
        let mut is_bos_ws = strip && !suffix;
        for &(piece, t) in pieces.iter() {
            if let Some(b) = vocab.byte_value(t) {
                bytes.push(b);
                continue;
            }
            if !bytes.is_empty() {
                push_bytes(&mut text, &mut bytes);
                is_bos_ws = false;
            }
            let mut surface = match vocab.kind(t) {
                PieceType::Control => continue,
                PieceType::Unknown if piece == vocab.piece(t) => self.unk_surface.as_str(),
                _ => piece,
            };
            if is_bos_ws {
                surface = surface.strip_prefix(SPACE_SYMBOL).unwrap_or(surface);
                is_bos_ws = false;
            }
            push_unescaped(&mut text, surface);
        }
        push_bytes(&mut text, &mut bytes);
        if strip && suffix && text.ends_with(' ') {
            text.pop();
        }
        text
    }
}

fn record(piece: &str, id: utok, surface: &str, begin: usize, end: usize) -> SentencePiece {
    SentencePiece {
        piece: Some(piece.to_string()),
        id: Some(id),
        surface: Some(surface.to_string()),
        begin: Some(begin as _),
        end: Some(end as _),
    }
}

/// 单字节词拼成的字节串按 utf-8 解码，每个无效字节替换为 U+FFFD
fn push_bytes(text: &mut String, bytes: &mut Vec<u8>) {
    for chunk in bytes.utf8_chunks() {
        text.push_str(chunk.valid());
        text.extend(chunk.invalid().iter().map(|_| char::REPLACEMENT_CHARACTER));
    }
    bytes.clear();
}

/// `▁` -> ' '
fn push_unescaped(text: &mut String, piece: &str) {
    let mut last = 0;
    for pos in memchr::memmem::find_iter(piece.as_bytes(), SPACE_SYMBOL) {
        text.push_str(&piece[last..pos]);
        text.push(' ');
        last = pos + SPACE_SYMBOL.len();
    }
    text.push_str(&piece[last..]);
}

fn check_nbest(nbest: i32) -> Result<(), Status> {
    if nbest > MAX_NBEST {
        return Err(Status::invalid_argument(format!(
            "nbest_size must be nbest_size <= {MAX_NBEST}"
        )));
    }
    Ok(())
}

/// 按 `exp(alpha * score)` 的比例从 n-best 中选一个。
fn pick_weighted(nbests: Vec<(Vec<Segment>, f32)>, alpha: f32, rng: &mut dyn RngCore) -> Vec<Segment> {
    let max = nbests
        .iter()
        .map(|(_, score)| *score)
        .fold(f32::NEG_INFINITY, f32::max);
    let weights = nbests
        .iter()
        .map(|(_, score)| ((alpha * (score - max)) as f64).exp())
        .collect::<Vec<_>>();
    let i = match WeightedIndex::new(&weights) {
        Ok(dist) => dist.sample(rng),
        Err(_) => 0,
    };
    nbests.into_iter().nth(i).map(|(segments, _)| segments).unwrap_or_default()
}

fn io_status(path: &Path, e: io::Error) -> Status {
    let code = match e.kind() {
        io::ErrorKind::PermissionDenied => StatusCode::PermissionDenied,
        _ => StatusCode::NotFound,
    };
    Status::new(code, format!("\"{}\": {e}", path.display()))
}
