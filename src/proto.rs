//! Protobuf messages shared with sentencepiece.
//!
//! Only the fields the processor reads are declared; prost skips the rest when
//! decoding. Tag numbers and defaults follow `sentencepiece_model.proto` and
//! `sentencepiece.proto`.

use prost::Message;

/// Serialized model: vocabulary plus trainer and normalizer settings.
#[derive(Clone, PartialEq, Message)]
pub struct ModelProto {
    /// Vocabulary, indexed by piece id.
    #[prost(message, repeated, tag = "1")]
    pub pieces: Vec<ModelPiece>,

    #[prost(message, optional, tag = "2")]
    pub trainer_spec: Option<TrainerSpec>,

    #[prost(message, optional, tag = "3")]
    pub normalizer_spec: Option<NormalizerSpec>,
}

/// One vocabulary entry of a [`ModelProto`].
#[derive(Clone, PartialEq, Message)]
pub struct ModelPiece {
    #[prost(string, optional, tag = "1")]
    pub piece: Option<String>,

    #[prost(float, optional, tag = "2")]
    pub score: Option<f32>,

    #[prost(enumeration = "PieceType", optional, tag = "3", default = "Normal")]
    pub r#type: Option<i32>,
}

/// Role of a vocabulary entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum PieceType {
    Normal = 1,
    Unknown = 2,
    Control = 3,
    UserDefined = 4,
    Unused = 5,
    Byte = 6,
}

/// Segmentation algorithm of a model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ModelType {
    Unigram = 1,
    Bpe = 2,
    Word = 3,
    Char = 4,
}

#[derive(Clone, PartialEq, Message)]
pub struct TrainerSpec {
    #[prost(enumeration = "ModelType", optional, tag = "3", default = "Unigram")]
    pub model_type: Option<i32>,

    #[prost(bool, optional, tag = "24")]
    pub treat_whitespace_as_suffix: Option<bool>,

    #[prost(bool, optional, tag = "35")]
    pub byte_fallback: Option<bool>,

    #[prost(string, optional, tag = "44", default = " \u{2047} ")]
    pub unk_surface: Option<String>,

    #[prost(string, optional, tag = "46", default = "<s>")]
    pub bos_piece: Option<String>,

    #[prost(string, optional, tag = "47", default = "</s>")]
    pub eos_piece: Option<String>,

    #[prost(string, optional, tag = "48", default = "<pad>")]
    pub pad_piece: Option<String>,
}

#[derive(Clone, PartialEq, Message)]
pub struct NormalizerSpec {
    #[prost(bool, optional, tag = "3", default = "true")]
    pub add_dummy_prefix: Option<bool>,

    #[prost(bool, optional, tag = "4", default = "true")]
    pub remove_extra_whitespaces: Option<bool>,

    #[prost(bool, optional, tag = "5", default = "true")]
    pub escape_whitespaces: Option<bool>,
}

/// Result record of an encode call.
#[derive(Clone, PartialEq, Message)]
pub struct SentencePieceText {
    /// User input or postprocessed text.
    #[prost(string, optional, tag = "1")]
    pub text: Option<String>,

    /// A sequence of sentence pieces.
    #[prost(message, repeated, tag = "2")]
    pub pieces: Vec<SentencePiece>,

    /// Score (usually log probability).
    #[prost(float, optional, tag = "3")]
    pub score: Option<f32>,
}

#[derive(Clone, Eq, PartialEq, Message)]
pub struct SentencePiece {
    /// Internal representation for the decoder.
    #[prost(string, optional, tag = "1")]
    pub piece: Option<String>,

    /// Vocabulary id.
    #[prost(uint32, optional, tag = "2")]
    pub id: Option<u32>,

    /// External representation for the client.
    #[prost(string, optional, tag = "3")]
    pub surface: Option<String>,

    /// Starting position.
    #[prost(uint32, optional, tag = "4")]
    pub begin: Option<u32>,

    /// End position.
    #[prost(uint32, optional, tag = "5")]
    pub end: Option<u32>,
}

/// Result record of an n-best encode call.
#[derive(Clone, PartialEq, Message)]
pub struct NBestSentencePieceText {
    #[prost(message, repeated, tag = "1")]
    pub nbests: Vec<SentencePieceText>,
}

impl ModelProto {
    /// Parses a serialized model.
    #[inline]
    pub fn parse(bytes: &[u8]) -> Result<Self, prost::DecodeError> {
        Self::decode(bytes)
    }
}
