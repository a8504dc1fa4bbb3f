use crate::proto::{ModelPiece, ModelProto, ModelType, PieceType, TrainerSpec};
use prost::Message;

pub(crate) fn piece(text: &str, score: f32, kind: PieceType) -> ModelPiece {
    ModelPiece {
        piece: Some(text.to_string()),
        score: Some(score),
        r#type: Some(kind as i32),
    }
}

fn reserved() -> Vec<ModelPiece> {
    vec![
        piece("<unk>", 0., PieceType::Unknown),
        piece("<s>", 0., PieceType::Control),
        piece("</s>", 0., PieceType::Control),
    ]
}

fn model(pieces: Vec<ModelPiece>, model_type: ModelType, byte_fallback: bool) -> ModelProto {
    ModelProto {
        pieces,
        trainer_spec: Some(TrainerSpec {
            model_type: Some(model_type as i32),
            byte_fallback: Some(byte_fallback),
            ..Default::default()
        }),
        normalizer_spec: None,
    }
}

/// 足以切分 "I saw a girl with a telescope." 的 unigram 模型
pub(crate) fn unigram_model() -> ModelProto {
    let mut pieces = reserved();
    pieces.extend(
        [
            ("▁", -2.),
            ("▁I", -3.),
            ("▁saw", -4.),
            ("▁a", -3.),
            ("▁girl", -5.),
            ("▁with", -5.),
            ("▁tele", -7.),
            ("scope", -7.),
            (".", -3.),
            ("girl", -6.),
            ("▁t", -6.),
            ("tele", -8.),
            ("sco", -7.5),
            ("pe", -7.5),
        ]
        .map(|(p, s)| piece(p, s, PieceType::Normal)),
    );
    pieces.extend(
        "abcegilopstw"
            .chars()
            .map(|c| piece(&c.to_string(), -9., PieceType::Normal)),
    );
    pieces.push(piece("<sep>", 0., PieceType::UserDefined));
    model(pieces, ModelType::Unigram, false)
}

pub(crate) fn bpe_model() -> ModelProto {
    let mut pieces = reserved();
    pieces.extend(
        [
            ("▁", -1.),
            ("a", -2.),
            ("b", -3.),
            ("c", -4.),
            ("ab", -5.),
            ("▁ab", -6.),
            ("bc", -7.),
            ("▁abc", -8.),
        ]
        .map(|(p, s)| piece(p, s, PieceType::Normal)),
    );
    model(pieces, ModelType::Bpe, false)
}

pub(crate) fn byte_fallback_model() -> ModelProto {
    let mut pieces = reserved();
    pieces.extend((0..=255u8).map(|b| piece(&format!("<0x{b:02X}>"), 0., PieceType::Byte)));
    pieces.push(piece("▁a", -1., PieceType::Normal));
    pieces.push(piece("a", -2., PieceType::Normal));
    model(pieces, ModelType::Unigram, true)
}

pub(crate) fn serialize(model: &ModelProto) -> Vec<u8> {
    model.encode_to_vec()
}
