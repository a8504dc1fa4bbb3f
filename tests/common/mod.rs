#![allow(dead_code)]

use prost::Message;
use spp::proto::{ModelPiece, ModelProto, ModelType, NormalizerSpec, PieceType, TrainerSpec};
use std::{fs, path::PathBuf};
use tempfile::TempDir;

pub const SENTENCE: &str = "I saw a girl with a telescope.";

fn piece(text: &str, score: f32, kind: PieceType) -> ModelPiece {
    ModelPiece {
        piece: Some(text.into()),
        score: Some(score),
        r#type: Some(kind as i32),
    }
}

/// A small unigram model covering [`SENTENCE`]; `<pad>` is deliberately absent.
pub fn unigram_model() -> ModelProto {
    let mut pieces = vec![
        piece("<unk>", 0., PieceType::Unknown),
        piece("<s>", 0., PieceType::Control),
        piece("</s>", 0., PieceType::Control),
    ];
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
            ("▁t", -6.),
            ("tele", -8.),
        ]
        .map(|(p, s)| piece(p, s, PieceType::Normal)),
    );
    pieces.extend(
        "abcegilopstw"
            .chars()
            .map(|c| piece(&c.to_string(), -9., PieceType::Normal)),
    );
    pieces.push(piece("<unused>", 0., PieceType::Unused));
    ModelProto {
        pieces,
        trainer_spec: Some(TrainerSpec {
            model_type: Some(ModelType::Unigram as i32),
            ..Default::default()
        }),
        normalizer_spec: Some(NormalizerSpec::default()),
    }
}

/// `<unk> <s> </s>` followed by `normal` pieces, all at score 0.
fn small_model(normal: &[&str], trainer: TrainerSpec) -> ModelProto {
    let mut pieces = vec![
        piece("<unk>", 0., PieceType::Unknown),
        piece("<s>", 0., PieceType::Control),
        piece("</s>", 0., PieceType::Control),
    ];
    pieces.extend(normal.iter().map(|p| piece(p, 0., PieceType::Normal)));
    ModelProto {
        pieces,
        trainer_spec: Some(trainer),
        normalizer_spec: None,
    }
}

pub fn word_model() -> ModelProto {
    small_model(
        &["▁hello", "▁world"],
        TrainerSpec {
            model_type: Some(ModelType::Word as i32),
            ..Default::default()
        },
    )
}

/// A char model that attaches `▁` to the end of words.
pub fn suffix_char_model() -> ModelProto {
    small_model(
        &["a", "b", "▁"],
        TrainerSpec {
            model_type: Some(ModelType::Char as i32),
            treat_whitespace_as_suffix: Some(true),
            ..Default::default()
        },
    )
}

pub fn unigram_bytes() -> Vec<u8> {
    unigram_model().encode_to_vec()
}

/// Writes `bytes` to `toy.model` in a fresh temporary directory.
pub fn model_file(bytes: &[u8]) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("create tempdir");
    let path = dir.path().join("toy.model");
    fs::write(&path, bytes).expect("write model");
    (dir, path)
}
