mod common;

use common::{model_file, unigram_bytes, SENTENCE};
use prost::Message;
use spp::{
    ffi::*,
    proto::{NBestSentencePieceText, SentencePieceText},
    status::StatusCode,
};
use std::{
    ffi::{CStr, CString},
    ptr::null_mut,
    slice, thread,
};

/// 取出缓冲区内容并释放
fn take(out: *mut u8, len: usize) -> Vec<u8> {
    let bytes = unsafe { slice::from_raw_parts(out, len) }.to_vec();
    unsafe { spp_buffer_free(out, len) };
    bytes
}

fn encode(handle: *const SppProcessor, text: &[u8]) -> (i32, Vec<u8>) {
    let mut out = null_mut();
    let mut len = 0;
    let code =
        unsafe { spp_encode_as_serialized_proto(handle, text.as_ptr(), text.len(), &mut out, &mut len) };
    (code, take(out, len))
}

fn decode_ids(handle: *const SppProcessor, ids: &[i32]) -> (i32, Vec<u8>) {
    let mut out = null_mut();
    let mut len = 0;
    let code = unsafe { spp_decode_piece_ids(handle, ids.as_ptr(), ids.len(), &mut out, &mut len) };
    (code, take(out, len))
}

fn loaded() -> *mut SppProcessor {
    let bytes = unigram_bytes();
    let handle = spp_new();
    assert!(!handle.is_null());
    let code = unsafe { spp_from_serialized_proto(handle, bytes.as_ptr(), bytes.len()) };
    assert_eq!(code, StatusCode::Ok.raw());
    handle
}

#[test]
fn lifecycle_through_model_file() {
    let bytes = unigram_bytes();
    let (_dir, path) = model_file(&bytes);
    let path = CString::new(path.to_str().unwrap()).unwrap();

    let handle = spp_new();
    unsafe {
        assert_eq!(spp_load(handle, path.as_ptr()), 0);

        let (code, encoded) = encode(handle, SENTENCE.as_bytes());
        assert_eq!(code, 0);
        let spt = SentencePieceText::decode(&encoded[..]).unwrap();
        let ids = spt.pieces.iter().map(|p| p.id() as i32).collect::<Vec<_>>();
        let (code, decoded) = decode_ids(handle, &ids);
        assert_eq!(code, 0);
        assert_eq!(decoded, SENTENCE.as_bytes());

        let mut out = null_mut();
        let mut len = 0;
        assert_eq!(spp_to_serialized_proto(handle, &mut out, &mut len), 0);
        assert_eq!(take(out, len), bytes);

        assert_eq!(spp_free(handle), 0);
        assert_eq!(spp_free(handle), SPP_INVALID_HANDLE);
    }
}

#[test]
fn load_failures_report_status() {
    let handle = spp_new();
    let missing = CString::new("/no/such/dir/toy.model").unwrap();
    unsafe {
        assert_eq!(spp_load(handle, missing.as_ptr()), StatusCode::NotFound.raw());
        let message = CStr::from_ptr(spp_last_error_message()).to_str().unwrap();
        assert!(message.contains("toy.model"));

        let garbage = b"\x0a\xff\xff";
        let code = spp_from_serialized_proto(handle, garbage.as_ptr(), garbage.len());
        assert_eq!(code, StatusCode::Internal.raw());
        assert_eq!(spp_piece_size(handle), 0);
        spp_free(handle);
    }
}

#[test]
fn unloaded_handle_queries() {
    let handle = spp_new();
    let piece = CString::new("<s>").unwrap();
    unsafe {
        assert_eq!(spp_piece_to_id(handle, piece.as_ptr()), -1);
        assert_eq!(spp_piece_size(handle), 0);
        assert_eq!(spp_bos_id(handle), -1);
        assert_eq!(spp_unk_id(handle), -1);
        assert!(!spp_is_unknown(handle, 0));
        assert_eq!(spp_get_score(handle, 0), 0.);

        let (code, encoded) = encode(handle, b"abc");
        assert_eq!(code, StatusCode::Internal.raw());
        assert!(encoded.is_empty());

        let mut out = null_mut();
        let mut len = 0;
        assert_eq!(
            spp_to_serialized_proto(handle, &mut out, &mut len),
            StatusCode::Internal.raw()
        );
        assert!(take(out, len).is_empty());
        assert_eq!(
            spp_id_to_piece(handle, 0, &mut out, &mut len),
            StatusCode::Internal.raw()
        );
        assert!(take(out, len).is_empty());
        spp_free(handle);
    }
}

#[test]
fn freed_handle_is_invalid() {
    let handle = loaded();
    unsafe {
        assert_eq!(spp_free(handle), 0);
        assert_eq!(spp_piece_size(handle), 0);
        assert_eq!(spp_bos_id(handle), -1);
        let mut out = null_mut();
        let mut len = 0;
        let code = spp_encode_as_serialized_proto(handle, b"a".as_ptr(), 1, &mut out, &mut len);
        assert_eq!(code, SPP_INVALID_HANDLE);
        assert!(out.is_null());
        spp_buffer_free(out, len);
    }
}

#[test]
fn double_free_does_not_reach_a_newer_handle() {
    let first = spp_new();
    unsafe {
        assert_eq!(spp_free(first), 0);
        let second = loaded();
        assert_ne!(first, second);
        assert_eq!(spp_free(first), SPP_INVALID_HANDLE);
        assert_eq!(spp_piece_size(first), 0);

        let (code, encoded) = encode(second, SENTENCE.as_bytes());
        assert_eq!(code, 0);
        assert!(!encoded.is_empty());
        assert_eq!(spp_free(second), 0);
    }
}

#[test]
fn piece_size_matches_model() {
    let handle = loaded();
    let pieces = common::unigram_model().pieces.len();
    unsafe {
        assert_eq!(spp_piece_size(handle), 27);
        assert_eq!(spp_piece_size(handle) as usize, pieces);
        spp_free(handle);
    }
}

#[test]
fn queries_on_loaded_handle() {
    let handle = loaded();
    let saw = CString::new("▁saw").unwrap();
    let absent = CString::new("absent").unwrap();
    unsafe {
        assert_eq!(spp_piece_to_id(handle, saw.as_ptr()), 5);
        assert_eq!(spp_piece_to_id(handle, absent.as_ptr()), spp_unk_id(handle));
        assert_eq!(spp_bos_id(handle), 1);
        assert_eq!(spp_eos_id(handle), 2);
        assert_eq!(spp_pad_id(handle), -1);
        assert!(spp_is_unknown(handle, 0));
        assert!(spp_is_control(handle, 1));
        assert!(!spp_is_byte(handle, 1));
        assert!(!spp_is_unknown(handle, spp_piece_size(handle)));
        assert_eq!(spp_get_score(handle, 5), -4.);

        let mut out = null_mut();
        let mut len = 0;
        assert_eq!(spp_id_to_piece(handle, 5, &mut out, &mut len), 0);
        assert_eq!(take(out, len), "▁saw".as_bytes());
        let size = spp_piece_size(handle);
        assert_eq!(
            spp_id_to_piece(handle, size, &mut out, &mut len),
            StatusCode::OutOfRange.raw()
        );
        take(out, len);
        spp_free(handle);
    }
}

#[test]
fn decode_from_pieces() {
    let handle = loaded();
    let pieces = ["▁I", "▁saw", "▁a", "▁girl"]
        .map(|p| CString::new(p).unwrap());
    let ptrs = pieces.iter().map(|p| p.as_ptr()).collect::<Vec<_>>();
    let mut out = null_mut();
    let mut len = 0;
    unsafe {
        let code = spp_decode_pieces(handle, ptrs.as_ptr(), ptrs.len(), &mut out, &mut len);
        assert_eq!(code, 0);
        assert_eq!(take(out, len), b"I saw a girl");
        spp_free(handle);
    }
}

#[test]
fn out_of_range_decode() {
    let handle = loaded();
    let size = unsafe { spp_piece_size(handle) };
    let (code, decoded) = decode_ids(handle, &[3, size]);
    assert_eq!(code, StatusCode::OutOfRange.raw());
    assert!(decoded.is_empty());
    unsafe { spp_free(handle) };
}

#[test]
fn sampling_and_nbest() {
    let handle = loaded();
    let text = b"telescope";
    let mut out = null_mut();
    let mut len = 0;
    unsafe {
        assert_eq!(spp_set_random_seed(handle, 9), 0);
        let code = spp_sample_encode_as_serialized_proto(
            handle,
            text.as_ptr(),
            text.len(),
            -1,
            0.1,
            &mut out,
            &mut len,
        );
        assert_eq!(code, 0);
        let sampled = SentencePieceText::decode(&take(out, len)[..]).unwrap();
        assert!(!sampled.pieces.is_empty());

        let code = spp_sample_encode_as_serialized_proto(
            handle,
            text.as_ptr(),
            text.len(),
            513,
            0.1,
            &mut out,
            &mut len,
        );
        assert_eq!(code, StatusCode::InvalidArgument.raw());
        take(out, len);

        let code = spp_nbest_encode_as_serialized_proto(
            handle,
            text.as_ptr(),
            text.len(),
            3,
            &mut out,
            &mut len,
        );
        assert_eq!(code, 0);
        let nbest = NBestSentencePieceText::decode(&take(out, len)[..]).unwrap();
        assert!(!nbest.nbests.is_empty() && nbest.nbests.len() <= 3);
        spp_free(handle);
    }
}

#[test]
fn extra_options_through_c() {
    let handle = loaded();
    let bos_eos = CString::new("bos:eos").unwrap();
    let bad = CString::new("bos:sideways").unwrap();
    unsafe {
        assert_eq!(spp_set_encode_extra_options(handle, bos_eos.as_ptr()), 0);
        let (_, encoded) = encode(handle, b"a girl");
        let spt = SentencePieceText::decode(&encoded[..]).unwrap();
        assert_eq!(spt.pieces.first().unwrap().id(), 1);
        assert_eq!(spt.pieces.last().unwrap().id(), 2);
        assert_eq!(
            spp_set_encode_extra_options(handle, bad.as_ptr()),
            StatusCode::InvalidArgument.raw()
        );
        assert_eq!(
            spp_set_decode_extra_options(handle, bos_eos.as_ptr()),
            StatusCode::InvalidArgument.raw()
        );
        spp_free(handle);
    }
}

#[test]
fn handles_are_shared_across_threads() {
    let handle = loaded() as usize;
    let threads = (0..4)
        .map(|_| {
            thread::spawn(move || {
                let handle = handle as *const SppProcessor;
                (0..25)
                    .map(|_| encode(handle, SENTENCE.as_bytes()))
                    .collect::<Vec<_>>()
            })
        })
        .collect::<Vec<_>>();
    let results = threads
        .into_iter()
        .flat_map(|t| t.join().unwrap())
        .collect::<Vec<_>>();
    assert!(results.iter().all(|(code, bytes)| *code == 0 && *bytes == results[0].1));
    unsafe { spp_free(handle as *mut SppProcessor) };
}
