//! Unit tests for newline framing of worker output.

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use ocr_supervisor::worker::codec::LineCodec;
use ocr_supervisor::AppError;

/// A complete line is yielded with its trailing newline.
#[test]
fn line_keeps_trailing_newline() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("{\"code\":100,\"data\":[]}\n");

    let line = codec.decode(&mut buf).expect("decode").expect("complete line");

    assert_eq!(&line[..], b"{\"code\":100,\"data\":[]}\n");
    assert!(buf.is_empty());
}

/// Two lines in one buffer are yielded by successive calls.
#[test]
fn batched_lines_are_split() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("first\nsecond\n");

    assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"first\n");
    assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"second\n");
    assert!(codec.decode(&mut buf).unwrap().is_none());
}

/// A partial line stays buffered until its newline arrives.
#[test]
fn partial_line_waits_for_newline() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("{\"code\":");

    assert!(codec.decode(&mut buf).unwrap().is_none());
    assert_eq!(buf.len(), 8, "partial bytes must not be consumed");

    buf.extend_from_slice(b"101}\n");
    let line = codec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(&line[..], b"{\"code\":101}\n");
}

/// Non-UTF-8 bytes pass through untouched.
#[test]
fn non_utf8_bytes_are_preserved() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from(&b"\xff\xfe\n"[..]);

    let line = codec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(&line[..], b"\xff\xfe\n");
}

/// Buffering past the limit without a newline is a protocol error.
#[test]
fn overlong_line_is_rejected() {
    let mut codec = LineCodec::with_max_length(16);
    let mut buf = BytesMut::from("a".repeat(17).as_str());

    match codec.decode(&mut buf) {
        Err(AppError::Protocol(msg)) => assert!(msg.contains("line too long"), "{msg}"),
        other => panic!("expected Protocol error, got {other:?}"),
    }
}

/// A line of exactly the limit (plus newline) is still accepted.
#[test]
fn line_at_limit_is_accepted() {
    let mut codec = LineCodec::with_max_length(16);
    let mut buf = BytesMut::from(format!("{}\n", "a".repeat(16)).as_str());

    let line = codec.decode(&mut buf).unwrap().unwrap();
    assert_eq!(line.len(), 17);
}

/// EOF with a dangling partial line means the worker died mid-response.
#[test]
fn eof_mid_line_is_transport_error() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("{\"code\":10");

    assert!(matches!(
        codec.decode_eof(&mut buf),
        Err(AppError::Transport(_))
    ));
}

/// EOF on an empty buffer is a clean end of stream.
#[test]
fn eof_on_empty_buffer_is_clean() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::new();

    assert!(codec.decode_eof(&mut buf).unwrap().is_none());
}
