use ocr_supervisor::protocol::{
    parse_response, OcrRequest, CLIPBOARD_PATH, CODE_NO_TEXT, CODE_SUCCESS,
};
use ocr_supervisor::AppError;

// ── Requests ─────────────────────────────────────────────────────────────────

#[test]
fn path_request_line() {
    let line = OcrRequest::path("/tmp/a.png").unwrap().to_line().unwrap();
    assert_eq!(line, br#"{"image_path":"/tmp/a.png"}"#);
}

#[test]
fn clipboard_request_uses_sentinel_path() {
    let line = OcrRequest::clipboard().to_line().unwrap();
    assert_eq!(
        line,
        format!(r#"{{"image_path":"{CLIPBOARD_PATH}"}}"#).into_bytes()
    );
}

#[test]
fn image_request_line() {
    let line = OcrRequest::image(b"\x89PNG").to_line().unwrap();
    assert_eq!(line, br#"{"image_base64":"iVBORw=="}"#);
}

#[test]
fn request_line_never_contains_newline() {
    let line = OcrRequest::path("dir\nwith\nnewlines/a.png")
        .unwrap()
        .to_line()
        .unwrap();
    assert!(!line.contains(&b'\n'));
}

// ── Responses ────────────────────────────────────────────────────────────────

#[test]
fn success_response_is_decoded() {
    let raw = br#"{"code":100,"data":[{"box":[[0,0],[10,0],[10,10],[0,10]],"score":0.99,"text":"hello"}]}"#;

    let result = parse_response(raw).unwrap();

    assert_eq!(result.code, CODE_SUCCESS);
    assert!(result.is_success());
    assert_eq!(result.items.len(), 1);
    let item = &result.items[0];
    assert_eq!(item.text, "hello");
    assert!((item.score - 0.99).abs() < 1e-6);
    assert_eq!(item.polygon, vec![[0, 0], [10, 0], [10, 10], [0, 10]]);
}

#[test]
fn trailing_newline_is_accepted() {
    let result = parse_response(b"{\"code\":100,\"data\":[]}\n").unwrap();
    assert!(result.items.is_empty());
}

#[test]
fn no_text_response_is_not_an_error() {
    let result = parse_response(br#"{"code":101,"data":"no text found"}"#).unwrap();

    assert_eq!(result.code, CODE_NO_TEXT);
    assert!(!result.is_success());
    assert_eq!(result.message, "no text found");
    assert!(result.items.is_empty());
}

#[test]
fn non_string_diagnostic_is_rendered_as_json() {
    let result = parse_response(br#"{"code":200,"data":{"reason":"bad image"}}"#).unwrap();
    assert_eq!(result.message, r#"{"reason":"bad image"}"#);

    let result = parse_response(br#"{"code":299}"#).unwrap();
    assert_eq!(result.message, "");
}

#[test]
fn malformed_json_is_protocol_error() {
    let result = parse_response(b"not json");
    match result {
        Err(AppError::Protocol(msg)) => assert!(msg.contains("malformed json"), "{msg}"),
        other => panic!("expected Protocol error, got {other:?}"),
    }
}

#[test]
fn missing_code_is_protocol_error() {
    let cases: [&[u8]; 2] = [br#"{"data":[]}"#, br#"{"code":"100","data":[]}"#];
    for raw in cases {
        assert!(
            matches!(parse_response(raw), Err(AppError::Protocol(_))),
            "{}",
            String::from_utf8_lossy(raw)
        );
    }
}

#[test]
fn success_without_data_is_protocol_error() {
    assert!(matches!(
        parse_response(br#"{"code":100}"#),
        Err(AppError::Protocol(_))
    ));
    assert!(matches!(
        parse_response(br#"{"code":100,"data":null}"#),
        Err(AppError::Protocol(_))
    ));
}

#[test]
fn success_with_non_array_data_is_protocol_error() {
    match parse_response(br#"{"code":100,"data":"oops"}"#) {
        Err(AppError::Protocol(msg)) => assert!(msg.contains("not an array"), "{msg}"),
        other => panic!("expected Protocol error, got {other:?}"),
    }
}

#[test]
fn malformed_item_is_protocol_error() {
    let raw = br#"{"code":100,"data":[{"box":"nope","score":0.5,"text":"x"}]}"#;
    match parse_response(raw) {
        Err(AppError::Protocol(msg)) => assert!(msg.contains("malformed `data` item"), "{msg}"),
        other => panic!("expected Protocol error, got {other:?}"),
    }
}
