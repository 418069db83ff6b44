//! End-to-end request tests against scripted workers.

use serial_test::serial;

use ocr_supervisor::config::OcrArgs;
use ocr_supervisor::protocol::{CODE_NO_TEXT, CODE_SUCCESS};
use ocr_supervisor::{ocr_file_once, Supervisor, SupervisorStatus};

use super::test_helpers::{echo_worker, hello_worker, worker_config, write_worker, READY};

#[tokio::test]
#[serial]
async fn file_request_returns_parsed_items() {
    let temp = tempfile::tempdir().unwrap();
    let supervisor = Supervisor::start(&worker_config(&hello_worker(temp.path())))
        .await
        .expect("worker starts");

    assert_eq!(supervisor.status().await, SupervisorStatus::Ready);
    assert!(supervisor.worker_pid().await.is_some());

    let result = supervisor.ocr_file("a.png").await.expect("request");
    assert_eq!(result.code, CODE_SUCCESS);
    assert_eq!(result.items.len(), 1);
    assert_eq!(result.items[0].text, "hello");
    assert!((result.items[0].score - 0.99).abs() < 1e-6);

    supervisor.shutdown().await.expect("shutdown");
}

#[tokio::test]
#[serial]
async fn raw_response_is_one_line() {
    let temp = tempfile::tempdir().unwrap();
    let supervisor = Supervisor::start(&worker_config(&hello_worker(temp.path())))
        .await
        .unwrap();

    let raw = supervisor.ocr_file_raw("a.png").await.unwrap();
    assert_eq!(raw.iter().filter(|b| **b == b'\n').count(), 1);
    assert_eq!(raw.last(), Some(&b'\n'));

    supervisor.shutdown().await.unwrap();
}

#[tokio::test]
#[serial]
async fn requests_reach_worker_in_wire_format() {
    let temp = tempfile::tempdir().unwrap();
    let supervisor = Supervisor::start(&worker_config(&echo_worker(temp.path())))
        .await
        .unwrap();

    let file = supervisor.ocr_file("dir/a.png").await.unwrap();
    assert_eq!(file.code, CODE_NO_TEXT);
    assert_eq!(file.message, r#"{"image_path":"dir/a.png"}"#);

    let bytes = supervisor.ocr_bytes(b"\x89PNG").await.unwrap();
    assert_eq!(bytes.message, r#"{"image_base64":"iVBORw=="}"#);

    let clipboard = supervisor.ocr_clipboard().await.unwrap();
    assert_eq!(clipboard.message, r#"{"image_path":"clipboard"}"#);

    supervisor.shutdown().await.unwrap();
}

#[tokio::test]
#[serial]
async fn worker_runs_in_its_own_directory_with_flag_arguments() {
    let temp = tempfile::tempdir().unwrap();
    let exe = write_worker(
        temp.path(),
        "args-worker",
        &format!(
            "{READY}while IFS= read -r line; do\n  printf '{{\"code\":101,\"data\":\"%s|%s\"}}\\n' \"$PWD\" \"$*\"\ndone\n"
        ),
    );
    let mut config = worker_config(&exe);
    config.ocr = OcrArgs {
        cls: Some(true),
        limit_side_len: Some(960),
        ..OcrArgs::default()
    };

    let supervisor = Supervisor::start(&config).await.unwrap();
    let result = supervisor.ocr_file("a.png").await.unwrap();

    let dir = std::fs::canonicalize(temp.path()).unwrap();
    assert_eq!(
        result.message,
        format!("{}|cls=1 limit_side_len=960", dir.display())
    );

    supervisor.shutdown().await.unwrap();
}

#[tokio::test]
#[serial]
async fn output_after_marker_is_not_lost() {
    let temp = tempfile::tempdir().unwrap();
    // The first response is printed together with the marker.
    let exe = write_worker(
        temp.path(),
        "eager-worker",
        "printf 'OCR init completed.\\n\\n{\"code\":101,\"data\":\"first\"}\\n'\n\
         n=0\n\
         while IFS= read -r line; do\n\
           n=$((n + 1))\n\
           [ \"$n\" -gt 1 ] && printf '{\"code\":101,\"data\":\"reply %s\"}\\n' \"$n\"\n\
         done\n",
    );

    let supervisor = Supervisor::start(&worker_config(&exe)).await.unwrap();

    assert_eq!(supervisor.ocr_file("a.png").await.unwrap().message, "first");
    assert_eq!(supervisor.ocr_file("b.png").await.unwrap().message, "reply 2");

    supervisor.shutdown().await.unwrap();
}

#[tokio::test]
#[serial]
async fn malformed_response_is_protocol_error_and_worker_stays_usable() {
    let temp = tempfile::tempdir().unwrap();
    let exe = write_worker(
        temp.path(),
        "garbled-worker",
        &format!(
            "{READY}while IFS= read -r line; do\n  case \"$line\" in\n    *bad*) echo 'not json' ;;\n    *) echo '{{\"code\":101,\"data\":\"ok\"}}' ;;\n  esac\ndone\n"
        ),
    );

    let supervisor = Supervisor::start(&worker_config(&exe)).await.unwrap();

    let err = supervisor.ocr_file("bad.png").await.unwrap_err();
    assert!(
        matches!(err, ocr_supervisor::AppError::Protocol(_)),
        "{err:?}"
    );
    assert_eq!(supervisor.ocr_file("good.png").await.unwrap().message, "ok");
    assert_eq!(supervisor.status().await, SupervisorStatus::Ready);

    supervisor.shutdown().await.unwrap();
}

#[tokio::test]
#[serial]
async fn one_shot_request() {
    let temp = tempfile::tempdir().unwrap();
    let config = worker_config(&hello_worker(temp.path()));

    let result = ocr_file_once(&config, "a.png").await.expect("one-shot");
    assert_eq!(result.text(), "hello");
}

#[tokio::test]
#[serial]
async fn symlinked_worker_runs_in_link_directory() {
    let real_dir = tempfile::tempdir().unwrap();
    let link_dir = tempfile::tempdir().unwrap();
    let target = write_worker(
        real_dir.path(),
        "cwd-worker",
        &format!(
            "{READY}while IFS= read -r line; do\n  printf '{{\"code\":101,\"data\":\"%s\"}}\\n' \"$PWD\"\ndone\n"
        ),
    );
    let link = link_dir.path().join("cwd-worker");
    std::os::unix::fs::symlink(&target, &link).unwrap();

    let supervisor = Supervisor::start(&worker_config(&link)).await.unwrap();
    let result = supervisor.ocr_file("a.png").await.unwrap();

    let expected = std::fs::canonicalize(link_dir.path()).unwrap();
    assert_eq!(result.message, expected.display().to_string());

    supervisor.shutdown().await.unwrap();
}
