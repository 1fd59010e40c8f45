mod common;

use common::library;
use seqloom::cli;
use std::io::Write;
use std::path::PathBuf;

fn write_file(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    write!(file, "{contents}").unwrap();
    path
}

const HELLO: &str = r#"
sequence:
  nodes:
    - id: 0
      type: start
      transitions:
        - target: 1
    - id: 1
      type: function
      function: return_hello_world
      transitions:
        - target: 2
    - id: 2
      type: stop
"#;

#[tokio::test]
async fn check_accepts_valid_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(&dir, "hello.yaml", HELLO);
    cli::try_run_from(["seqloom", "check", path.to_str().unwrap()], library())
        .await
        .unwrap();
}

#[tokio::test]
async fn check_rejects_invalid_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_file(&dir, "broken.yaml", "sequence: {}");
    let result =
        cli::try_run_from(["seqloom", "check", path.to_str().unwrap()], library()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn run_executes_with_typed_constants() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.txt");
    let seq = write_file(
        &dir,
        "write.yaml",
        r#"
sequence:
  nodes:
    - id: 0
      type: start
      transitions:
        - target: 1
    - id: 1
      type: function
      function: write_arg_in_file
      arguments:
        arg: "greeting"
        file: "outfile"
      transitions:
        - target: 2
    - id: 2
      type: stop
"#,
    );

    cli::try_run_from(
        [
            "seqloom",
            "run",
            seq.to_str().unwrap(),
            "--constant",
            "greeting",
            "str",
            "hello from the cli",
            "--constant",
            "outfile",
            "str",
            out.to_str().unwrap(),
            "--no-log",
        ],
        library(),
    )
    .await
    .unwrap();

    assert_eq!(
        std::fs::read_to_string(&out).unwrap(),
        "hello from the cli\n"
    );
}

#[tokio::test]
async fn run_rejects_malformed_constants() {
    let dir = tempfile::tempdir().unwrap();
    let seq = write_file(&dir, "hello.yaml", HELLO);
    let result = cli::try_run_from(
        [
            "seqloom",
            "run",
            seq.to_str().unwrap(),
            "--constant",
            "n",
            "int",
            "not-a-number",
            "--no-log",
        ],
        library(),
    )
    .await;
    assert!(result.is_err());
}
