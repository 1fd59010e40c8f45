use seqloom::nodes::NodeBody;
use seqloom::sequence::{Sequence, SequenceFileError};
use std::io::Write;

const VALID: &str = r#"
sequence:
  info:
    name: files
  constants:
    base_delay: 2
  nodes:
    - id: 0
      type: start
      transitions:
        - target: 1
    - id: 1
      type: function
      function: return_hello_world
      timeout: 30
      return: greeting
      is_test: true
      transitions:
        - target: 2
    - id: 2
      type: stop
"#;

#[test]
fn loads_sequences_from_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("files.yaml");
    let mut file = std::fs::File::create(&path).unwrap();
    write!(file, "{VALID}").unwrap();
    drop(file);

    let seq = Sequence::from_path(&path).unwrap();
    assert_eq!(seq.name(), Some("files"));
    assert_eq!(seq.constants()["base_delay"], serde_json::json!(2));

    Sequence::check_file(&path).unwrap();
}

#[test]
fn missing_files_are_io_errors() {
    let err = Sequence::from_path("/definitely/not/here.yaml").unwrap_err();
    assert!(matches!(err, SequenceFileError::Io { .. }));
}

#[test]
fn function_node_attributes_survive_loading() {
    let seq = Sequence::from_str(VALID).unwrap();
    let node = seq.node(1).unwrap();
    let NodeBody::Function(body) = &node.body else {
        panic!("node 1 must be a function node");
    };
    assert_eq!(body.function, "return_hello_world");
    assert_eq!(body.timeout, Some(30));
    assert_eq!(body.return_var.as_deref(), Some("greeting"));
    assert!(body.is_test);
    assert!(body.wrappers.is_empty());
}

#[test]
fn malformed_documents_are_schema_errors() {
    for yaml in [
        "nonsense: true",
        "sequence: {}",
        // unknown node type
        r#"
sequence:
  nodes:
    - id: 0
      type: teleport
      transitions: [{target: 0}]
"#,
    ] {
        assert!(matches!(
            Sequence::from_str(yaml),
            Err(SequenceFileError::Schema(_))
        ));
    }
}
