use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

fn write_file(root: &Path, rel: &str, content: &str) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dir");
    }
    fs::write(&path, content).expect("write file");
    path
}

const ITEMS_CROSSWALK: &str = r#"
sourceFormat: json
targetFormat: json
rules:
  - id: values
    sources:
      - path: items[*].v
        label: v
    targets:
      - path: out[*].v
        label: v
  - id: title
    sources:
      - path: title
        label: title
    targets:
      - path: name
        label: name
    processing:
      functionId: uppercase
"#;

const ITEMS_INPUT: &str = r#"{"title": "demo", "items": [{"v": 1}, {"v": 2}]}"#;

#[test]
fn transform_prints_to_stdout() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path();
    let rules = write_file(dir, "crosswalk.yaml", ITEMS_CROSSWALK);
    let input = write_file(dir, "input.json", ITEMS_INPUT);

    let mut cmd = cargo_bin_cmd!("crosswalk");
    cmd.arg("transform").arg("-r").arg(rules).arg("-i").arg(input);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(r#"{"out":[{"v":1},{"v":2}],"name":"DEMO"}"#));
}

#[test]
fn transform_writes_output_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path();
    let rules = write_file(dir, "crosswalk.yaml", ITEMS_CROSSWALK);
    let input = write_file(dir, "input.json", ITEMS_INPUT);
    let output = dir.join("out").join("result.json");
    fs::create_dir_all(output.parent().expect("parent")).expect("create out dir");

    let mut cmd = cargo_bin_cmd!("crosswalk");
    cmd.arg("transform")
        .arg("-r")
        .arg(rules)
        .arg("-i")
        .arg(input)
        .arg("-o")
        .arg(&output);
    cmd.assert().success();

    let written = fs::read_to_string(&output).expect("read output");
    let value: serde_json::Value = serde_json::from_str(&written).expect("output is json");
    assert_eq!(
        value,
        serde_json::json!({"out": [{"v": 1}, {"v": 2}], "name": "DEMO"})
    );
}

#[test]
fn transform_flags_override_target_format() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path();
    let rules = write_file(dir, "crosswalk.yaml", ITEMS_CROSSWALK);
    let input = write_file(dir, "input.json", ITEMS_INPUT);

    let mut cmd = cargo_bin_cmd!("crosswalk");
    cmd.arg("transform")
        .arg("-r")
        .arg(rules)
        .arg("-i")
        .arg(input)
        .arg("--target-format")
        .arg("xml")
        .arg("--root-element")
        .arg("doc");

    cmd.assert().success().stdout(predicate::str::contains(
        "<doc><out><v>1</v></out><out><v>2</v></out><name>DEMO</name></doc>",
    ));
}

#[test]
fn transform_reports_function_warnings_on_stderr() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path();
    let rules = write_file(
        dir,
        "crosswalk.yaml",
        r#"
sourceFormat: json
targetFormat: json
rules:
  - id: count
    sources:
      - path: count
        label: count
    targets:
      - path: count
        label: count
    processing:
      functionId: to_number
"#,
    );
    let input = write_file(dir, "input.json", r#"{"count": "lots"}"#);

    let mut cmd = cargo_bin_cmd!("crosswalk");
    cmd.arg("transform").arg("-r").arg(rules).arg("-i").arg(input);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(r#"{"count":"lots"}"#))
        .stderr(predicate::str::contains("warning: function to_number failed"));
}

#[test]
fn transform_fails_on_missing_input() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path();
    let rules = write_file(dir, "crosswalk.yaml", ITEMS_CROSSWALK);

    let mut cmd = cargo_bin_cmd!("crosswalk");
    cmd.arg("transform")
        .arg("-r")
        .arg(rules)
        .arg("-i")
        .arg(dir.join("missing.json"));

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("failed to read"));
}

#[test]
fn validate_accepts_valid_crosswalk() {
    let temp = tempfile::tempdir().expect("tempdir");
    let rules = write_file(temp.path(), "crosswalk.yaml", ITEMS_CROSSWALK);

    let mut cmd = cargo_bin_cmd!("crosswalk");
    cmd.arg("validate").arg("-r").arg(rules);

    cmd.assert().success().stdout(predicate::str::contains("ok"));
}

#[test]
fn validate_lists_rule_errors() {
    let temp = tempfile::tempdir().expect("tempdir");
    let rules = write_file(
        temp.path(),
        "crosswalk.yaml",
        r#"
sourceFormat: json
targetFormat: json
rules:
  - id: dup
    sources:
      - path: a
        label: a
    targets:
      - path: a
        label: a
  - id: dup
    sources:
      - path: b..c
        label: b
    targets:
      - path: b
        label: b
"#,
    );

    let mut cmd = cargo_bin_cmd!("crosswalk");
    cmd.arg("validate").arg("-r").arg(rules);

    cmd.assert()
        .failure()
        .stdout(predicate::str::contains("DuplicateRuleId"))
        .stdout(predicate::str::contains("rules[1].sources[0].path"));
}

#[test]
fn columns_prints_sorted_column_map() {
    let temp = tempfile::tempdir().expect("tempdir");
    let dir = temp.path();
    let rules = write_file(dir, "crosswalk.yaml", ITEMS_CROSSWALK);
    let input = write_file(dir, "input.json", ITEMS_INPUT);

    let mut cmd = cargo_bin_cmd!("crosswalk");
    cmd.arg("columns").arg("-r").arg(rules).arg("-i").arg(input);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(r#""out[0].v": 1"#))
        .stdout(predicate::str::contains(r#""out[1].v": 2"#))
        .stdout(predicate::str::contains(r#""name": "DEMO""#));
}
