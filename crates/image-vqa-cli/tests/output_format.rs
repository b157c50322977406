//! Output format validation tests.
//!
//! Runs the binary end to end against a miniature ViLT checkpoint written
//! to a temp directory, so no downloads happen.

#![allow(clippy::unwrap_used)]
#![allow(deprecated)] // cargo_bin deprecation

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use image::ImageFormat;
use image_vqa_test_support::{SyntheticImageBuilder, TinyCheckpoint};
use predicates::prelude::*;
use serde_json::Value;

const LABELS: &[&str] = &["yes", "no", "monet", "oil", "landscape"];

struct Fixture {
    dir: tempfile::TempDir,
    model: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let model = TinyCheckpoint::write(&dir.path().join("tiny-vilt"), LABELS).unwrap();
        Self { dir, model }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn image(&self, name: &str) -> PathBuf {
        SyntheticImageBuilder::write_rgb(self.path(), name, ImageFormat::Jpeg)
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("image-vqa").unwrap();
        cmd.current_dir(self.path())
            .env("HOME", self.path())
            .env("XDG_CONFIG_HOME", self.path().join("config"))
            .env("XDG_DATA_HOME", self.path().join("data"))
            .arg("--model")
            .arg(&self.model);
        cmd
    }
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.output().unwrap();
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).unwrap()
}

fn assert_label(answer: &Value) {
    let answer = answer.as_str().unwrap();
    assert!(LABELS.contains(&answer), "answer '{answer}' is not a label");
}

// === Text Format Tests ===

#[test]
fn test_text_report_layout() {
    let fixture = Fixture::new();
    let image = fixture.image("monet.jpg");

    let stdout = stdout_of(
        fixture
            .cmd()
            .args(["-q", "What is it?", "-q", "Is it a painting?"])
            .arg(format!("Monet={}", image.display())),
    );

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], "Monet");
    assert_eq!(lines[1], "");
    assert_eq!(lines[2], "**What is it?**");
    assert!(LABELS.contains(&lines[3]));
    assert_eq!(lines[4], "**Is it a painting?**");
    assert!(LABELS.contains(&lines[5]));
    assert!(stdout.ends_with("\n\n"));
}

#[test]
fn test_text_title_defaults_to_file_stem() {
    let fixture = Fixture::new();
    let image = fixture.image("pointillism.jpg");

    fixture
        .cmd()
        .args(["-q", "What is it?"])
        .arg(&image)
        .assert()
        .success()
        .stdout(predicate::str::starts_with("pointillism\n\n**What is it?**\n"));
}

#[test]
fn test_default_questions_asked() {
    let fixture = Fixture::new();
    let image = fixture.image("painting.jpg");

    let stdout = stdout_of(fixture.cmd().args(["--format", "jsonl"]).arg(&image));
    let value: Value = serde_json::from_str(stdout.trim()).unwrap();
    let responses = value["responses"].as_array().unwrap();

    assert_eq!(responses.len(), 7);
    assert_eq!(
        responses[0]["question"],
        "What is the primary subject of the painting?"
    );
    assert_eq!(responses[6]["question"], "What is the artist's name?");
}

// === JSONL Format Tests ===

#[test]
fn test_jsonl_one_object_per_image_in_order() {
    let fixture = Fixture::new();
    let first = fixture.image("first.jpg");
    let second = SyntheticImageBuilder::write_rgba_png(fixture.path(), "second.png");
    let third = SyntheticImageBuilder::write_rgb(fixture.path(), "third.webp", ImageFormat::WebP);

    let stdout = stdout_of(
        fixture
            .cmd()
            .args(["--format", "jsonl", "-q", "What is it?"])
            .args([&first, &second, &third]),
    );

    let titles: Vec<String> = stdout
        .lines()
        .map(|line| {
            let value: Value = serde_json::from_str(line).unwrap();
            assert!(value.is_object(), "JSONL line should be an object");
            assert_label(&value["responses"][0]["answer"]);
            value["title"].as_str().unwrap().to_string()
        })
        .collect();

    assert_eq!(titles, ["first", "second", "third"]);
}

// === JSON Format Tests ===

#[test]
fn test_json_format_is_array_with_fields() {
    let fixture = Fixture::new();
    let image = fixture.image("monet.jpg");

    let stdout = stdout_of(
        fixture
            .cmd()
            .args(["--format", "json", "-q", "What is it?", "-q", "What is it?"])
            .arg(&image),
    );

    let value: Value = serde_json::from_str(&stdout).unwrap();
    let results = value.as_array().unwrap();
    assert_eq!(results.len(), 1);

    let result = &results[0];
    assert!(result["path"].as_str().unwrap().ends_with("monet.jpg"));
    assert_eq!(result["title"], "monet");
    assert!(result["timestamp"].as_str().unwrap().contains('T'));

    // Duplicate questions are answered twice, identically
    let responses = result["responses"].as_array().unwrap();
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0], responses[1]);
    assert_label(&responses[0]["answer"]);
}

#[test]
fn test_pretty_json_is_indented() {
    let fixture = Fixture::new();
    let image = fixture.image("monet.jpg");

    let stdout = stdout_of(
        fixture
            .cmd()
            .args(["--format", "json", "--pretty", "-q", "What is it?"])
            .arg(&image),
    );

    assert!(stdout.starts_with("[\n  {"));
    assert!(serde_json::from_str::<Value>(&stdout).is_ok());
}

// === Failure Tests ===

#[test]
fn test_missing_second_image_aborts() {
    let fixture = Fixture::new();
    let image = fixture.image("monet.jpg");

    fixture
        .cmd()
        .args(["--format", "json", "-q", "What is it?"])
        .arg(&image)
        .arg(fixture.path().join("missing.jpg"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("missing.jpg"));
}

#[test]
fn test_failure_keeps_earlier_reports_and_skips_later_images() {
    let fixture = Fixture::new();
    let ok = fixture.image("ok.jpg");
    let later = fixture.image("later.jpg");

    let output = fixture
        .cmd()
        .args(["-q", "What is it?"])
        .arg(&ok)
        .arg(fixture.path().join("missing.jpg"))
        .arg(&later)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.starts_with("ok\n\n**What is it?**\n"), "stdout: {stdout}");
    assert!(!stdout.contains("missing"));
    assert!(!stdout.contains("later"));

    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("missing.jpg"), "stderr: {stderr}");
}

#[test]
fn test_local_checkpoint_with_label_mismatch_fails() {
    let fixture = Fixture::new();
    let image = fixture.image("monet.jpg");

    // Drop a label so config and classifier disagree
    let config_path = fixture.model.join("config.json");
    let mut config: Value =
        serde_json::from_str(&std::fs::read_to_string(&config_path).unwrap()).unwrap();
    config["id2label"].as_object_mut().unwrap().remove("4");
    std::fs::write(&config_path, config.to_string()).unwrap();

    fixture
        .cmd()
        .args(["-q", "What is it?"])
        .arg(&image)
        .assert()
        .code(1)
        .stderr(predicate::str::starts_with("error:"));
}
