//! End-to-end tests of the open, normalize, answer pipeline with a mock model.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;

use image::ImageFormat;
use image_vqa_adapters::{answer_image, query_image};
use image_vqa_core::{FormatPolicy, ModelLoader, Query, QueryRunner};
use image_vqa_test_support::{MockModelSource, MockProgressSink, SyntheticImageBuilder};

const LABELS: &[&str] = &["yes", "no", "flowers", "impressionism"];

fn queries(questions: &[&str]) -> Vec<Query> {
    Query::from_questions(questions.iter().copied()).unwrap()
}

#[test]
fn test_one_response_per_query_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = SyntheticImageBuilder::write_rgb(dir.path(), "monet.jpg", ImageFormat::Jpeg);

    let source = MockModelSource::answering(LABELS, &[2, 3, 0]);
    let loader = ModelLoader::new(source.clone());
    let runner = QueryRunner::new(&loader);

    let asked = [
        "What is the primary subject of the painting?",
        "What is the style of the painting?",
        "Is it a painting?",
    ];
    let responses =
        query_image(&path, &queries(&asked), &runner, &FormatPolicy::default()).unwrap();

    let questions: Vec<_> = responses.iter().map(|r| r.question.as_str()).collect();
    let answers: Vec<_> = responses.iter().map(|r| r.answer.as_str()).collect();
    assert_eq!(questions, asked);
    assert_eq!(answers, ["flowers", "impressionism", "yes"]);
    assert_eq!(source.questions(), asked);
    assert_eq!(source.forward_count(), 3);
}

#[test]
fn test_single_query_answer_comes_from_vocabulary() {
    let dir = tempfile::tempdir().unwrap();
    let path = SyntheticImageBuilder::write_rgb(dir.path(), "monet.jpg", ImageFormat::Jpeg);

    let loader = ModelLoader::new(MockModelSource::answering(LABELS, &[2]));
    let runner = QueryRunner::new(&loader);

    let question = "What is the primary subject of the painting?";
    let responses =
        query_image(&path, &queries(&[question]), &runner, &FormatPolicy::default()).unwrap();

    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].question, question);
    assert!(LABELS.contains(&responses[0].answer.as_str()));
}

#[test]
fn test_png_with_alpha_completes() {
    let dir = tempfile::tempdir().unwrap();
    let path = SyntheticImageBuilder::write_rgba_png(dir.path(), "alpha.png");

    let loader = ModelLoader::new(MockModelSource::new(LABELS));
    let runner = QueryRunner::new(&loader);

    let responses =
        query_image(&path, &queries(&["Is it a painting?"]), &runner, &FormatPolicy::default())
            .unwrap();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].answer, "yes");
}

#[test]
fn test_webp_is_normalized_before_answering() {
    let dir = tempfile::tempdir().unwrap();
    let path = SyntheticImageBuilder::write_rgb(dir.path(), "vangough.webp", ImageFormat::WebP);

    let loader = ModelLoader::new(MockModelSource::new(LABELS));
    let runner = QueryRunner::new(&loader);

    let responses =
        query_image(&path, &queries(&["What is it?"]), &runner, &FormatPolicy::default()).unwrap();
    assert_eq!(responses.len(), 1);
}

#[test]
fn test_empty_queries_make_no_model_calls() {
    let dir = tempfile::tempdir().unwrap();
    let path = SyntheticImageBuilder::write_rgb(dir.path(), "monet.jpg", ImageFormat::Jpeg);

    let source = MockModelSource::new(LABELS);
    let loader = ModelLoader::new(source.clone());
    let runner = QueryRunner::new(&loader);

    let responses = query_image(&path, &[], &runner, &FormatPolicy::default()).unwrap();

    assert!(responses.is_empty());
    assert_eq!(source.load_count(), 0);
    assert!(!loader.is_loaded());
}

#[test]
fn test_nonexistent_path_fails_before_loading() {
    let source = MockModelSource::new(LABELS);
    let loader = ModelLoader::new(source.clone());
    let runner = QueryRunner::new(&loader);

    let result = query_image(
        Path::new("/nonexistent/monet.jpg"),
        &queries(&["Is it a painting?"]),
        &runner,
        &FormatPolicy::default(),
    );

    assert!(result.is_err());
    assert_eq!(source.load_count(), 0);
}

#[test]
fn test_model_loaded_once_across_images() {
    let dir = tempfile::tempdir().unwrap();
    let source = MockModelSource::new(LABELS);
    let loader = ModelLoader::new(source.clone());
    let progress = MockProgressSink::new();
    let runner = QueryRunner::new(&loader).with_progress(&progress);
    let asked = queries(&["Is it a painting?", "What is it?"]);

    for name in ["monet.jpg", "picasso.jpg", "pointillism.jpg"] {
        let path = SyntheticImageBuilder::write_rgb(dir.path(), name, ImageFormat::Jpeg);
        query_image(&path, &asked, &runner, &FormatPolicy::default()).unwrap();
    }

    assert_eq!(source.load_count(), 1);
    assert_eq!(source.forward_count(), 6);
    assert_eq!(progress.answered_questions().len(), 6);
}

#[test]
fn test_load_failure_propagates() {
    let source = MockModelSource::new(LABELS).failing("hub unreachable");
    let loader = ModelLoader::new(source);
    let runner = QueryRunner::new(&loader);

    let err = answer_image(
        SyntheticImageBuilder::rgb_gradient(16, 16),
        &queries(&["Is it a painting?"]),
        &runner,
        &FormatPolicy::default(),
    )
    .unwrap_err();

    assert!(format!("{err:#}").contains("hub unreachable"));
}

#[test]
fn test_preprocessor_rejection_aborts_image() {
    let source = MockModelSource::new(LABELS);
    let loader = ModelLoader::new(source.clone());
    let runner = QueryRunner::new(&loader);

    let empty = SyntheticImageBuilder::tagged(0, 0, Some(ImageFormat::Jpeg));
    let result = answer_image(
        empty,
        &queries(&["Is it a painting?", "What is it?"]),
        &runner,
        &FormatPolicy::default(),
    );

    assert!(result.is_err());
    assert_eq!(source.forward_count(), 0);
}
