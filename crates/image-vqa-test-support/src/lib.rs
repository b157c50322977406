//! Test support utilities for image-vqa.
//!
//! Provides mocks of the core ports, a scripted model source that counts its
//! loads, synthetic image builders and a miniature ViLT checkpoint, so the pipeline can be tested
//! without model weights or network access.
//!
//! # Example
//!
//! ```
//! use image_vqa_core::{ModelLoader, Query, QueryRunner};
//! use image_vqa_test_support::{MockModelSource, SyntheticImageBuilder};
//!
//! let source = MockModelSource::answering(&["yes", "no"], &[1]);
//! let loader = ModelLoader::new(source.clone());
//!
//! let image = SyntheticImageBuilder::rgb_gradient(32, 32);
//! let queries = Query::from_questions(["Is it raining?"]).unwrap();
//! let responses = QueryRunner::new(&loader).answer_all(&image, &queries).unwrap();
//!
//! assert_eq!(responses[0].answer, "no");
//! assert_eq!(source.load_count(), 1);
//! ```

mod builders;
mod checkpoint;
mod mocks;

pub use builders::SyntheticImageBuilder;
pub use checkpoint::TinyCheckpoint;
pub use mocks::{
    MockAnswerModel, MockImageSource, MockModelSource, MockPreprocessor, MockProgressSink,
    MockResultOutput,
};
