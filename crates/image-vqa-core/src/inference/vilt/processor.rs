//! ViLT input preprocessing: WordPiece tokens plus resized, normalized pixels.

// Allow common image code patterns
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]

use std::path::Path;

use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use image::imageops::FilterType;
use image::DynamicImage;
use tokenizers::{Tokenizer, TruncationParams};

use super::config::ImageProcessorConfig;
use crate::ports::{Encoding, Preprocessor};

/// Upper bound of the longer edge relative to the shorter one (1333 / 800).
const LONGER_EDGE_RATIO: f64 = 1333.0 / 800.0;

/// Converts (image, question) pairs into ViLT input tensors.
pub struct ViltProcessor {
    tokenizer: Tokenizer,
    image_config: ImageProcessorConfig,
    device: Device,
}

impl ViltProcessor {
    /// Creates a processor from a `tokenizer.json` file.
    ///
    /// Questions are truncated to `max_length` tokens, the number of text
    /// positions the model has embeddings for.
    ///
    /// # Errors
    ///
    /// Returns an error if the tokenizer cannot be loaded or configured.
    pub fn from_files(
        tokenizer_path: impl AsRef<Path>,
        image_config: ImageProcessorConfig,
        max_length: usize,
        device: Device,
    ) -> Result<Self> {
        let tokenizer_path = tokenizer_path.as_ref();
        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("Failed to load tokenizer: {}", tokenizer_path.display()))?;
        Self::new(tokenizer, image_config, max_length, device)
    }

    /// Creates a processor from an already loaded tokenizer.
    ///
    /// # Errors
    ///
    /// Returns an error if truncation cannot be configured.
    pub fn new(
        mut tokenizer: Tokenizer,
        image_config: ImageProcessorConfig,
        max_length: usize,
        device: Device,
    ) -> Result<Self> {
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                ..TruncationParams::default()
            }))
            .map_err(anyhow::Error::msg)
            .context("Failed to configure tokenizer truncation")?;
        tokenizer.with_padding(None);

        Ok(Self {
            tokenizer,
            image_config,
            device,
        })
    }

    fn encode_text(&self, question: &str) -> Result<(Tensor, Tensor, Tensor)> {
        let encoding = self
            .tokenizer
            .encode(question, true)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("Failed to tokenize question: {question}"))?;

        let tensor = |values: &[u32]| -> Result<Tensor> {
            Ok(Tensor::new(values, &self.device)?.unsqueeze(0)?)
        };

        Ok((
            tensor(encoding.get_ids())?,
            tensor(encoding.get_type_ids())?,
            tensor(encoding.get_attention_mask())?,
        ))
    }
}

impl Preprocessor for ViltProcessor {
    fn encode(&self, image: &DynamicImage, question: &str) -> Result<Encoding> {
        let (input_ids, token_type_ids, attention_mask) = self.encode_text(question)?;
        let pixel_values = preprocess_image(image, &self.image_config, &self.device)?;
        let (_, _, height, width) = pixel_values.dims4()?;
        let pixel_mask = Tensor::ones((1, height, width), DType::U32, &self.device)?;

        Ok(Encoding {
            input_ids,
            token_type_ids,
            attention_mask,
            pixel_values,
            pixel_mask,
        })
    }
}

/// Computes the `(height, width)` an image is resized to.
///
/// The shorter edge is scaled to `shorter`, the longer edge is capped at
/// `shorter * 1333 / 800`, and both are floored to multiples of `size_divisor`.
#[must_use]
pub fn resize_output_size(height: u32, width: u32, shorter: u32, size_divisor: u32) -> (u32, u32) {
    let longer = (LONGER_EDGE_RATIO * f64::from(shorter)) as u32;
    let (h, w) = (f64::from(height.max(1)), f64::from(width.max(1)));
    let min_size = f64::from(shorter);

    let scale = min_size / h.min(w);
    let (mut new_h, mut new_w) = if h < w {
        (min_size, scale * w)
    } else {
        (scale * h, min_size)
    };

    let longest = new_h.max(new_w);
    if longest > f64::from(longer) {
        let scale = f64::from(longer) / longest;
        new_h *= scale;
        new_w *= scale;
    }

    let divisor = size_divisor.max(1);
    let snap = |v: f64| (((v + 0.5) as u32) / divisor * divisor).max(divisor);
    (snap(new_h), snap(new_w))
}

/// Converts an image into a `(1, 3, height, width)` tensor of model pixels.
///
/// # Errors
///
/// Returns an error if tensor creation fails.
pub fn preprocess_image(
    image: &DynamicImage,
    config: &ImageProcessorConfig,
    device: &Device,
) -> Result<Tensor> {
    let mut rgb = image.to_rgb8();

    if config.do_resize {
        let (height, width) = resize_output_size(
            rgb.height(),
            rgb.width(),
            config.size.shortest_edge(),
            config.size_divisor,
        );
        rgb = image::imageops::resize(&rgb, width, height, FilterType::CatmullRom);
    }

    let (width, height) = rgb.dimensions();
    let mut pixels = Tensor::from_vec(rgb.into_raw(), (height as usize, width as usize, 3), device)?
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?;

    if config.do_rescale {
        pixels = (pixels * f64::from(config.rescale_factor))?;
    }

    if config.do_normalize {
        let mean = Tensor::new(&config.image_mean, device)?.reshape((3, 1, 1))?;
        let std = Tensor::new(&config.image_std, device)?.reshape((3, 1, 1))?;
        pixels = pixels.broadcast_sub(&mean)?.broadcast_div(&std)?;
    }

    Ok(pixels.unsqueeze(0)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::str::FromStr;

    #[test]
    fn test_resize_landscape() {
        assert_eq!(resize_output_size(480, 640, 384, 32), (384, 512));
    }

    #[test]
    fn test_resize_square() {
        assert_eq!(resize_output_size(100, 100, 384, 32), (384, 384));
    }

    #[test]
    fn test_resize_caps_longer_edge() {
        // 500x2000: shorter edge 384 would make the longer edge 1536 > 639
        assert_eq!(resize_output_size(500, 2000, 384, 32), (160, 608));
    }

    #[test]
    fn test_resize_never_collapses_to_zero() {
        let (h, w) = resize_output_size(1, 10_000, 384, 32);
        assert_eq!(h, 32);
        assert_eq!(w % 32, 0);
    }

    #[test]
    fn test_preprocess_image_shape_and_range() {
        let img = RgbImage::from_fn(40, 30, |x, _| {
            if x < 20 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        });
        let tensor = preprocess_image(
            &DynamicImage::ImageRgb8(img),
            &ImageProcessorConfig::default(),
            &Device::Cpu,
        )
        .unwrap();

        assert_eq!(tensor.dims4().unwrap(), (1, 3, 384, 512));

        let values: Vec<f32> = tensor.flatten_all().unwrap().to_vec1().unwrap();
        let min = values.iter().copied().fold(f32::INFINITY, f32::min);
        let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        assert!(min >= -1.01 && min < -0.9);
        assert!(max <= 1.01 && max > 0.9);
    }

    #[test]
    fn test_preprocess_without_resize_keeps_size() {
        let config = ImageProcessorConfig {
            do_resize: false,
            ..ImageProcessorConfig::default()
        };
        let image = DynamicImage::new_rgb8(7, 5);
        let tensor = preprocess_image(&image, &config, &Device::Cpu).unwrap();
        assert_eq!(tensor.dims4().unwrap(), (1, 3, 5, 7));
    }

    #[test]
    fn test_encode_produces_matching_tensors() {
        let json = r#"{
            "version": "1.0",
            "truncation": null,
            "padding": null,
            "added_tokens": [],
            "normalizer": null,
            "pre_tokenizer": {"type": "Whitespace"},
            "post_processor": null,
            "decoder": null,
            "model": {
                "type": "WordLevel",
                "vocab": {"[UNK]": 0, "what": 1, "is": 2, "it": 3, "?": 4},
                "unk_token": "[UNK]"
            }
        }"#;
        let tokenizer = Tokenizer::from_str(json).unwrap();
        let processor =
            ViltProcessor::new(tokenizer, ImageProcessorConfig::default(), 3, Device::Cpu).unwrap();

        let encoding = processor
            .encode(&DynamicImage::new_rgb8(64, 64), "what is it ?")
            .unwrap();

        // Truncated to three tokens
        let ids: Vec<u32> = encoding.input_ids.squeeze(0).unwrap().to_vec1().unwrap();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(encoding.attention_mask.dims2().unwrap(), (1, 3));
        assert_eq!(encoding.token_type_ids.dims2().unwrap(), (1, 3));
        assert_eq!(encoding.pixel_values.dims4().unwrap(), (1, 3, 384, 384));
        assert_eq!(encoding.pixel_mask.dims3().unwrap(), (1, 384, 384));
    }
}
