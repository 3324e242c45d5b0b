use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use ndarray::{Array4, ArrayView4};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::DetectError;

pub const INPUT_HEIGHT: usize = 224;
pub const INPUT_WIDTH: usize = 224;
pub const INPUT_CHANNELS: usize = 3;
/// NHWC shape every local backend is fed with.
pub const INPUT_SHAPE: [usize; 4] = [1, INPUT_HEIGHT, INPUT_WIDTH, INPUT_CHANNELS];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Raw 0..255 pixel values cast to f32.
    Identity,
    /// `x / 127.5 - 1`, mapping pixels onto [-1, 1].
    Symmetric,
}

impl Normalization {
    pub fn as_str(&self) -> &'static str {
        match self {
            Normalization::Identity => "identity",
            Normalization::Symmetric => "symmetric",
        }
    }

    fn apply(&self, value: u8) -> f32 {
        match self {
            Normalization::Identity => value as f32,
            Normalization::Symmetric => value as f32 / 127.5 - 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// Input convention a model was exported with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub normalization: Normalization,
    #[serde(default)]
    pub channel_order: ChannelOrder,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessedTensor {
    data: Array4<f32>,
}

impl PreprocessedTensor {
    pub fn from_array(data: Array4<f32>) -> Self {
        Self { data }
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }

    /// Contiguous NHWC buffer. `None` only for arrays built in a non-standard
    /// layout through [`PreprocessedTensor::from_array`].
    pub fn as_slice(&self) -> Option<&[f32]> {
        self.data.as_slice()
    }

    pub fn ensure_input_shape(&self) -> Result<(), DetectError> {
        if self.shape() != INPUT_SHAPE {
            return Err(DetectError::ShapeMismatch {
                actual: self.shape().to_vec(),
                expected: INPUT_SHAPE.to_vec(),
            });
        }
        Ok(())
    }
}

pub fn decode_image(path: &Path) -> Result<DynamicImage, DetectError> {
    ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| DetectError::DecodeError(e.to_string()))?
        .decode()
        .map_err(|e| DetectError::DecodeError(e.to_string()))
}

pub fn preprocess(path: &Path, spec: &TensorSpec) -> Result<PreprocessedTensor, DetectError> {
    let image = decode_image(path)?;
    Ok(to_tensor(&image, spec))
}

/// Stretches to 224x224 without letterboxing.
pub fn to_tensor(image: &DynamicImage, spec: &TensorSpec) -> PreprocessedTensor {
    let resized = image
        .resize_exact(INPUT_WIDTH as u32, INPUT_HEIGHT as u32, FilterType::Triangle)
        .to_rgb8();

    let data = Array4::from_shape_fn(INPUT_SHAPE, |(_, y, x, c)| {
        let pixel = resized.get_pixel(x as u32, y as u32);
        let channel = match spec.channel_order {
            ChannelOrder::Rgb => c,
            ChannelOrder::Bgr => INPUT_CHANNELS - 1 - c,
        };
        spec.normalization.apply(pixel[channel])
    });

    PreprocessedTensor { data }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    const SYMMETRIC_RGB: TensorSpec = TensorSpec {
        normalization: Normalization::Symmetric,
        channel_order: ChannelOrder::Rgb,
    };

    fn solid(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
    }

    #[test]
    fn output_shape_is_fixed_regardless_of_aspect_ratio() {
        let tensor = to_tensor(&solid(640, 120, [10, 20, 30]), &SYMMETRIC_RGB);
        assert_eq!(tensor.shape(), INPUT_SHAPE);
        tensor.ensure_input_shape().unwrap();
    }

    #[test]
    fn identity_keeps_raw_pixel_values() {
        let spec = TensorSpec {
            normalization: Normalization::Identity,
            channel_order: ChannelOrder::Rgb,
        };
        let tensor = to_tensor(&solid(32, 32, [0, 128, 255]), &spec);
        let view = tensor.view();
        assert_eq!(view[[0, 5, 5, 0]], 0.0);
        assert_eq!(view[[0, 5, 5, 1]], 128.0);
        assert_eq!(view[[0, 5, 5, 2]], 255.0);
    }

    #[test]
    fn symmetric_maps_onto_unit_range() {
        let tensor = to_tensor(&solid(32, 32, [0, 255, 0]), &SYMMETRIC_RGB);
        let view = tensor.view();
        assert_eq!(view[[0, 100, 100, 0]], -1.0);
        assert_eq!(view[[0, 100, 100, 1]], 1.0);
        assert!(tensor.as_slice().unwrap().iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn bgr_swaps_outer_channels() {
        let spec = TensorSpec {
            normalization: Normalization::Identity,
            channel_order: ChannelOrder::Bgr,
        };
        let tensor = to_tensor(&solid(8, 8, [1, 2, 3]), &spec);
        let view = tensor.view();
        assert_eq!(view[[0, 0, 0, 0]], 3.0);
        assert_eq!(view[[0, 0, 0, 1]], 2.0);
        assert_eq!(view[[0, 0, 0, 2]], 1.0);
    }

    #[test]
    fn preprocessing_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leaf.png");
        let mut image = RgbImage::new(300, 200);
        for (x, y, pixel) in image.enumerate_pixels_mut() {
            *pixel = Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8]);
        }
        image.save(&path).unwrap();

        let first = preprocess(&path, &SYMMETRIC_RGB).unwrap();
        let second = preprocess(&path, &SYMMETRIC_RGB).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn unreadable_file_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.jpg");
        std::fs::write(&path, b"definitely not pixels").unwrap();
        assert!(matches!(
            preprocess(&path, &SYMMETRIC_RGB),
            Err(DetectError::DecodeError(_))
        ));
    }

    #[test]
    fn wrong_shape_is_reported_not_reshaped() {
        let tensor = PreprocessedTensor::from_array(Array4::zeros((1, 3, 224, 224)));
        match tensor.ensure_input_shape() {
            Err(DetectError::ShapeMismatch { actual, expected }) => {
                assert_eq!(actual, vec![1, 3, 224, 224]);
                assert_eq!(expected, INPUT_SHAPE.to_vec());
            }
            other => panic!("expected shape mismatch, got {:?}", other),
        }
    }
}
