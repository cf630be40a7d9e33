use crate::config::PreprocessingConfig;
use crate::error::{Error, Result};
use image::imageops::FilterType;
use image::RgbImage;
use ndarray::{Array4, ArrayView4};

/// `[1, 3, size, size]` input tensor, channel-normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTensor {
    data: Array4<f32>,
}

impl NormalizedTensor {
    pub fn view(&self) -> ArrayView4<'_, f32> {
        self.data.view()
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn as_slice(&self) -> &[f32] {
        self.data.as_slice().unwrap_or(&[])
    }
}

#[derive(Debug, Clone)]
pub struct Preprocessor {
    size: u32,
    mean: [f32; 3],
    std: [f32; 3],
}

impl Preprocessor {
    pub fn new(size: u32, mean: [f32; 3], std: [f32; 3]) -> Result<Self> {
        if size == 0 {
            return Err(Error::Config("input size must be positive".into()));
        }
        if std.iter().any(|s| !s.is_finite() || *s == 0.0) {
            return Err(Error::Config(format!("invalid normalization std {std:?}")));
        }
        Ok(Self { size, mean, std })
    }

    pub fn from_config(cfg: &PreprocessingConfig) -> Result<Self> {
        Self::new(cfg.image_size, cfg.mean, cfg.std)
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn preprocess(&self, image: &RgbImage) -> Result<NormalizedTensor> {
        if image.width() == 0 || image.height() == 0 {
            return Err(Error::Decode("image has no pixels".into()));
        }
        let (w, h) = (self.size, self.size);
        let resized = image::imageops::resize(image, w, h, FilterType::Triangle);

        let plane = (w * h) as usize;
        let mut input = vec![0.0f32; plane * 3];
        for (x, y, pixel) in resized.enumerate_pixels() {
            let idx = (y * w + x) as usize;
            for c in 0..3 {
                let value = pixel[c] as f32 / 255.0;
                input[idx + plane * c] = (value - self.mean[c]) / self.std[c];
            }
        }
        let data = Array4::from_shape_vec((1, 3, h as usize, w as usize), input)
            .map_err(|e| Error::Inference(format!("Invalid input tensor shape: {e}")))?;
        Ok(NormalizedTensor { data })
    }
}
