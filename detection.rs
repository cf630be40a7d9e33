//! Card detection: locate the identity card in a photo and crop it out.
//!
//! The pipeline is grayscale → bilateral smoothing → (Canny ∪ inverted
//! Gaussian adaptive threshold) → dilate/close → external contours. The five
//! largest contours are scored on aspect ratio and rectangularity and the
//! best one above [`ACCEPT_SCORE`] is cropped with [`PADDING_RATIO`] padding.

use crate::geometry;
use crate::models::{CropRegion, CroppedImage, DetectionCandidate};
use image::{GrayImage, Luma, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology;

pub const BILATERAL_DIAMETER: u32 = 11;
pub const BILATERAL_SIGMA_COLOR: f32 = 17.0;
pub const BILATERAL_SIGMA_SPACE: f32 = 17.0;
/// Gaussian sigma matching an 11-pixel adaptive threshold block.
pub const ADAPTIVE_SIGMA: f32 = 2.0;
pub const ADAPTIVE_OFFSET: i16 = 2;
pub const CANNY_LOW: f32 = 30.0;
pub const CANNY_HIGH: f32 = 100.0;
/// 7x7 kernel, 3 iterations.
pub const DILATE_RADIUS: u8 = 9;
/// 7x7 kernel, 2 iterations.
pub const CLOSE_RADIUS: u8 = 6;
pub const MAX_CANDIDATES: usize = 5;
pub const ASPECT_WEIGHT: f64 = 0.6;
pub const RECTANGULARITY_WEIGHT: f64 = 0.4;
pub const ACCEPT_SCORE: f64 = 0.4;
pub const CARD_ASPECT_RANGE: (f64, f64) = (1.2, 2.0);
pub const LOOSE_ASPECT_RANGE: (f64, f64) = (1.0, 2.5);
pub const CARD_ASPECT_SCORE: f64 = 1.0;
pub const LOOSE_ASPECT_SCORE: f64 = 0.7;
pub const OTHER_ASPECT_SCORE: f64 = 0.3;
pub const PADDING_RATIO: f64 = 0.08;

#[derive(Debug, Clone)]
pub struct DetectorParams {
    pub bilateral_diameter: u32,
    pub bilateral_sigma_color: f32,
    pub bilateral_sigma_space: f32,
    pub adaptive_sigma: f32,
    pub adaptive_offset: i16,
    pub canny_low: f32,
    pub canny_high: f32,
    pub dilate_radius: u8,
    pub close_radius: u8,
    pub max_candidates: usize,
    pub aspect_weight: f64,
    pub rectangularity_weight: f64,
    pub card_aspect_range: (f64, f64),
    pub loose_aspect_range: (f64, f64),
    pub card_aspect_score: f64,
    pub loose_aspect_score: f64,
    pub other_aspect_score: f64,
    pub accept_score: f64,
    pub padding_ratio: f64,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            bilateral_diameter: BILATERAL_DIAMETER,
            bilateral_sigma_color: BILATERAL_SIGMA_COLOR,
            bilateral_sigma_space: BILATERAL_SIGMA_SPACE,
            adaptive_sigma: ADAPTIVE_SIGMA,
            adaptive_offset: ADAPTIVE_OFFSET,
            canny_low: CANNY_LOW,
            canny_high: CANNY_HIGH,
            dilate_radius: DILATE_RADIUS,
            close_radius: CLOSE_RADIUS,
            max_candidates: MAX_CANDIDATES,
            aspect_weight: ASPECT_WEIGHT,
            rectangularity_weight: RECTANGULARITY_WEIGHT,
            card_aspect_range: CARD_ASPECT_RANGE,
            loose_aspect_range: LOOSE_ASPECT_RANGE,
            card_aspect_score: CARD_ASPECT_SCORE,
            loose_aspect_score: LOOSE_ASPECT_SCORE,
            other_aspect_score: OTHER_ASPECT_SCORE,
            accept_score: ACCEPT_SCORE,
            padding_ratio: PADDING_RATIO,
        }
    }
}

impl DetectorParams {
    /// Score for a long-side / short-side ratio.
    pub fn aspect_score(&self, ratio: f64) -> f64 {
        let within = |(lo, hi): (f64, f64)| (lo..=hi).contains(&ratio);
        if within(self.card_aspect_range) {
            self.card_aspect_score
        } else if within(self.loose_aspect_range) {
            self.loose_aspect_score
        } else {
            self.other_aspect_score
        }
    }

    fn score_contour(
        &self,
        area: f64,
        points: &[imageproc::point::Point<i32>],
    ) -> Option<DetectionCandidate> {
        let rect = geometry::min_area_rect(points);
        if rect.width == 0.0 || rect.height == 0.0 {
            return None;
        }
        let ratio = rect.width.max(rect.height) / rect.width.min(rect.height);
        let aspect_ratio_score = self.aspect_score(ratio);
        let hull_area = geometry::polygon_area(&geometry::convex_hull(points));
        let rectangularity = if hull_area > 0.0 { area / hull_area } else { 0.0 };
        Some(DetectionCandidate {
            rect,
            aspect_ratio_score,
            rectangularity,
            composite_score: self.aspect_weight * aspect_ratio_score
                + self.rectangularity_weight * rectangularity,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct CardDetector {
    params: DetectorParams,
}

impl CardDetector {
    pub fn new(params: DetectorParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &DetectorParams {
        &self.params
    }

    /// Crop the most card-like region, or return the image unchanged.
    pub fn detect(&self, image: &RgbImage) -> CroppedImage {
        let Some(best) = self.best_candidate(image) else {
            log::debug!("No card region accepted; using full image");
            return CroppedImage {
                image: image.clone(),
                region: None,
            };
        };
        let bounds = geometry::bounding_rect(&best.rect);
        let padded = geometry::pad_and_clip(
            bounds,
            self.params.padding_ratio,
            image.width(),
            image.height(),
        );
        match padded {
            Some(region) => {
                log::debug!(
                    "Card region {}x{} at ({}, {}) score {:.3}",
                    region.width,
                    region.height,
                    region.x,
                    region.y,
                    best.composite_score
                );
                CroppedImage {
                    image: crop(image, region),
                    region: Some(region),
                }
            }
            None => CroppedImage {
                image: image.clone(),
                region: None,
            },
        }
    }

    /// Highest-scoring candidate whose score exceeds the acceptance threshold.
    pub fn best_candidate(&self, image: &RgbImage) -> Option<DetectionCandidate> {
        let mut best: Option<DetectionCandidate> = None;
        for candidate in self.candidates(image) {
            let current = best.as_ref().map(|b| b.composite_score).unwrap_or(0.0);
            if candidate.composite_score > current
                && candidate.composite_score > self.params.accept_score
            {
                best = Some(candidate);
            }
        }
        best
    }

    /// Scored candidates from the largest external contours, largest first.
    pub fn candidates(&self, image: &RgbImage) -> Vec<DetectionCandidate> {
        if image.width() == 0 || image.height() == 0 {
            return Vec::new();
        }
        let edges = self.edge_map(image);

        let mut contours: Vec<(f64, Vec<imageproc::point::Point<i32>>)> =
            find_contours::<i32>(&edges)
                .into_iter()
                .filter(|c| matches!(c.border_type, BorderType::Outer) && c.parent.is_none())
                .map(|c| (geometry::polygon_area(&c.points), c.points))
                .collect();
        contours.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        contours
            .into_iter()
            .take(self.params.max_candidates)
            .filter_map(|(area, points)| self.params.score_contour(area, &points))
            .collect()
    }

    /// Closed binary edge map used for contour extraction.
    pub fn edge_map(&self, image: &RgbImage) -> GrayImage {
        let p = &self.params;
        let gray = to_grayscale(image);
        let smoothed = bilateral_filter(
            &gray,
            p.bilateral_diameter,
            p.bilateral_sigma_color,
            p.bilateral_sigma_space,
        );
        let thresh = adaptive_threshold(&smoothed, p.adaptive_sigma, p.adaptive_offset);
        let edges = canny(&smoothed, p.canny_low, p.canny_high);

        let mut combined = edges;
        for (out, t) in combined.pixels_mut().zip(thresh.pixels()) {
            out[0] = out[0].max(255 - t[0]);
        }

        let dilated = morphology::dilate(&combined, Norm::LInf, p.dilate_radius);
        morphology::close(&dilated, Norm::LInf, p.close_radius)
    }
}

fn crop(image: &RgbImage, region: CropRegion) -> RgbImage {
    image::imageops::crop_imm(image, region.x, region.y, region.width, region.height).to_image()
}

fn to_grayscale(image: &RgbImage) -> GrayImage {
    let (width, height) = image.dimensions();
    let mut gray = GrayImage::new(width, height);
    for (x, y, pixel) in image.enumerate_pixels() {
        let luma = 0.299 * pixel[0] as f32 + 0.587 * pixel[1] as f32 + 0.114 * pixel[2] as f32;
        gray.put_pixel(x, y, Luma([luma.round().min(255.0) as u8]));
    }
    gray
}

/// Edge-preserving smoothing over a circular window of `diameter` pixels.
/// Samples outside the image are skipped.
fn bilateral_filter(
    image: &GrayImage,
    diameter: u32,
    sigma_color: f32,
    sigma_space: f32,
) -> GrayImage {
    let radius = (diameter / 2) as i32;
    let (width, height) = image.dimensions();

    let color_weights: Vec<f32> = (0..256)
        .map(|d| (-((d * d) as f32) / (2.0 * sigma_color * sigma_color)).exp())
        .collect();
    let mut window = Vec::new();
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let r2 = (dx * dx + dy * dy) as f32;
            if r2 > (radius * radius) as f32 {
                continue;
            }
            window.push((dx, dy, (-r2 / (2.0 * sigma_space * sigma_space)).exp()));
        }
    }

    let mut out = GrayImage::new(width, height);
    for y in 0..height as i32 {
        for x in 0..width as i32 {
            let center = image.get_pixel(x as u32, y as u32)[0];
            let mut sum = 0.0f32;
            let mut norm = 0.0f32;
            for &(dx, dy, space_w) in &window {
                let (sx, sy) = (x + dx, y + dy);
                if sx < 0 || sy < 0 || sx >= width as i32 || sy >= height as i32 {
                    continue;
                }
                let value = image.get_pixel(sx as u32, sy as u32)[0];
                let w = space_w * color_weights[value.abs_diff(center) as usize];
                sum += w * value as f32;
                norm += w;
            }
            let filtered = if norm > 0.0 { sum / norm } else { center as f32 };
            out.put_pixel(x as u32, y as u32, Luma([filtered.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

/// Gaussian adaptive threshold: 255 where `value > local_mean - offset`.
fn adaptive_threshold(image: &GrayImage, sigma: f32, offset: i16) -> GrayImage {
    let local_mean = gaussian_blur_f32(image, sigma);
    let mut out = GrayImage::new(image.width(), image.height());
    for ((o, v), m) in out.pixels_mut().zip(image.pixels()).zip(local_mean.pixels()) {
        o[0] = if v[0] as i16 > m[0] as i16 - offset { 255 } else { 0 };
    }
    out
}
