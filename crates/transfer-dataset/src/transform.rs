//! Per-split image transform policies.
//!
//! - **Train**: random rotation, random resized crop, random horizontal flip
//! - **Valid/Test**: shorter-side resize then center crop, no randomness
//!
//! Both end in a CHW `f32` buffer scaled to `[0, 1]`; normalization happens
//! in the batcher.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, ImageBuffer, Rgb, RgbImage};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use transfer_core::{DataConfig, DataSplit};

const CROP_ATTEMPTS: usize = 10;

/// Random augmentation parameters for the training split
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AugmentationConfig {
    /// Maximum rotation angle in degrees (applies ±rotation_degrees)
    pub rotation_degrees: f32,
    /// Range of the crop area as a fraction of the image area
    pub crop_scale: (f32, f32),
    /// Range of the crop aspect ratio (width / height)
    pub crop_ratio: (f32, f32),
    /// Probability of applying horizontal flip
    pub horizontal_flip_prob: f64,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            rotation_degrees: 30.0,
            crop_scale: (0.08, 1.0),
            crop_ratio: (3.0 / 4.0, 4.0 / 3.0),
            horizontal_flip_prob: 0.5,
        }
    }
}

/// Transform applied to every image of a split
#[derive(Debug, Clone)]
pub enum Transform {
    /// Randomized training policy
    Augment {
        config: AugmentationConfig,
        crop_size: u32,
    },
    /// Deterministic evaluation policy
    Deterministic { resize_size: u32, crop_size: u32 },
}

impl Transform {
    pub fn train(config: AugmentationConfig, crop_size: u32) -> Self {
        Transform::Augment { config, crop_size }
    }

    pub fn eval(resize_size: u32, crop_size: u32) -> Self {
        Transform::Deterministic {
            resize_size,
            crop_size,
        }
    }

    /// Policy used for `split` under the given data settings.
    pub fn for_split(split: DataSplit, data: &DataConfig) -> Self {
        if split.is_train() {
            let config = AugmentationConfig {
                rotation_degrees: data.rotation_degrees,
                ..Default::default()
            };
            Transform::train(config, data.image_size)
        } else {
            Transform::eval(data.resize_size, data.image_size)
        }
    }

    /// Side of the square output image.
    pub fn crop_size(&self) -> u32 {
        match self {
            Transform::Augment { crop_size, .. } | Transform::Deterministic { crop_size, .. } => {
                *crop_size
            }
        }
    }

    pub fn is_random(&self) -> bool {
        matches!(self, Transform::Augment { .. })
    }

    /// Transform one image into CHW data. `rng` is only drawn from by the
    /// training policy.
    pub fn apply(&self, img: DynamicImage, rng: &mut ChaCha8Rng) -> Vec<f32> {
        let img = match self {
            Transform::Augment { config, crop_size } => {
                let mut img = img;
                if config.rotation_degrees > 0.0 {
                    let angle =
                        rng.gen_range(-config.rotation_degrees..=config.rotation_degrees);
                    img = rotate(&img, angle);
                }
                img = random_resized_crop(&img, *crop_size, config, rng);
                if rng.gen_bool(config.horizontal_flip_prob) {
                    img = img.fliph();
                }
                img
            }
            Transform::Deterministic {
                resize_size,
                crop_size,
            } => center_crop(&resize_shorter_side(&img, *resize_size), *crop_size),
        };

        to_chw(&img)
    }
}

/// Rotate around the image center, keeping the canvas size and filling
/// uncovered pixels with black.
pub fn rotate(img: &DynamicImage, angle_degrees: f32) -> DynamicImage {
    if angle_degrees.abs() < 1e-3 {
        return img.clone();
    }

    let angle_rad = angle_degrees.to_radians();
    let (width, height) = img.dimensions();
    let rgb = img.to_rgb8();

    let cx = (width as f32 - 1.0) / 2.0;
    let cy = (height as f32 - 1.0) / 2.0;
    let (sin_a, cos_a) = angle_rad.sin_cos();

    let output = ImageBuffer::from_fn(width, height, |x, y| {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        let src_x = cx + dx * cos_a + dy * sin_a;
        let src_y = cy - dx * sin_a + dy * cos_a;
        bilinear_sample(&rgb, src_x, src_y)
    });

    DynamicImage::ImageRgb8(output)
}

fn bilinear_sample(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (width, height) = img.dimensions();
    if x < 0.0 || y < 0.0 || x > (width - 1) as f32 || y > (height - 1) as f32 {
        return Rgb([0, 0, 0]);
    }

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    let mut result = [0u8; 3];
    for (c, out) in result.iter_mut().enumerate() {
        let v = p00[c] as f32 * (1.0 - fx) * (1.0 - fy)
            + p10[c] as f32 * fx * (1.0 - fy)
            + p01[c] as f32 * (1.0 - fx) * fy
            + p11[c] as f32 * fx * fy;
        *out = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(result)
}

/// Crop a random region of random area and aspect ratio, then resize it to
/// `size x size`.
pub fn random_resized_crop(
    img: &DynamicImage,
    size: u32,
    config: &AugmentationConfig,
    rng: &mut ChaCha8Rng,
) -> DynamicImage {
    let (x, y, w, h) = crop_region(img.dimensions(), config, rng);
    img.crop_imm(x, y, w, h)
        .resize_exact(size, size, FilterType::Triangle)
}

fn crop_region(
    (width, height): (u32, u32),
    config: &AugmentationConfig,
    rng: &mut ChaCha8Rng,
) -> (u32, u32, u32, u32) {
    let area = (width * height) as f32;
    let (min_ratio, max_ratio) = config.crop_ratio;
    let (log_min, log_max) = (min_ratio.ln(), max_ratio.ln());

    for _ in 0..CROP_ATTEMPTS {
        let target_area = area * rng.gen_range(config.crop_scale.0..=config.crop_scale.1);
        let aspect = rng.gen_range(log_min..=log_max).exp();

        let w = (target_area * aspect).sqrt().round() as u32;
        let h = (target_area / aspect).sqrt().round() as u32;

        if w > 0 && h > 0 && w <= width && h <= height {
            let x = rng.gen_range(0..=width - w);
            let y = rng.gen_range(0..=height - h);
            return (x, y, w, h);
        }
    }

    // Fall back to the largest central crop within the ratio bounds
    let in_ratio = width as f32 / height as f32;
    let (w, h) = if in_ratio < min_ratio {
        (width, ((width as f32 / min_ratio).round() as u32).clamp(1, height))
    } else if in_ratio > max_ratio {
        (((height as f32 * max_ratio).round() as u32).clamp(1, width), height)
    } else {
        (width, height)
    };
    ((width - w) / 2, (height - h) / 2, w, h)
}

/// Resize so the shorter side equals `size`, keeping the aspect ratio.
pub fn resize_shorter_side(img: &DynamicImage, size: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    let (w, h) = if width <= height {
        (size, ((size as u64 * height as u64) / width.max(1) as u64) as u32)
    } else {
        (((size as u64 * width as u64) / height.max(1) as u64) as u32, size)
    };
    if (w, h) == (width, height) {
        return img.clone();
    }
    img.resize_exact(w.max(1), h.max(1), FilterType::Triangle)
}

/// Take the central `size x size` region, padding with black when the image
/// is smaller.
pub fn center_crop(img: &DynamicImage, size: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    if width >= size && height >= size {
        let x = ((width - size) as f32 / 2.0).round() as u32;
        let y = ((height - size) as f32 / 2.0).round() as u32;
        return img.crop_imm(x, y, size, size);
    }

    let mut canvas = RgbImage::new(size, size);
    let offset_x = (size as i64 - width as i64) / 2;
    let offset_y = (size as i64 - height as i64) / 2;
    imageops::overlay(&mut canvas, &img.to_rgb8(), offset_x, offset_y);
    DynamicImage::ImageRgb8(canvas)
}

/// Convert image to CHW float data scaled to [0, 1]
pub fn to_chw(img: &DynamicImage) -> Vec<f32> {
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; 3 * plane];

    for (i, pixel) in rgb.pixels().enumerate() {
        for c in 0..3 {
            data[c * plane + i] = pixel[c] as f32 / 255.0;
        }
    }

    data
}
