use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageFormat, ImageResult, Luma, Rgb, RgbImage};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use std::io::Cursor;

/// 3x3 smoothing kernel used as the "blurred" reference for sharpening.
const SMOOTH_KERNEL: [f32; 9] = [1.0, 1.0, 1.0, 1.0, 5.0, 1.0, 1.0, 1.0, 1.0];

/// Aggressive 3x3 edge enhancement kernel.
const EDGE_ENHANCE_MORE_KERNEL: [f32; 9] = [-1.0, -1.0, -1.0, -1.0, 9.0, -1.0, -1.0, -1.0, -1.0];

/// ITU-R BT.601 luma of an RGB pixel (0.0 - 255.0).
fn luminance(pixel: &Rgb<u8>) -> f32 {
    0.299 * pixel[0] as f32 + 0.587 * pixel[1] as f32 + 0.114 * pixel[2] as f32
}

fn clamp_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Interpolates between `degenerate` and `img`: `d + factor * (img - d)`.
///
/// factor 1.0 returns the image unchanged, 0.0 returns the degenerate image,
/// values above 1.0 push away from it.
fn blend(degenerate: &RgbImage, img: &RgbImage, factor: f32) -> RgbImage {
    RgbImage::from_fn(img.width(), img.height(), |x, y| {
        let d = degenerate.get_pixel(x, y);
        let p = img.get_pixel(x, y);
        Rgb([
            clamp_u8(d[0] as f32 + factor * (p[0] as f32 - d[0] as f32)),
            clamp_u8(d[1] as f32 + factor * (p[1] as f32 - d[1] as f32)),
            clamp_u8(d[2] as f32 + factor * (p[2] as f32 - d[2] as f32)),
        ])
    })
}

/// Scales the image so it is at least `min_height` high or `min_width` wide,
/// whichever needs the larger factor, multiplied by `boost`.
pub fn upscale(img: &DynamicImage, min_height: u32, min_width: u32, boost: f32) -> DynamicImage {
    let (w, h) = (img.width().max(1), img.height().max(1));
    let factor = (min_height as f32 / h as f32).max(min_width as f32 / w as f32) * boost;
    let new_w = ((w as f32 * factor) as u32).max(1);
    let new_h = ((h as f32 * factor) as u32).max(1);
    img.resize_exact(new_w, new_h, FilterType::CatmullRom)
}

/// Contrast boost around the mean luminance.
pub fn enhance_contrast(img: &RgbImage, factor: f32) -> RgbImage {
    let pixel_count = (img.width() as f64 * img.height() as f64).max(1.0);
    let mean = img.pixels().map(|p| luminance(p) as f64).sum::<f64>() / pixel_count;
    let gray = clamp_u8(mean as f32);
    let degenerate = RgbImage::from_pixel(img.width(), img.height(), Rgb([gray, gray, gray]));
    blend(&degenerate, img, factor)
}

/// Brightness scaling (blend towards black).
pub fn enhance_brightness(img: &RgbImage, factor: f32) -> RgbImage {
    let degenerate = RgbImage::new(img.width(), img.height());
    blend(&degenerate, img, factor)
}

/// Sharpness boost: pushes the image away from a smoothed copy of itself.
pub fn enhance_sharpness(img: &RgbImage, factor: f32) -> RgbImage {
    let smoothed: RgbImage = imageops::filter3x3(img, &SMOOTH_KERNEL);
    blend(&smoothed, img, factor)
}

/// Strong edge enhancement (emphasizes digit outlines, amplifies noise too).
pub fn edge_enhance_more(img: &RgbImage) -> RgbImage {
    imageops::filter3x3(img, &EDGE_ENHANCE_MORE_KERNEL)
}

/// Histogram equalization with a clip limit.
///
/// Bins above `clip_limit` times the average bin height are clipped and the
/// excess is spread evenly over all bins before building the mapping, which
/// keeps flat background noise from being blown up.
pub fn equalize_clipped(img: &GrayImage, clip_limit: f32) -> GrayImage {
    let total = img.width() as u64 * img.height() as u64;
    if total == 0 {
        return img.clone();
    }

    let mut histogram = [0f64; 256];
    for pixel in img.pixels() {
        histogram[pixel[0] as usize] += 1.0;
    }

    let limit = (clip_limit.max(1.0) as f64) * total as f64 / 256.0;
    let mut excess = 0.0;
    for bin in histogram.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }
    let bonus = excess / 256.0;
    for bin in histogram.iter_mut() {
        *bin += bonus;
    }

    let mut lut = [0u8; 256];
    let mut cdf = 0.0;
    let cdf_min = histogram.iter().copied().find(|&v| v > 0.0).unwrap_or(0.0);
    let span = total as f64 - cdf_min;
    for (value, bin) in histogram.iter().enumerate() {
        cdf += bin;
        lut[value] = if span <= 0.0 {
            value as u8
        } else {
            clamp_u8(((cdf - cdf_min) * 255.0 / span) as f32)
        };
    }

    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        Luma([lut[img.get_pixel(x, y)[0] as usize]])
    })
}

/// Black and white split at Otsu's level. Pixels above the level turn white.
pub fn binarize_otsu(img: &GrayImage) -> GrayImage {
    let level = otsu_level(img);
    threshold(img, level, ThresholdType::Binary)
}

/// Encodes an image as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> ImageResult<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    img.write_to(&mut buffer, ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contrast_identity_and_boost() {
        let img = RgbImage::from_fn(2, 1, |x, _| {
            if x == 0 { Rgb([100, 100, 100]) } else { Rgb([200, 200, 200]) }
        });

        assert_eq!(enhance_contrast(&img, 1.0), img);

        // mean 150: 150 + 2 * (100 - 150) = 50, 150 + 2 * (200 - 150) = 250
        let boosted = enhance_contrast(&img, 2.0);
        assert_eq!(boosted.get_pixel(0, 0)[0], 50);
        assert_eq!(boosted.get_pixel(1, 0)[0], 250);
    }

    #[test]
    fn test_brightness_scales_and_clamps() {
        let img = RgbImage::from_pixel(1, 1, Rgb([100, 200, 250]));
        let brighter = enhance_brightness(&img, 1.1);
        assert_eq!(brighter.get_pixel(0, 0).0, [110, 220, 255]);
    }

    #[test]
    fn test_upscale_meets_minimum() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(60, 20));
        let scaled = upscale(&img, 200, 600, 1.0);
        // max(200/20, 600/60) = 10
        assert_eq!((scaled.width(), scaled.height()), (600, 200));

        let boosted = upscale(&img, 150, 450, 2.5);
        // max(7.5, 7.5) * 2.5 = 18.75
        assert_eq!((boosted.width(), boosted.height()), (1125, 375));
    }

    #[test]
    fn test_binarize_otsu_splits_bimodal_image() {
        let img = GrayImage::from_fn(10, 1, |x, _| {
            if x < 5 { Luma([40]) } else { Luma([210]) }
        });
        let binary = binarize_otsu(&img);
        assert!(binary.pixels().take(5).all(|p| p[0] == 0));
        assert!(binary.pixels().skip(5).all(|p| p[0] == 255));
    }

    #[test]
    fn test_equalize_spreads_narrow_range() {
        let img = GrayImage::from_fn(4, 4, |x, _| Luma([100 + x as u8 * 10]));
        // High enough that no bin is clipped
        let equalized = equalize_clipped(&img, 100.0);
        assert_eq!(equalized.get_pixel(0, 0)[0], 0);
        assert_eq!(equalized.get_pixel(3, 0)[0], 255);
    }

    #[test]
    fn test_equalize_flat_image_stays_flat() {
        let img = GrayImage::from_pixel(3, 3, Luma([77]));
        let equalized = equalize_clipped(&img, 2.0);
        let first = equalized.get_pixel(0, 0)[0];
        assert!(equalized.pixels().all(|p| p[0] == first));
    }

    #[test]
    fn test_encode_png_round_trips_dimensions() {
        let img = DynamicImage::ImageLuma8(GrayImage::new(7, 3));
        let png = encode_png(&img).unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (7, 3));
    }
}
