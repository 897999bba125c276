// search.rs - Size-targeting search: walk quality or scale down until the
// encoded image fits the byte budget, within a bounded number of attempts.

use crate::compression::{EncodeParams, Encoder, OutputFormat, Resize};
use crate::config::SearchConfig;
use crate::error::CompressError;
use image::{DynamicImage, GenericImageView};

const QUALITY_TOLERANCE: f32 = 1e-4;

/// What the user asked for.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Goal {
    /// Encode once at full fidelity.
    #[default]
    Unbounded,
    /// Quality fraction in (0, 1].
    Quality(f32),
    /// Upper bound on the encoded size, in bytes.
    TargetSize(u64),
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub data: Vec<u8>,
    pub format: OutputFormat,
    pub attempts: u32,
    /// `false` when a byte target was given and the attempt budget ran out
    /// first. The data is still the best effort and gets used as-is.
    pub met_target: bool,
}

/// Compress one decoded image toward `goal`.
///
/// `original` is the untouched upload; it sizes targets derived from a quality
/// percentage and is the fallback when a scale search never encodes anything.
pub fn compress_image(
    encoder: &dyn Encoder,
    image: &DynamicImage,
    original: &[u8],
    format: OutputFormat,
    goal: Goal,
    config: &SearchConfig,
) -> Result<SearchOutcome, CompressError> {
    match goal {
        Goal::Unbounded => encode_once(encoder, image, EncodeParams::full_fidelity(format)),
        Goal::Quality(quality) if format.supports_quality() => encode_once(
            encoder,
            image,
            EncodeParams {
                format,
                quality,
                resize: Resize::Original,
            },
        ),
        Goal::Quality(quality) => {
            let derived = (original.len() as f64 * quality as f64) as u64;
            let target = derived.max(config.min_derived_target);
            Ok(scale_search(encoder, image, original, format, target, config))
        }
        Goal::TargetSize(target) if format.supports_quality() => {
            quality_search(encoder, image, format, target, config)
        }
        Goal::TargetSize(target) => Ok(scale_search(encoder, image, original, format, target, config)),
    }
}

fn encode_once(
    encoder: &dyn Encoder,
    image: &DynamicImage,
    params: EncodeParams,
) -> Result<SearchOutcome, CompressError> {
    let data = encoder.encode(image, &params)?;
    Ok(SearchOutcome {
        data,
        format: params.format,
        attempts: 1,
        met_target: true,
    })
}

/// Step quality down toward the floor, then shrink the longest-side cap.
///
/// Quality is derived from the attempt index rather than accumulated, so float
/// drift can never push it under `min_quality`.
pub fn quality_search(
    encoder: &dyn Encoder,
    image: &DynamicImage,
    format: OutputFormat,
    target: u64,
    config: &SearchConfig,
) -> Result<SearchOutcome, CompressError> {
    let (width, height) = image.dimensions();
    let longest = width.max(height).max(1);
    let mut max_side = config.target_max_dimension;
    let mut last = Vec::new();
    let mut attempts = 0;
    let mut met_target = false;

    for step in 0..config.max_quality_attempts.max(1) {
        let quality = (config.initial_quality - config.quality_step * step as f32).max(config.min_quality);
        let params = EncodeParams {
            format,
            quality,
            resize: max_side.map(Resize::MaxSide).unwrap_or(Resize::Original),
        };

        last = encoder.encode(image, &params)?;
        attempts += 1;
        log::debug!(
            "quality search attempt {}: q={:.2} {:?} -> {} bytes (target {})",
            attempts,
            quality,
            params.resize,
            last.len(),
            target
        );

        if last.len() as u64 <= target {
            met_target = true;
            break;
        }

        if quality - config.min_quality <= QUALITY_TOLERANCE {
            match config.dimension_decay {
                Some(decay) => {
                    // Caps above the image size don't shrink anything.
                    let current = max_side.unwrap_or(longest).min(longest);
                    max_side = Some(((current as f32 * decay).round() as u32).max(1));
                }
                None => break,
            }
        }
    }

    Ok(SearchOutcome {
        data: last,
        format,
        attempts,
        met_target,
    })
}

/// Shrink pixel dimensions geometrically until the output fits.
///
/// Encoded size tracks pixel count, so `sqrt(target / actual)` estimates the
/// per-side factor; the clamp keeps each step between 30% and 95%.
pub fn scale_search(
    encoder: &dyn Encoder,
    image: &DynamicImage,
    original: &[u8],
    format: OutputFormat,
    target: u64,
    config: &SearchConfig,
) -> SearchOutcome {
    let (width, height) = image.dimensions();
    let mut scale = 1.0_f64;
    let mut last: Option<Vec<u8>> = None;
    let mut attempts = 0;
    let mut met_target = false;

    while attempts < config.max_scale_attempts {
        let w = ((width as f64 * scale).round() as u32).max(1);
        let h = ((height as f64 * scale).round() as u32).max(1);
        let params = EncodeParams {
            format,
            quality: 1.0,
            resize: Resize::Exact { width: w, height: h },
        };

        attempts += 1;
        let data = match encoder.encode(image, &params) {
            Ok(data) => data,
            Err(e) => {
                log::warn!("scale search stopped at {}x{}: {}", w, h, e);
                break;
            }
        };
        let size = data.len() as f64;
        log::debug!(
            "scale search attempt {}: scale={:.3} {}x{} -> {} bytes (target {})",
            attempts,
            scale,
            w,
            h,
            data.len(),
            target
        );
        last = Some(data);

        if size <= target as f64 {
            met_target = true;
            break;
        }

        let ratio = (target as f64 / size).max(config.ratio_epsilon);
        let factor = ratio
            .sqrt()
            .clamp(config.min_scale_factor, config.max_scale_factor);
        scale *= factor;

        if scale < config.min_scale {
            break;
        }
    }

    SearchOutcome {
        data: last.unwrap_or_else(|| original.to_vec()),
        format,
        attempts,
        met_target,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Output size is `quality * base` bytes, dimensions ignored.
    struct LinearQuality {
        base: f32,
    }

    impl Encoder for LinearQuality {
        fn encode(&self, _image: &DynamicImage, params: &EncodeParams) -> Result<Vec<u8>, CompressError> {
            Ok(vec![0; (params.quality * self.base).round() as usize])
        }
    }

    /// Uncompressed-like output: three bytes per pixel plus a fixed header.
    struct PerPixel {
        header: usize,
    }

    impl Encoder for PerPixel {
        fn encode(&self, image: &DynamicImage, params: &EncodeParams) -> Result<Vec<u8>, CompressError> {
            let (w, h) = match params.resize {
                Resize::Exact { width, height } => (width, height),
                _ => image.dimensions(),
            };
            Ok(vec![0; self.header + (w * h * 3) as usize])
        }
    }

    struct Fixed(usize);

    impl Encoder for Fixed {
        fn encode(&self, _image: &DynamicImage, _params: &EncodeParams) -> Result<Vec<u8>, CompressError> {
            Ok(vec![0; self.0])
        }
    }

    struct Failing;

    impl Encoder for Failing {
        fn encode(&self, _image: &DynamicImage, params: &EncodeParams) -> Result<Vec<u8>, CompressError> {
            Err(CompressError::Encode {
                format: params.format.to_string(),
                reason: "boom".to_string(),
            })
        }
    }

    /// Records every call before delegating.
    struct Recording<E> {
        inner: E,
        calls: Mutex<Vec<EncodeParams>>,
    }

    impl<E: Encoder> Recording<E> {
        fn new(inner: E) -> Self {
            Self {
                inner,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<EncodeParams> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl<E: Encoder> Encoder for Recording<E> {
        fn encode(&self, image: &DynamicImage, params: &EncodeParams) -> Result<Vec<u8>, CompressError> {
            self.calls.lock().unwrap().push(*params);
            self.inner.encode(image, params)
        }
    }

    /// Output is the square of the longest side actually encoded. Quality is ignored.
    struct SquareOfSide;

    impl Encoder for SquareOfSide {
        fn encode(&self, image: &DynamicImage, params: &EncodeParams) -> Result<Vec<u8>, CompressError> {
            let (w, h) = image.dimensions();
            let side = match params.resize {
                Resize::Original => w.max(h),
                Resize::MaxSide(max) => w.max(h).min(max.max(1)),
                Resize::Exact { width, height } => width.max(height),
            };
            Ok(vec![0; (side * side) as usize])
        }
    }

    fn image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::new_rgb8(width, height)
    }

    #[test]
    fn test_unbounded_encodes_exactly_once() {
        let config = SearchConfig::default();
        for (w, h) in [(1, 1), (64, 48), (300, 10)] {
            let encoder = Recording::new(Fixed(12_345));
            let outcome = compress_image(&encoder, &image(w, h), &[], OutputFormat::Jpeg, Goal::Unbounded, &config).unwrap();

            assert_eq!(encoder.calls().len(), 1);
            assert_eq!(encoder.calls()[0], EncodeParams::full_fidelity(OutputFormat::Jpeg));
            assert_eq!(outcome.data.len(), 12_345);
            assert_eq!(outcome.attempts, 1);
        }
    }

    #[test]
    fn test_quality_goal_on_lossy_format_is_single_encode() {
        let encoder = Recording::new(LinearQuality { base: 1000.0 });
        let outcome = compress_image(
            &encoder,
            &image(10, 10),
            &[],
            OutputFormat::Jpeg,
            Goal::Quality(0.7),
            &SearchConfig::default(),
        )
        .unwrap();

        assert_eq!(encoder.calls().len(), 1);
        assert_eq!(encoder.calls()[0].quality, 0.7);
        assert_eq!(outcome.data.len(), 700);
    }

    #[test]
    fn test_quality_search_converges_at_half_quality() {
        let encoder = Recording::new(LinearQuality { base: 1000.0 });
        let outcome = quality_search(&encoder, &image(10, 10), OutputFormat::Jpeg, 500, &SearchConfig::default()).unwrap();

        assert!(outcome.met_target);
        assert_eq!(outcome.attempts, 9);
        assert_eq!(outcome.data.len(), 500);

        let calls = encoder.calls();
        assert!((calls[0].quality - 0.9).abs() < 1e-6);
        assert!((calls[8].quality - 0.5).abs() < 1e-6);
        assert!(calls.iter().all(|c| c.resize == Resize::MaxSide(1024)));
    }

    #[test]
    fn test_quality_search_respects_floor_and_ceiling() {
        let config = SearchConfig::default();
        let encoder = Recording::new(LinearQuality { base: 1000.0 });
        let outcome = quality_search(&encoder, &image(2000, 1000), OutputFormat::Jpeg, 1, &config).unwrap();

        let calls = encoder.calls();
        assert!(!outcome.met_target);
        assert_eq!(outcome.attempts, 21);
        assert_eq!(calls.len(), 21);
        assert!(calls.iter().all(|c| c.quality >= config.min_quality - 1e-6));

        // Once quality bottoms out the cap shrinks every attempt.
        let caps: Vec<u32> = calls
            .iter()
            .map(|c| match c.resize {
                Resize::MaxSide(m) => m,
                other => panic!("unexpected resize {:?}", other),
            })
            .collect();
        assert_eq!(caps[16], 1024);
        assert_eq!(caps[17], 922);
        assert!(caps.windows(2).all(|w| w[1] <= w[0]));
    }

    #[test]
    fn test_quality_search_without_decay_stops_at_floor() {
        let config = SearchConfig {
            dimension_decay: None,
            ..SearchConfig::default()
        };
        let encoder = Recording::new(LinearQuality { base: 1000.0 });
        let outcome = quality_search(&encoder, &image(10, 10), OutputFormat::Jpeg, 1, &config).unwrap();

        assert_eq!(outcome.attempts, 17);
        assert_eq!(outcome.data.len(), 100);
    }

    #[test]
    fn test_quality_search_uncapped_decays_from_longest_side() {
        let config = SearchConfig {
            target_max_dimension: None,
            initial_quality: 0.1,
            max_quality_attempts: 3,
            ..SearchConfig::default()
        };
        let encoder = Recording::new(Fixed(10));
        quality_search(&encoder, &image(200, 50), OutputFormat::Avif, 1, &config).unwrap();

        let resizes: Vec<_> = encoder.calls().iter().map(|c| c.resize).collect();
        assert_eq!(resizes, vec![Resize::Original, Resize::MaxSide(180), Resize::MaxSide(162)]);
    }

    #[test]
    fn test_quality_search_shrinks_images_smaller_than_cap() {
        let encoder = Recording::new(SquareOfSide);
        let outcome = quality_search(&encoder, &image(600, 600), OutputFormat::Jpeg, 300_000, &SearchConfig::default()).unwrap();

        assert!(outcome.met_target);
        assert_eq!(outcome.attempts, 18);
        assert_eq!(outcome.data.len(), 540 * 540);
        assert_eq!(encoder.calls()[17].resize, Resize::MaxSide(540));
    }

    #[test]
    fn test_quality_search_propagates_encoder_failure() {
        let result = quality_search(&Failing, &image(4, 4), OutputFormat::Jpeg, 10, &SearchConfig::default());
        assert!(matches!(result, Err(CompressError::Encode { .. })));
    }

    #[test]
    fn test_scale_search_meets_target() {
        let encoder = Recording::new(PerPixel { header: 0 });
        let outcome = scale_search(&encoder, &image(100, 100), &[], OutputFormat::Png, 5_000, &SearchConfig::default());

        assert!(outcome.met_target);
        assert!(outcome.data.len() <= 5_000);
        assert_eq!(outcome.attempts, 3);

        let calls = encoder.calls();
        assert_eq!(calls[0].resize, Resize::Exact { width: 100, height: 100 });
        assert_eq!(calls[1].resize, Resize::Exact { width: 41, height: 41 });
        assert_eq!(calls[2].resize, Resize::Exact { width: 39, height: 39 });
    }

    #[test]
    fn test_scale_search_first_attempt_at_original_size() {
        let encoder = Recording::new(PerPixel { header: 0 });
        let outcome = scale_search(&encoder, &image(10, 10), &[], OutputFormat::Png, 1_000, &SearchConfig::default());

        assert!(outcome.met_target);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.data.len(), 300);
    }

    #[test]
    fn test_scale_search_stops_after_twelve_attempts() {
        // Always just over target: the slowest allowed shrink never drops
        // scale below the floor, so only the ceiling ends the loop.
        let encoder = Recording::new(Fixed(1_001));
        let outcome = scale_search(&encoder, &image(500, 500), &[], OutputFormat::Png, 1_000, &SearchConfig::default());

        assert!(!outcome.met_target);
        assert_eq!(outcome.attempts, 12);
        assert_eq!(encoder.calls().len(), 12);
    }

    #[test]
    fn test_scale_search_aborts_when_scale_degenerates() {
        let encoder = Recording::new(PerPixel { header: 10_000 });
        let outcome = scale_search(&encoder, &image(100, 100), &[], OutputFormat::Png, 100, &SearchConfig::default());

        // 1.0 -> 0.3 -> 0.09 -> 0.027, below the 0.05 floor.
        assert!(!outcome.met_target);
        assert_eq!(outcome.attempts, 3);
    }

    #[test]
    fn test_scale_search_falls_back_to_original() {
        let original = b"original bytes".to_vec();
        let outcome = scale_search(&Failing, &image(8, 8), &original, OutputFormat::Png, 1, &SearchConfig::default());

        assert_eq!(outcome.data, original);
        assert_eq!(outcome.attempts, 1);
        assert!(!outcome.met_target);
    }

    #[test]
    fn test_quality_goal_on_lossless_format_derives_target() {
        let original = vec![0u8; 10_000];
        let encoder = Recording::new(PerPixel { header: 0 });
        let outcome = compress_image(
            &encoder,
            &image(100, 100),
            &original,
            OutputFormat::Png,
            Goal::Quality(0.5),
            &SearchConfig::default(),
        )
        .unwrap();

        assert!(outcome.met_target);
        assert!(outcome.data.len() <= 5_000);
        assert!(encoder.calls().len() > 1);
    }

    #[test]
    fn test_scale_search_terminates_for_any_target() {
        let config = SearchConfig::default();
        for target in [1, 10, 100, 1_000, 10_000, 29_999, 30_000] {
            let outcome = scale_search(&PerPixel { header: 0 }, &image(100, 100), &[], OutputFormat::Png, target, &config);
            assert!(outcome.attempts <= config.max_scale_attempts);
            assert!(outcome.met_target == (outcome.data.len() as u64 <= target));
        }
    }
}
