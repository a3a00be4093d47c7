//! Stamps a "PodGrabbed" label onto the bottom-left corner of downloaded artwork.
//!
//! Labeling is not idempotent: running it on an already labeled image draws a
//! second label over the first.
//!
//! The label is composited on an 8-bit RGBA canvas, so formats that can only be
//! written at 16 bits per channel (Farbfeld) fail to encode and keep the original.

use crate::{EngineError, Result};
use ab_glyph::{point, Font, FontRef, GlyphId, PxScale, ScaleFont};
use image::{DynamicImage, ImageFormat, ImageReader, Rgba, RgbaImage};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

pub const LABEL_TEXT: &str = "PodGrabbed";

const FONT_BYTES: &[u8] = include_bytes!("../assets/fonts/DejaVuSans.ttf");
const HIGHLIGHT_COLOR: Rgba<u8> = Rgba([0, 0, 0, 255]);
const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Signed rectangle; may extend past the image before clipping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl Rect {
    pub fn right(&self) -> i64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i64 {
        self.y + self.height
    }
}

/// Pixel bounds `[x0, x1) x [y0, y1)` inside the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBounds {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatermarkLayout {
    pub image_width: u32,
    pub image_height: u32,
    pub font_size: u32,
    pub border_gap: u32,
    pub margin: u32,
    pub text_height: u32,
    pub text_width: u32,
    pub highlight: Rect,
    /// Left end of the text baseline.
    pub baseline: (i64, i64),
}

impl WatermarkLayout {
    pub fn font_size_for(image_height: u32) -> u32 {
        image_height / 10
    }

    pub fn compute(image_width: u32, image_height: u32, text_width: u32) -> Self {
        let font_size = Self::font_size_for(image_height);
        let border_gap = font_size / 20;
        let margin = font_size;
        let text_height = font_size;

        let highlight = Rect {
            x: i64::from(margin) - i64::from(border_gap),
            y: i64::from(image_height) - i64::from(margin + text_height),
            width: i64::from(text_width) + i64::from(border_gap),
            height: i64::from(text_height) + 4 * i64::from(border_gap),
        };

        Self {
            image_width,
            image_height,
            font_size,
            border_gap,
            margin,
            text_height,
            text_width,
            highlight,
            baseline: (
                i64::from(font_size),
                i64::from(image_height) - i64::from(font_size),
            ),
        }
    }

    pub fn clipped_highlight(&self) -> Option<PixelBounds> {
        let clamp = |v: i64, max: u32| v.clamp(0, i64::from(max)) as u32;
        let bounds = PixelBounds {
            x0: clamp(self.highlight.x, self.image_width),
            y0: clamp(self.highlight.y, self.image_height),
            x1: clamp(self.highlight.right(), self.image_width),
            y1: clamp(self.highlight.bottom(), self.image_height),
        };
        (bounds.x0 < bounds.x1 && bounds.y0 < bounds.y1).then_some(bounds)
    }
}

#[derive(Clone)]
pub struct ImageLabeler {
    font: FontRef<'static>,
}

impl ImageLabeler {
    pub fn new() -> Result<Self> {
        Ok(Self {
            font: FontRef::try_from_slice(FONT_BYTES)?,
        })
    }

    /// Pixel scale for an em size given in pixels.
    fn scale_for(&self, font_size: u32) -> PxScale {
        let units_per_em = self.font.units_per_em().unwrap_or(2048.0);
        PxScale::from(font_size as f32 * self.font.height_unscaled() / units_per_em)
    }

    pub fn measure(&self, font_size: u32, text: &str) -> u32 {
        let scaled = self.font.as_scaled(self.scale_for(font_size));
        let mut width = 0.0_f32;
        let mut previous: Option<GlyphId> = None;
        for ch in text.chars() {
            let id = scaled.glyph_id(ch);
            if let Some(prev) = previous {
                width += scaled.kern(prev, id);
            }
            width += scaled.h_advance(id);
            previous = Some(id);
        }
        width.ceil().max(0.0) as u32
    }

    pub fn layout(&self, image_width: u32, image_height: u32) -> WatermarkLayout {
        let font_size = WatermarkLayout::font_size_for(image_height);
        WatermarkLayout::compute(image_width, image_height, self.measure(font_size, LABEL_TEXT))
    }

    /// Labels the image at `path` in place. The original is only replaced once
    /// the labeled copy has been fully written.
    pub fn label(&self, path: &Path) -> Result<()> {
        tracing::debug!(path = %path.display(), "adding label");

        let reader = ImageReader::open(path)
            .and_then(|r| r.with_guessed_format())
            .map_err(|e| EngineError::io(path, e))?;
        let format = reader.format().ok_or_else(|| EngineError::UnsupportedImage {
            path: path.to_path_buf(),
        })?;
        if !format.writing_enabled() {
            return Err(EngineError::UnsupportedImage {
                path: path.to_path_buf(),
            });
        }
        let source = reader.decode().map_err(|source| EngineError::Image {
            path: path.to_path_buf(),
            source,
        })?;

        let (width, height) = (source.width(), source.height());
        let layout = self.layout(width, height);
        if layout.font_size == 0 {
            tracing::debug!(path = %path.display(), height, "image too small to label");
            return Ok(());
        }

        let mut canvas = RgbaImage::from_pixel(width, height, TRANSPARENT);
        image::imageops::replace(&mut canvas, &source.to_rgba8(), 0, 0);

        if let Some(bounds) = layout.clipped_highlight() {
            fill(&mut canvas, bounds, HIGHLIGHT_COLOR);
        }
        self.draw_text(&mut canvas, layout.font_size, layout.baseline, LABEL_TEXT);

        let output = match format {
            ImageFormat::Jpeg => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8()),
            _ => DynamicImage::ImageRgba8(canvas),
        };
        replace_with_encoded(path, &output, format)?;

        tracing::info!(path = %path.display(), "labeled image");
        Ok(())
    }

    fn draw_text(&self, canvas: &mut RgbaImage, font_size: u32, baseline: (i64, i64), text: &str) {
        let scale = self.scale_for(font_size);
        let scaled = self.font.as_scaled(scale);
        let (width, height) = (i64::from(canvas.width()), i64::from(canvas.height()));

        let mut caret = baseline.0 as f32;
        let mut previous: Option<GlyphId> = None;
        for ch in text.chars() {
            let id = scaled.glyph_id(ch);
            if let Some(prev) = previous {
                caret += scaled.kern(prev, id);
            }
            let glyph = id.with_scale_and_position(scale, point(caret, baseline.1 as f32));
            caret += scaled.h_advance(id);
            previous = Some(id);

            let Some(outlined) = self.font.outline_glyph(glyph) else {
                continue;
            };
            let bounds = outlined.px_bounds();
            outlined.draw(|gx, gy, coverage| {
                let x = bounds.min.x as i64 + i64::from(gx);
                let y = bounds.min.y as i64 + i64::from(gy);
                if x < 0 || y < 0 || x >= width || y >= height {
                    return;
                }
                blend_white(canvas.get_pixel_mut(x as u32, y as u32), coverage);
            });
        }
    }
}

fn fill(canvas: &mut RgbaImage, bounds: PixelBounds, color: Rgba<u8>) {
    for y in bounds.y0..bounds.y1 {
        for x in bounds.x0..bounds.x1 {
            canvas.put_pixel(x, y, color);
        }
    }
}

fn blend_white(pixel: &mut Rgba<u8>, coverage: f32) {
    let c = coverage.clamp(0.0, 1.0);
    for channel in pixel.0.iter_mut() {
        *channel = (f32::from(*channel) + (255.0 - f32::from(*channel)) * c).round() as u8;
    }
}

pub(crate) fn temp_sibling(path: &Path) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(".tmp");
    PathBuf::from(raw)
}

fn replace_with_encoded(path: &Path, image: &DynamicImage, format: ImageFormat) -> Result<()> {
    let tmp_path = temp_sibling(path);
    if let Err(err) = encode_to(&tmp_path, image, format) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(err);
    }
    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(EngineError::io(path, e));
    }
    Ok(())
}

fn encode_to(tmp_path: &Path, image: &DynamicImage, format: ImageFormat) -> Result<()> {
    let file = File::create(tmp_path).map_err(|e| EngineError::io(tmp_path, e))?;
    let mut writer = BufWriter::new(file);
    image
        .write_to(&mut writer, format)
        .map_err(|source| EngineError::Image {
            path: tmp_path.to_path_buf(),
            source,
        })?;
    let file = writer
        .into_inner()
        .map_err(|e| EngineError::io(tmp_path, e.into_error()))?;
    file.sync_all().map_err(|e| EngineError::io(tmp_path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use image::{ImageBuffer, Rgb};

    const RED: Rgba<u8> = Rgba([200, 20, 20, 255]);

    fn write_png(path: &Path, width: u32, height: u32) {
        RgbaImage::from_pixel(width, height, RED)
            .save_with_format(path, ImageFormat::Png)
            .expect("save png");
    }

    #[test]
    fn layout_matches_reference_geometry() {
        let layout = WatermarkLayout::compute(800, 600, 300);
        assert_eq!(layout.font_size, 60);
        assert_eq!(layout.border_gap, 3);
        assert_eq!(
            layout.highlight,
            Rect {
                x: 57,
                y: 480,
                width: 303,
                height: 72
            }
        );
        assert_eq!(layout.baseline, (60, 540));
    }

    #[test]
    fn highlight_stays_inside_the_image() {
        let labeler = ImageLabeler::new().expect("font");
        for height in (10..=2_000).step_by(7) {
            let width = height * 3 / 2 + 1;
            let layout = labeler.layout(width, height);
            assert_eq!(layout.font_size, height / 10);
            assert!(layout.highlight.y >= 0, "height {height}");
            assert!(layout.highlight.bottom() <= i64::from(height), "height {height}");
            if layout.text_width < width {
                let bounds = layout.clipped_highlight().expect("visible");
                assert!(bounds.x1 <= width);
                assert!(bounds.y1 <= height);
            }
        }
    }

    #[test]
    fn measured_label_grows_with_font_size() {
        let labeler = ImageLabeler::new().expect("font");
        let small = labeler.measure(10, LABEL_TEXT);
        let large = labeler.measure(60, LABEL_TEXT);
        assert!(small > 0);
        assert!(large > small * 4);
        assert_eq!(labeler.measure(60, ""), 0);
    }

    #[test]
    fn label_draws_highlight_in_bottom_left_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cover.png");
        write_png(&path, 200, 100);

        ImageLabeler::new().expect("font").label(&path).expect("label");

        let labeled = image::open(&path).expect("reopen").to_rgba8();
        assert_eq!(labeled.dimensions(), (200, 100));
        assert_eq!(*labeled.get_pixel(0, 0), RED);
        assert_eq!(*labeled.get_pixel(199, 99), RED);
        assert_ne!(*labeled.get_pixel(10, 80), RED);
        assert!(!temp_sibling(&path).exists());
    }

    #[test]
    fn jpeg_is_reencoded_as_jpeg() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("episode.jpg");
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(160, 120, Rgb([90, 90, 90]));
        img.save_with_format(&path, ImageFormat::Jpeg).expect("save jpeg");

        ImageLabeler::new().expect("font").label(&path).expect("label");

        let format = ImageReader::open(&path)
            .and_then(|r| r.with_guessed_format())
            .expect("open")
            .format();
        assert_eq!(format, Some(ImageFormat::Jpeg));
        assert_eq!(image::open(&path).expect("decode").height(), 120);
    }

    #[test]
    fn relabeling_stacks_and_still_decodes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cover.png");
        write_png(&path, 120, 120);
        let labeler = ImageLabeler::new().expect("font");

        labeler.label(&path).expect("first");
        let once = std::fs::read(&path).expect("read");
        labeler.label(&path).expect("second");

        let twice = std::fs::read(&path).expect("read");
        assert!(image::open(&path).is_ok());
        assert_ne!(twice, once);
    }

    #[test]
    fn tiny_images_are_left_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pixel.png");
        write_png(&path, 40, 9);
        let before = std::fs::read(&path).expect("read");

        ImageLabeler::new().expect("font").label(&path).expect("label");

        assert_eq!(std::fs::read(&path).expect("read"), before);
    }

    #[test]
    fn garbage_is_a_codec_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cover.jpg");
        std::fs::write(&path, b"<html>not an image</html>").expect("write");

        let err = ImageLabeler::new().expect("font").label(&path).expect_err("should fail");
        assert_eq!(err.kind(), ErrorKind::Codec);
    }

    #[test]
    fn truncated_png_fails_to_decode_without_touching_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cover.png");
        write_png(&path, 64, 64);
        let full = std::fs::read(&path).expect("read");
        std::fs::write(&path, &full[..full.len() / 2]).expect("truncate");
        let before = std::fs::read(&path).expect("read");

        let err = ImageLabeler::new().expect("font").label(&path).expect_err("should fail");

        assert!(matches!(err, EngineError::Image { .. }));
        assert_eq!(std::fs::read(&path).expect("read"), before);
    }

    #[test]
    fn failed_temp_write_leaves_original_in_place() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cover.png");
        write_png(&path, 100, 100);
        let before = std::fs::read(&path).expect("read");
        // A directory squatting on the temp path makes the write fail.
        std::fs::create_dir(temp_sibling(&path)).expect("squat");

        let err = ImageLabeler::new().expect("font").label(&path).expect_err("should fail");

        assert_eq!(err.kind(), ErrorKind::Filesystem);
        assert_eq!(std::fs::read(&path).expect("read"), before);
    }

    #[test]
    fn encode_failure_after_temp_creation_keeps_the_original() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cover.ff");
        let img: ImageBuffer<Rgba<u16>, Vec<u16>> =
            ImageBuffer::from_pixel(64, 64, Rgba([9_000, 20_000, 40_000, 65_535]));
        DynamicImage::ImageRgba16(img)
            .save_with_format(&path, ImageFormat::Farbfeld)
            .expect("save farbfeld");
        let before = std::fs::read(&path).expect("read");

        let err = ImageLabeler::new().expect("font").label(&path).expect_err("should fail");

        assert!(matches!(&err, EngineError::Image { path: at, .. } if *at == temp_sibling(&path)));
        assert_eq!(std::fs::read(&path).expect("read"), before);
        assert!(!dir.path().join("cover.ff.tmp").exists());
    }
}
