//! Image normalization transformer
//!
//! Decodes the source image (rasterizing SVG first), flattens transparency
//! onto a white background so dark-themed clients can read it, downscales
//! oversized images preserving aspect ratio, and re-encodes. Re-encoding
//! drops all embedded metadata. Output is binary, so no footer is appended.

use async_trait::async_trait;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageOutputFormat};
use std::io::Cursor;

use crate::config::ImageConfig;
use crate::error::TransformError;
use crate::source::{Body, Request, SourceResponse};

use super::Transformer;

pub struct ImageTransformer {
    config: ImageConfig,
}

impl ImageTransformer {
    pub fn new(config: ImageConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transformer for ImageTransformer {
    fn can_transform(&self, mime_type: &str) -> bool {
        mime_type.starts_with("image/")
    }

    async fn transform(
        &self,
        _request: &Request,
        mut response: SourceResponse,
    ) -> Result<SourceResponse, TransformError> {
        let body = response
            .body
            .take()
            .ok_or_else(|| TransformError::Decode("response has no body".to_string()))?;
        let bytes = body.into_bytes().await?;

        let is_svg = response.meta.starts_with("image/svg");
        let (data, mime_type) = convert_image(&bytes, is_svg, &self.config)?;

        response.meta = mime_type;
        response.body = Some(Body::Bytes(data));
        Ok(response)
    }
}

fn convert_image(
    bytes: &[u8],
    is_svg: bool,
    config: &ImageConfig,
) -> Result<(Vec<u8>, String), TransformError> {
    // vector input becomes raster before anything else
    let raster: Vec<u8>;
    let (bytes, source_format) = if is_svg {
        raster = rasterize_svg(bytes)?;
        (raster.as_slice(), Some(ImageFormat::Png))
    } else {
        (bytes, image::guess_format(bytes).ok())
    };

    let mut img = image::load_from_memory(bytes)
        .map_err(|e| TransformError::Decode(format!("unable to decode image: {}", e)))?;

    // white background for transparent images, so clients with a dark
    // theme can still read them
    if img.color().has_alpha() {
        img = flatten_onto_white(&img);
    }

    let max = config.max_dimension;
    if img.width() > max || img.height() > max {
        img = img.resize(max, max, FilterType::Lanczos3);
    }

    // keep widely-supported formats, re-encode everything else as JPEG
    let target = match source_format {
        Some(ImageFormat::Png) => ImageFormat::Png,
        Some(ImageFormat::Jpeg) => ImageFormat::Jpeg,
        Some(ImageFormat::Gif) => ImageFormat::Gif,
        _ => ImageFormat::Jpeg,
    };

    let (output_format, mime_type) = match target {
        ImageFormat::Png => (ImageOutputFormat::Png, "image/png"),
        ImageFormat::Gif => (ImageOutputFormat::Gif, "image/gif"),
        _ => (
            ImageOutputFormat::Jpeg(config.jpeg_quality),
            "image/jpeg",
        ),
    };

    // JPEG has no alpha; everything was flattened above, but normalize the
    // color type so the encoder cannot reject it
    if matches!(output_format, ImageOutputFormat::Jpeg(_)) {
        img = DynamicImage::ImageRgb8(img.to_rgb8());
    }

    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, output_format)
        .map_err(|e| TransformError::Decode(format!("unable to encode image: {}", e)))?;

    Ok((out.into_inner(), mime_type.to_string()))
}

/// Composite an image with an alpha channel onto a white background
fn flatten_onto_white(img: &DynamicImage) -> DynamicImage {
    let rgba = img.to_rgba8();
    let flattened = image::RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let p = rgba.get_pixel(x, y);
        let a = p[3] as u32;
        let blend = |c: u8| -> u8 { ((c as u32 * a + 255 * (255 - a)) / 255) as u8 };
        image::Rgb([blend(p[0]), blend(p[1]), blend(p[2])])
    });
    DynamicImage::ImageRgb8(flattened)
}

/// Render an SVG to PNG bytes at its intrinsic size
fn rasterize_svg(bytes: &[u8]) -> Result<Vec<u8>, TransformError> {
    let options = resvg::usvg::Options::default();
    let tree = resvg::usvg::Tree::from_data(bytes, &options)
        .map_err(|e| TransformError::Decode(format!("unable to parse SVG: {}", e)))?;

    let size = tree.size().to_int_size();
    let mut pixmap = resvg::tiny_skia::Pixmap::new(size.width(), size.height())
        .ok_or_else(|| TransformError::Decode("SVG has no renderable area".to_string()))?;
    resvg::render(
        &tree,
        resvg::tiny_skia::Transform::default(),
        &mut pixmap.as_mut(),
    );

    pixmap
        .encode_png()
        .map_err(|e| TransformError::Decode(format!("unable to rasterize SVG: {}", e)))
}
