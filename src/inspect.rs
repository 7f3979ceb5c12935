//! Listing and exporting the images painted on pages

use image::{DynamicImage, ImageFormat, RgbaImage};
use lopdf::{Document, Object, ObjectId, Stream};
use std::io::Cursor;
use tracing::warn;

use crate::error::{Error, Result};
use crate::filters::filter_names;
use crate::raster::{decode_image, extract_raster, PixelFormat};
use crate::scanner::{page_ids, FoundImage, ImageScanner};

/// Information about one image painted on a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// Resource name the page paints it under
    pub name: String,
    pub object_id: ObjectId,
    pub width: u32,
    pub height: u32,
    pub color_space: String,
    pub bits_per_component: u32,
    /// First filter in the chain, or "raw"
    pub filter: String,
    /// Encoded stream size
    pub size_bytes: usize,
    pub has_smask: bool,
}

/// Images grouped by page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImages {
    pub page_number: u32,
    pub images: Vec<PageImage>,
}

fn color_space_name(obj: &Object, doc: &Document) -> String {
    match obj {
        Object::Name(name) => String::from_utf8_lossy(name).to_string(),
        Object::Array(arr) => match arr.first() {
            Some(Object::Name(name)) => String::from_utf8_lossy(name).to_string(),
            _ => "Unknown".to_string(),
        },
        Object::Reference(id) => match doc.get_object(*id) {
            Ok(resolved) => color_space_name(resolved, doc),
            Err(_) => "Unknown".to_string(),
        },
        _ => "Unknown".to_string(),
    }
}

fn describe(doc: &Document, found: &FoundImage) -> PageImage {
    let stream = doc.get_object(found.image).and_then(Object::as_stream).ok();

    let color_space = stream
        .and_then(|s| s.dict.get(b"ColorSpace").ok())
        .map(|cs| color_space_name(cs, doc))
        .unwrap_or_else(|| "Unknown".to_string());
    let bits_per_component = stream
        .and_then(|s| s.dict.get(b"BitsPerComponent").and_then(Object::as_i64).ok())
        .map(|b| b as u32)
        .unwrap_or(8);
    let filter = stream
        .and_then(|s| filter_names(s).into_iter().next())
        .unwrap_or_else(|| "raw".to_string());

    PageImage {
        name: found.name.clone(),
        object_id: found.image,
        width: found.width,
        height: found.height,
        color_space,
        bits_per_component,
        filter,
        size_bytes: stream.map(|s| s.content.len()).unwrap_or(0),
        has_smask: stream.is_some_and(|s| s.dict.has(b"SMask")),
    }
}

/// Images painted on a page, sorted by resource name
pub fn list_page_images(doc: &Document, page: u32) -> Result<Vec<PageImage>> {
    let found = ImageScanner::new().scan(doc, page)?;
    let mut images: Vec<PageImage> = found.iter().map(|f| describe(doc, f)).collect();
    images.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(images)
}

/// Images of every page in page order. Pages that cannot be scanned are
/// logged and left out.
pub fn list_document_images(doc: &Document) -> Vec<PageImages> {
    let mut scanner = ImageScanner::new();
    let mut result = Vec::new();

    for (page_number, page_id) in page_ids(doc) {
        match scanner.scan_page(doc, page_number, page_id) {
            Ok(found) => {
                let mut images: Vec<PageImage> = found.iter().map(|f| describe(doc, f)).collect();
                images.sort_by(|a, b| a.name.cmp(&b.name));
                result.push(PageImages { page_number, images });
            }
            Err(error) => warn!(page = page_number, %error, "page skipped while listing images"),
        }
    }
    result
}

/// Soft mask samples as one 8-bit alpha value per pixel
fn smask_alpha(doc: &Document, smask: ObjectId, width: u32, height: u32) -> Result<Vec<u8>> {
    let raster = extract_raster(doc, smask)?;
    let expected = (width * height) as usize;
    match raster.format {
        PixelFormat::Stored {
            components: 1,
            bits_per_component: 8,
        } if raster.width == width && raster.height == height => Ok(raster.data[..expected].to_vec()),
        _ => Err(Error::Decode(format!(
            "SMask {:?} does not match the {}x{} image",
            smask, width, height
        ))),
    }
}

fn with_alpha(img: DynamicImage, alpha: &[u8]) -> DynamicImage {
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();
    let mut rgba_data = Vec::with_capacity((width * height * 4) as usize);
    for (pixel, a) in rgb.pixels().zip(alpha) {
        rgba_data.extend_from_slice(&[pixel[0], pixel[1], pixel[2], *a]);
    }
    match RgbaImage::from_raw(width, height, rgba_data) {
        Some(rgba) => DynamicImage::ImageRgba8(rgba),
        None => DynamicImage::ImageRgb8(rgb),
    }
}

fn image_stream(doc: &Document, id: ObjectId) -> Result<&Stream> {
    match doc.get_object(id) {
        Ok(Object::Stream(stream)) => Ok(stream),
        Ok(_) => Err(Error::ImageNotFound(format!("object {} {} is not an image stream", id.0, id.1))),
        Err(_) => Err(Error::ImageNotFound(format!("object {} {}", id.0, id.1))),
    }
}

/// Decode an image XObject and encode it as PNG, applying its soft mask if any
pub fn extract_image_png(doc: &Document, id: ObjectId) -> Result<Vec<u8>> {
    let stream = image_stream(doc, id)?;
    let img = decode_image(doc, stream)?;

    let img = match stream.dict.get(b"SMask").and_then(Object::as_reference) {
        Ok(smask) => match smask_alpha(doc, smask, img.width(), img.height()) {
            Ok(alpha) => with_alpha(img, &alpha),
            Err(error) => {
                warn!(image = ?id, %error, "ignoring unreadable soft mask");
                img
            }
        },
        Err(_) => img,
    };

    let mut png_bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)
        .map_err(|e| Error::Encode(format!("Failed to encode PNG: {}", e)))?;
    Ok(png_bytes)
}
