//! Building replacement image XObjects

use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::{DynamicImage, RgbaImage};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::io::Write;

use crate::error::{Error, Result};

/// How replacement images are stored in the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplacementEncoding {
    /// Flate-compressed RGB, alpha in a Flate-compressed SMask
    #[default]
    Lossless,
    /// DCT (JPEG) for the color samples; alpha stays lossless
    Jpeg { quality: u8 },
}

/// Image XObject plus its optional soft mask, not yet added to a document
#[derive(Debug, Clone)]
pub(crate) struct EncodedImage {
    image: Stream,
    smask: Option<Stream>,
}

impl EncodedImage {
    /// Add the streams to the document and return the image object id
    pub(crate) fn add_to(self, doc: &mut Document) -> ObjectId {
        let EncodedImage { mut image, smask } = self;
        if let Some(smask) = smask {
            let smask_id = doc.add_object(Object::Stream(smask));
            image.dict.set("SMask", Object::Reference(smask_id));
        }
        doc.add_object(Object::Stream(image))
    }
}

/// Fully transparent image used to hide a picture
pub(crate) fn transparent_placeholder(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgba8(RgbaImage::new(width.max(1), height.max(1)))
}

fn image_dict(width: u32, height: u32, color_space: &str, filter: &str, length: usize) -> Dictionary {
    let mut dict = Dictionary::new();
    dict.set("Type", Object::Name(b"XObject".to_vec()));
    dict.set("Subtype", Object::Name(b"Image".to_vec()));
    dict.set("Width", Object::Integer(width as i64));
    dict.set("Height", Object::Integer(height as i64));
    dict.set("ColorSpace", Object::Name(color_space.as_bytes().to_vec()));
    dict.set("BitsPerComponent", Object::Integer(8));
    dict.set("Filter", Object::Name(filter.as_bytes().to_vec()));
    dict.set("Length", Object::Integer(length as i64));
    dict
}

fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder
        .write_all(data)
        .map_err(|e| Error::Encode(format!("Failed to compress samples: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| Error::Encode(format!("Failed to finish compression: {}", e)))
}

fn flate_stream(data: &[u8], width: u32, height: u32, color_space: &str) -> Result<Stream> {
    let compressed = deflate(data)?;
    let dict = image_dict(width, height, color_space, "FlateDecode", compressed.len());
    Ok(Stream::new(dict, compressed))
}

fn jpeg_stream(rgb: &[u8], width: u32, height: u32, quality: u8) -> Result<Stream> {
    if width > u16::MAX as u32 || height > u16::MAX as u32 {
        return Err(Error::Encode(format!("{}x{} is too large for JPEG", width, height)));
    }

    let mut jpeg_bytes = Vec::new();
    let mut encoder = jpeg_encoder::Encoder::new(&mut jpeg_bytes, quality);
    encoder.set_sampling_factor(jpeg_encoder::SamplingFactor::R_4_2_0);
    encoder
        .encode(rgb, width as u16, height as u16, jpeg_encoder::ColorType::Rgb)
        .map_err(|e| Error::Encode(format!("Failed to encode JPEG: {}", e)))?;

    let dict = image_dict(width, height, "DeviceRGB", "DCTDecode", jpeg_bytes.len());
    Ok(Stream::new(dict, jpeg_bytes))
}

/// Check whether any pixel is not fully opaque
fn has_alpha(img: &DynamicImage) -> bool {
    match img {
        DynamicImage::ImageRgba8(rgba) => rgba.pixels().any(|p| p.0[3] < 255),
        DynamicImage::ImageLumaA8(la) => la.pixels().any(|p| p.0[1] < 255),
        other if other.color().has_alpha() => other.to_rgba8().pixels().any(|p| p.0[3] < 255),
        _ => false,
    }
}

/// Encode a raster into image XObject streams
pub(crate) fn encode_image(img: &DynamicImage, encoding: ReplacementEncoding) -> Result<EncodedImage> {
    let (width, height) = (img.width(), img.height());

    if !has_alpha(img) {
        let rgb = img.to_rgb8();
        let image = match encoding {
            ReplacementEncoding::Lossless => flate_stream(rgb.as_raw(), width, height, "DeviceRGB")?,
            ReplacementEncoding::Jpeg { quality } => jpeg_stream(rgb.as_raw(), width, height, quality)?,
        };
        return Ok(EncodedImage { image, smask: None });
    }

    let raw_data = img.to_rgba8().into_raw();

    // Separate RGB and Alpha channels
    let mut rgb_data = Vec::with_capacity((width * height * 3) as usize);
    let mut alpha_data = Vec::with_capacity((width * height) as usize);
    for chunk in raw_data.chunks(4) {
        rgb_data.extend_from_slice(&chunk[..3]);
        alpha_data.push(chunk[3]);
    }

    let image = match encoding {
        ReplacementEncoding::Lossless => flate_stream(&rgb_data, width, height, "DeviceRGB")?,
        ReplacementEncoding::Jpeg { quality } => jpeg_stream(&rgb_data, width, height, quality)?,
    };
    let smask = flate_stream(&alpha_data, width, height, "DeviceGray")?;

    Ok(EncodedImage {
        image,
        smask: Some(smask),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::extract_raster;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_placeholder_is_fully_transparent() {
        let img = transparent_placeholder(3, 2);
        assert_eq!((img.width(), img.height()), (3, 2));
        assert!(img.to_rgba8().pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn test_hidden_image_gets_zero_alpha_smask() {
        let mut doc = Document::with_version("1.5");
        let encoded = encode_image(&transparent_placeholder(4, 4), ReplacementEncoding::Lossless).unwrap();
        let id = encoded.add_to(&mut doc);

        let stream = doc.get_object(id).unwrap().as_stream().unwrap();
        let smask_id = stream.dict.get(b"SMask").unwrap().as_reference().unwrap();
        let alpha = extract_raster(&doc, smask_id).unwrap();
        assert_eq!((alpha.width, alpha.height), (4, 4));
        assert!(alpha.data.iter().all(|&a| a == 0));
    }

    #[test]
    fn test_opaque_lossless_image_round_trips_samples() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([10, 20, 30])));
        let mut doc = Document::with_version("1.5");
        let id = encode_image(&img, ReplacementEncoding::Lossless)
            .unwrap()
            .add_to(&mut doc);

        let stream = doc.get_object(id).unwrap().as_stream().unwrap();
        assert!(stream.dict.get(b"SMask").is_err());
        let raster = extract_raster(&doc, id).unwrap();
        assert_eq!(raster.data, [10u8, 20, 30].repeat(4));
    }

    #[test]
    fn test_opaque_jpeg_image_uses_dct() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb([200, 100, 50])));
        let encoded = encode_image(&img, ReplacementEncoding::Jpeg { quality: 80 }).unwrap();
        assert_eq!(
            encoded.image.dict.get(b"Filter").unwrap().as_name().unwrap(),
            b"DCTDecode"
        );
        assert!(encoded.smask.is_none());
    }
}
