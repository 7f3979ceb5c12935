//! Pixel extraction and strict raster equality.
//!
//! Images stored with a generic filter (Flate, LZW, ...) in a device color
//! or indexed color space are compared on their stored samples without any
//! color conversion. Everything else (JPEG, JPEG 2000, ...) is decoded
//! through its color space into 8-bit RGB. The path depends only on
//! how the image is stored, so decoding the same image twice always yields
//! byte-identical rasters.

use image::{DynamicImage, ImageFormat, RgbImage};
use lopdf::{Document, Object, ObjectId, Stream};

use crate::error::{Error, Result};
use crate::filters::{decompress_stream, filter_names};
use crate::scanner::image_dimensions;

/// Filters that only compress bytes and leave samples untouched
const BYTE_FILTERS: &[&str] = &[
    "FlateDecode",
    "LZWDecode",
    "ASCIIHexDecode",
    "ASCII85Decode",
    "RunLengthDecode",
];

/// Sample layout of a [`RawRaster`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Samples as stored in the PDF, rows padded to whole bytes
    Stored { components: u8, bits_per_component: u8 },
    /// 8-bit RGB after color space conversion
    Rgb8,
}

/// Decoded pixel buffer used for comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRaster {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    /// How stored samples map to color: base component count followed by the
    /// lookup table for indexed images, empty otherwise
    pub palette: Vec<u8>,
    /// `/Decode` array of stored samples as `f32` bit patterns, empty when absent
    pub decode: Vec<u32>,
}

impl RawRaster {
    /// Pixel-for-pixel identity.
    ///
    /// The same raster object is always equal to itself without looking at the
    /// samples. Otherwise format, width, height and the sample-to-color
    /// mapping must agree before the sample bytes are compared in full.
    pub fn same_pixels(&self, other: &RawRaster) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        self.format == other.format
            && self.width == other.width
            && self.height == other.height
            && self.palette == other.palette
            && self.decode == other.decode
            && self.data == other.data
    }
}

/// Color space facts needed to interpret samples
#[derive(Debug, Clone)]
enum ColorSpace {
    /// Gray, RGB, CMYK and calibrated or ICC variants, by component count
    Device(u8),
    /// Palette lookup into a base space
    Indexed { base_components: u8, lookup: Vec<u8> },
    Unsupported(String),
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        _ => Some(obj),
    }
}

fn name_components(name: &[u8]) -> Option<u8> {
    match name {
        b"DeviceGray" | b"CalGray" | b"G" => Some(1),
        b"DeviceRGB" | b"CalRGB" | b"RGB" => Some(3),
        b"DeviceCMYK" | b"CMYK" => Some(4),
        _ => None,
    }
}

fn parse_color_space(doc: &Document, obj: &Object) -> ColorSpace {
    match resolve(doc, obj) {
        Some(Object::Name(name)) => match name_components(name) {
            Some(n) => ColorSpace::Device(n),
            None => ColorSpace::Unsupported(String::from_utf8_lossy(name).to_string()),
        },
        Some(Object::Array(arr)) => {
            let family = match arr.first() {
                Some(Object::Name(n)) => n.as_slice(),
                _ => return ColorSpace::Unsupported("malformed array".to_string()),
            };
            match family {
                b"ICCBased" => {
                    let n = arr
                        .get(1)
                        .and_then(|o| resolve(doc, o))
                        .and_then(|o| match o {
                            Object::Stream(s) => s.dict.get(b"N").and_then(Object::as_i64).ok(),
                            _ => None,
                        });
                    match n {
                        Some(n @ (1 | 3 | 4)) => ColorSpace::Device(n as u8),
                        _ => ColorSpace::Unsupported("ICCBased without /N".to_string()),
                    }
                }
                b"CalGray" | b"CalRGB" | b"DeviceGray" | b"DeviceRGB" | b"DeviceCMYK" => {
                    ColorSpace::Device(name_components(family).unwrap_or(3))
                }
                b"Indexed" | b"I" => {
                    let base = match arr.get(1).map(|b| parse_color_space(doc, b)) {
                        Some(ColorSpace::Device(n)) => n,
                        _ => return ColorSpace::Unsupported("Indexed with unsupported base".to_string()),
                    };
                    let lookup = match arr.get(3).and_then(|o| resolve(doc, o)) {
                        Some(Object::String(bytes, _)) => bytes.clone(),
                        Some(Object::Stream(s)) => match decompress_stream(s) {
                            Ok(bytes) => bytes,
                            Err(e) => return ColorSpace::Unsupported(e),
                        },
                        _ => return ColorSpace::Unsupported("Indexed without lookup".to_string()),
                    };
                    ColorSpace::Indexed {
                        base_components: base,
                        lookup,
                    }
                }
                other => ColorSpace::Unsupported(String::from_utf8_lossy(other).to_string()),
            }
        }
        _ => ColorSpace::Unsupported("missing".to_string()),
    }
}

fn bits_per_component(stream: &Stream) -> u8 {
    if matches!(stream.dict.get(b"ImageMask"), Ok(Object::Boolean(true))) {
        return 1;
    }
    match stream.dict.get(b"BitsPerComponent").and_then(Object::as_i64) {
        Ok(b @ (1 | 2 | 4 | 8 | 16)) => b as u8,
        _ => 8,
    }
}

fn image_stream(doc: &Document, image: ObjectId) -> Result<&Stream> {
    match doc.get_object(image)? {
        Object::Stream(s) => Ok(s),
        _ => Err(Error::Decode(format!("object {:?} is not a stream", image))),
    }
}

fn image_color_space(doc: &Document, stream: &Stream) -> ColorSpace {
    if matches!(stream.dict.get(b"ImageMask"), Ok(Object::Boolean(true))) {
        return ColorSpace::Device(1);
    }
    match stream.dict.get(b"ColorSpace") {
        Ok(cs) => parse_color_space(doc, cs),
        Err(_) => ColorSpace::Unsupported("missing".to_string()),
    }
}

/// Decode an image XObject into a comparison raster
pub fn extract_raster(doc: &Document, image: ObjectId) -> Result<RawRaster> {
    let stream = image_stream(doc, image)?;
    let (width, height) = image_dimensions(&stream.dict);
    if width == 0 || height == 0 {
        return Err(Error::Decode(format!("image {:?} has no dimensions", image)));
    }

    let filters = filter_names(stream);
    let byte_filters_only = filters.iter().all(|f| BYTE_FILTERS.contains(&f.as_str()));
    let color_space = image_color_space(doc, stream);

    let (components, palette) = match color_space {
        ColorSpace::Device(n) => (Some(n), Vec::new()),
        ColorSpace::Indexed {
            base_components,
            lookup,
        } => {
            let mut palette = Vec::with_capacity(lookup.len() + 1);
            palette.push(base_components);
            palette.extend_from_slice(&lookup);
            (Some(1), palette)
        }
        ColorSpace::Unsupported(_) => (None, Vec::new()),
    };

    match components {
        Some(components) if byte_filters_only => {
            let mut raster = stored_samples(stream, width, height, components, bits_per_component(stream))?;
            raster.palette = palette;
            raster.decode = decode_array(stream);
            Ok(raster)
        }
        _ => {
            let rgb = decode_image(doc, stream)?.to_rgb8();
            Ok(RawRaster {
                format: PixelFormat::Rgb8,
                width: rgb.width(),
                height: rgb.height(),
                data: rgb.into_raw(),
                palette: Vec::new(),
                decode: Vec::new(),
            })
        }
    }
}

fn decode_array(stream: &Stream) -> Vec<u32> {
    match stream.dict.get(b"Decode").and_then(Object::as_array) {
        Ok(values) => values
            .iter()
            .map(|v| v.as_float().map(f32::to_bits).unwrap_or(u32::MAX))
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn stored_samples(stream: &Stream, width: u32, height: u32, components: u8, bits: u8) -> Result<RawRaster> {
    let data = decompress_stream(stream).map_err(Error::Decode)?;
    let row_bytes = (width as usize * components as usize * bits as usize).div_ceil(8);
    let expected = row_bytes * height as usize;
    if data.len() < expected {
        return Err(Error::Decode(format!(
            "sample data too short: got {} bytes, expected {}",
            data.len(),
            expected
        )));
    }
    Ok(RawRaster {
        format: PixelFormat::Stored {
            components,
            bits_per_component: bits,
        },
        width,
        height,
        data: data[..expected].to_vec(),
        palette: Vec::new(),
        decode: Vec::new(),
    })
}

/// Decode a PDF image stream into an 8-bit image, converting through its color space
pub(crate) fn decode_image(doc: &Document, stream: &Stream) -> Result<DynamicImage> {
    let (width, height) = image_dimensions(&stream.dict);
    let filters = filter_names(stream);

    match filters.last().map(String::as_str) {
        Some("DCTDecode") => {
            let data = strip_leading_filters(stream, &filters)?;
            return image::load_from_memory_with_format(&data, ImageFormat::Jpeg)
                .map_err(|e| Error::Decode(format!("JPEG: {}", e)));
        }
        Some("JPXDecode") => {
            let data = strip_leading_filters(stream, &filters)?;
            return image::load_from_memory(&data)
                .map_err(|e| Error::Decode(format!("JPEG2000: {}", e)));
        }
        Some(f) if !BYTE_FILTERS.contains(&f) => {
            return Err(Error::Decode(format!("Unsupported filter: {}", f)));
        }
        _ => {}
    }

    let bits = bits_per_component(stream);
    if bits != 8 {
        return Err(Error::Decode(format!("Unsupported bits per component: {}", bits)));
    }

    let data = decompress_stream(stream).map_err(Error::Decode)?;
    let pixels = width as usize * height as usize;

    let rgb_from = |rgb: Vec<u8>| -> Result<DynamicImage> {
        RgbImage::from_raw(width, height, rgb)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| Error::Decode("Failed to create RGB image from raw data".to_string()))
    };
    let need = |len: usize| -> Result<()> {
        if data.len() < len {
            Err(Error::Decode(format!(
                "sample data too short: got {} bytes, expected {}",
                data.len(),
                len
            )))
        } else {
            Ok(())
        }
    };

    match image_color_space(doc, stream) {
        ColorSpace::Device(1) => {
            need(pixels)?;
            image::GrayImage::from_raw(width, height, data[..pixels].to_vec())
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(|| Error::Decode("Failed to create grayscale image from raw data".to_string()))
        }
        ColorSpace::Device(3) => {
            need(pixels * 3)?;
            rgb_from(data[..pixels * 3].to_vec())
        }
        ColorSpace::Device(4) => {
            need(pixels * 4)?;
            let mut rgb_data = Vec::with_capacity(pixels * 3);
            for chunk in data[..pixels * 4].chunks(4) {
                rgb_data.extend_from_slice(&cmyk_to_rgb(chunk));
            }
            rgb_from(rgb_data)
        }
        ColorSpace::Indexed {
            base_components,
            lookup,
        } => {
            need(pixels)?;
            let stride = base_components as usize;
            let mut rgb_data = Vec::with_capacity(pixels * 3);
            for &index in &data[..pixels] {
                let start = index as usize * stride;
                let entry = lookup
                    .get(start..start + stride)
                    .ok_or_else(|| Error::Decode(format!("palette index {} out of range", index)))?;
                match base_components {
                    1 => rgb_data.extend_from_slice(&[entry[0], entry[0], entry[0]]),
                    3 => rgb_data.extend_from_slice(entry),
                    _ => rgb_data.extend_from_slice(&cmyk_to_rgb(entry)),
                }
            }
            rgb_from(rgb_data)
        }
        ColorSpace::Device(n) => Err(Error::Decode(format!("Unsupported component count: {}", n))),
        ColorSpace::Unsupported(name) => Err(Error::Decode(format!("Unsupported color space: {}", name))),
    }
}

/// Apply byte filters that precede an image codec in the filter chain
fn strip_leading_filters(stream: &Stream, filters: &[String]) -> Result<Vec<u8>> {
    if filters.len() <= 1 {
        return Ok(stream.content.clone());
    }
    let mut inner = stream.clone();
    let leading: Vec<Object> = filters[..filters.len() - 1]
        .iter()
        .map(|f| Object::Name(f.as_bytes().to_vec()))
        .collect();
    inner.dict.set("Filter", Object::Array(leading));
    decompress_stream(&inner).map_err(Error::Decode)
}

fn cmyk_to_rgb(chunk: &[u8]) -> [u8; 3] {
    let c = chunk[0] as f32 / 255.0;
    let m = chunk[1] as f32 / 255.0;
    let y = chunk[2] as f32 / 255.0;
    let k = chunk[3] as f32 / 255.0;

    [
        ((1.0 - c) * (1.0 - k) * 255.0) as u8,
        ((1.0 - m) * (1.0 - k) * 255.0) as u8,
        ((1.0 - y) * (1.0 - k) * 255.0) as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::PdfBuilder;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use lopdf::dictionary;
    use std::io::Write;

    fn raster(format: PixelFormat, width: u32, height: u32, data: Vec<u8>) -> RawRaster {
        RawRaster {
            format,
            width,
            height,
            data,
            palette: Vec::new(),
            decode: Vec::new(),
        }
    }

    const RGB: PixelFormat = PixelFormat::Stored {
        components: 3,
        bits_per_component: 8,
    };

    #[test]
    fn test_equality_is_reflexive_and_symmetric() {
        let a = raster(RGB, 2, 1, vec![1, 2, 3, 4, 5, 6]);
        let b = a.clone();
        assert!(a.same_pixels(&a));
        assert!(a.same_pixels(&b));
        assert!(b.same_pixels(&a));
    }

    #[test]
    fn test_shape_mismatch_is_never_equal() {
        let data = vec![0u8; 12];
        let base = raster(RGB, 2, 2, data.clone());
        let wide = raster(RGB, 4, 1, data.clone());
        let gray = raster(
            PixelFormat::Stored {
                components: 1,
                bits_per_component: 8,
            },
            2,
            2,
            data.clone(),
        );
        let converted = raster(PixelFormat::Rgb8, 2, 2, data);
        assert!(!base.same_pixels(&wide));
        assert!(!base.same_pixels(&gray));
        assert!(!base.same_pixels(&converted));
        assert!(!converted.same_pixels(&base));
    }

    #[test]
    fn test_single_byte_difference_breaks_equality() {
        let a = raster(RGB, 2, 1, vec![1, 2, 3, 4, 5, 6]);
        let b = raster(RGB, 2, 1, vec![1, 2, 3, 4, 5, 7]);
        assert!(!a.same_pixels(&b));
    }

    #[test]
    fn test_stored_rgb_keeps_samples() {
        let mut pdf = PdfBuilder::new();
        let id = pdf.rgb_image(2, 2, [10, 20, 30]);
        let doc = pdf.finish();

        let r = extract_raster(&doc, id).unwrap();
        assert_eq!(r.format, RGB);
        assert_eq!((r.width, r.height), (2, 2));
        assert_eq!(&r.data[..3], &[10, 20, 30]);
        assert_eq!(r.data.len(), 12);
    }

    #[test]
    fn test_flate_and_plain_copies_compare_equal() {
        let samples: Vec<u8> = (0..48).collect();
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(&samples).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut pdf = PdfBuilder::new();
        let plain = pdf.image_with_data(4, 4, "DeviceRGB", samples);
        let mut doc = pdf.finish();
        let flate = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 4,
                "Height" => 4,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "FlateDecode",
            },
            compressed,
        ));

        let a = extract_raster(&doc, plain).unwrap();
        let b = extract_raster(&doc, flate).unwrap();
        assert!(a.same_pixels(&b));
        assert_eq!(a, extract_raster(&doc, plain).unwrap());
    }

    #[test]
    fn test_short_sample_data_is_a_decode_error() {
        let mut pdf = PdfBuilder::new();
        let id = pdf.image_with_data(10, 10, "DeviceRGB", vec![0; 5]);
        let doc = pdf.finish();

        assert!(matches!(extract_raster(&doc, id), Err(Error::Decode(_))));
    }

    #[test]
    fn test_unknown_color_space_with_generic_filter_is_a_decode_error() {
        let mut pdf = PdfBuilder::new();
        let id = pdf.image(2, 2, "Lab", &[1, 2, 3]);
        let doc = pdf.finish();

        assert!(matches!(extract_raster(&doc, id), Err(Error::Decode(_))));
    }

    #[test]
    fn test_corrupt_jpeg_is_a_decode_error() {
        let mut doc = PdfBuilder::new().finish();
        let id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 8,
                "Height" => 8,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            b"not a jpeg".to_vec(),
        ));

        assert!(matches!(extract_raster(&doc, id), Err(Error::Decode(_))));
    }

    #[test]
    fn test_jpeg_images_are_converted_to_rgb() {
        let mut jpeg = Vec::new();
        let encoder = jpeg_encoder::Encoder::new(&mut jpeg, 90);
        encoder
            .encode(&[128u8; 8 * 8 * 3], 8, 8, jpeg_encoder::ColorType::Rgb)
            .unwrap();

        let mut doc = PdfBuilder::new().finish();
        let id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 8,
                "Height" => 8,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            jpeg,
        ));

        let a = extract_raster(&doc, id).unwrap();
        let b = extract_raster(&doc, id).unwrap();
        assert_eq!(a.format, PixelFormat::Rgb8);
        assert_eq!(a.data.len(), 8 * 8 * 3);
        assert!(a.same_pixels(&b));
    }

    fn indexed_image(doc: &mut Document, palette: Vec<u8>, decode: Option<Vec<Object>>) -> ObjectId {
        let mut dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => 2,
            "Height" => 1,
            "ColorSpace" => vec![
                "Indexed".into(),
                "DeviceRGB".into(),
                1.into(),
                Object::string_literal(palette),
            ],
            "BitsPerComponent" => 8,
        };
        if let Some(decode) = decode {
            dict.set("Decode", decode);
        }
        doc.add_object(Stream::new(dict, vec![0, 1]))
    }

    #[test]
    fn test_same_indices_with_different_palettes_differ() {
        let mut doc = PdfBuilder::new().finish();
        let warm = indexed_image(&mut doc, vec![255, 0, 0, 0, 255, 0], None);
        let cool = indexed_image(&mut doc, vec![0, 0, 255, 255, 255, 255], None);
        let warm_again = indexed_image(&mut doc, vec![255, 0, 0, 0, 255, 0], None);

        let a = extract_raster(&doc, warm).unwrap();
        let b = extract_raster(&doc, cool).unwrap();
        let c = extract_raster(&doc, warm_again).unwrap();
        assert_eq!(a.data, b.data);
        assert!(!a.same_pixels(&b));
        assert!(a.same_pixels(&c));
    }

    #[test]
    fn test_decode_array_takes_part_in_equality() {
        let mut doc = PdfBuilder::new().finish();
        let palette = vec![255, 0, 0, 0, 255, 0];
        let plain = indexed_image(&mut doc, palette.clone(), None);
        let flipped = indexed_image(&mut doc, palette, Some(vec![1.into(), 0.into()]));

        let a = extract_raster(&doc, plain).unwrap();
        let b = extract_raster(&doc, flipped).unwrap();
        assert_eq!(b.decode.len(), 2);
        assert!(!a.same_pixels(&b));
    }

    #[test]
    fn test_indexed_image_decodes_through_palette() {
        let mut doc = PdfBuilder::new().finish();
        let id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 2,
                "Height" => 1,
                "ColorSpace" => vec![
                    "Indexed".into(),
                    "DeviceRGB".into(),
                    1.into(),
                    Object::string_literal(vec![255u8, 0, 0, 0, 0, 255]),
                ],
                "BitsPerComponent" => 8,
            },
            vec![1, 0],
        ));

        let stream = image_stream(&doc, id).unwrap();
        let rgb = decode_image(&doc, stream).unwrap().to_rgb8();
        assert_eq!(rgb.into_raw(), vec![0, 0, 255, 255, 0, 0]);

        // comparison keeps palette indices
        let r = extract_raster(&doc, id).unwrap();
        assert_eq!(r.data, vec![1, 0]);
    }
}
