//! Stream filter decoding shared by the scanner and the pixel extractor

use flate2::read::ZlibDecoder;
use lopdf::{Object, Stream};
use std::io::Read;

/// Filter names of a stream, in application order
pub(crate) fn filter_names(stream: &Stream) -> Vec<String> {
    match stream.dict.get(b"Filter") {
        Ok(Object::Name(n)) => vec![String::from_utf8_lossy(n).to_string()],
        Ok(Object::Array(arr)) => arr
            .iter()
            .filter_map(|f| match f {
                Object::Name(n) => Some(String::from_utf8_lossy(n).to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Decompress a stream's content.
///
/// Flate is inflated directly; any other filter chain goes through lopdf.
/// Image codecs (DCT, JPX, CCITT, JBIG2) are not handled here.
pub(crate) fn decompress_stream(stream: &Stream) -> Result<Vec<u8>, String> {
    let filters = filter_names(stream);

    if filters.is_empty() {
        return Ok(stream.content.clone());
    }

    if filters.len() == 1 && filters[0] == "FlateDecode" && !has_predictor(stream) {
        let mut decoder = ZlibDecoder::new(&stream.content[..]);
        let mut decoded = Vec::new();
        decoder
            .read_to_end(&mut decoded)
            .map_err(|e| format!("FlateDecode failed: {}", e))?;
        return Ok(decoded);
    }

    stream
        .decompressed_content()
        .map_err(|e| format!("Failed to decode {:?}: {}", filters, e))
}

/// Flate with a PNG/TIFF predictor needs lopdf's predictor handling
fn has_predictor(stream: &Stream) -> bool {
    let parms = match stream.dict.get(b"DecodeParms") {
        Ok(Object::Dictionary(d)) => d,
        Ok(Object::Array(arr)) => match arr.first() {
            Some(Object::Dictionary(d)) => d,
            _ => return false,
        },
        _ => return false,
    };
    matches!(parms.get(b"Predictor"), Ok(Object::Integer(p)) if *p > 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use lopdf::dictionary;
    use std::io::Write;

    #[test]
    fn test_unfiltered_stream_is_returned_as_is() {
        let stream = Stream::new(dictionary! {}, b"q Q".to_vec());
        assert_eq!(decompress_stream(&stream).unwrap(), b"q Q");
    }

    #[test]
    fn test_flate_stream_is_inflated() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"/Im1 Do").unwrap();
        let compressed = encoder.finish().unwrap();

        let stream = Stream::new(dictionary! { "Filter" => "FlateDecode" }, compressed);
        assert_eq!(filter_names(&stream), vec!["FlateDecode".to_string()]);
        assert_eq!(decompress_stream(&stream).unwrap(), b"/Im1 Do");
    }

    #[test]
    fn test_corrupt_flate_stream_is_an_error() {
        let stream = Stream::new(
            dictionary! { "Filter" => "FlateDecode" },
            b"definitely not zlib".to_vec(),
        );
        assert!(decompress_stream(&stream).is_err());
    }
}
