//! WebAssembly bindings for PDF Image Replacement

use wasm_bindgen::prelude::*;
use crate::{
    list_document_images, replace_pdf_bytes, ImageRequest, MatchStrategy, PageImages, ReplaceOptions,
    Replacement, SharedDocument, TargetPages,
};

/// Initialize panic hook for better error messages in browser console
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
}

/// List the images painted on every page as a JSON string
#[wasm_bindgen]
pub fn list_images_json(pdf_bytes: &[u8]) -> Result<String, JsError> {
    let document = SharedDocument::load_mem(pdf_bytes).map_err(|e| JsError::new(&e.to_string()))?;
    let pages = document
        .read(list_document_images)
        .map_err(|e| JsError::new(&e.to_string()))?;

    serde_json::to_string(&page_images_to_json(&pages)).map_err(|e| JsError::new(&e.to_string()))
}

/// Convert page images to a JSON-serializable structure
fn page_images_to_json(pages: &[PageImages]) -> Vec<serde_json::Value> {
    pages.iter().map(|page| {
        serde_json::json!({
            "page": page.page_number,
            "images": page.images.iter().map(|img| {
                serde_json::json!({
                    "name": img.name,
                    "objectId": format!("{} {}", img.object_id.0, img.object_id.1),
                    "width": img.width,
                    "height": img.height,
                    "colorSpace": img.color_space,
                    "bpc": img.bits_per_component,
                    "filter": img.filter,
                    "size": img.size_bytes,
                    "smask": img.has_smask
                })
            }).collect::<Vec<_>>()
        })
    }).collect()
}

/// Hide the named images of `page` on every page of the PDF
///
/// # Arguments
/// * `pdf_bytes` - The input PDF file as a byte array
/// * `page` - Page the images are selected on (1-based)
/// * `names` - Resource names of the selected images
/// * `by_content` - Match by identical pixels instead of name and size
///
/// # Returns
/// A `HideResultJs` with the rewritten PDF and counts, or throws an error
#[wasm_bindgen]
pub fn hide_images(
    pdf_bytes: &[u8],
    page: u32,
    names: Vec<String>,
    by_content: bool,
) -> Result<HideResultJs, JsError> {
    let request = ImageRequest {
        page,
        names,
        pages: TargetPages::All,
        strategy: if by_content {
            MatchStrategy::ByPixelContent
        } else {
            MatchStrategy::ByName
        },
    };

    let (pdf_bytes, summary) = replace_pdf_bytes(pdf_bytes, &request, Replacement::Hide, &ReplaceOptions::default())
        .map_err(|e| JsError::new(&e.to_string()))?;

    Ok(HideResultJs {
        pdf_bytes,
        replaced: summary.replaced,
        errors: summary.errors,
    })
}

/// Result of hiding images, with counts
#[wasm_bindgen]
pub struct HideResultJs {
    pdf_bytes: Vec<u8>,
    replaced: usize,
    errors: usize,
}

#[wasm_bindgen]
impl HideResultJs {
    /// Get the rewritten PDF bytes
    #[wasm_bindgen(getter)]
    pub fn pdf_bytes(&self) -> Vec<u8> {
        self.pdf_bytes.clone()
    }

    /// Get the number of image instances replaced
    #[wasm_bindgen(getter)]
    pub fn replaced(&self) -> usize {
        self.replaced
    }

    /// Get the number of pages or images that could not be processed
    #[wasm_bindgen(getter)]
    pub fn errors(&self) -> usize {
        self.errors
    }
}
