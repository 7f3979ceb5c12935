//! PDF Image Replacement Library
//!
//! Finds the images a page actually paints and hides or replaces them across
//! many pages, matched either by resource name and size or by identical
//! decoded pixels. Shared between CLI and WASM targets.
//!
//! Pages are scanned by interpreting their content streams (including nested
//! form XObjects), so images that sit in a resource dictionary without being
//! drawn are never touched. Replacement rewrites the entry in the resource
//! table that owns the name, leaving every other page that shares the same
//! image object as it was.

#[cfg(target_arch = "wasm32")]
pub mod wasm;

pub mod document;
pub mod encode;
pub mod engine;
pub mod error;
mod filters;
pub mod inspect;
pub mod plan;
pub mod raster;
pub mod scanner;

#[cfg(test)]
mod testutil;

pub use document::SharedDocument;
pub use encode::ReplacementEncoding;
pub use engine::{run, submit, RunEvent, RunHandle, RunState, RunSummary};
pub use error::{Error, Result};
pub use inspect::{extract_image_png, list_document_images, list_page_images, PageImage, PageImages};
pub use plan::{MatchStrategy, Replacement, ReplacementPair, ReplacementPlan, TargetPages};
pub use raster::{extract_raster, PixelFormat, RawRaster};
pub use scanner::{FoundImage, FoundImages, ImageScanner, ResourceTable};

use lopdf::Document;

/// Options for writing replacement images
#[derive(Debug, Clone)]
pub struct ReplaceOptions {
    /// JPEG quality (1-100) for opaque replacement images; lossless when unset
    pub jpeg_quality: Option<u8>,
    /// Compress PDF streams on save (reduces file size)
    pub compress_streams: bool,
}

impl Default for ReplaceOptions {
    fn default() -> Self {
        Self {
            jpeg_quality: None,
            compress_streams: true,
        }
    }
}

impl ReplaceOptions {
    pub fn encoding(&self) -> Result<ReplacementEncoding> {
        match self.jpeg_quality {
            None => Ok(ReplacementEncoding::Lossless),
            Some(quality @ 1..=100) => Ok(ReplacementEncoding::Jpeg { quality }),
            Some(quality) => Err(Error::InvalidQuality(quality)),
        }
    }
}

/// Images selected on one page, to be matched on the target pages
#[derive(Debug, Clone)]
pub struct ImageRequest {
    /// Page the selection was made on
    pub page: u32,
    /// Resource names selected on that page
    pub names: Vec<String>,
    pub pages: TargetPages,
    pub strategy: MatchStrategy,
}

/// Resolve a selection against the document into a plan
pub fn build_plan(
    doc: &Document,
    request: &ImageRequest,
    replacement: Replacement,
    options: &ReplaceOptions,
) -> Result<ReplacementPlan> {
    let encoding = options.encoding()?;
    let found = ImageScanner::new().scan(doc, request.page)?;

    let mut pairs = Vec::with_capacity(request.names.len());
    for name in &request.names {
        let image = found
            .get(name)
            .ok_or_else(|| Error::ImageNotFound(format!("{} on page {}", name, request.page)))?;
        pairs.push(ReplacementPair::from_found(image));
    }

    Ok(ReplacementPlan::new(request.strategy, replacement)
        .with_pairs(pairs)
        .with_target_pages(doc, &request.pages)
        .with_encoding(encoding))
}

/// Apply a selection to a PDF in memory and return the rewritten PDF bytes
pub fn replace_pdf_bytes(
    input_bytes: &[u8],
    request: &ImageRequest,
    replacement: Replacement,
    options: &ReplaceOptions,
) -> Result<(Vec<u8>, RunSummary)> {
    let document = SharedDocument::load_mem(input_bytes)?;
    let plan = document.read(|doc| build_plan(doc, request, replacement, options))??;
    let summary = run(&plan, &document)?;
    let output_bytes = document.save_to_bytes(options.compress_streams)?;
    Ok((output_bytes, summary))
}

#[cfg(not(target_arch = "wasm32"))]
pub mod file_ops {
    use super::*;
    use std::path::Path;
    use tracing::info;

    /// Apply a selection to a PDF file and write the result.
    ///
    /// The output is only written when at least one image was replaced.
    pub fn replace_pdf_file(
        input_path: &Path,
        output_path: &Path,
        request: &ImageRequest,
        replacement: Replacement,
        options: &ReplaceOptions,
    ) -> Result<RunSummary> {
        let document = SharedDocument::load(input_path)?;
        let plan = document.read(|doc| build_plan(doc, request, replacement, options))??;
        let summary = run(&plan, &document)?;

        if summary.replaced > 0 {
            document.save(output_path, options.compress_streams)?;
        } else {
            info!(path = %input_path.display(), "nothing replaced; output not written");
        }
        Ok(summary)
    }

    /// Load a replacement image from disk
    pub fn load_replacement(path: &Path) -> Result<Replacement> {
        let img = image::open(path).map_err(|e| Error::Decode(format!("{}: {}", path.display(), e)))?;
        Ok(Replacement::Image(std::sync::Arc::new(img)))
    }
}
