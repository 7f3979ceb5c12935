//! Replacement requests

use image::DynamicImage;
use lopdf::{Document, ObjectId};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use crate::encode::ReplacementEncoding;
use crate::error::{Error, Result};
use crate::scanner::{FoundImage, ImageScanner};

/// How found images are matched against the requested ones
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    /// Same resource name and same width/height
    ByName,
    /// Identical decoded pixels
    ByPixelContent,
}

/// What a matched image is replaced with
#[derive(Debug, Clone)]
pub enum Replacement {
    /// Fully transparent placeholder sized to each source image
    Hide,
    /// The same raster for every pair
    Image(Arc<DynamicImage>),
}

/// One requested image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacementPair {
    pub source_name: String,
    pub source_image: ObjectId,
    pub width: u32,
    pub height: u32,
}

impl ReplacementPair {
    pub fn new(source_name: impl Into<String>, source_image: ObjectId, width: u32, height: u32) -> Self {
        Self {
            source_name: source_name.into(),
            source_image,
            width,
            height,
        }
    }

    pub fn from_found(found: &FoundImage) -> Self {
        Self::new(found.name.clone(), found.image, found.width, found.height)
    }

    /// Resolve an image painted on a page by its resource name
    pub fn from_page(doc: &Document, page: u32, name: &str) -> Result<Self> {
        let found = ImageScanner::new().scan(doc, page)?;
        found
            .get(name)
            .map(Self::from_found)
            .ok_or_else(|| Error::ImageNotFound(format!("{} on page {}", name, page)))
    }
}

/// Pages a plan targets
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TargetPages {
    /// Every page in ascending order
    #[default]
    All,
    /// 1-based page numbers in processing order
    List(Vec<u32>),
}

impl FromStr for TargetPages {
    type Err = String;

    /// Parses `all` or a comma separated list of pages and ranges, e.g. `3,1,5-7`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(TargetPages::All);
        }

        let parse = |n: &str| -> std::result::Result<u32, String> {
            match n.trim().parse::<u32>() {
                Ok(0) | Err(_) => Err(format!("invalid page number '{}'", n.trim())),
                Ok(page) => Ok(page),
            }
        };

        let mut pages = Vec::new();
        for part in s.split(',') {
            match part.split_once('-') {
                Some((start, end)) => {
                    let (start, end) = (parse(start)?, parse(end)?);
                    if start > end {
                        return Err(format!("invalid page range '{}'", part.trim()));
                    }
                    pages.extend(start..=end);
                }
                None => pages.push(parse(part)?),
            }
        }
        Ok(TargetPages::List(pages))
    }
}

/// A batch request: which images, on which pages, matched how, replaced with what
#[derive(Debug, Clone)]
pub struct ReplacementPlan {
    pairs: Vec<ReplacementPair>,
    pages: Vec<u32>,
    strategy: MatchStrategy,
    replacement: Replacement,
    encoding: ReplacementEncoding,
}

impl ReplacementPlan {
    pub fn new(strategy: MatchStrategy, replacement: Replacement) -> Self {
        Self {
            pairs: Vec::new(),
            pages: Vec::new(),
            strategy,
            replacement,
            encoding: ReplacementEncoding::default(),
        }
    }

    /// Hide the given pairs with transparent placeholders
    pub fn hide(strategy: MatchStrategy) -> Self {
        Self::new(strategy, Replacement::Hide)
    }

    /// Replace the given pairs with one image
    pub fn replace_with(strategy: MatchStrategy, image: DynamicImage) -> Self {
        Self::new(strategy, Replacement::Image(Arc::new(image)))
    }

    pub fn with_pair(mut self, pair: ReplacementPair) -> Self {
        self.pairs.push(pair);
        self
    }

    pub fn with_pairs(mut self, pairs: impl IntoIterator<Item = ReplacementPair>) -> Self {
        self.pairs.extend(pairs);
        self
    }

    /// Target pages (1-based) in processing order; repeats are dropped
    pub fn with_pages(mut self, pages: impl IntoIterator<Item = u32>) -> Self {
        let mut seen: HashSet<u32> = self.pages.iter().copied().collect();
        self.pages
            .extend(pages.into_iter().filter(|page| seen.insert(*page)));
        self
    }

    /// Target every page of the document in ascending order
    pub fn with_all_pages(self, doc: &Document) -> Self {
        let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
        self.with_pages(pages)
    }

    pub fn with_target_pages(self, doc: &Document, pages: &TargetPages) -> Self {
        match pages {
            TargetPages::All => self.with_all_pages(doc),
            TargetPages::List(list) => self.with_pages(list.iter().copied()),
        }
    }

    pub fn with_encoding(mut self, encoding: ReplacementEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn pairs(&self) -> &[ReplacementPair] {
        &self.pairs
    }

    pub fn pages(&self) -> &[u32] {
        &self.pages
    }

    pub fn strategy(&self) -> MatchStrategy {
        self.strategy
    }

    pub fn replacement(&self) -> &Replacement {
        &self.replacement
    }

    pub fn encoding(&self) -> ReplacementEncoding {
        self.encoding
    }
}
