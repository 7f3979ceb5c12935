//! Content stream scanning for image XObjects.
//!
//! The scanner interprets a page's operator sequence and records every image
//! XObject painted with `Do`, recursing into Form XObjects. Each found image
//! remembers the XObject resource table it was resolved through, so a later
//! replacement writes into the dictionary that actually owns the name (a
//! form's own resources rather than the page's).

use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::filters::decompress_stream;

/// Maximum depth of the page tree walked when looking for inherited resources
const MAX_INHERIT_DEPTH: usize = 32;

/// Maximum Form XObject nesting
const MAX_FORM_DEPTH: usize = 64;

/// Location of an XObject resource dictionary inside the document.
///
/// `holder` is the indirect object the dictionary lives in (a page, a page
/// tree node, a form stream, a standalone resources dictionary or the XObject
/// dictionary itself); `path` lists the inline keys leading from the holder's
/// dictionary down to the XObject dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceTable {
    holder: ObjectId,
    path: Vec<Vec<u8>>,
}

impl ResourceTable {
    /// Object that holds the table
    pub fn holder(&self) -> ObjectId {
        self.holder
    }

    /// Find the XObject table reachable from a dictionary's `/Resources` entry
    fn locate(doc: &Document, holder: ObjectId, dict: &Dictionary) -> Option<ResourceTable> {
        let mut holder = holder;
        let mut path: Vec<Vec<u8>> = Vec::new();

        let resources = match dict.get(b"Resources").ok()? {
            Object::Reference(id) => {
                holder = *id;
                doc.get_dictionary(*id).ok()?
            }
            Object::Dictionary(d) => {
                path.push(b"Resources".to_vec());
                d
            }
            _ => return None,
        };

        match resources.get(b"XObject").ok()? {
            Object::Reference(id) => {
                doc.get_dictionary(*id).ok()?;
                Some(ResourceTable {
                    holder: *id,
                    path: Vec::new(),
                })
            }
            Object::Dictionary(_) => {
                path.push(b"XObject".to_vec());
                Some(ResourceTable { holder, path })
            }
            _ => None,
        }
    }

    /// Borrow the XObject dictionary
    pub fn get<'a>(&self, doc: &'a Document) -> Option<&'a Dictionary> {
        let mut dict = holder_dict(doc.get_object(self.holder).ok()?)?;
        for key in &self.path {
            dict = match dict.get(key).ok()? {
                Object::Dictionary(d) => d,
                _ => return None,
            };
        }
        Some(dict)
    }

    /// Resolve a name to the referenced object id
    pub fn lookup(&self, doc: &Document, name: &str) -> Option<ObjectId> {
        match self.get(doc)?.get(name.as_bytes()).ok()? {
            Object::Reference(id) => Some(*id),
            _ => None,
        }
    }

    /// Point `name` at another object, leaving every other entry untouched
    pub fn put(&self, doc: &mut Document, name: &str, target: ObjectId) -> Result<()> {
        let mut dict = match doc.get_object_mut(self.holder)? {
            Object::Stream(s) => &mut s.dict,
            other => other.as_dict_mut()?,
        };
        for key in &self.path {
            dict = dict.get_mut(key)?.as_dict_mut()?;
        }
        dict.set(name.as_bytes().to_vec(), Object::Reference(target));
        Ok(())
    }
}

fn holder_dict(object: &Object) -> Option<&Dictionary> {
    match object {
        Object::Dictionary(d) => Some(d),
        Object::Stream(s) => Some(&s.dict),
        _ => None,
    }
}

/// An image painted on a page
#[derive(Debug, Clone)]
pub struct FoundImage {
    /// Resource name the image was painted under
    pub name: String,
    /// The image XObject
    pub image: ObjectId,
    /// Table that owns `name`
    pub table: ResourceTable,
    pub width: u32,
    pub height: u32,
}

/// Images found on one page, keyed by name, in the order they were first painted.
///
/// Painting the same name twice keeps the first position but the latest resolution.
#[derive(Debug, Clone, Default)]
pub struct FoundImages {
    entries: Vec<FoundImage>,
    index: HashMap<String, usize>,
}

impl FoundImages {
    fn insert(&mut self, image: FoundImage) {
        match self.index.get(&image.name) {
            Some(&pos) => self.entries[pos] = image,
            None => {
                self.index.insert(image.name.clone(), self.entries.len());
                self.entries.push(image);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&FoundImage> {
        self.index.get(name).map(|&pos| &self.entries[pos])
    }

    /// Images in scan order
    pub fn iter(&self) -> impl Iterator<Item = &FoundImage> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What a `Do` operand resolved to
enum Drawable {
    Image { id: ObjectId, width: u32, height: u32 },
    Form { id: ObjectId },
    Other,
}

/// Read `/Width` and `/Height` from an image dictionary
pub(crate) fn image_dimensions(dict: &Dictionary) -> (u32, u32) {
    let dim = |key: &[u8]| {
        dict.get(key)
            .ok()
            .and_then(|v| match v {
                Object::Integer(n) if *n > 0 => Some(*n as u32),
                Object::Real(n) if *n > 0.0 => Some(*n as u32),
                _ => None,
            })
            .unwrap_or(0)
    };
    (dim(b"Width"), dim(b"Height"))
}

fn classify(doc: &Document, id: ObjectId) -> Drawable {
    let stream = match doc.get_object(id) {
        Ok(Object::Stream(s)) => s,
        _ => return Drawable::Other,
    };
    match stream.dict.get(b"Subtype").and_then(Object::as_name) {
        Ok(b"Image") => {
            let (width, height) = image_dimensions(&stream.dict);
            Drawable::Image { id, width, height }
        }
        Ok(b"Form") => Drawable::Form { id },
        _ => Drawable::Other,
    }
}

/// Operator handler: scanner, document, current XObject table, operands
type OpHandler = fn(&mut ImageScanner, &Document, Option<&ResourceTable>, &[Object]) -> std::result::Result<(), String>;

/// Operators the scanner reacts to; everything else is skipped
const OPERATORS: &[(&str, OpHandler)] = &[
    ("q", ImageScanner::save_state),
    ("Q", ImageScanner::restore_state),
    ("Do", ImageScanner::paint_xobject),
    ("BI", ImageScanner::inline_image),
];

fn dispatch(operator: &str) -> Option<OpHandler> {
    OPERATORS
        .iter()
        .find(|(name, _)| *name == operator)
        .map(|(_, handler)| *handler)
}

/// Interpreter over page content streams that collects image XObjects
#[derive(Debug, Default)]
pub struct ImageScanner {
    found: FoundImages,
    /// Forms already interpreted during the current scan
    visited_forms: HashSet<ObjectId>,
    form_depth: usize,
    state_depth: usize,
}

impl ImageScanner {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        self.found = FoundImages::default();
        self.visited_forms.clear();
        self.form_depth = 0;
        self.state_depth = 0;
    }

    /// Scan a page by its 1-based page number
    pub fn scan(&mut self, doc: &Document, page_number: u32) -> Result<FoundImages> {
        let page_id = *doc
            .get_pages()
            .get(&page_number)
            .ok_or(Error::PageNotFound(page_number))?;
        self.scan_page(doc, page_number, page_id)
    }

    /// Scan a page whose object id is already known.
    ///
    /// Returns a fresh map on every call; nothing carries over between pages.
    pub fn scan_page(&mut self, doc: &Document, page_number: u32, page_id: ObjectId) -> Result<FoundImages> {
        self.reset();
        let outcome = self.interpret_page(doc, page_id);
        let found = std::mem::take(&mut self.found);
        self.reset();

        match outcome {
            Ok(()) => {
                debug!(page = page_number, images = found.len(), "scanned page");
                Ok(found)
            }
            Err(reason) => Err(Error::ContentStream {
                page: page_number,
                reason,
            }),
        }
    }

    fn interpret_page(&mut self, doc: &Document, page_id: ObjectId) -> std::result::Result<(), String> {
        let page_dict = doc
            .get_dictionary(page_id)
            .map_err(|e| format!("page object {:?}: {}", page_id, e))?;

        let table = page_resources_holder(doc, page_id)
            .and_then(|(holder, dict)| ResourceTable::locate(doc, holder, dict));

        let content = match page_dict.get(b"Contents") {
            Ok(contents) => page_content_data(doc, contents)?,
            Err(_) => return Ok(()),
        };

        self.interpret(doc, &content, table.as_ref())
    }

    fn interpret(&mut self, doc: &Document, data: &[u8], table: Option<&ResourceTable>) -> std::result::Result<(), String> {
        let content = Content::decode(data).map_err(|e| format!("cannot parse operators: {}", e))?;

        for operation in &content.operations {
            if let Some(handler) = dispatch(&operation.operator) {
                handler(self, doc, table, &operation.operands)?;
            }
        }
        Ok(())
    }

    fn save_state(&mut self, _doc: &Document, _table: Option<&ResourceTable>, _operands: &[Object]) -> std::result::Result<(), String> {
        self.state_depth += 1;
        Ok(())
    }

    fn restore_state(&mut self, _doc: &Document, _table: Option<&ResourceTable>, _operands: &[Object]) -> std::result::Result<(), String> {
        if self.state_depth == 0 {
            trace!("unbalanced Q ignored");
        } else {
            self.state_depth -= 1;
        }
        Ok(())
    }

    fn inline_image(&mut self, _doc: &Document, _table: Option<&ResourceTable>, _operands: &[Object]) -> std::result::Result<(), String> {
        // Inline images have no resource entry to replace
        trace!("inline image skipped");
        Ok(())
    }

    fn paint_xobject(&mut self, doc: &Document, table: Option<&ResourceTable>, operands: &[Object]) -> std::result::Result<(), String> {
        let name = match operands.last() {
            Some(Object::Name(n)) => String::from_utf8_lossy(n).to_string(),
            Some(other) => return Err(format!("Do expects a name operand, got {:?}", other)),
            None => return Err("Do without operand".to_string()),
        };

        let Some(table) = table else {
            trace!(name = %name, "Do with no XObject resources in scope");
            return Ok(());
        };
        let Some(id) = table.lookup(doc, &name) else {
            trace!(name = %name, "Do references an unknown XObject");
            return Ok(());
        };

        match classify(doc, id) {
            Drawable::Image { id, width, height } => {
                self.found.insert(FoundImage {
                    name,
                    image: id,
                    table: table.clone(),
                    width,
                    height,
                });
            }
            Drawable::Form { id } => self.enter_form(doc, id, table)?,
            Drawable::Other => {}
        }
        Ok(())
    }

    /// Forms without their own `/Resources` draw from the caller's table
    fn enter_form(&mut self, doc: &Document, form_id: ObjectId, parent: &ResourceTable) -> std::result::Result<(), String> {
        if !self.visited_forms.insert(form_id) {
            return Ok(());
        }
        if self.form_depth >= MAX_FORM_DEPTH {
            return Err(format!("form nesting deeper than {}", MAX_FORM_DEPTH));
        }

        let stream = match doc.get_object(form_id) {
            Ok(Object::Stream(s)) => s,
            _ => return Ok(()),
        };
        trace!(form = ?form_id, "entering form");

        let table = ResourceTable::locate(doc, form_id, &stream.dict).or_else(|| {
            if stream.dict.has(b"Resources") {
                None
            } else {
                Some(parent.clone())
            }
        });
        let content = decompress_stream(stream).map_err(|e| format!("form {:?}: {}", form_id, e))?;

        let saved_depth = self.state_depth;
        self.form_depth += 1;
        let outcome = self.interpret(doc, &content, table.as_ref());
        self.form_depth -= 1;
        self.state_depth = saved_depth;
        outcome
    }
}

/// Find the page or ancestor node carrying the page's `/Resources`
fn page_resources_holder(doc: &Document, page_id: ObjectId) -> Option<(ObjectId, &Dictionary)> {
    let mut node_id = page_id;
    for _ in 0..MAX_INHERIT_DEPTH {
        let node = doc.get_dictionary(node_id).ok()?;
        if node.has(b"Resources") {
            return Some((node_id, node));
        }
        node_id = match node.get(b"Parent") {
            Ok(Object::Reference(parent)) => *parent,
            _ => return None,
        };
    }
    None
}

/// Get content data from a Contents entry (may be stream or array of streams)
fn page_content_data(doc: &Document, contents: &Object) -> std::result::Result<Vec<u8>, String> {
    match contents {
        Object::Reference(id) => match doc.get_object(*id) {
            Ok(obj) => page_content_data(doc, obj),
            Err(e) => Err(format!("content object {:?}: {}", id, e)),
        },
        Object::Stream(stream) => decompress_stream(stream),
        Object::Array(arr) => {
            let mut combined = Vec::new();
            for item in arr {
                combined.extend(page_content_data(doc, item)?);
                combined.push(b'\n');
            }
            Ok(combined)
        }
        _ => Ok(Vec::new()),
    }
}

/// Page number to object id map, computed once per run
pub(crate) fn page_ids(doc: &Document) -> BTreeMap<u32, ObjectId> {
    doc.get_pages()
}
