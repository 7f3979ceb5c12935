//! Shared helpers for integration tests

#![allow(dead_code)]

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use pdf_image_replace::{ImageScanner, SharedDocument};

/// Builds small PDFs with one inline XObject table per page
pub struct TestPdf {
    doc: Document,
    pages_id: ObjectId,
    kids: Vec<Object>,
}

impl TestPdf {
    pub fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            kids: Vec::new(),
        }
    }

    /// Uncompressed RGB image filled with one color
    pub fn rgb_image(&mut self, width: u32, height: u32, rgb: [u8; 3]) -> ObjectId {
        let data = rgb.repeat((width * height) as usize);
        let dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        };
        self.doc.add_object(Stream::new(dict, data))
    }

    pub fn page(&mut self, content: &str, xobjects: &[(&str, ObjectId)]) -> ObjectId {
        let mut table = Dictionary::new();
        for (name, id) in xobjects {
            table.set(name.as_bytes().to_vec(), Object::Reference(*id));
        }
        let content_id = self
            .doc
            .add_object(Stream::new(dictionary! {}, content.as_bytes().to_vec()));
        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            "Resources" => dictionary! { "XObject" => table },
            "Contents" => content_id,
        });
        self.kids.push(page_id.into());
        page_id
    }

    pub fn finish(mut self) -> Document {
        let count = self.kids.len() as i64;
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Count" => count,
                "Kids" => self.kids,
            }),
        );
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);
        self.doc
    }

    pub fn to_bytes(self) -> Vec<u8> {
        let mut doc = self.finish();
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }
}

/// Object currently painted under `name` on `page`
pub fn painted(doc: &SharedDocument, page: u32, name: &str) -> Option<ObjectId> {
    doc.read(|d| {
        ImageScanner::new()
            .scan(d, page)
            .ok()
            .and_then(|found| found.get(name).map(|f| f.image))
    })
    .unwrap()
}
