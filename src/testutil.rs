//! In-memory PDF construction for unit tests

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};

pub(crate) struct PdfBuilder {
    doc: Document,
    pages_id: ObjectId,
    kids: Vec<Object>,
    tree_resources: Option<Dictionary>,
}

fn xobject_dict(entries: &[(&str, ObjectId)]) -> Dictionary {
    let mut dict = Dictionary::new();
    for (name, id) in entries {
        dict.set(name.as_bytes().to_vec(), Object::Reference(*id));
    }
    dict
}

impl PdfBuilder {
    pub(crate) fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            kids: Vec::new(),
            tree_resources: None,
        }
    }

    /// Uncompressed 8-bit image filled with one color
    pub(crate) fn image(&mut self, width: u32, height: u32, color_space: &str, pixel: &[u8]) -> ObjectId {
        let data: Vec<u8> = pixel
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * pixel.len())
            .collect();
        self.image_with_data(width, height, color_space, data)
    }

    pub(crate) fn image_with_data(&mut self, width: u32, height: u32, color_space: &str, data: Vec<u8>) -> ObjectId {
        let dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => color_space,
            "BitsPerComponent" => 8,
        };
        self.doc.add_object(Stream::new(dict, data))
    }

    pub(crate) fn rgb_image(&mut self, width: u32, height: u32, rgb: [u8; 3]) -> ObjectId {
        self.image(width, height, "DeviceRGB", &rgb)
    }

    pub(crate) fn form(&mut self, content: &str, xobjects: &[(&str, ObjectId)]) -> ObjectId {
        let dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "BBox" => vec![0.into(), 0.into(), 100.into(), 100.into()],
            "Resources" => dictionary! { "XObject" => xobject_dict(xobjects) },
        };
        self.doc.add_object(Stream::new(dict, content.as_bytes().to_vec()))
    }

    /// Form without a `/Resources` entry
    pub(crate) fn bare_form(&mut self, content: &str) -> ObjectId {
        let dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Form",
            "BBox" => vec![0.into(), 0.into(), 100.into(), 100.into()],
        };
        self.doc.add_object(Stream::new(dict, content.as_bytes().to_vec()))
    }

    /// Add an entry to an existing form's inline XObject table
    pub(crate) fn add_form_xobject(&mut self, form: ObjectId, name: &str, target: ObjectId) {
        if let Ok(Object::Stream(stream)) = self.doc.get_object_mut(form) {
            if let Ok(Object::Dictionary(resources)) = stream.dict.get_mut(b"Resources") {
                if let Ok(Object::Dictionary(xobjects)) = resources.get_mut(b"XObject") {
                    xobjects.set(name.as_bytes().to_vec(), Object::Reference(target));
                }
            }
        }
    }

    /// Page with its own inline resources
    pub(crate) fn page(&mut self, content: &str, xobjects: &[(&str, ObjectId)]) -> ObjectId {
        let resources = dictionary! { "XObject" => xobject_dict(xobjects) };
        self.add_page(content, Some(resources))
    }

    /// Page that inherits resources from the page tree root
    pub(crate) fn page_inheriting(&mut self, content: &str) -> ObjectId {
        self.add_page(content, None)
    }

    fn add_page(&mut self, content: &str, resources: Option<Dictionary>) -> ObjectId {
        let content_id = self
            .doc
            .add_object(Stream::new(dictionary! {}, content.as_bytes().to_vec()));
        let mut page = dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            "Contents" => content_id,
        };
        if let Some(resources) = resources {
            page.set("Resources", resources);
        }
        let page_id = self.doc.add_object(page);
        self.kids.push(page_id.into());
        page_id
    }

    /// Resources on the page tree root, inherited by pages without their own
    pub(crate) fn set_tree_xobjects(&mut self, xobjects: &[(&str, ObjectId)]) {
        self.tree_resources = Some(dictionary! { "XObject" => xobject_dict(xobjects) });
    }

    pub(crate) fn finish(self) -> Document {
        let PdfBuilder {
            mut doc,
            pages_id,
            kids,
            tree_resources,
        } = self;

        let mut pages = dictionary! {
            "Type" => "Pages",
            "Count" => kids.len() as i64,
            "Kids" => kids,
        };
        if let Some(resources) = tree_resources {
            pages.set("Resources", resources);
        }
        doc.objects.insert(pages_id, Object::Dictionary(pages));

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc
    }
}
