//! lopdf-backed implementation of the mutable document model.
//!
//! PDF pages live in a tree, but every structural operation here works on a
//! flattened ordered page list and rewrites the root `Pages` node's
//! `Kids`/`Count` (and each page's `Parent`) afterwards. Drawing appends a
//! fresh content stream to the page's `Contents` entry, never touching the
//! existing streams.
//!
//! Drawing coordinates are bottom-up page points, the native PDF convention.

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::debug;

use pagemark_core::{
    Color, CoverRect, DocumentEngine, EditorError, PageDocument, Result, StandardFont,
};

const US_LETTER: [f32; 4] = [0.0, 0.0, 612.0, 792.0];
const HELVETICA_RESOURCE: &str = "FHelv";

fn doc_err(err: lopdf::Error) -> EditorError {
    EditorError::Parse(err.to_string())
}

fn structural(msg: &str) -> EditorError {
    EditorError::Parse(msg.to_owned())
}

pub struct LopdfDocumentEngine;

impl LopdfDocumentEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LopdfDocumentEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentEngine for LopdfDocumentEngine {
    fn parse(&self, bytes: &[u8]) -> Result<Box<dyn PageDocument>> {
        let doc = Document::load_mem(bytes).map_err(doc_err)?;
        Ok(Box::new(LopdfPageDocument { doc }))
    }

    fn create(&self) -> Result<Box<dyn PageDocument>> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        doc.objects.insert(
            pages_id,
            Object::Dictionary(Dictionary::from_iter([
                ("Type", Object::Name(b"Pages".to_vec())),
                ("Kids", Object::Array(Vec::new())),
                ("Count", Object::Integer(0)),
            ])),
        );
        let catalog_id = doc.add_object(Dictionary::from_iter([
            ("Type", Object::Name(b"Catalog".to_vec())),
            ("Pages", Object::Reference(pages_id)),
        ]));
        doc.trailer.set("Root", Object::Reference(catalog_id));
        Ok(Box::new(LopdfPageDocument { doc }))
    }
}

pub struct LopdfPageDocument {
    doc: Document,
}

impl LopdfPageDocument {
    fn pages_root_id(&self) -> Result<ObjectId> {
        let root = self.doc.trailer.get(b"Root").map_err(doc_err)?;
        let Object::Reference(catalog_id) = root else {
            return Err(structural("trailer Root is not a reference"));
        };
        let catalog = self
            .doc
            .get_object(*catalog_id)
            .map_err(doc_err)?
            .as_dict()
            .map_err(doc_err)?;
        match catalog.get(b"Pages") {
            Ok(Object::Reference(id)) => Ok(*id),
            _ => Err(structural("catalog has no Pages reference")),
        }
    }

    fn ordered_page_ids(&self) -> Vec<ObjectId> {
        self.doc.get_pages().into_values().collect()
    }

    fn page_id(&self, page: usize) -> Result<ObjectId> {
        let ids = self.ordered_page_ids();
        if page == 0 || page > ids.len() {
            return Err(EditorError::PageIndex {
                page,
                total: ids.len(),
            });
        }
        Ok(ids[page - 1])
    }

    fn set_page_order(&mut self, ids: &[ObjectId]) -> Result<()> {
        let pages_id = self.pages_root_id()?;
        {
            let pages = self
                .doc
                .get_object_mut(pages_id)
                .map_err(doc_err)?
                .as_dict_mut()
                .map_err(doc_err)?;
            pages.set(
                "Kids",
                Object::Array(ids.iter().map(|id| Object::Reference(*id)).collect()),
            );
            pages.set("Count", Object::Integer(ids.len() as i64));
        }
        for id in ids {
            if let Ok(Object::Dictionary(dict)) = self.doc.get_object_mut(*id) {
                dict.set("Parent", Object::Reference(pages_id));
            }
        }
        Ok(())
    }

    /// Appends the operations as a new content stream on the page, keeping
    /// whatever `Contents` shape (reference, array, absent) is already there.
    fn append_operations(&mut self, page: usize, operations: Vec<Operation>) -> Result<()> {
        let page_id = self.page_id(page)?;
        let encoded = Content { operations }
            .encode()
            .map_err(|err| EditorError::Serialize(err.to_string()))?;
        let content_id = self
            .doc
            .add_object(Object::Stream(Stream::new(Dictionary::new(), encoded)));

        let page_obj = self.doc.get_object_mut(page_id).map_err(doc_err)?;
        let Object::Dictionary(dict) = page_obj else {
            return Err(structural("page object is not a dictionary"));
        };
        match dict.get(b"Contents").ok().cloned() {
            Some(Object::Reference(existing)) => {
                dict.set(
                    "Contents",
                    Object::Array(vec![
                        Object::Reference(existing),
                        Object::Reference(content_id),
                    ]),
                );
            }
            Some(Object::Array(mut arr)) => {
                arr.push(Object::Reference(content_id));
                dict.set("Contents", Object::Array(arr));
            }
            _ => {
                dict.set("Contents", Object::Reference(content_id));
            }
        }
        Ok(())
    }

    fn media_box(&self, page: usize) -> Result<[f32; 4]> {
        let page_id = self.page_id(page)?;
        let page_obj = self.doc.get_object(page_id).map_err(doc_err)?;
        Ok(media_box_recursive(&self.doc, page_obj, 10))
    }
}

/// MediaBox lookup resolving indirect references and walking up `Parent`
/// links, depth-limited against malformed trees. Falls back to US Letter.
fn media_box_recursive(doc: &Document, page_obj: &Object, depth: usize) -> [f32; 4] {
    if depth == 0 {
        return US_LETTER;
    }
    let Object::Dictionary(dict) = page_obj else {
        return US_LETTER;
    };

    if let Ok(media_box_obj) = dict.get(b"MediaBox") {
        let arr = match media_box_obj {
            Object::Array(arr) => Some(arr),
            Object::Reference(id) => match doc.get_object(*id) {
                Ok(Object::Array(arr)) => Some(arr),
                _ => None,
            },
            _ => None,
        };
        if let Some(arr) = arr {
            let values: Vec<f32> = arr
                .iter()
                .filter_map(|o| match o {
                    Object::Integer(i) => Some(*i as f32),
                    Object::Real(r) => Some(*r),
                    _ => None,
                })
                .collect();
            if values.len() == 4 {
                return [values[0], values[1], values[2], values[3]];
            }
        }
    }

    if let Ok(Object::Reference(parent_id)) = dict.get(b"Parent") {
        if let Ok(parent) = doc.get_object(*parent_id) {
            return media_box_recursive(doc, parent, depth - 1);
        }
    }

    US_LETTER
}

impl PageDocument for LopdfPageDocument {
    fn page_count(&self) -> usize {
        self.doc.get_pages().len()
    }

    fn page_size(&self, page: usize) -> Result<(f32, f32)> {
        let media_box = self.media_box(page)?;
        Ok((media_box[2] - media_box[0], media_box[3] - media_box[1]))
    }

    fn add_page(&mut self) -> Result<()> {
        let pages_id = self.pages_root_id()?;
        let page_id = self.doc.add_object(Dictionary::from_iter([
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(pages_id)),
            (
                "MediaBox",
                Object::Array(vec![0.into(), 0.into(), 612.into(), 792.into()]),
            ),
            ("Resources", Object::Dictionary(Dictionary::new())),
        ]));
        let mut ids = self.ordered_page_ids();
        ids.push(page_id);
        debug!(total = ids.len(), "appended blank page");
        self.set_page_order(&ids)
    }

    fn remove_page(&mut self, page: usize) -> Result<()> {
        let mut ids = self.ordered_page_ids();
        if page == 0 || page > ids.len() {
            return Err(EditorError::PageIndex {
                page,
                total: ids.len(),
            });
        }
        let removed = ids.remove(page - 1);
        self.doc.objects.remove(&removed);
        self.set_page_order(&ids)
    }

    fn move_page(&mut self, from: usize, to: usize) -> Result<()> {
        let mut ids = self.ordered_page_ids();
        let total = ids.len();
        if from == 0 || from > total || to == 0 || to > total {
            return Err(EditorError::PageIndex { page: from, total });
        }
        ids.swap(from - 1, to - 1);
        self.set_page_order(&ids)
    }

    fn draw_cover_rect(&mut self, page: usize, rect: CoverRect, color: Color) -> Result<()> {
        let operations = vec![
            Operation::new("q", vec![]),
            Operation::new(
                "rg",
                vec![
                    Object::Real(color.r),
                    Object::Real(color.g),
                    Object::Real(color.b),
                ],
            ),
            Operation::new(
                "re",
                vec![
                    Object::Real(rect.x),
                    Object::Real(rect.y),
                    Object::Real(rect.width),
                    Object::Real(rect.height),
                ],
            ),
            Operation::new("f", vec![]),
            Operation::new("Q", vec![]),
        ];
        self.append_operations(page, operations)
    }

    fn embed_standard_font(&mut self, page: usize, font: StandardFont) -> Result<String> {
        let StandardFont::Helvetica = font;
        let page_id = self.page_id(page)?;

        // Already registered under the stable name?
        if let Some(resources) = resolved_resources(&self.doc, page_id) {
            if let Ok(Object::Dictionary(fonts)) = resources.get(b"Font") {
                if fonts.has(HELVETICA_RESOURCE.as_bytes()) {
                    return Ok(HELVETICA_RESOURCE.to_owned());
                }
            }
        }

        let font_id = self.doc.add_object(Dictionary::from_iter([
            ("Type", Object::Name(b"Font".to_vec())),
            ("Subtype", Object::Name(b"Type1".to_vec())),
            ("BaseFont", Object::Name(b"Helvetica".to_vec())),
        ]));

        let resources_ref = {
            let dict = self
                .doc
                .get_object(page_id)
                .map_err(doc_err)?
                .as_dict()
                .map_err(doc_err)?;
            match dict.get(b"Resources") {
                Ok(Object::Reference(id)) => Some(*id),
                _ => None,
            }
        };

        match resources_ref {
            Some(res_id) => {
                let resources = self
                    .doc
                    .get_object_mut(res_id)
                    .map_err(doc_err)?
                    .as_dict_mut()
                    .map_err(doc_err)?;
                set_font_entry(resources, HELVETICA_RESOURCE, font_id);
            }
            None => {
                let page_obj = self.doc.get_object_mut(page_id).map_err(doc_err)?;
                let Object::Dictionary(dict) = page_obj else {
                    return Err(structural("page object is not a dictionary"));
                };
                let mut resources = match dict.get(b"Resources") {
                    Ok(Object::Dictionary(existing)) => existing.clone(),
                    _ => Dictionary::new(),
                };
                set_font_entry(&mut resources, HELVETICA_RESOURCE, font_id);
                dict.set("Resources", Object::Dictionary(resources));
            }
        }
        Ok(HELVETICA_RESOURCE.to_owned())
    }

    fn draw_text(
        &mut self,
        page: usize,
        text: &str,
        x: f32,
        y: f32,
        font_resource: &str,
        size: f32,
        color: Color,
    ) -> Result<()> {
        let operations = vec![
            Operation::new("q", vec![]),
            Operation::new("BT", vec![]),
            Operation::new(
                "Tf",
                vec![
                    Object::Name(font_resource.as_bytes().to_vec()),
                    Object::Real(size),
                ],
            ),
            Operation::new(
                "rg",
                vec![
                    Object::Real(color.r),
                    Object::Real(color.g),
                    Object::Real(color.b),
                ],
            ),
            Operation::new("Td", vec![Object::Real(x), Object::Real(y)]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
            Operation::new("Q", vec![]),
        ];
        self.append_operations(page, operations)
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut doc = self.doc.clone();
        let mut output = Vec::new();
        doc.save_to(&mut output)
            .map_err(|err| EditorError::Serialize(err.to_string()))?;
        Ok(output)
    }
}

fn resolved_resources(doc: &Document, page_id: ObjectId) -> Option<Dictionary> {
    let dict = doc.get_object(page_id).ok()?.as_dict().ok()?;
    match dict.get(b"Resources") {
        Ok(Object::Dictionary(inline)) => Some(inline.clone()),
        Ok(Object::Reference(id)) => match doc.get_object(*id) {
            Ok(Object::Dictionary(referenced)) => Some(referenced.clone()),
            _ => None,
        },
        _ => None,
    }
}

fn set_font_entry(resources: &mut Dictionary, name: &str, font_id: ObjectId) {
    let mut fonts = match resources.get(b"Font") {
        Ok(Object::Dictionary(existing)) => existing.clone(),
        _ => Dictionary::new(),
    };
    fonts.set(name, Object::Reference(font_id));
    resources.set("Font", Object::Dictionary(fonts));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_pdf(page_texts: &[&str]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let page_tree_id = doc.new_object_id();

        let font_id = doc.add_object(Dictionary::from_iter([
            ("Type", Object::Name(b"Font".to_vec())),
            ("Subtype", Object::Name(b"Type1".to_vec())),
            ("BaseFont", Object::Name(b"Helvetica".to_vec())),
        ]));

        let mut kids = Vec::new();
        for text in page_texts {
            let resources_id = doc.add_object(Dictionary::from_iter([(
                "Font",
                Object::Dictionary(Dictionary::from_iter([(
                    "F1",
                    Object::Reference(font_id),
                )])),
            )]));

            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 24.into()]),
                    Operation::new("Td", vec![100.into(), 700.into()]),
                    Operation::new("Tj", vec![Object::string_literal(*text)]),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id = doc.add_object(Stream::new(
                Dictionary::new(),
                content.encode().unwrap(),
            ));

            let page_id = doc.add_object(Dictionary::from_iter([
                ("Type", Object::Name(b"Page".to_vec())),
                ("Parent", Object::Reference(page_tree_id)),
                ("Contents", Object::Reference(content_id)),
                ("Resources", Object::Reference(resources_id)),
                (
                    "MediaBox",
                    Object::Array(vec![0.into(), 0.into(), 612.into(), 792.into()]),
                ),
            ]));
            kids.push(Object::Reference(page_id));
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            page_tree_id,
            Object::Dictionary(Dictionary::from_iter([
                ("Type", Object::Name(b"Pages".to_vec())),
                ("Kids", Object::Array(kids)),
                ("Count", Object::Integer(count)),
            ])),
        );

        let catalog_id = doc.add_object(Dictionary::from_iter([
            ("Type", Object::Name(b"Catalog".to_vec())),
            ("Pages", Object::Reference(page_tree_id)),
        ]));
        doc.trailer.set("Root", Object::Reference(catalog_id));

        let mut output = Vec::new();
        doc.save_to(&mut output).unwrap();
        output
    }

    fn parse(bytes: &[u8]) -> Box<dyn PageDocument> {
        LopdfDocumentEngine::new().parse(bytes).unwrap()
    }

    fn page_text(bytes: &[u8], page: u32) -> String {
        let doc = Document::load_mem(bytes).unwrap();
        doc.extract_text(&[page]).unwrap()
    }

    #[test]
    fn parse_reports_page_count_and_size() {
        let doc = parse(&test_pdf(&["Page 1", "Page 2"]));
        assert_eq!(doc.page_count(), 2);
        assert_eq!(doc.page_size(1).unwrap(), (612.0, 792.0));
    }

    #[test]
    fn create_yields_empty_document() {
        let doc = LopdfDocumentEngine::new().create().unwrap();
        assert_eq!(doc.page_count(), 0);
        let bytes = doc.serialize().unwrap();
        let reparsed = parse(&bytes);
        assert_eq!(reparsed.page_count(), 0);
    }

    #[test]
    fn add_page_survives_round_trip() {
        let mut doc = LopdfDocumentEngine::new().create().unwrap();
        doc.add_page().unwrap();
        doc.add_page().unwrap();
        assert_eq!(doc.page_count(), 2);

        let bytes = doc.serialize().unwrap();
        let reparsed = parse(&bytes);
        assert_eq!(reparsed.page_count(), 2);
        assert_eq!(reparsed.page_size(2).unwrap(), (612.0, 792.0));
    }

    #[test]
    fn add_page_appends_after_existing_content() {
        let mut doc = parse(&test_pdf(&["First"]));
        doc.add_page().unwrap();

        let bytes = doc.serialize().unwrap();
        assert_eq!(parse(&bytes).page_count(), 2);
        assert!(page_text(&bytes, 1).contains("First"));
    }

    #[test]
    fn remove_page_preserves_remaining_content() {
        let mut doc = parse(&test_pdf(&["First", "Second", "Third"]));
        doc.remove_page(2).unwrap();
        assert_eq!(doc.page_count(), 2);

        let bytes = doc.serialize().unwrap();
        assert!(page_text(&bytes, 1).contains("First"));
        assert!(page_text(&bytes, 2).contains("Third"));
    }

    #[test]
    fn remove_page_rejects_out_of_range() {
        let mut doc = parse(&test_pdf(&["Only"]));
        assert!(matches!(
            doc.remove_page(2),
            Err(EditorError::PageIndex { page: 2, total: 1 })
        ));
    }

    #[test]
    fn move_page_swaps_order() {
        let mut doc = parse(&test_pdf(&["First", "Second"]));
        doc.move_page(1, 2).unwrap();

        let bytes = doc.serialize().unwrap();
        assert!(page_text(&bytes, 1).contains("Second"));
        assert!(page_text(&bytes, 2).contains("First"));
    }

    #[test]
    fn drawn_text_survives_round_trip() {
        let mut doc = parse(&test_pdf(&["Hello"]));
        doc.draw_cover_rect(
            1,
            CoverRect {
                x: 99.0,
                y: 88.4,
                width: 7.0,
                height: 14.4,
            },
            Color::WHITE,
        )
        .unwrap();
        let font = doc.embed_standard_font(1, StandardFont::Helvetica).unwrap();
        doc.draw_text(1, "World", 100.0, 92.0, &font, 12.0, Color::BLACK)
            .unwrap();

        let bytes = doc.serialize().unwrap();
        let text = page_text(&bytes, 1);
        assert!(text.contains("Hello"));
        assert!(text.contains("World"));
    }

    #[test]
    fn embed_standard_font_is_idempotent() {
        let mut doc = parse(&test_pdf(&["Hello"]));
        let first = doc.embed_standard_font(1, StandardFont::Helvetica).unwrap();
        let second = doc.embed_standard_font(1, StandardFont::Helvetica).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn drawing_on_created_page_works() {
        let mut doc = LopdfDocumentEngine::new().create().unwrap();
        doc.add_page().unwrap();
        let font = doc.embed_standard_font(1, StandardFont::Helvetica).unwrap();
        doc.draw_text(1, "Fresh", 72.0, 720.0, &font, 12.0, Color::BLACK)
            .unwrap();

        let bytes = doc.serialize().unwrap();
        assert!(page_text(&bytes, 1).contains("Fresh"));
    }
}
