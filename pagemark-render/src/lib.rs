//! pdfium-backed implementation of the raster engine contract.
//!
//! Text runs are reported in top-down page points: the transform's
//! translation is the run's baseline origin measured from the top-left page
//! corner, which matches how the overlay positions its proxies on screen.

use std::mem;
use std::sync::Arc;

use anyhow::{anyhow, Result as BindResult};
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use tracing::warn;

use pagemark_core::{
    EditorError, PageViewport, RasterDocument, RasterEngine, RenderImage, Result, TextRun,
    Transform,
};

fn pdfium_err(err: PdfiumError) -> EditorError {
    EditorError::Parse(err.to_string())
}

pub struct PdfiumRasterEngine {
    pdfium: Arc<Pdfium>,
}

impl PdfiumRasterEngine {
    pub fn new() -> BindResult<Self> {
        let pdfium = match bind_pdfium_from_build_hint() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

impl RasterEngine for PdfiumRasterEngine {
    fn parse(&self, bytes: &[u8]) -> Result<Box<dyn RasterDocument>> {
        let document = PdfiumRasterDocument::open(Arc::clone(&self.pdfium), bytes.to_vec())?;
        Ok(Box::new(document))
    }
}

struct PdfiumRasterDocument {
    // Field order matters: the cached document borrows from the bindings
    // behind `pdfium` and must drop first.
    document: Mutex<Option<PdfDocument<'static>>>,
    bytes: Vec<u8>,
    page_count: usize,
    pdfium: Arc<Pdfium>,
}

impl PdfiumRasterDocument {
    fn open(pdfium: Arc<Pdfium>, bytes: Vec<u8>) -> Result<Self> {
        let mut document = Self {
            document: Mutex::new(None),
            bytes,
            page_count: 0,
            pdfium,
        };
        document.page_count = document.with_document(|doc| Ok(doc.pages().len() as usize))?;
        Ok(document)
    }

    fn load_document(&self) -> Result<PdfDocument<'static>> {
        let document = self
            .pdfium
            .load_pdf_from_byte_vec(self.bytes.clone(), None)
            .map_err(pdfium_err)?;
        // SAFETY: the returned PdfDocument holds a reference to the Pdfium
        // bindings owned by self.pdfium. It is stored in self.document, which
        // is declared before pdfium and therefore drops first, so the
        // reference never outlives the bindings.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        Ok(document)
    }

    fn with_document<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&PdfDocument<'static>) -> Result<R>,
    {
        let mut guard = self.document.lock();
        if guard.is_none() {
            *guard = Some(self.load_document()?);
        }
        let document = guard.as_ref().expect("document must be loaded");
        f(document)
    }

    fn pdfium_page_index(&self, page: usize) -> Result<PdfPageIndex> {
        if page == 0 || page > self.page_count {
            return Err(EditorError::PageIndex {
                page,
                total: self.page_count,
            });
        }
        PdfPageIndex::try_from(page - 1).map_err(|_| EditorError::PageIndex {
            page,
            total: self.page_count,
        })
    }
}

impl RasterDocument for PdfiumRasterDocument {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn viewport(&self, page: usize, scale: f32) -> Result<PageViewport> {
        let index = self.pdfium_page_index(page)?;
        self.with_document(|document| {
            let page = document.pages().get(index).map_err(pdfium_err)?;
            Ok(PageViewport {
                width: (page.width().value * scale).round() as u32,
                height: (page.height().value * scale).round() as u32,
                transform: Transform::scale(scale),
            })
        })
    }

    fn rasterize(&self, page: usize, scale: f32) -> Result<RenderImage> {
        let index = self.pdfium_page_index(page)?;
        self.with_document(|document| {
            let page = document.pages().get(index).map_err(pdfium_err)?;
            let config = PdfRenderConfig::new().scale_page_by_factor(scale.max(0.1));
            let bitmap = page.render_with_config(&config).map_err(pdfium_err)?;
            let image = bitmap.as_image().to_rgba8();
            let (width, height) = (image.width(), image.height());
            Ok(RenderImage {
                width,
                height,
                pixels: image.into_raw(),
            })
        })
    }

    fn text_runs(&self, page: usize) -> Result<Vec<TextRun>> {
        let index = self.pdfium_page_index(page)?;
        self.with_document(|document| {
            let page = document.pages().get(index).map_err(pdfium_err)?;
            let page_height = page.height().value;
            let text = page.text().map_err(pdfium_err)?;

            let chars: Vec<CharMetrics> = text
                .chars()
                .iter()
                .map(|c| CharMetrics {
                    font_size: c.unscaled_font_size().value,
                    font_name: c.font_name(),
                })
                .collect();

            let mut segments = Vec::new();
            let mut char_counts = Vec::new();
            for segment in text.segments().iter() {
                let bounds = segment.bounds();
                let content = segment.text();
                char_counts.push(content.chars().count());
                segments.push(RawSegment {
                    left: bounds.left().value,
                    bottom: bounds.bottom().value,
                    right: bounds.right().value,
                    top: bounds.top().value,
                    text: content,
                });
            }

            let metadata = segment_font_metadata(&char_counts, &chars);
            Ok(segments
                .into_iter()
                .zip(metadata)
                .map(|(segment, meta)| run_from_segment(page_height, segment, meta))
                .collect())
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
struct CharMetrics {
    font_size: f32,
    font_name: String,
}

struct RawSegment {
    left: f32,
    bottom: f32,
    right: f32,
    top: f32,
    text: String,
}

/// Picks the leading character's font metadata for each segment. pdfium
/// exposes font size and family per character, not per segment; segments are
/// uniform enough that the first character is representative.
fn segment_font_metadata(char_counts: &[usize], chars: &[CharMetrics]) -> Vec<CharMetrics> {
    let mut cursor = 0usize;
    char_counts
        .iter()
        .map(|count| {
            let meta = chars.get(cursor).cloned().unwrap_or(CharMetrics {
                font_size: 0.0,
                font_name: String::new(),
            });
            cursor += count;
            meta
        })
        .collect()
}

/// Converts a bottom-up segment bounding box into a top-down text run. The
/// run's baseline sits on the segment's bottom edge; a missing font size
/// falls back to the bounds height.
fn run_from_segment(page_height: f32, segment: RawSegment, meta: CharMetrics) -> TextRun {
    let width = segment.right - segment.left;
    let height = segment.top - segment.bottom;
    let size = if meta.font_size > 0.0 {
        meta.font_size
    } else {
        height
    };
    TextRun {
        transform: Transform::new(
            size,
            0.0,
            0.0,
            size,
            segment.left,
            page_height - segment.bottom,
        ),
        width,
        height,
        font_name: meta.font_name,
        text: segment.text,
    }
}

fn bind_pdfium_from_build_hint() -> Option<Pdfium> {
    match option_env!("PAGEMARK_PDFIUM_LIBRARY_PATH") {
        Some(path) if !path.is_empty() => match Pdfium::bind_to_library(path) {
            Ok(bindings) => Some(Pdfium::new(bindings)),
            Err(err) => {
                warn!(
                    "failed to load pdfium from build-provided path {}: {}",
                    path, err
                );
                None
            }
        },
        _ => None,
    }
}

fn bind_pdfium_default() -> BindResult<Pdfium> {
    let mut errors = Vec::new();

    let cwd_path = Pdfium::pdfium_platform_library_name_at_path("./");
    match Pdfium::bind_to_library(&cwd_path) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => errors.push(format!("{}: {}", cwd_path.display(), err)),
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; ensure it is installed ({})",
                errors.join(", ")
            ))
        }
    }
}
