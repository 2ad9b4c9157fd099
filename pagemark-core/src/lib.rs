use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{instrument, warn};
use uuid::Uuid;

pub type DocumentId = Uuid;

static DOCUMENT_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3f9a1d42-6b07-5c31-9e8d-2a4f70c1bb56").expect("valid namespace UUID")
});

pub fn document_id_for_path(path: &Path) -> DocumentId {
    let resolved = path
        .canonicalize()
        .or_else(|_| {
            if path.is_absolute() {
                Ok(path.to_path_buf())
            } else {
                std::env::current_dir().map(|cwd| cwd.join(path))
            }
        })
        .unwrap_or_else(|_| path.to_path_buf());
    let rendered = resolved.to_string_lossy();
    Uuid::new_v5(&DOCUMENT_NAMESPACE, rendered.as_bytes())
}

/// Fixed zoom factor for the main page view.
pub const MAIN_VIEW_SCALE: f32 = 1.5;
/// Fixed zoom factor for the thumbnail strip.
pub const THUMBNAIL_SCALE: f32 = 0.3;

#[derive(Debug, Error)]
pub enum EditorError {
    #[error("failed to parse document: {0}")]
    Parse(String),
    #[error("page {page} out of range (document has {total} pages)")]
    PageIndex { page: usize, total: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to serialize document: {0}")]
    Serialize(String),
    #[error("another session operation is already in flight")]
    Busy,
}

pub type Result<T> = std::result::Result<T, EditorError>;

/// 2D affine transform with coefficients `(a, b, c, d, e, f)`:
/// scale-x, skew-y, skew-x, scale-y, translate-x, translate-y.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    pub fn new(a: f32, b: f32, c: f32, d: f32, e: f32, f: f32) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub fn scale(factor: f32) -> Self {
        Self::new(factor, 0.0, 0.0, factor, 0.0, 0.0)
    }

    pub fn from_array(m: [f32; 6]) -> Self {
        Self::new(m[0], m[1], m[2], m[3], m[4], m[5])
    }

    pub fn to_array(self) -> [f32; 6] {
        [self.a, self.b, self.c, self.d, self.e, self.f]
    }

    /// Applies `run` first, then `viewport`: the matrix product `viewport · run`.
    pub fn compose(viewport: Transform, run: Transform) -> Transform {
        Transform {
            a: viewport.a * run.a + viewport.c * run.b,
            b: viewport.b * run.a + viewport.d * run.b,
            c: viewport.a * run.c + viewport.c * run.d,
            d: viewport.b * run.c + viewport.d * run.d,
            e: viewport.a * run.e + viewport.c * run.f + viewport.e,
            f: viewport.b * run.e + viewport.d * run.f + viewport.f,
        }
    }

    /// Effective font height under this transform, independent of rotation:
    /// the magnitude of the vertical basis column.
    pub fn font_size(&self) -> f32 {
        (self.c * self.c + self.d * self.d).sqrt()
    }

    /// Magnitude of the horizontal basis column; scales run widths to pixels.
    pub fn horizontal_magnitude(&self) -> f32 {
        (self.a * self.a + self.b * self.b).sqrt()
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// One positioned text run as reported by the rendering engine, in top-down
/// page coordinates. The transform's translation is the run's baseline origin.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub transform: Transform,
    pub width: f32,
    pub height: f32,
    pub font_name: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct RenderImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Pixel dimensions and page-to-pixel transform for a page at a given scale.
#[derive(Debug, Clone, Copy)]
pub struct PageViewport {
    pub width: u32,
    pub height: u32,
    pub transform: Transform,
}

/// Read-only rasterizable view over a parsed document. Pages are 1-based.
pub trait RasterDocument {
    fn page_count(&self) -> usize;
    fn viewport(&self, page: usize, scale: f32) -> Result<PageViewport>;
    fn rasterize(&self, page: usize, scale: f32) -> Result<RenderImage>;
    fn text_runs(&self, page: usize) -> Result<Vec<TextRun>>;
}

pub trait RasterEngine: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<Box<dyn RasterDocument>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardFont {
    Helvetica,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const BLACK: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
    };
    pub const WHITE: Color = Color {
        r: 1.0,
        g: 1.0,
        b: 1.0,
    };
}

/// Mutable/serializable view over the same document. Pages are 1-based and
/// drawing coordinates are bottom-up page points (the PDF convention).
pub trait PageDocument {
    fn page_count(&self) -> usize;
    /// Page dimensions in points: `(width, height)`.
    fn page_size(&self, page: usize) -> Result<(f32, f32)>;
    fn add_page(&mut self) -> Result<()>;
    fn remove_page(&mut self, page: usize) -> Result<()>;
    fn move_page(&mut self, from: usize, to: usize) -> Result<()>;
    fn draw_cover_rect(&mut self, page: usize, rect: CoverRect, color: Color) -> Result<()>;
    /// Registers the font on the page's resources and returns the resource
    /// name to use with [`PageDocument::draw_text`].
    fn embed_standard_font(&mut self, page: usize, font: StandardFont) -> Result<String>;
    #[allow(clippy::too_many_arguments)]
    fn draw_text(
        &mut self,
        page: usize,
        text: &str,
        x: f32,
        y: f32,
        font_resource: &str,
        size: f32,
        color: Color,
    ) -> Result<()>;
    fn serialize(&self) -> Result<Vec<u8>>;
}

pub trait DocumentEngine: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<Box<dyn PageDocument>>;
    fn create(&self) -> Result<Box<dyn PageDocument>>;
}

/// Native file operations provided by the host. Dialog cancellation is
/// reported as `None`, never as an error.
#[async_trait::async_trait]
pub trait HostShell: Send + Sync {
    async fn pick_open_path(&self) -> Result<Option<PathBuf>>;
    async fn read_file(&self, path: &Path) -> Result<Vec<u8>>;
    async fn pick_save_path(&self) -> Result<Option<PathBuf>>;
    async fn write_file(&self, path: &Path, bytes: &[u8]) -> Result<()>;
}

/// One rendered text run's overlay stand-in. Carries the full recoverable
/// metadata needed to translate an in-place edit back into document space;
/// the composed transform is used purely for on-screen placement.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRunProxy {
    pub source_transform: Transform,
    pub composed_transform: Transform,
    pub derived_font_size: f32,
    pub width: f32,
    pub height: f32,
    pub font_name: String,
    pub text: String,
}

/// The selectable text overlay for one rendered page. Rebuilt from scratch on
/// every render; proxies are addressed by insertion index.
#[derive(Debug, Clone)]
pub struct OverlayLayer {
    viewport: Transform,
    proxies: Vec<TextRunProxy>,
}

impl OverlayLayer {
    pub fn build(viewport: Transform, runs: &[TextRun]) -> Self {
        let proxies = runs
            .iter()
            .map(|run| {
                let composed = Transform::compose(viewport, run.transform);
                TextRunProxy {
                    source_transform: run.transform,
                    composed_transform: composed,
                    derived_font_size: composed.font_size(),
                    width: run.width,
                    height: run.height,
                    font_name: run.font_name.clone(),
                    text: run.text.clone(),
                }
            })
            .collect();
        Self { viewport, proxies }
    }

    pub fn empty() -> Self {
        Self {
            viewport: Transform::IDENTITY,
            proxies: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn proxy(&self, index: usize) -> Option<&TextRunProxy> {
        self.proxies.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TextRunProxy> {
        self.proxies.iter()
    }

    /// Maps an on-screen point to the proxy under it. Later runs paint above
    /// earlier ones, so the scan runs back to front.
    pub fn hit_test(&self, x: f32, y: f32) -> Option<usize> {
        let h_scale = self.viewport.horizontal_magnitude();
        for (index, proxy) in self.proxies.iter().enumerate().rev() {
            let left = proxy.composed_transform.e;
            let baseline = proxy.composed_transform.f;
            let width = proxy.width * h_scale;
            let height = proxy.derived_font_size;
            if x >= left && x <= left + width && y >= baseline - height && y <= baseline {
                return Some(index);
            }
        }
        None
    }
}

/// Availability of the page-action affordances for the rendered page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageActions {
    pub can_delete: bool,
    pub can_move_up: bool,
    pub can_move_down: bool,
}

impl PageActions {
    pub fn for_page(page: usize, total: usize) -> Self {
        Self {
            can_delete: total > 0,
            can_move_up: page > 1,
            can_move_down: page < total,
        }
    }
}

/// Everything produced by rendering a single page: the raster image, the
/// exact viewport pixel dimensions the canvas must adopt, the rebuilt text
/// overlay, and the page-action state.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub page_index: usize,
    pub width: u32,
    pub height: u32,
    pub image: RenderImage,
    pub overlay: OverlayLayer,
    pub actions: PageActions,
}

/// Renders one page. The caller is responsible for clamping `page` into
/// range first; out-of-range requests are an error, not a clamp.
pub fn render_page(raster: &dyn RasterDocument, page: usize, scale: f32) -> Result<RenderedPage> {
    let total = raster.page_count();
    if page == 0 || page > total {
        return Err(EditorError::PageIndex { page, total });
    }

    let viewport = raster.viewport(page, scale)?;
    let image = raster.rasterize(page, scale)?;
    let runs = raster.text_runs(page)?;
    let overlay = OverlayLayer::build(viewport.transform, &runs);

    Ok(RenderedPage {
        page_index: page,
        width: viewport.width,
        height: viewport.height,
        image,
        overlay,
        actions: PageActions::for_page(page, total),
    })
}

pub fn render_main_view(raster: &dyn RasterDocument, page: usize) -> Result<RenderedPage> {
    render_page(raster, page, MAIN_VIEW_SCALE)
}

/// Renders the thumbnail strip. Thumbnails carry no overlay.
pub fn render_thumbnails(raster: &dyn RasterDocument) -> Result<Vec<RenderImage>> {
    (1..=raster.page_count())
        .map(|page| raster.rasterize(page, THUMBNAIL_SCALE))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedViewState {
    pub current_page: usize,
}

impl Default for PersistedViewState {
    fn default() -> Self {
        Self { current_page: 1 }
    }
}

pub trait StateStore: Send + Sync {
    fn load(&self, id: &DocumentId) -> Result<Option<PersistedViewState>>;
    fn save(&self, id: &DocumentId, state: &PersistedViewState) -> Result<()>;
}

pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn state_path(&self, id: &DocumentId) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }
}

impl StateStore for FileStateStore {
    fn load(&self, id: &DocumentId) -> Result<Option<PersistedViewState>> {
        let path = self.state_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let mut file = File::open(&path)?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        let state = serde_json::from_str(&buf)
            .map_err(|err| EditorError::Parse(format!("state file {path:?}: {err}")))?;
        Ok(Some(state))
    }

    fn save(&self, id: &DocumentId, state: &PersistedViewState) -> Result<()> {
        let path = self.state_path(id);
        let tmp = path.with_extension("json.tmp");
        let payload = serde_json::to_string_pretty(state)
            .map_err(|err| EditorError::Serialize(err.to_string()))?;
        let mut file = File::create(&tmp)?;
        file.write_all(payload.as_bytes())?;
        file.flush()?;
        fs::rename(tmp, path)?;
        Ok(())
    }
}

pub struct MemoryStateStore {
    inner: Mutex<HashMap<DocumentId, PersistedViewState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, id: &DocumentId) -> Result<Option<PersistedViewState>> {
        Ok(self.inner.lock().get(id).cloned())
    }

    fn save(&self, id: &DocumentId, state: &PersistedViewState) -> Result<()> {
        self.inner.lock().insert(*id, state.clone());
        Ok(())
    }
}

/// The single active editing context. Owns the document's dual
/// representation: a read-only raster view and a mutable document view, both
/// always parsed from the same byte buffer. Every mutating operation ends by
/// re-serializing and reloading, so the two views never diverge for longer
/// than the reload call.
pub struct EditorSession {
    raster_engine: Arc<dyn RasterEngine>,
    doc_engine: Arc<dyn DocumentEngine>,
    store: Arc<dyn StateStore>,
    source_id: Option<DocumentId>,
    raster: Option<Box<dyn RasterDocument>>,
    document: Option<Box<dyn PageDocument>>,
    original_bytes: Vec<u8>,
    current_page: usize,
    total_pages: usize,
    view: Option<RenderedPage>,
    busy: bool,
}

impl EditorSession {
    pub fn new(
        raster_engine: Arc<dyn RasterEngine>,
        doc_engine: Arc<dyn DocumentEngine>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            raster_engine,
            doc_engine,
            store,
            source_id: None,
            raster: None,
            document: None,
            original_bytes: Vec::new(),
            current_page: 1,
            total_pages: 0,
            view: None,
            busy: false,
        }
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    pub fn has_document(&self) -> bool {
        self.document.is_some()
    }

    pub fn view(&self) -> Option<&RenderedPage> {
        self.view.as_ref()
    }

    pub fn original_bytes(&self) -> &[u8] {
        &self.original_bytes
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    fn enter_busy(&mut self) -> Result<()> {
        if self.busy {
            return Err(EditorError::Busy);
        }
        self.busy = true;
        Ok(())
    }

    /// Loads a byte buffer into the session. This is the single
    /// reconciliation point: both views are re-parsed from the same bytes and
    /// nothing is committed unless the whole load succeeds.
    #[instrument(skip(self, bytes))]
    pub fn load(&mut self, bytes: Vec<u8>) -> Result<()> {
        self.enter_busy()?;
        let result = self.load_inner(bytes);
        self.busy = false;
        result
    }

    /// Loads bytes read from `path`, restoring the last persisted page.
    pub fn open_path(&mut self, path: &Path, bytes: Vec<u8>) -> Result<()> {
        let id = document_id_for_path(path);
        let restored = self.store.load(&id).unwrap_or(None);
        self.load(bytes)?;
        self.source_id = Some(id);
        if let Some(state) = restored {
            if self.total_pages > 0 && state.current_page != self.current_page {
                self.navigate_to(state.current_page)?;
            }
        }
        Ok(())
    }

    /// Records the current page for path-backed documents.
    pub fn persist(&self) -> Result<()> {
        if let Some(id) = &self.source_id {
            if self.total_pages > 0 {
                self.store.save(
                    id,
                    &PersistedViewState {
                        current_page: self.current_page,
                    },
                )?;
            }
        }
        Ok(())
    }

    fn load_inner(&mut self, bytes: Vec<u8>) -> Result<()> {
        let raster = self.raster_engine.parse(&bytes)?;
        let document = self.doc_engine.parse(&bytes)?;
        let total = raster.page_count();

        if total == 0 {
            self.raster = Some(raster);
            self.document = Some(document);
            self.original_bytes = bytes;
            self.total_pages = 0;
            self.current_page = 1;
            self.view = None;
            return Ok(());
        }

        let page = self.current_page.clamp(1, total);
        let view = render_main_view(raster.as_ref(), page)?;

        self.raster = Some(raster);
        self.document = Some(document);
        self.original_bytes = bytes;
        self.total_pages = total;
        self.current_page = page;
        self.view = Some(view);
        Ok(())
    }

    /// Reloads after a mutation was staged on the document view. On failure
    /// the staged mutation is rolled back by re-parsing the last committed
    /// bytes, so the document view never stays divergent from the raster
    /// view and a later save cannot pick up the failed mutation.
    fn reload_after_mutation(&mut self, bytes: Vec<u8>, page: usize) -> Result<()> {
        let prior_page = self.current_page;
        self.current_page = page;
        match self.load_inner(bytes) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.current_page = prior_page;
                if self.original_bytes.is_empty() {
                    self.document = None;
                } else {
                    match self.doc_engine.parse(&self.original_bytes) {
                        Ok(document) => self.document = Some(document),
                        Err(parse_err) => {
                            warn!(
                                ?parse_err,
                                "could not restore the document view after a failed reload"
                            );
                            self.document = None;
                        }
                    }
                }
                Err(err)
            }
        }
    }

    pub fn add_page(&mut self) -> Result<()> {
        self.enter_busy()?;
        let result = self.add_page_inner();
        self.busy = false;
        result
    }

    fn add_page_inner(&mut self) -> Result<()> {
        if self.document.is_none() {
            self.document = Some(self.doc_engine.create()?);
        }
        let mut staged = None;
        if let Some(doc) = self.document.as_mut() {
            doc.add_page()?;
            staged = Some((doc.page_count(), doc.serialize()?));
        }
        let Some((new_total, bytes)) = staged else {
            return Ok(());
        };
        self.reload_after_mutation(bytes, new_total)
    }

    pub fn delete_page(&mut self) -> Result<()> {
        self.enter_busy()?;
        let result = self.delete_page_inner();
        self.busy = false;
        result
    }

    fn delete_page_inner(&mut self) -> Result<()> {
        if self.total_pages == 0 {
            return Ok(());
        }
        let page = self.current_page;
        let mut staged = None;
        if let Some(doc) = self.document.as_mut() {
            doc.remove_page(page)?;
            staged = Some(doc.serialize()?);
        }
        let Some(bytes) = staged else {
            return Ok(());
        };
        // The current page index is deliberately left untouched here; the
        // clamp in load is solely responsible for keeping it valid.
        self.reload_after_mutation(bytes, self.current_page)
    }

    pub fn move_page_up(&mut self) -> Result<()> {
        self.enter_busy()?;
        let result = self.move_page_inner(-1);
        self.busy = false;
        result
    }

    pub fn move_page_down(&mut self) -> Result<()> {
        self.enter_busy()?;
        let result = self.move_page_inner(1);
        self.busy = false;
        result
    }

    fn move_page_inner(&mut self, direction: isize) -> Result<()> {
        let page = self.current_page;
        let target = match direction {
            -1 if page > 1 => page - 1,
            1 if page < self.total_pages => page + 1,
            _ => return Ok(()),
        };
        let mut staged = None;
        if let Some(doc) = self.document.as_mut() {
            doc.move_page(page, target)?;
            staged = Some(doc.serialize()?);
        }
        let Some(bytes) = staged else {
            return Ok(());
        };
        self.reload_after_mutation(bytes, target)
    }

    /// Shows a page without reloading the document view, so in-memory edits
    /// staged there are preserved. The raster view is re-derived from the
    /// original bytes instead.
    pub fn navigate_to(&mut self, page: usize) -> Result<()> {
        self.enter_busy()?;
        let result = self.navigate_to_inner(page);
        self.busy = false;
        result
    }

    fn navigate_to_inner(&mut self, page: usize) -> Result<()> {
        if self.total_pages == 0 {
            return Ok(());
        }
        let raster = self.raster_engine.parse(&self.original_bytes)?;
        let page = page.clamp(1, raster.page_count());
        let view = render_main_view(raster.as_ref(), page)?;
        self.raster = Some(raster);
        self.current_page = page;
        self.view = Some(view);
        Ok(())
    }

    /// Renders the thumbnail strip from the original bytes, leaving the
    /// current render state undisturbed.
    pub fn thumbnails(&self) -> Result<Vec<RenderImage>> {
        if self.total_pages == 0 {
            return Ok(Vec::new());
        }
        let raster = self.raster_engine.parse(&self.original_bytes)?;
        render_thumbnails(raster.as_ref())
    }

    /// Serializes the document view and hands it to the host's save
    /// operation. A cancelled dialog or a missing document is a silent no-op.
    pub async fn save(&self, shell: &dyn HostShell) -> Result<()> {
        let Some(doc) = self.document.as_ref() else {
            return Ok(());
        };
        let bytes = doc.serialize()?;
        let Some(path) = shell.pick_save_path().await? else {
            return Ok(());
        };
        shell.write_file(&path, &bytes).await
    }

    /// Translates an in-place text edit back into the document: covers the
    /// old glyphs opaquely, draws the replacement at the recovered baseline
    /// and size, then serializes and reloads. Nothing reaches the session
    /// unless the reload succeeds.
    #[instrument(skip(self, proxy))]
    pub fn apply_edit(&mut self, proxy: &TextRunProxy, new_text: &str) -> Result<()> {
        self.enter_busy()?;
        let result = self.apply_edit_inner(proxy, new_text);
        self.busy = false;
        result
    }

    fn apply_edit_inner(&mut self, proxy: &TextRunProxy, new_text: &str) -> Result<()> {
        let page = self.current_page;
        let mut staged = None;
        if let Some(doc) = self.document.as_mut() {
            let (_, page_height) = doc.page_size(page)?;
            let source = proxy.source_transform;
            let size = source.font_size();
            let x = source.e;
            // The raster view reports top-down coordinates; the document
            // model draws bottom-up.
            let y_doc = page_height - source.f;

            let rect = CoverRect {
                x: x - 1.0,
                y: y_doc - 0.3 * size,
                width: proxy.width + 2.0,
                height: proxy.height + 0.2 * size,
            };
            doc.draw_cover_rect(page, rect, Color::WHITE)?;

            let font = doc.embed_standard_font(page, StandardFont::Helvetica)?;
            doc.draw_text(page, new_text, x, y_doc, &font, size, Color::BLACK)?;
            staged = Some(doc.serialize()?);
        }
        let Some(bytes) = staged else {
            return Ok(());
        };
        self.reload_after_mutation(bytes, self.current_page)
    }
}

/// An in-flight inline edit: the proxy being edited, its original snapshot,
/// and the current input draft. At most one exists per editor.
#[derive(Debug, Clone)]
pub struct PendingEdit {
    pub proxy_index: usize,
    pub original: TextRunProxy,
    draft: String,
}

impl PendingEdit {
    pub fn draft(&self) -> &str {
        &self.draft
    }
}

/// A committed edit whose text actually changed; feed it to
/// [`EditorSession::apply_edit`].
#[derive(Debug, Clone)]
pub struct CommittedEdit {
    pub proxy: TextRunProxy,
    pub text: String,
}

/// Per-overlay interaction state machine. A proxy is either displayed or
/// being edited inline; a new edit may not begin while one is open.
pub struct InlineEditor {
    enabled: bool,
    pending: Option<PendingEdit>,
}

impl InlineEditor {
    pub fn new() -> Self {
        Self {
            enabled: true,
            pending: None,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending(&self) -> Option<&PendingEdit> {
        self.pending.as_ref()
    }

    /// Display to editing, only when interaction is enabled and no other
    /// edit is open.
    pub fn begin_edit(&mut self, overlay: &OverlayLayer, index: usize) -> Option<&PendingEdit> {
        if !self.enabled || self.pending.is_some() {
            return None;
        }
        let proxy = overlay.proxy(index)?;
        self.pending = Some(PendingEdit {
            proxy_index: index,
            original: proxy.clone(),
            draft: proxy.text.clone(),
        });
        self.pending.as_ref()
    }

    pub fn update_draft(&mut self, text: &str) {
        if let Some(pending) = self.pending.as_mut() {
            pending.draft = text.to_owned();
        }
    }

    /// Editing back to display. Returns the edit only when the committed
    /// value differs from the original text, so no-op edits never mutate the
    /// document or force a reload.
    pub fn commit(&mut self) -> Option<CommittedEdit> {
        let pending = self.pending.take()?;
        if pending.draft == pending.original.text {
            return None;
        }
        Some(CommittedEdit {
            proxy: pending.original,
            text: pending.draft,
        })
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }
}

impl Default for InlineEditor {
    fn default() -> Self {
        Self::new()
    }
}
