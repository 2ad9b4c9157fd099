use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use directories::ProjectDirs;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::sync::Mutex;
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

use pagemark_core::{
    DocumentEngine, EditorError, EditorSession, FileStateStore, HostShell, InlineEditor,
    RenderImage, StateStore,
};
use pagemark_doc::LopdfDocumentEngine;
use pagemark_render::PdfiumRasterEngine;

#[derive(Debug, Parser)]
#[command(name = "pagemark", version, about = "PDF viewer and in-place text editor")]
struct Args {
    /// PDF file to open; without it a blank one-page document is created
    file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "pagemark", "pagemark")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let state_dir = project_dirs.data_local_dir().join("state");
    let store: Arc<dyn StateStore> = Arc::new(FileStateStore::new(state_dir)?);
    let raster_engine = Arc::new(PdfiumRasterEngine::new()?);
    let doc_engine: Arc<dyn DocumentEngine> = Arc::new(LopdfDocumentEngine::new());

    let mut session = EditorSession::new(raster_engine, Arc::clone(&doc_engine), store);
    let shell = LineShell::new(BufReader::new(tokio::io::stdin()));

    match args.file {
        Some(path) => {
            let bytes = shell
                .read_file(&path)
                .await
                .with_context(|| format!("failed to read {path:?}"))?;
            session
                .open_path(&path, bytes)
                .with_context(|| format!("failed to open {path:?}"))?;
        }
        None => {
            // A fresh one-page document is best effort; a failure leaves the
            // empty viewer.
            if let Err(err) = load_blank_document(&mut session, doc_engine.as_ref()) {
                warn!(?err, "failed to create the default document");
            }
        }
    }

    run_repl(&mut session, &shell).await?;

    session.persist()?;
    Ok(())
}

fn load_blank_document(
    session: &mut EditorSession,
    doc_engine: &dyn DocumentEngine,
) -> Result<(), EditorError> {
    let mut document = doc_engine.create()?;
    document.add_page()?;
    let bytes = document.serialize()?;
    session.load(bytes)
}

async fn run_repl(session: &mut EditorSession, shell: &StdioShell) -> Result<()> {
    let mut editor = InlineEditor::new();

    print_status(session);
    loop {
        print!("> ");
        use std::io::Write as _;
        std::io::stdout().flush().ok();

        let Some(line) = shell.next_command().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.splitn(2, ' ');
        let command = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or("").trim();

        let outcome = match command {
            "open" => open_document(session, shell, rest).await,
            "next" => session
                .navigate_to(session.current_page().saturating_add(1))
                .map_err(Into::into),
            "prev" => session
                .navigate_to(session.current_page().saturating_sub(1).max(1))
                .map_err(Into::into),
            "goto" => goto_page(session, rest),
            "runs" => {
                list_runs(session);
                Ok(())
            }
            "edit" => edit_run(session, &mut editor, rest),
            "addpage" => session.add_page().map_err(Into::into),
            "delpage" => session.delete_page().map_err(Into::into),
            "moveup" => session.move_page_up().map_err(Into::into),
            "movedown" => session.move_page_down().map_err(Into::into),
            "save" => session.save(shell).await.map_err(Into::into),
            "export" => export_view(session, rest),
            "thumbs" => export_thumbnails(session, rest),
            "help" => {
                print_help();
                Ok(())
            }
            "quit" | "exit" => break,
            other => Err(anyhow!("unknown command {other:?}; try help")),
        };

        match outcome {
            Ok(()) => print_status(session),
            Err(err) => eprintln!("error: {err:#}"),
        }
    }
    Ok(())
}

async fn open_document(session: &mut EditorSession, shell: &StdioShell, arg: &str) -> Result<()> {
    let path = if arg.is_empty() {
        match shell.pick_open_path().await? {
            Some(path) => path,
            None => return Ok(()),
        }
    } else {
        PathBuf::from(arg)
    };
    let bytes = shell
        .read_file(&path)
        .await
        .with_context(|| format!("failed to read {path:?}"))?;
    session
        .open_path(&path, bytes)
        .with_context(|| format!("failed to open {path:?}"))?;
    Ok(())
}

fn goto_page(session: &mut EditorSession, arg: &str) -> Result<()> {
    let page: usize = arg.parse().context("goto needs a page number")?;
    session.navigate_to(page)?;
    Ok(())
}

fn list_runs(session: &EditorSession) {
    let Some(view) = session.view() else {
        println!("no page rendered");
        return;
    };
    if view.overlay.is_empty() {
        println!("page {} has no text runs", view.page_index);
        return;
    }
    for (index, proxy) in view.overlay.iter().enumerate() {
        println!(
            "[{index}] {:?} ({} {:.1}pt)",
            proxy.text, proxy.font_name, proxy.derived_font_size
        );
    }
}

fn edit_run(session: &mut EditorSession, editor: &mut InlineEditor, arg: &str) -> Result<()> {
    let mut parts = arg.splitn(2, ' ');
    let index: usize = parts
        .next()
        .unwrap_or_default()
        .parse()
        .context("edit needs a run index and replacement text")?;
    let replacement = parts
        .next()
        .ok_or_else(|| anyhow!("edit needs replacement text"))?;

    let overlay = session
        .view()
        .map(|view| view.overlay.clone())
        .ok_or_else(|| anyhow!("no page rendered"))?;

    editor
        .begin_edit(&overlay, index)
        .ok_or_else(|| anyhow!("run {index} cannot be edited right now"))?;
    editor.update_draft(replacement);
    match editor.commit() {
        Some(edit) => {
            session.apply_edit(&edit.proxy, &edit.text)?;
            Ok(())
        }
        None => {
            println!("text unchanged, nothing to do");
            Ok(())
        }
    }
}

fn export_view(session: &EditorSession, arg: &str) -> Result<()> {
    if arg.is_empty() {
        return Err(anyhow!("export needs an output path"));
    }
    let view = session.view().ok_or_else(|| anyhow!("no page rendered"))?;
    write_png(&view.image, Path::new(arg))?;
    println!("wrote page {} to {arg}", view.page_index);
    Ok(())
}

fn export_thumbnails(session: &EditorSession, arg: &str) -> Result<()> {
    if arg.is_empty() {
        return Err(anyhow!("thumbs needs an output directory"));
    }
    let dir = Path::new(arg);
    fs::create_dir_all(dir).with_context(|| format!("failed to create {dir:?}"))?;
    let thumbnails = session.thumbnails()?;
    if thumbnails.is_empty() {
        println!("no pages to render");
        return Ok(());
    }
    for (index, thumbnail) in thumbnails.iter().enumerate() {
        let path = dir.join(format!("page-{:03}.png", index + 1));
        write_png(thumbnail, &path)?;
    }
    println!("wrote {} thumbnails to {arg}", thumbnails.len());
    Ok(())
}

fn write_png(image: &RenderImage, path: &Path) -> Result<()> {
    let buffer = image::RgbaImage::from_raw(image.width, image.height, image.pixels.clone())
        .ok_or_else(|| anyhow!("rendered image has inconsistent dimensions"))?;
    buffer
        .save(path)
        .with_context(|| format!("failed to write {path:?}"))?;
    Ok(())
}

fn print_status(session: &EditorSession) {
    if session.total_pages() == 0 {
        println!("no document loaded");
        return;
    }
    let Some(view) = session.view() else {
        println!("page {}/{}", session.current_page(), session.total_pages());
        return;
    };
    let actions = view.actions;
    println!(
        "page {}/{} ({}x{} px, {} runs; delete:{} up:{} down:{})",
        session.current_page(),
        session.total_pages(),
        view.width,
        view.height,
        view.overlay.len(),
        actions.can_delete,
        actions.can_move_up,
        actions.can_move_down,
    );
}

fn print_help() {
    println!(
        "commands:\n  \
         open [path]       open a document (prompts without a path)\n  \
         next / prev       step one page\n  \
         goto <n>          show page n\n  \
         runs              list the current page's text runs\n  \
         edit <i> <text>   replace run i's text in the document\n  \
         addpage           append a blank page and jump to it\n  \
         delpage           delete the current page\n  \
         moveup / movedown swap the current page with its neighbor\n  \
         save              write the document (prompts for a path)\n  \
         export <file>     write the current view as PNG\n  \
         thumbs <dir>      write all page thumbnails as PNGs\n  \
         quit              exit"
    );
}

/// Host file operations over a single buffered line source plus stdout.
/// "Dialogs" are line prompts; an empty answer cancels. The repl and the
/// prompts share the one reader, so buffered read-ahead on one side can
/// never swallow the other side's input.
struct LineShell<R> {
    lines: Mutex<Lines<R>>,
}

type StdioShell = LineShell<BufReader<tokio::io::Stdin>>;

impl<R: AsyncBufRead + Unpin + Send> LineShell<R> {
    fn new(reader: R) -> Self {
        Self {
            lines: Mutex::new(reader.lines()),
        }
    }

    async fn next_command(&self) -> pagemark_core::Result<Option<String>> {
        Ok(self.lines.lock().await.next_line().await?)
    }

    async fn prompt(&self, message: &str) -> pagemark_core::Result<Option<PathBuf>> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(message.as_bytes()).await?;
        stdout.flush().await?;

        let Some(line) = self.lines.lock().await.next_line().await? else {
            return Ok(None);
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        Ok(Some(PathBuf::from(trimmed)))
    }
}

#[async_trait::async_trait]
impl<R: AsyncBufRead + Unpin + Send> HostShell for LineShell<R> {
    async fn pick_open_path(&self) -> pagemark_core::Result<Option<PathBuf>> {
        self.prompt("path to open (empty cancels): ").await
    }

    async fn read_file(&self, path: &Path) -> pagemark_core::Result<Vec<u8>> {
        Ok(tokio::fs::read(path).await?)
    }

    async fn pick_save_path(&self) -> pagemark_core::Result<Option<PathBuf>> {
        self.prompt("path to save to (empty cancels): ").await
    }

    async fn write_file(&self, path: &Path, bytes: &[u8]) -> pagemark_core::Result<()> {
        Ok(tokio::fs::write(path, bytes).await?)
    }
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "pagemark.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prompts_share_the_repl_line_source() {
        let input: &[u8] = b"runs\n/tmp/out.pdf\n\n";
        let shell = LineShell::new(BufReader::new(input));

        // A command read followed by a prompt read must consume consecutive
        // lines from the same reader, with nothing buffered away in between.
        assert_eq!(shell.next_command().await.unwrap().as_deref(), Some("runs"));
        assert_eq!(
            shell.pick_save_path().await.unwrap(),
            Some(PathBuf::from("/tmp/out.pdf"))
        );

        // An empty answer cancels; so does end of input.
        assert_eq!(shell.pick_open_path().await.unwrap(), None);
        assert_eq!(shell.next_command().await.unwrap(), None);
    }
}
