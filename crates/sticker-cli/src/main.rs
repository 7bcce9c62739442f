use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use sticker_contracts::events;
use sticker_contracts::grid::{GridSpec, DEFAULT_COLS, DEFAULT_ROWS};
use sticker_contracts::modes::GenerationMode;
use sticker_contracts::session::{parse_command, SessionCommand, SESSION_HELP_COMMANDS};
use sticker_engine::codec::{mime_for_path, sniff_mime};
use sticker_engine::{
    select_transport, GenerationRequest, HttpImageFetcher, ImageReference, StickerEngine,
};

#[derive(Debug, Parser)]
#[command(name = "sticker-rs", version, about = "Fox sticker sheet generator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate one image from an upload.
    Generate(GenerateArgs),
    /// Cut a saved sheet (or a generated reference) into a zip of tiles.
    Slice(SliceArgs),
    /// Generate, then zip the sheet (or save the single image).
    Run(RunArgs),
    /// Interactive session.
    Session(SessionArgs),
}

#[derive(Debug, Parser)]
struct TransportArgs {
    /// Base URL of a deployed gateway; `/api/generate` is appended.
    #[arg(long)]
    endpoint: Option<String>,
    /// Answer locally with a placeholder sheet.
    #[arg(long)]
    dryrun: bool,
    #[arg(long)]
    timeout_secs: Option<u64>,
}

impl TransportArgs {
    fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Parser)]
struct OutputArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
}

impl OutputArgs {
    fn events_path(&self) -> PathBuf {
        self.events
            .clone()
            .unwrap_or_else(|| self.out.join("events.jsonl"))
    }
}

#[derive(Debug, Parser)]
struct GridArgs {
    #[arg(long, default_value_t = DEFAULT_ROWS, value_parser = clap::value_parser!(u32).range(1..=10))]
    rows: u32,
    #[arg(long, default_value_t = DEFAULT_COLS, value_parser = clap::value_parser!(u32).range(1..=10))]
    cols: u32,
}

impl GridArgs {
    fn grid(&self) -> Result<GridSpec> {
        Ok(GridSpec::new(self.rows, self.cols)?)
    }
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long, default_value_t = GenerationMode::StickerPack)]
    mode: GenerationMode,
    #[arg(long, default_value = "")]
    password: String,
    /// Also save the generated image into `--out`.
    #[arg(long)]
    save: bool,
    #[command(flatten)]
    transport: TransportArgs,
    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Debug, Parser)]
struct SliceArgs {
    #[arg(long, required_unless_present = "reference", conflicts_with = "reference")]
    image: Option<PathBuf>,
    /// Image URL or data URI returned by a previous generation.
    #[arg(long)]
    reference: Option<String>,
    #[command(flatten)]
    grid: GridArgs,
    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long, default_value_t = GenerationMode::StickerPack)]
    mode: GenerationMode,
    #[arg(long, default_value = "")]
    password: String,
    #[command(flatten)]
    grid: GridArgs,
    #[command(flatten)]
    transport: TransportArgs,
    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Debug, Parser)]
struct SessionArgs {
    /// Skip `/login` by supplying the password up front.
    #[arg(long)]
    password: Option<String>,
    #[command(flatten)]
    transport: TransportArgs,
    #[command(flatten)]
    output: OutputArgs,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("sticker-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Slice(args) => run_slice(args),
        Command::Run(args) => run_run(args),
        Command::Session(args) => {
            run_session(args)?;
            Ok(0)
        }
    }
}

fn open_engine(transport: Option<&TransportArgs>, output: &OutputArgs) -> Result<StickerEngine> {
    let timeout = transport.and_then(TransportArgs::timeout);
    let fetcher = Box::new(HttpImageFetcher::new(timeout)?);
    match transport {
        Some(args) => StickerEngine::new(
            &output.out,
            output.events_path(),
            select_transport(args.endpoint.as_deref(), args.dryrun, timeout)?,
            fetcher,
        ),
        None => StickerEngine::without_transport(&output.out, output.events_path(), fetcher),
    }
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let mut engine = open_engine(Some(&args.transport), &args.output)?;
    let upload = Upload::read(&args.image)?;
    let request = upload.request(args.mode, &args.password);
    let result = engine.generate(&request, None).and_then(|outcome| {
        println!("{}", outcome.reference);
        if args.save {
            let path = engine.download_single(&outcome.reference, None)?;
            println!("Saved {}", path.display());
        }
        Ok(())
    });
    engine.finish()?;
    result?;
    Ok(0)
}

fn run_slice(args: SliceArgs) -> Result<i32> {
    let grid = args.grid.grid()?;
    let mut engine = open_engine(None, &args.output)?;
    let result = match (&args.image, &args.reference) {
        (Some(path), _) => engine.slice_file_and_pack(path, grid, None),
        (None, Some(raw)) => engine.slice_and_pack(&ImageReference::parse(raw), grid, None),
        (None, None) => Err(anyhow::anyhow!("slice requires --image or --reference")),
    };
    engine.finish()?;
    let packed = result?;
    println!(
        "Packed {} stickers ({}) into {}",
        packed.entry_names.len(),
        packed.grid,
        packed.path.display()
    );
    Ok(0)
}

fn run_run(args: RunArgs) -> Result<i32> {
    let grid = args.grid.grid()?;
    let mut engine = open_engine(Some(&args.transport), &args.output)?;
    let upload = Upload::read(&args.image)?;
    let request = upload.request(args.mode, &args.password);
    let result = engine.generate(&request, None).and_then(|outcome| {
        if args.mode.produces_sheet() {
            let packed = engine.slice_and_pack(&outcome.reference, grid, None)?;
            println!(
                "Packed {} stickers ({}) into {}",
                packed.entry_names.len(),
                packed.grid,
                packed.path.display()
            );
        } else {
            let path = engine.download_single(&outcome.reference, None)?;
            println!("Saved {}", path.display());
        }
        Ok(())
    });
    engine.finish()?;
    result?;
    Ok(0)
}

/// An image picked for upload, read once.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Upload {
    path: PathBuf,
    bytes: Vec<u8>,
    mime_type: String,
}

impl Upload {
    fn read(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let mime_type = sniff_mime(&bytes)
            .or_else(|| mime_for_path(path))
            .unwrap_or("image/png")
            .to_string();
        Ok(Self {
            path: path.to_path_buf(),
            bytes,
            mime_type,
        })
    }

    fn request(&self, mode: GenerationMode, credential: &str) -> GenerationRequest {
        GenerationRequest {
            image: self.bytes.clone(),
            mime_type: self.mime_type.clone(),
            mode,
            credential: credential.to_string(),
        }
    }
}

/// Front-end state that survives between commands. Failed actions leave it
/// untouched apart from the cleared result of a failed generation.
#[derive(Debug, Default)]
struct SessionState {
    credential: Option<String>,
    upload: Option<Upload>,
    mode: GenerationMode,
    grid: GridSpec,
    generated: Option<ImageReference>,
}

impl SessionState {
    fn login(&mut self, password: &str) -> bool {
        if password.trim().is_empty() {
            return false;
        }
        self.credential = Some(password.to_string());
        true
    }

    fn select_upload(&mut self, upload: Upload) {
        self.upload = Some(upload);
        self.generated = None;
    }

    fn generation_request(&self) -> Result<GenerationRequest> {
        let Some(credential) = self.credential.as_deref() else {
            bail!("log in first with /login <password>");
        };
        let Some(upload) = self.upload.as_ref() else {
            bail!("upload an image first with /upload <path>");
        };
        Ok(upload.request(self.mode, credential))
    }

    fn generated(&self) -> Result<&ImageReference> {
        self.generated
            .as_ref()
            .context("nothing generated yet; run /generate first")
    }

    fn back(&mut self) {
        self.generated = None;
    }

    fn status_lines(&self) -> Vec<String> {
        let upload = self
            .upload
            .as_ref()
            .map(|upload| format!("{} ({})", upload.path.display(), upload.mime_type))
            .unwrap_or_else(|| "none".to_string());
        let generated = self
            .generated
            .as_ref()
            .map(|reference| reference.kind().to_string())
            .unwrap_or_else(|| "none".to_string());
        vec![
            format!("Logged in: {}", if self.credential.is_some() { "yes" } else { "no" }),
            format!("Upload: {upload}"),
            format!("Mode: {}", self.mode),
            format!("Grid: {} ({} stickers)", self.grid, self.grid.tile_count()),
            format!("Generated: {generated}"),
        ]
    }
}

fn run_session(args: SessionArgs) -> Result<()> {
    let mut engine = open_engine(Some(&args.transport), &args.output)?;
    let mut state = SessionState::default();
    if let Some(password) = args.password.as_deref() {
        state.login(password);
    }

    let stdin = io::stdin();
    let mut line = String::new();
    println!(
        "Sticker session started ({}). Type /help for commands.",
        engine.transport_name().unwrap_or("no transport")
    );

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let command = parse_command(line.trim_end_matches(['\n', '\r']));
        if command.action == "noop" {
            continue;
        }
        if command.action == "quit" {
            break;
        }
        if let Err(err) = apply_command(&mut engine, &mut state, &command) {
            println!("Error: {err:#}");
        }
    }

    engine.finish()?;
    Ok(())
}

fn apply_command(
    engine: &mut StickerEngine,
    state: &mut SessionState,
    command: &SessionCommand,
) -> Result<()> {
    match command.action.as_str() {
        "help" => {
            println!("Commands: {}", SESSION_HELP_COMMANDS.join(" "));
        }
        "status" => {
            for line in state.status_lines() {
                println!("{line}");
            }
        }
        "login" => {
            if state.login(command.arg_str("password").unwrap_or_default()) {
                println!("Logged in.");
            } else {
                println!("/login requires a password");
            }
        }
        "set_mode" => {
            let raw = command.arg_str("mode").unwrap_or_default();
            let mode: GenerationMode = raw.parse().map_err(anyhow::Error::msg)?;
            state.mode = mode;
            println!("Mode set to {mode}");
        }
        "set_grid" => {
            if let Some(grid) = command.grid() {
                state.grid = grid;
                println!("Grid set to {grid} ({} stickers)", grid.tile_count());
            }
        }
        "upload" => {
            let Some(path) = command.arg_str("path") else {
                bail!("/upload requires a path");
            };
            let upload = Upload::read(Path::new(path))?;
            engine.emit_event(
                events::UPLOAD_SELECTED,
                json_object(json!({
                    "path": upload.path.to_string_lossy().to_string(),
                    "mime_type": upload.mime_type,
                    "bytes": upload.bytes.len(),
                })),
            )?;
            println!("Selected {} ({})", upload.path.display(), upload.mime_type);
            state.select_upload(upload);
        }
        "generate" => {
            let request = state.generation_request()?;
            state.generated = None;
            println!("Generating ({})...", state.mode);
            let outcome = engine.generate(&request, None)?;
            println!("Generated {} image.", outcome.reference.kind());
            state.generated = Some(outcome.reference);
        }
        "download" => {
            let reference = state.generated()?;
            let dir = command.arg_str("path").map(Path::new);
            let path = engine.download_single(reference, dir)?;
            println!("Saved {}", path.display());
        }
        "zip" => {
            let reference = state.generated()?;
            let dir = command.arg_str("path").map(Path::new);
            let packed = engine.slice_and_pack(reference, state.grid, dir)?;
            println!(
                "Packed {} stickers into {}",
                packed.entry_names.len(),
                packed.path.display()
            );
        }
        "back" => {
            state.back();
            println!("Back to upload.");
        }
        "invalid" => {
            println!(
                "{}",
                command.arg_str("reason").unwrap_or("invalid command")
            );
        }
        "unknown" => {
            let name = command.arg_str("command").unwrap_or_default();
            println!("Unknown command /{name}. Type /help for commands.");
        }
        other => {
            println!("Unhandled action: {other}");
        }
    }
    Ok(())
}

fn json_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
