//! Declarative composition rendering.
//!
//! The renderer CLI is driven in two steps: a one-time `bundle` of the
//! composition project, then one `render` per request against that bundle.
//! The bundle is prepared lazily by the first render and shared by all later
//! ones; concurrent first renders wait on the same preparation.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Instant;

use regex::Regex;
use serde_json::json;
use tokio::sync::{mpsc, watch, OnceCell};
use tracing::{info, warn};
use vedit_models::subtitle::cues_are_ordered;
use vedit_models::{CompositionRequest, RenderOutput};

use crate::error::{MediaResult, ValidationError};
use crate::fs_utils::{ensure_dir, file_size, move_file, prepare_output, require_file};
use crate::invoker::EncodeInvoker;
use crate::probe::probe_media;
use crate::progress::{DiagnosticParser, EncodeStats, ProgressUpdate};

static FRAME_BATCH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d+)\s*/\s*(\d+)\b").expect("valid regex"));

/// How to reach the renderer CLI.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    /// Executable, e.g. `npx`
    pub program: PathBuf,
    /// Arguments placed before the subcommand, e.g. `["remotion"]`
    pub base_args: Vec<String>,
    /// Composition project entry point
    pub entry_point: PathBuf,
    /// Where the prepared bundle is written
    pub bundle_dir: PathBuf,
    /// Parallel frame renders, left to the renderer when unset
    pub concurrency: Option<u32>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("npx"),
            base_args: vec!["remotion".to_string()],
            entry_point: PathBuf::from("src/index.ts"),
            bundle_dir: std::env::temp_dir().join("vedit-bundle"),
            concurrency: None,
        }
    }
}

/// Parses `rendered/total` frame batch lines.
#[derive(Debug, Clone, Default)]
pub struct FrameProgressParser {
    rendered: u64,
    total: u64,
}

impl FrameProgressParser {
    pub fn total_frames(&self) -> u64 {
        self.total
    }

    pub fn rendered_frames(&self) -> u64 {
        self.rendered
    }
}

impl DiagnosticParser for FrameProgressParser {
    fn parse_line(&mut self, line: &str) -> Option<ProgressUpdate> {
        let caps = FRAME_BATCH_RE.captures(line)?;
        let rendered: u64 = caps[1].parse().ok()?;
        let total: u64 = caps[2].parse().ok()?;
        if total == 0 || rendered > total {
            return None;
        }

        self.rendered = self.rendered.max(rendered);
        self.total = self.total.max(total);

        let mut update = ProgressUpdate::steps(rendered, total);
        update.stats = EncodeStats {
            frame: rendered,
            ..EncodeStats::default()
        };
        Some(update)
    }
}

/// Handle owning the renderer's one-time preparation.
#[derive(Debug)]
pub struct CompositionRenderer {
    config: RendererConfig,
    bundle: OnceCell<PathBuf>,
}

impl CompositionRenderer {
    pub fn new(config: RendererConfig) -> Self {
        Self {
            config,
            bundle: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn is_prepared(&self) -> bool {
        self.bundle.initialized()
    }

    fn invoker(&self, cancel: Option<watch::Receiver<bool>>) -> EncodeInvoker {
        let invoker = EncodeInvoker::new(&self.config.program);
        match cancel {
            Some(rx) => invoker.with_cancel(rx),
            None => invoker,
        }
    }

    fn command_args<I, S>(&self, args: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config
            .base_args
            .iter()
            .cloned()
            .chain(args.into_iter().map(Into::into))
            .collect()
    }

    /// Prepare the bundle once. Failed preparations are retried by the next caller.
    pub async fn prepare(&self) -> MediaResult<&Path> {
        let bundle = self
            .bundle
            .get_or_try_init(|| async {
                let dir = ensure_dir(&self.config.bundle_dir).await?;
                let args = self.command_args([
                    "bundle".to_string(),
                    self.config.entry_point.to_string_lossy().to_string(),
                    "--out-dir".to_string(),
                    dir.to_string_lossy().to_string(),
                ]);

                info!(entry = %self.config.entry_point.display(), bundle = %dir.display(), "Bundling compositions");
                self.invoker(None).run(&args, None, None).await?;
                Ok::<_, crate::error::MediaError>(dir)
            })
            .await?;
        Ok(bundle.as_path())
    }

    /// Render one composition to a video file.
    pub async fn render(
        &self,
        req: &CompositionRequest,
        cancel: Option<watch::Receiver<bool>>,
        progress: Option<mpsc::Sender<ProgressUpdate>>,
    ) -> MediaResult<RenderOutput> {
        validate_request(req)?;
        let output = prepare_output(&req.output_path, req.overwrite).await?;
        let bundle = self.prepare().await?.to_path_buf();

        let workdir = tempfile::Builder::new().prefix("vedit-render-").tempdir()?;
        let props_path = workdir.path().join("props.json");
        let staging = workdir.path().join(
            output
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "render.mp4".into()),
        );

        let props = json!({
            "sourcePath": req.props.source_path,
            "cues": req.props.cues,
            "style": req.props.style,
            "output": req.format,
        });
        tokio::fs::write(&props_path, serde_json::to_vec(&props)?).await?;

        let mut args = vec![
            "render".to_string(),
            bundle.to_string_lossy().to_string(),
            req.composition_id.clone(),
            staging.to_string_lossy().to_string(),
            format!("--props={}", props_path.display()),
            format!("--width={}", req.format.width),
            format!("--height={}", req.format.height),
        ];
        if let Some(concurrency) = self.config.concurrency {
            args.push(format!("--concurrency={}", concurrency));
        }

        info!(
            composition = %req.composition_id,
            width = req.format.width,
            height = req.format.height,
            fps = req.format.fps,
            "Rendering composition"
        );

        let started = Instant::now();
        let (_, parser) = self
            .invoker(cancel)
            .run_with_parser(&self.command_args(args), FrameProgressParser::default(), progress)
            .await?;
        let render_time_ms = started.elapsed().as_millis() as u64;

        move_file(&staging, &output).await?;

        let total_frames = parser.total_frames();
        let duration_sec = if total_frames > 0 && req.format.fps > 0 {
            total_frames as f64 / f64::from(req.format.fps)
        } else {
            match probe_media(&output).await {
                Ok(info) => info.duration,
                Err(e) => {
                    warn!(error = %e, "Could not determine rendered duration");
                    0.0
                }
            }
        };

        Ok(RenderOutput {
            size_bytes: file_size(&output).await?,
            output_path: output,
            duration_sec,
            total_frames,
            render_time_ms,
        })
    }
}

fn validate_request(req: &CompositionRequest) -> Result<(), ValidationError> {
    if req.composition_id.trim().is_empty() {
        return Err(ValidationError::EmptyCompositionId);
    }
    require_file(&req.props.source_path)?;
    if !cues_are_ordered(&req.props.cues) {
        return Err(ValidationError::MalformedCues);
    }
    Ok(())
}
