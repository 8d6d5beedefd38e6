//! [`MediaBackend`] implementation over the ffmpeg/ffprobe CLI.

use async_trait::async_trait;
use loopcast_models::EncodingConfig;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncWrite, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::backend::{CallContext, EncodeHandle, EncodeProcess, MediaBackend};
use crate::command::{check_ffmpeg, FfmpegCommand, FfmpegInput, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::filters::{silent_audio_source, stream_concat_graph};
use crate::probe::{probe_media, MediaInfo};
use crate::registry::{ProcessRegistry, RegistrationId};
use crate::request::{
    AudioOutput, ContinuousEncodeSpec, FilterGraph, InputSpec, TranscodeRequest, VideoOutput,
};

/// Counter of transcodes retried with the portable encoder.
pub const BACKEND_FALLBACKS_METRIC: &str = "loopcast_backend_fallbacks_total";

/// Sample rate of the generated silence when a stream has no live audio.
const SILENT_SAMPLE_RATE: u32 = 48_000;

/// Longest filter graph passed inline on the command line. Longer graphs
/// go through `-filter_complex_script`; a single argument is capped by the
/// kernel at 128 KiB.
pub const INLINE_GRAPH_LIMIT: usize = 16 * 1024;

/// Backend running every request as an ffmpeg subprocess.
pub struct FfmpegBackend {
    registry: Arc<ProcessRegistry>,
    timeout_secs: Option<u64>,
}

impl FfmpegBackend {
    pub fn new(registry: Arc<ProcessRegistry>) -> Self {
        Self {
            registry,
            timeout_secs: None,
        }
    }

    /// Per-call timeout; `0` disables it.
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = (secs > 0).then_some(secs);
        self
    }

    /// Translate a declarative request into an ffmpeg command.
    pub fn build_command(request: &TranscodeRequest) -> FfmpegCommand {
        let mut cmd = FfmpegCommand::new(&request.output.path);

        for input in &request.inputs {
            cmd = cmd.input(ffmpeg_input(input));
        }

        cmd = match &request.filter {
            Some(FilterGraph::Video(chain)) => cmd.video_filter(chain.as_str()),
            Some(FilterGraph::Audio(chain)) => cmd.audio_filter(chain.as_str()),
            Some(FilterGraph::Complex { graph, maps }) => {
                let cmd = match Self::graph_script_path(request) {
                    Some(script) => cmd.filter_complex_script(script),
                    None => cmd.filter_complex(graph.as_str()),
                };
                maps.iter().fold(cmd, |cmd, m| cmd.map(m.as_str()))
            }
            None => cmd,
        };

        let encoding = &request.output.encoding;
        cmd = match request.output.video {
            VideoOutput::Encode => cmd.output_args(encoding.to_video_args()),
            VideoOutput::Copy => cmd.video_codec("copy"),
            VideoOutput::Alpha => cmd.video_codec("qtrle").output_args(["-pix_fmt", "argb"]),
            VideoOutput::Drop => cmd.no_video(),
        };

        cmd = match request.output.audio {
            AudioOutput::Encode => cmd.output_args(encoding.to_audio_args()),
            AudioOutput::Copy => cmd.audio_codec("copy"),
            AudioOutput::Lossless => cmd.audio_codec("pcm_s16le"),
            AudioOutput::RawF32 {
                sample_rate,
                channels,
            } => cmd
                .audio_codec("pcm_f32le")
                .output_args(["-ar".to_string(), sample_rate.to_string()])
                .output_args(["-ac".to_string(), channels.to_string()])
                .format("f32le"),
            AudioOutput::Drop => cmd.no_audio(),
        };

        if let Some(duration) = request.output.duration {
            cmd = cmd.duration(duration);
        }

        cmd
    }

    /// Script file for a complex graph too long to pass inline, written
    /// beside the output.
    pub fn graph_script_path(request: &TranscodeRequest) -> Option<PathBuf> {
        match &request.filter {
            Some(FilterGraph::Complex { graph, .. }) if graph.len() > INLINE_GRAPH_LIMIT => {
                let mut path = request.output.path.clone().into_os_string();
                path.push(".graph");
                Some(PathBuf::from(path))
            }
            _ => None,
        }
    }

    /// Command for a live push: intro unit once, loop unit forever.
    pub fn build_stream_command(spec: &ContinuousEncodeSpec) -> FfmpegCommand {
        let audio_input = match &spec.audio {
            Some(format) => FfmpegInput::stdin_pcm(format.sample_rate, format.channels),
            None => FfmpegInput::lavfi(silent_audio_source(SILENT_SAMPLE_RATE)),
        };
        let kbps = spec.video_bitrate_kbps.max(1);
        let gop = ((spec.canvas.fps * 2.0).round() as u32).max(1);
        let encoding = &spec.encoding;

        FfmpegCommand::to_url(spec.destination.as_str())
            .input(FfmpegInput::file(&spec.intro_unit).realtime())
            .input(FfmpegInput::file(&spec.loop_unit).stream_loop(-1).realtime())
            .input(audio_input)
            .filter_complex(stream_concat_graph(&spec.canvas))
            .map("[v]")
            .map("2:a")
            .video_codec(encoding.codec.as_str())
            .preset(encoding.preset.as_str())
            .output_args(["-pix_fmt", encoding.pixel_format.as_str()])
            .output_args([
                "-b:v".to_string(),
                format!("{}k", kbps),
                "-maxrate".to_string(),
                format!("{}k", kbps),
                "-bufsize".to_string(),
                format!("{}k", kbps * 2),
                "-g".to_string(),
                gop.to_string(),
            ])
            .output_args(encoding.to_audio_args())
            .format("flv")
    }

    async fn run_once(&self, request: &TranscodeRequest, ctx: &CallContext) -> MediaResult<()> {
        let script = Self::graph_script_path(request);
        if let (Some(path), Some(FilterGraph::Complex { graph, .. })) = (&script, &request.filter) {
            debug!(step = %request.step, bytes = graph.len(), script = %path.display(), "Writing filter script");
            tokio::fs::write(path, graph).await?;
        }

        let result = self.run_command(request, ctx).await;

        if let Some(path) = script {
            let _ = tokio::fs::remove_file(&path).await;
        }
        result
    }

    async fn run_command(&self, request: &TranscodeRequest, ctx: &CallContext) -> MediaResult<()> {
        let cmd = Self::build_command(request);

        let mut runner = FfmpegRunner::new().with_registry(self.registry.clone());
        if let Some(cancel) = &ctx.cancel {
            runner = runner.with_cancel(cancel.clone());
        }
        if let Some(secs) = self.timeout_secs {
            runner = runner.with_timeout(secs);
        }

        match (request.expected_duration, ctx.progress.clone()) {
            (Some(expected), Some(progress)) if expected > 0.0 => {
                runner
                    .run_with_progress(&cmd, move |p| progress(p.fraction_of(expected)))
                    .await
            }
            _ => runner.run(&cmd).await,
        }
    }
}

fn ffmpeg_input(input: &InputSpec) -> FfmpegInput {
    match input {
        InputSpec::File {
            path,
            seek,
            trim,
            loop_forever,
        } => {
            let mut ffin = FfmpegInput::file(path);
            if *loop_forever {
                ffin = ffin.stream_loop(-1);
            }
            if let Some(seek) = seek {
                ffin = ffin.seek(*seek);
            }
            if let Some(trim) = trim {
                ffin = ffin.duration(*trim);
            }
            ffin
        }
        InputSpec::ConcatList(path) => FfmpegInput::concat_list(path),
        InputSpec::Generated(graph) => FfmpegInput::lavfi(graph.as_str()),
    }
}

#[async_trait]
impl MediaBackend for FfmpegBackend {
    async fn probe(&self, path: &Path) -> MediaResult<MediaInfo> {
        probe_media(path).await
    }

    async fn transcode(&self, request: &TranscodeRequest, ctx: &CallContext) -> MediaResult<()> {
        debug!(step = %request.step, output = %request.output.path.display(), "Backend transcode");

        match self.run_once(request, ctx).await {
            Ok(()) => Ok(()),
            Err(e)
                if e.is_retryable()
                    && request.output.uses_encoder()
                    && !request.output.encoding.is_portable()
                    && !ctx.is_cancelled() =>
            {
                warn!(
                    step = %request.step,
                    codec = %request.output.encoding.codec,
                    stderr = e.stderr().unwrap_or_default(),
                    "Transcode failed ({}), retrying with portable encoder",
                    e
                );
                metrics::counter!(BACKEND_FALLBACKS_METRIC).increment(1);
                self.run_once(&request.with_encoding(EncodingConfig::portable()), ctx)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    async fn start_continuous_encode(
        &self,
        spec: &ContinuousEncodeSpec,
    ) -> MediaResult<EncodeProcess> {
        let ffmpeg = check_ffmpeg()?;
        let cmd = Self::build_stream_command(spec);
        let live_audio = spec.audio.is_some();
        let args = if live_audio {
            cmd.build_args_with_stdin()
        } else {
            cmd.build_args()
        };
        debug!("Starting continuous encode: ffmpeg {}", args.join(" "));

        let mut child = Command::new(ffmpeg)
            .args(&args)
            .stdin(if live_audio { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let registration = child.id().map(|pid| self.registry.register(pid, "stream"));
        info!(pid = ?child.id(), destination = %redact_key(&spec.destination), "Continuous encode started");

        let audio_input = child
            .stdin
            .take()
            .map(|stdin| Box::new(stdin) as Box<dyn AsyncWrite + Send + Unpin>);
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("FFmpeg stderr not captured"))?;

        Ok(EncodeProcess {
            audio_input,
            status: Box::new(BufReader::new(stderr)),
            handle: Box::new(FfmpegEncodeHandle {
                child,
                registry: self.registry.clone(),
                registration,
            }),
        })
    }
}

/// Strip the stream key (last path component) from a destination URL.
fn redact_key(url: &str) -> String {
    match url.rsplit_once('/') {
        Some((base, key)) if !key.is_empty() && base.contains("://") && base.len() > 8 => {
            format!("{}/***", base)
        }
        _ => url.to_string(),
    }
}

struct FfmpegEncodeHandle {
    child: Child,
    registry: Arc<ProcessRegistry>,
    registration: Option<RegistrationId>,
}

impl FfmpegEncodeHandle {
    fn release(&mut self) {
        if let Some(id) = self.registration.take() {
            self.registry.unregister(id);
        }
    }
}

#[async_trait]
impl EncodeHandle for FfmpegEncodeHandle {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> MediaResult<()> {
        let status = self.child.wait().await?;
        self.release();
        if status.success() {
            Ok(())
        } else {
            Err(MediaError::ffmpeg_failed(
                "continuous encode exited",
                None,
                status.code(),
            ))
        }
    }

    async fn kill(&mut self) -> MediaResult<()> {
        let result = self.child.kill().await;
        self.release();
        result.map_err(MediaError::from)
    }
}

impl Drop for FfmpegEncodeHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::OutputSpec;
    use loopcast_models::{Canvas, StreamAudioFormat};

    fn pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn test_conform_request_translation() {
        let request = TranscodeRequest::new(
            "conform",
            OutputSpec::video("/tmp/c.mp4", EncodingConfig::default()).with_duration(4.0),
        )
        .input(InputSpec::file("/src/a.mp4").looped().seek(1.5))
        .filter(FilterGraph::Video("fps=30".into()));

        let args = FfmpegBackend::build_command(&request).build_args();
        assert!(pair(&args, "-stream_loop", "-1"));
        assert!(pair(&args, "-ss", "1.500"));
        assert!(pair(&args, "-vf", "fps=30"));
        assert!(pair(&args, "-t", "4.000"));
        assert!(args.contains(&"-an".to_string()));
        assert!(pair(&args, "-c:v", "libx264"));
        assert_eq!(args.last().unwrap(), "/tmp/c.mp4");
    }

    #[test]
    fn test_complex_graph_maps_and_copy() {
        let request = TranscodeRequest::new(
            "mux",
            OutputSpec::copy("/tmp/out.mp4").with_audio(AudioOutput::Encode),
        )
        .input(InputSpec::file("/tmp/video.mp4"))
        .input(InputSpec::file("/tmp/audio.wav"))
        .filter(FilterGraph::Complex {
            graph: "[1:a]loudnorm[a]".into(),
            maps: vec!["0:v".into(), "[a]".into()],
        });

        let args = FfmpegBackend::build_command(&request).build_args();
        assert!(pair(&args, "-map", "0:v"));
        assert!(pair(&args, "-map", "[a]"));
        assert!(pair(&args, "-c:v", "copy"));
        assert!(pair(&args, "-c:a", "aac"));
    }

    #[test]
    fn test_long_overlay_graph_goes_through_script() {
        use crate::filters::{overlay_track_graph, OverlayPiece};

        // An hour-long track with a 3 s logo every 5 s.
        let pieces: Vec<OverlayPiece> = (0..720)
            .flat_map(|_| [OverlayPiece::Appearance(3.0), OverlayPiece::Filler(2.0)])
            .collect();
        let graph = overlay_track_graph(&pieces, &Canvas::default());
        assert!(graph.len() > INLINE_GRAPH_LIMIT);

        let request = TranscodeRequest::new(
            "overlay_track",
            OutputSpec::video("/tmp/arena/track_0.mov", EncodingConfig::default())
                .with_video(VideoOutput::Alpha)
                .with_duration(3600.0),
        )
        .input(InputSpec::file("/src/logo.mov"))
        .filter(FilterGraph::Complex {
            graph,
            maps: vec!["[v]".into()],
        });

        let script = FfmpegBackend::graph_script_path(&request).unwrap();
        assert_eq!(script, PathBuf::from("/tmp/arena/track_0.mov.graph"));

        let args = FfmpegBackend::build_command(&request).build_args();
        assert!(pair(&args, "-filter_complex_script", "/tmp/arena/track_0.mov.graph"));
        assert!(!args.contains(&"-filter_complex".to_string()));
        assert!(pair(&args, "-map", "[v]"));
        assert!(args.iter().all(|a| a.len() <= INLINE_GRAPH_LIMIT));
    }

    #[test]
    fn test_short_graph_stays_inline() {
        let request = TranscodeRequest::new("blend", OutputSpec::video("/tmp/x.mp4", EncodingConfig::default()))
            .filter(FilterGraph::Complex {
                graph: "[0:v][1:v]xfade=transition=fade:duration=1.000:offset=0[v]".into(),
                maps: vec!["[v]".into()],
            });
        assert!(FfmpegBackend::graph_script_path(&request).is_none());
        let args = FfmpegBackend::build_command(&request).build_args();
        assert!(args.contains(&"-filter_complex".to_string()));
    }

    #[test]
    fn test_alpha_and_raw_audio_outputs() {
        let alpha = TranscodeRequest::new(
            "overlay_track",
            OutputSpec::video("/tmp/t.mov", EncodingConfig::default()).with_video(VideoOutput::Alpha),
        )
        .input(InputSpec::Generated("color=c=black@0.0".into()));
        let args = FfmpegBackend::build_command(&alpha).build_args();
        assert!(pair(&args, "-c:v", "qtrle"));
        assert!(pair(&args, "-pix_fmt", "argb"));
        assert!(pair(&args, "-f", "lavfi"));

        let raw = TranscodeRequest::new(
            "decode_audio",
            OutputSpec::video("/tmp/a.f32", EncodingConfig::default())
                .with_video(VideoOutput::Drop)
                .with_audio(AudioOutput::RawF32 {
                    sample_rate: 48000,
                    channels: 2,
                }),
        )
        .input(InputSpec::file("/tmp/song.mp3"));
        let args = FfmpegBackend::build_command(&raw).build_args();
        assert!(args.contains(&"-vn".to_string()));
        assert!(pair(&args, "-f", "f32le"));
        assert!(pair(&args, "-ar", "48000"));
    }

    #[test]
    fn test_stream_command() {
        let spec = ContinuousEncodeSpec {
            intro_unit: "/tmp/intro.mp4".into(),
            loop_unit: "/tmp/loop.mp4".into(),
            audio: Some(StreamAudioFormat::default()),
            destination: "rtmp://live.example.com/app/key".into(),
            video_bitrate_kbps: 4500,
            encoding: EncodingConfig::default(),
            canvas: Canvas::default(),
        };
        let cmd = FfmpegBackend::build_stream_command(&spec);
        let args = cmd.build_args_with_stdin();

        assert_eq!(args.iter().filter(|a| *a == "-re").count(), 2);
        assert!(pair(&args, "-stream_loop", "-1"));
        assert!(pair(&args, "-f", "f32le"));
        assert!(pair(&args, "-b:v", "4500k"));
        assert!(pair(&args, "-g", "60"));
        assert!(pair(&args, "-f", "flv"));
        assert_eq!(args.last().unwrap(), "rtmp://live.example.com/app/key");

        let silent = ContinuousEncodeSpec { audio: None, ..spec };
        let args = FfmpegBackend::build_stream_command(&silent).build_args();
        assert!(args.iter().any(|a| a.starts_with("anullsrc")));
    }

    #[test]
    fn test_redact_key() {
        assert_eq!(redact_key("rtmp://live.example.com/app/secret"), "rtmp://live.example.com/app/***");
        assert_eq!(redact_key("rtmp://host"), "rtmp://host");
    }
}
