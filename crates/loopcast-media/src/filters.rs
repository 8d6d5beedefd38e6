//! FFmpeg filter graph builders.

use loopcast_models::{Canvas, LoudnessTarget};

/// Filter chain that scales, pads and retimes a stream onto `canvas`.
pub fn canvas_normalize(canvas: &Canvas) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,\
         pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black,setsar=1,fps={fps},format=yuv420p",
        w = canvas.width,
        h = canvas.height,
        fps = canvas.fps_arg()
    )
}

/// Dissolve between input 0 (outgoing) and input 1 (incoming).
///
/// Both inputs are expected to be exactly `duration` long; the dissolve
/// spans the whole window starting at offset 0. With `normalize`, both
/// inputs are first forced onto the canvas.
pub fn crossfade_graph(duration: f64, normalize: Option<&Canvas>) -> String {
    let xfade = format!(
        "xfade=transition=fade:duration={:.3}:offset=0",
        duration
    );
    match normalize {
        Some(canvas) => {
            let norm = canvas_normalize(canvas);
            format!(
                "[0:v]{norm},settb=AVTB[a];[1:v]{norm},settb=AVTB[b];[a][b]{xfade}[v]"
            )
        }
        None => format!("[0:v]settb=AVTB[a];[1:v]settb=AVTB[b];[a][b]{xfade}[v]"),
    }
}

/// Fade-to-black of the outgoing half followed by fade-from-black of the
/// incoming half, `duration` seconds in total.
pub fn fade_through_black_graph(duration: f64, canvas: &Canvas) -> String {
    let half = duration / 2.0;
    let norm = canvas_normalize(canvas);
    format!(
        "[0:v]{norm},trim=0:{half:.3},setpts=PTS-STARTPTS,fade=t=out:st=0:d={half:.3}[a];\
         [1:v]{norm},trim={half:.3}:{end:.3},setpts=PTS-STARTPTS,fade=t=in:st=0:d={half:.3}[b];\
         [a][b]concat=n=2:v=1:a=0[v]",
        end = duration
    )
}

/// One piece of a full-length overlay track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OverlayPiece {
    /// Transparent gap
    Filler(f64),
    /// The overlay source's first `f64` seconds
    Appearance(f64),
}

/// Build a single overlay track from input 0 and transparent fillers.
///
/// The source is split once per appearance; fillers are generated inside
/// the graph so the whole track is one backend invocation.
pub fn overlay_track_graph(pieces: &[OverlayPiece], canvas: &Canvas) -> String {
    let appearances = pieces
        .iter()
        .filter(|p| matches!(p, OverlayPiece::Appearance(_)))
        .count();
    let fit = format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,\
         pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black@0.0,setsar=1,fps={fps},format=argb",
        w = canvas.width,
        h = canvas.height,
        fps = canvas.fps_arg()
    );

    let mut chains = Vec::new();
    if appearances > 0 {
        let outputs: String = (0..appearances).map(|i| format!("[s{}]", i)).collect();
        chains.push(format!("[0:v]format=argb,split={}{}", appearances, outputs));
    }

    let mut labels = String::new();
    let mut next_split = 0;
    for (i, piece) in pieces.iter().enumerate() {
        let label = format!("p{}", i);
        match piece {
            OverlayPiece::Filler(d) => chains.push(format!(
                "{}[{}]",
                transparent_filler(canvas, *d),
                label
            )),
            OverlayPiece::Appearance(d) => {
                chains.push(format!(
                    "[s{}]trim=0:{:.3},setpts=PTS-STARTPTS,{}[{}]",
                    next_split, d, fit, label
                ));
                next_split += 1;
            }
        }
        labels.push_str(&format!("[{}]", label));
    }

    chains.push(format!(
        "{}concat=n={}:v=1:a=0,format=argb[v]",
        labels,
        pieces.len()
    ));
    chains.join(";")
}

/// Fully transparent canvas-sized source lasting `duration` seconds.
pub fn transparent_filler(canvas: &Canvas, duration: f64) -> String {
    format!(
        "color=c=black@0.0:s={}x{}:r={}:d={:.3},format=argb",
        canvas.width,
        canvas.height,
        canvas.fps_arg(),
        duration
    )
}

/// Composite overlay tracks (inputs 1..=n) onto the base (input 0) in one pass.
pub fn overlay_composite_graph(track_count: usize) -> String {
    if track_count == 0 {
        return "[0:v]null[v]".to_string();
    }
    let mut chains = Vec::with_capacity(track_count + 1);
    let mut base = "0:v".to_string();
    for i in 1..=track_count {
        let out = format!("o{}", i);
        chains.push(format!(
            "[{}][{}:v]overlay=0:0:eof_action=pass:format=auto[{}]",
            base, i, out
        ));
        base = out;
    }
    chains.push(format!("[{}]format=yuv420p[v]", base));
    chains.join(";")
}

/// Audio mastering chain: fade-in, fade-out ending at `target`, loudness.
///
/// Returns `None` when there is nothing to apply.
pub fn audio_master_chain(
    target: f64,
    fade_in: f64,
    fade_out: f64,
    loudness: Option<&LoudnessTarget>,
) -> Option<String> {
    let mut filters = Vec::new();
    if fade_in > 0.0 {
        filters.push(format!("afade=t=in:st=0:d={:.3}", fade_in));
    }
    if fade_out > 0.0 {
        let start = (target - fade_out).max(0.0);
        filters.push(format!("afade=t=out:st={:.3}:d={:.3}", start, fade_out));
    }
    if let Some(l) = loudness {
        filters.push(format!(
            "loudnorm=I={}:TP={}:LRA={}",
            l.integrated, l.true_peak, l.range
        ));
    }
    (!filters.is_empty()).then(|| filters.join(","))
}

/// Video half of the live stream graph: intro unit once, then the loop unit.
pub fn stream_concat_graph(canvas: &Canvas) -> String {
    let norm = canvas_normalize(canvas);
    format!("[0:v]{norm}[i];[1:v]{norm}[l];[i][l]concat=n=2:v=1:a=0[v]")
}

/// Silent stereo source used when a stream has no live audio.
pub fn silent_audio_source(sample_rate: u32) -> String {
    format!("anullsrc=channel_layout=stereo:sample_rate={}", sample_rate)
}
