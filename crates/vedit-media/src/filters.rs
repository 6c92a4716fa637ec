//! FFmpeg filter text helpers.

use vedit_models::OutputFormat;

/// Sample rate every graph input is resampled to before cross-fading.
pub const GRAPH_SAMPLE_RATE: u32 = 48_000;

/// Downscale to `width`, keeping aspect with an even height.
pub fn filter_scale_width(width: u32) -> String {
    format!("scale={}:-2", width)
}

/// Fit into the target frame with letterboxing, constant rate and square pixels.
pub fn filter_normalize_video(format: &OutputFormat) -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,\
         pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,\
         fps={fps},setsar=1,format=yuv420p",
        w = format.width,
        h = format.height,
        fps = format.fps
    )
}

/// Common sample format and layout so `acrossfade` accepts every pair.
pub fn filter_normalize_audio() -> String {
    format!(
        "aresample={},aformat=sample_fmts=fltp:channel_layouts=stereo",
        GRAPH_SAMPLE_RATE
    )
}

/// Keep frames whose scene score exceeds `threshold` and print their metadata.
pub fn filter_scene_select(threshold: f64) -> String {
    format!("select='gt(scene,{})',metadata=print", threshold)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_video_filter() {
        let filter = filter_normalize_video(&OutputFormat::new(1280, 720, 25));
        assert_eq!(
            filter,
            "scale=1280:720:force_original_aspect_ratio=decrease,pad=1280:720:(ow-iw)/2:(oh-ih)/2,fps=25,setsar=1,format=yuv420p"
        );
    }

    #[test]
    fn test_scene_select_filter() {
        assert_eq!(
            filter_scene_select(0.3),
            "select='gt(scene,0.3)',metadata=print"
        );
        assert_eq!(filter_scale_width(640), "scale=640:-2");
    }
}
