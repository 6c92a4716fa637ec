//! FFmpeg command builder.

use std::path::{Path, PathBuf};

use vedit_models::timestamp::format_secs_arg;

use crate::error::{MediaError, MediaResult};

/// One `-i` input and the options that precede it.
#[derive(Debug, Clone, PartialEq)]
pub struct FfmpegInput {
    path: PathBuf,
    args: Vec<String>,
}

impl FfmpegInput {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            args: Vec::new(),
        }
    }

    /// Add an input option (placed before `-i`).
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Seek inside this input.
    pub fn seek_ms(self, ms: u64) -> Self {
        self.arg("-ss").arg(format_secs_arg(ms))
    }

    /// Read at most this much of the input.
    pub fn duration_ms(self, ms: u64) -> Self {
        self.arg("-t").arg(format_secs_arg(ms))
    }

    /// Force the input demuxer.
    pub fn format(self, format: impl Into<String>) -> Self {
        self.arg("-f").arg(format)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Builder for FFmpeg commands with any number of inputs.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    inputs: Vec<FfmpegInput>,
    output: PathBuf,
    filter_complex: Option<String>,
    maps: Vec<String>,
    output_args: Vec<String>,
    output_format: Option<String>,
    /// Whether to overwrite output; `-n` is passed otherwise
    overwrite: bool,
    log_level: String,
}

impl FfmpegCommand {
    /// Create a command writing to `output`.
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            inputs: Vec::new(),
            output: output.as_ref().to_path_buf(),
            filter_complex: None,
            maps: Vec::new(),
            output_args: Vec::new(),
            output_format: None,
            overwrite: false,
            // stats lines are printed at info level
            log_level: "info".to_string(),
        }
    }

    /// Command with a discarding muxer, for analysis passes.
    pub fn null_sink() -> Self {
        Self::new("-").format("null").overwrite(true)
    }

    pub fn input(mut self, input: FfmpegInput) -> Self {
        self.inputs.push(input);
        self
    }

    /// Add a plain input with no options.
    pub fn input_path(self, path: impl AsRef<Path>) -> Self {
        self.input(FfmpegInput::new(path))
    }

    /// Add an output argument.
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Set filter complex.
    pub fn filter_complex(mut self, filter: impl Into<String>) -> Self {
        self.filter_complex = Some(filter.into());
        self
    }

    /// Map a stream or filter label into the output.
    pub fn map(mut self, spec: impl Into<String>) -> Self {
        self.maps.push(spec.into());
        self
    }

    /// Set the output muxer.
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.output_format = Some(format.into());
        self
    }

    /// Stream copy all mapped streams.
    pub fn stream_copy(self) -> Self {
        self.output_arg("-c").output_arg("copy")
    }

    /// Extract single frame.
    pub fn single_frame(self) -> Self {
        self.output_arg("-frames:v").output_arg("1")
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn inputs(&self) -> &[FfmpegInput] {
        &self.inputs
    }

    pub fn writes_file(&self) -> bool {
        self.output.as_os_str() != "-"
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            if self.overwrite { "-y" } else { "-n" }.to_string(),
            "-v".to_string(),
            self.log_level.clone(),
            "-stats".to_string(),
        ];

        for input in &self.inputs {
            args.extend(input.args.iter().cloned());
            args.push("-i".to_string());
            args.push(input.path.to_string_lossy().to_string());
        }

        if let Some(graph) = &self.filter_complex {
            args.push("-filter_complex".to_string());
            args.push(graph.clone());
        }

        for spec in &self.maps {
            args.push("-map".to_string());
            args.push(spec.clone());
        }

        args.extend(self.output_args.iter().cloned());

        if let Some(format) = &self.output_format {
            args.push("-f".to_string());
            args.push(format.clone());
        }

        args.push(self.output.to_string_lossy().to_string());
        args
    }
}

/// Check if FFmpeg is available.
pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

/// Check if FFprobe is available.
pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(args: &[String], needle: &str) -> usize {
        args.iter().position(|a| a == needle).unwrap()
    }

    #[test]
    fn test_command_builder() {
        let cmd = FfmpegCommand::new("output.mp4")
            .input(FfmpegInput::new("input.mp4").seek_ms(10_000).duration_ms(30_000))
            .output_args(["-c:v", "libx264", "-crf", "18"]);

        let args = cmd.build_args();
        assert!(position(&args, "-ss") < position(&args, "-i"));
        assert!(args.contains(&"10.000".to_string()));
        assert!(args.contains(&"30.000".to_string()));
        assert!(position(&args, "-c:v") > position(&args, "-i"));
        assert_eq!(args.last().unwrap(), "output.mp4");
    }

    #[test]
    fn test_no_overwrite_by_default() {
        let args = FfmpegCommand::new("out.mp4").input_path("in.mp4").build_args();
        assert!(args.contains(&"-n".to_string()));
        assert!(!args.contains(&"-y".to_string()));

        let args = FfmpegCommand::new("out.mp4").overwrite(true).build_args();
        assert!(args.contains(&"-y".to_string()));
    }

    #[test]
    fn test_multiple_inputs_with_graph() {
        let cmd = FfmpegCommand::new("out.mp4")
            .input_path("a.mp4")
            .input(FfmpegInput::new("b.mp4").seek_ms(500))
            .filter_complex("[0:v][1:v]xfade=transition=fade:duration=1.000:offset=4.000[vout]")
            .map("[vout]");

        let args = cmd.build_args();
        let inputs: Vec<_> = args
            .iter()
            .enumerate()
            .filter(|(_, a)| *a == "-i")
            .map(|(i, _)| args[i + 1].clone())
            .collect();
        assert_eq!(inputs, vec!["a.mp4", "b.mp4"]);
        assert!(position(&args, "-filter_complex") < position(&args, "-map"));
        assert_eq!(args[position(&args, "-map") + 1], "[vout]");
    }

    #[test]
    fn test_null_sink() {
        let cmd = FfmpegCommand::null_sink().input_path("in.mp4");
        assert!(!cmd.writes_file());
        let args = cmd.build_args();
        assert_eq!(&args[args.len() - 3..], &["-f", "null", "-"]);
    }
}
