//! Thin wrapper around the `ffmpeg` command line.
//!
//! Every step is one process invocation with a fixed argument template.
//! A non-zero exit status or a missing output file is an error.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Caption canvas size.
const CAPTION_SIZE: &str = "240x80";

/// Frame size every clip is normalized to before concatenation.
pub const CLIP_FRAME: (u32, u32) = (720, 1280);

/// Frame rate every clip is normalized to before concatenation.
const CLIP_FPS: u32 = 30;

/// Distance of the caption from the bottom-right corner, in pixels.
const CAPTION_MARGIN: u32 = 10;

/// Silent track added to clips recorded without sound.
const SILENCE_SOURCE: &str = "anullsrc=r=44100:cl=stereo";

/// How much encoder stderr is kept in error messages.
const STDERR_TAIL: usize = 600;

/// Errors raised by encoder invocations.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("Encoder step '{step}' failed ({status}): {stderr}")]
    Failed {
        step: &'static str,
        status: String,
        stderr: String,
    },

    #[error("Encoder step '{step}' produced no output at {}", path.display())]
    MissingOutput { step: &'static str, path: PathBuf },

    #[error("Failed to download submission for day {day}: {source}")]
    Download {
        day: i64,
        source: Box<crate::telegram::TelegramError>,
    },

    #[error("Scratch file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Nothing to assemble")]
    Empty,
}

/// Runs the encoder binary.
#[derive(Debug, Clone)]
pub struct Encoder {
    program: PathBuf,
    font_file: Option<PathBuf>,
}

impl Encoder {
    /// Creates an encoder that runs `program`.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            font_file: None,
        }
    }

    /// Sets the font used for captions.
    #[must_use]
    pub fn with_font_file(mut self, font_file: Option<PathBuf>) -> Self {
        self.font_file = font_file;
        self
    }

    /// Cuts the first `seconds` of `input` into `output` without re-encoding.
    pub async fn trim(&self, input: &Path, seconds: u32, output: &Path) -> Result<(), MediaError> {
        self.run("trim", trim_args(input, seconds, output), output).await
    }

    /// Renders a single-frame "Day N" caption image.
    pub async fn render_caption(&self, day: i64, output: &Path) -> Result<(), MediaError> {
        let args = caption_args(&caption_text(day), self.font_file.as_deref(), output);
        self.run("caption", args, output).await
    }

    /// Whether `input` carries at least one audio stream.
    ///
    /// Reads the stream listing `ffmpeg -i` prints. The exit status is
    /// ignored because `ffmpeg` without an output always fails.
    pub async fn has_audio(&self, input: &Path) -> Result<bool, MediaError> {
        let mut args = os_args(["-hide_banner", "-i"]);
        args.push(input.into());

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| self.spawn_error(source))?;

        Ok(lists_audio_stream(&String::from_utf8_lossy(&output.stderr)))
    }

    /// Burns `caption` into `clip` and normalizes it for concatenation.
    ///
    /// Every part gets one AAC stereo track, silent when `clip_has_audio` is
    /// false, so the parts can be concatenated without re-encoding.
    pub async fn overlay(
        &self,
        clip: &Path,
        caption: &Path,
        seconds: u32,
        clip_has_audio: bool,
        output: &Path,
    ) -> Result<(), MediaError> {
        let args = overlay_args(clip, caption, seconds, clip_has_audio, output);
        self.run("overlay", args, output).await
    }

    /// Concatenates the clips listed in `list_file` into `output`.
    pub async fn concat(&self, list_file: &Path, output: &Path) -> Result<(), MediaError> {
        self.run("concat", concat_args(list_file, output), output).await
    }

    /// Returns the first line of `ffmpeg -version`.
    pub async fn version(&self) -> Result<String, MediaError> {
        let output = Command::new(&self.program)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| self.spawn_error(source))?;

        if !output.status.success() {
            return Err(MediaError::Failed {
                step: "version",
                status: output.status.to_string(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or_default()
            .to_owned())
    }

    async fn run(
        &self,
        step: &'static str,
        args: Vec<OsString>,
        output_path: &Path,
    ) -> Result<(), MediaError> {
        debug!("Running {} step: {} {:?}", step, self.program.display(), args);

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| self.spawn_error(source))?;

        if !output.status.success() {
            return Err(MediaError::Failed {
                step,
                status: output.status.to_string(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        if tokio::fs::metadata(output_path).await.is_err() {
            return Err(MediaError::MissingOutput {
                step,
                path: output_path.to_path_buf(),
            });
        }

        Ok(())
    }

    fn spawn_error(&self, source: std::io::Error) -> MediaError {
        MediaError::Spawn {
            program: self.program.display().to_string(),
            source,
        }
    }
}

/// Caption text for a challenge day.
#[must_use]
fn caption_text(day: i64) -> String {
    format!("Day {day}")
}

fn trim_args(input: &Path, seconds: u32, output: &Path) -> Vec<OsString> {
    let mut args = os_args(["-y", "-i"]);
    args.push(input.into());
    args.extend(os_args(["-t", seconds.to_string().as_str(), "-c", "copy"]));
    args.push(output.into());
    args
}

fn caption_args(text: &str, font_file: Option<&Path>, output: &Path) -> Vec<OsString> {
    let font = font_file
        .map(|f| format!("fontfile='{}':", escape_filter_value(&f.display().to_string())))
        .unwrap_or_default();
    let drawtext = format!(
        "drawtext={font}text='{}':fontcolor=white:fontsize=40:x=(w-tw)/2:y=(h-th)/2",
        escape_filter_value(text)
    );

    let mut args = os_args([
        "-y",
        "-f",
        "lavfi",
        "-i",
        format!("color=c=black:s={CAPTION_SIZE}").as_str(),
        "-vf",
        drawtext.as_str(),
        "-frames:v",
        "1",
    ]);
    args.push(output.into());
    args
}

fn overlay_args(
    clip: &Path,
    caption: &Path,
    seconds: u32,
    clip_has_audio: bool,
    output: &Path,
) -> Vec<OsString> {
    let (width, height) = CLIP_FRAME;
    let filter = format!(
        "[0:v]scale={width}:{height}:force_original_aspect_ratio=decrease,\
         pad={width}:{height}:(ow-iw)/2:(oh-ih)/2,fps={CLIP_FPS},setsar=1[base];\
         [base][1:v]overlay=main_w-overlay_w-{CAPTION_MARGIN}:main_h-overlay_h-{CAPTION_MARGIN},\
         format=yuv420p[out]"
    );

    let mut args = os_args(["-y", "-i"]);
    args.push(clip.into());
    args.push("-i".into());
    args.push(caption.into());
    let audio_map = if clip_has_audio {
        "0:a:0"
    } else {
        args.extend(os_args(["-f", "lavfi", "-i", SILENCE_SOURCE]));
        "2:a:0"
    };
    args.extend(os_args([
        "-filter_complex",
        filter.as_str(),
        "-map",
        "[out]",
        "-map",
        audio_map,
        "-t",
        seconds.to_string().as_str(),
        "-c:v",
        "libx264",
        "-crf",
        "23",
        "-c:a",
        "aac",
        "-ar",
        "44100",
        "-ac",
        "2",
        "-shortest",
    ]));
    args.push(output.into());
    args
}

/// Whether an `ffmpeg -i` stream listing contains an audio stream.
fn lists_audio_stream(stderr: &str) -> bool {
    stderr.lines().any(|line| {
        let line = line.trim_start();
        line.starts_with("Stream #") && line.contains(": Audio:")
    })
}

fn concat_args(list_file: &Path, output: &Path) -> Vec<OsString> {
    let mut args = os_args(["-y", "-f", "concat", "-safe", "0", "-i"]);
    args.push(list_file.into());
    args.extend(os_args(["-c", "copy"]));
    args.push(output.into());
    args
}

/// Formats a concat demuxer list for the given clips.
#[must_use]
pub fn concat_list(parts: &[PathBuf]) -> String {
    parts
        .iter()
        .map(|p| format!("file '{}'\n", p.display().to_string().replace('\'', r"'\''")))
        .collect()
}

/// Escapes characters that end or split a quoted filter option value.
fn escape_filter_value(value: &str) -> String {
    value
        .replace('\\', r"\\")
        .replace('\'', r"\'")
        .replace(':', r"\:")
}

fn os_args<'a>(args: impl IntoIterator<Item = &'a str>) -> Vec<OsString> {
    args.into_iter().map(OsString::from).collect()
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let skip = text.chars().count().saturating_sub(STDERR_TAIL);
    text.chars().skip(skip).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_trim_args() {
        let args = trim_args(Path::new("/tmp/1_2.mp4"), 1, Path::new("/tmp/trim_1_2.mp4"));
        assert_eq!(
            strings(&args),
            ["-y", "-i", "/tmp/1_2.mp4", "-t", "1", "-c", "copy", "/tmp/trim_1_2.mp4"]
        );
    }

    #[test]
    fn test_caption_args() {
        let args = strings(&caption_args("Day 3", None, Path::new("/tmp/text.png")));
        assert_eq!(args[..5], ["-y", "-f", "lavfi", "-i", "color=c=black:s=240x80"]);
        assert_eq!(args[5], "-vf");
        assert!(args[6].starts_with("drawtext=text='Day 3':fontcolor=white"));
        assert_eq!(args[7..], ["-frames:v", "1", "/tmp/text.png"]);
    }

    #[test]
    fn test_caption_args_with_font() {
        let args = strings(&caption_args("Day 1", Some(Path::new("C:/fonts/a.ttf")), Path::new("t.png")));
        assert!(args[6].starts_with(r"drawtext=fontfile='C\:/fonts/a.ttf':text='Day 1'"));
    }

    #[test]
    fn test_overlay_args_place_caption_bottom_right() {
        let args = strings(&overlay_args(
            Path::new("trim.mp4"),
            Path::new("text.png"),
            1,
            true,
            Path::new("part.mp4"),
        ));
        assert_eq!(args[..5], ["-y", "-i", "trim.mp4", "-i", "text.png"]);
        assert!(args[6].contains("overlay=main_w-overlay_w-10:main_h-overlay_h-10"));
        assert!(args.windows(2).any(|w| w == ["-map", "0:a:0"]));
        assert!(args.windows(2).any(|w| w == ["-crf", "23"]));
        assert!(args.windows(2).any(|w| w == ["-c:v", "libx264"]));
        assert!(args.windows(2).any(|w| w == ["-c:a", "aac"]));
        assert!(!args.contains(&"-an".to_owned()));
        assert!(!args.contains(&SILENCE_SOURCE.to_owned()));
        assert_eq!(args.last().map(String::as_str), Some("part.mp4"));
    }

    #[test]
    fn test_overlay_args_add_silence_to_mute_clips() {
        let args = strings(&overlay_args(
            Path::new("trim.mp4"),
            Path::new("text.png"),
            1,
            false,
            Path::new("part.mp4"),
        ));
        assert_eq!(
            args[..9],
            ["-y", "-i", "trim.mp4", "-i", "text.png", "-f", "lavfi", "-i", SILENCE_SOURCE]
        );
        assert!(args.windows(2).any(|w| w == ["-map", "2:a:0"]));
        assert!(args.windows(2).any(|w| w == ["-c:a", "aac"]));
        assert!(args.windows(2).any(|w| w == ["-ar", "44100"]));
        assert!(args.contains(&"-shortest".to_owned()));
    }

    #[test]
    fn test_audio_stream_detection() {
        let with_audio = "Input #0, mov,mp4,m4a,3gp,3g2,mj2, from 'trim.mp4':\n\
                          \x20 Stream #0:0[0x1](und): Video: h264 (High), yuv420p, 720x1280\n\
                          \x20 Stream #0:1[0x2](und): Audio: aac (LC), 44100 Hz, stereo\n";
        let video_only = "Input #0, mov,mp4,m4a,3gp,3g2,mj2, from 'trim.mp4':\n\
                          \x20 Stream #0:0[0x1](und): Video: h264 (High), yuv420p, 720x1280\n";
        assert!(lists_audio_stream(with_audio));
        assert!(!lists_audio_stream(video_only));
        assert!(!lists_audio_stream("trim.mp4: No such file or directory"));
    }

    #[test]
    fn test_concat_args() {
        let args = strings(&concat_args(Path::new("list.txt"), Path::new("out.mp4")));
        assert_eq!(
            args,
            ["-y", "-f", "concat", "-safe", "0", "-i", "list.txt", "-c", "copy", "out.mp4"]
        );
    }

    #[test]
    fn test_concat_list_quotes_paths() {
        let list = concat_list(&[PathBuf::from("/tmp/part_1_1.mp4"), PathBuf::from("/tmp/it's.mp4")]);
        assert_eq!(list, "file '/tmp/part_1_1.mp4'\nfile '/tmp/it'\\''s.mp4'\n");
    }

    #[test]
    fn test_caption_text() {
        assert_eq!(caption_text(1), "Day 1");
        assert_eq!(caption_text(30), "Day 30");
    }

    #[test]
    fn test_stderr_tail_keeps_end() {
        let long = "x".repeat(STDERR_TAIL) + "END";
        let tail = stderr_tail(long.as_bytes());
        assert_eq!(tail.chars().count(), STDERR_TAIL);
        assert!(tail.ends_with("END"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_fails_closed() {
        let encoder = Encoder::new("false");
        let err = encoder
            .trim(Path::new("in.mp4"), 1, Path::new("out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Failed { step: "trim", .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_output_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = Encoder::new("true");
        let err = encoder
            .concat(Path::new("list.txt"), &dir.path().join("out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::MissingOutput { step: "concat", .. }));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let encoder = Encoder::new("/definitely/not/ffmpeg");
        assert!(matches!(encoder.version().await, Err(MediaError::Spawn { .. })));
    }
}
