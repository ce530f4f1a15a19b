//! Final export: container encoding and metadata tags.

use crate::audio::move_file;
use crate::config::Metadata;
use crate::error::{NarrateError, Result};
use crate::tools::CommandExecutor;
use std::path::Path;

/// Lower-cased extension of `path`, defaulting to `wav`.
pub fn container(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_else(|| "wav".to_string())
}

/// Encoder arguments for a target container.
fn codec_args(container: &str) -> &'static [&'static str] {
    match container {
        "mp3" => &["-codec:a", "libmp3lame", "-q:a", "2"],
        "m4a" | "m4b" | "aac" => &["-codec:a", "aac", "-b:a", "128k"],
        "flac" => &["-codec:a", "flac"],
        "ogg" => &["-codec:a", "libvorbis", "-q:a", "5"],
        "opus" => &["-codec:a", "libopus", "-b:a", "64k"],
        "wav" => &["-codec:a", "pcm_s16le"],
        _ => &[],
    }
}

fn metadata_args(metadata: &Metadata) -> Vec<String> {
    [
        ("title", &metadata.title),
        ("artist", &metadata.artist),
        ("album", &metadata.album),
    ]
    .into_iter()
    .filter_map(|(key, value)| value.as_ref().map(|v| format!("{key}={v}")))
    .flat_map(|tag| ["-metadata".to_string(), tag])
    .collect()
}

/// Write `source` to `target`, encoding and tagging as the container needs.
///
/// Plain WAV without tags is a move. Anything else goes through ffmpeg; a
/// WAV target falls back to a move (dropping tags) when ffmpeg is missing or
/// fails, other containers fail with `ExternalTool`.
pub fn export(
    source: &Path,
    target: &Path,
    metadata: &Metadata,
    ffmpeg: Option<&Path>,
    executor: &dyn CommandExecutor,
) -> Result<()> {
    let container = container(target);
    let is_wav = container == "wav";

    if is_wav && metadata.is_empty() {
        move_file(source, target)?;
        return Ok(());
    }

    let Some(ffmpeg) = ffmpeg else {
        if is_wav {
            log::warn!("assembly: ffmpeg not found; metadata not written");
            move_file(source, target)?;
            return Ok(());
        }
        return Err(NarrateError::ExternalTool {
            message: format!("ffmpeg is required to write .{container} files"),
        });
    };

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut args: Vec<String> = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-i".to_string(),
        source.display().to_string(),
    ];
    args.extend(codec_args(&container).iter().map(|s| s.to_string()));
    args.extend(metadata_args(metadata));
    args.push(target.display().to_string());
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    match executor.execute(&ffmpeg.display().to_string(), &args) {
        Ok(_) if target.is_file() => Ok(()),
        Ok(_) => Err(NarrateError::ExternalTool {
            message: format!("ffmpeg wrote nothing to {}", target.display()),
        }),
        Err(e) if is_wav => {
            log::warn!("assembly: tagging failed ({e}); writing untagged WAV");
            move_file(source, target)?;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::MockCommandExecutor;
    use std::fs;
    use std::path::PathBuf;

    fn source(dir: &Path) -> PathBuf {
        let path = dir.join("final_stage.wav");
        fs::write(&path, b"RIFFdata").unwrap();
        path
    }

    fn tagged() -> Metadata {
        Metadata {
            title: Some("Moby Dick".to_string()),
            artist: Some("Herman Melville".to_string()),
            album: None,
        }
    }

    #[test]
    fn untagged_wav_is_moved() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(dir.path());
        let target = dir.path().join("out/book.wav");
        let executor = MockCommandExecutor::new();

        export(&src, &target, &Metadata::default(), None, &executor).unwrap();

        assert!(target.is_file());
        assert!(!src.exists());
        assert_eq!(executor.call_count(), 0);
    }

    #[test]
    fn mp3_goes_through_ffmpeg_with_tags() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(dir.path());
        let target = dir.path().join("book.MP3");
        let executor = MockCommandExecutor::new();

        export(&src, &target, &tagged(), Some(Path::new("ffmpeg")), &executor).unwrap();

        assert!(target.is_file());
        let args = &executor.calls()[0].1;
        assert!(args.contains(&"libmp3lame".to_string()));
        assert!(args.contains(&"title=Moby Dick".to_string()));
        assert!(args.contains(&"artist=Herman Melville".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("album=")));
    }

    #[test]
    fn non_wav_without_ffmpeg_fails() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(dir.path());
        let target = dir.path().join("book.m4b");

        let result = export(
            &src,
            &target,
            &Metadata::default(),
            None,
            &MockCommandExecutor::new(),
        );

        assert!(matches!(result, Err(NarrateError::ExternalTool { .. })));
    }

    #[test]
    fn tagged_wav_falls_back_to_move() {
        let dir = tempfile::tempdir().unwrap();
        let src = source(dir.path());
        let target = dir.path().join("book.wav");
        let executor = MockCommandExecutor::new().failing("ffmpeg");

        export(&src, &target, &tagged(), Some(Path::new("ffmpeg")), &executor).unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"RIFFdata");
    }

    #[test]
    fn container_defaults_to_wav() {
        assert_eq!(container(Path::new("book")), "wav");
        assert_eq!(container(Path::new("book.Flac")), "flac");
    }
}
