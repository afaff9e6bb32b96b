// ============================================================================
// ShotMark CLI: headless annotation via command-line arguments
// ============================================================================
//
// Usage examples:
//   shotmark --input shot.png --script callouts.rhai --output annotated.png
//   shotmark -i shots/*.png --script redact.rhai --output-dir out/ --folder redacted
//   shotmark -i shot.png --paste-clipboard -o with-logo.png
//   shotmark -i session.smk -o flat.png
//
// Each input becomes the captured base image of a fresh editing session.
// Everything runs on the current thread except pasted-image decoding.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;

use crate::error::{EditorError, Result};
use crate::io::{FileExportSink, FileImageSource};
use crate::ops::clipboard::read_system_clipboard;
use crate::ops::scripting::run_script;
use crate::preferences::{EditorSettings, FilePreferences, MemoryPreferences};
use crate::session::EditorSession;

/// How long to wait for clipboard images to finish decoding before export.
const DECODE_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// ShotMark headless screenshot annotator.
#[derive(Parser, Debug)]
#[command(
    name = "shotmark",
    about = "ShotMark headless screenshot annotator",
    long_about = "Annotate screenshots with Rhai scripts and export the result as PNG.\n\
                  Inputs are PNG/JPEG/BMP captures or .smk session files.\n\n\
                  Example:\n  \
                  shotmark --input shot.png --script arrows.rhai --output result.png\n  \
                  shotmark -i *.png --script redact.rhai --output-dir out/"
)]
pub struct CliArgs {
    /// Input file(s). Glob patterns accepted (e.g. "*.png", "shots/*.png").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Rhai annotation script to run against each input.
    #[arg(short, long, value_name = "SCRIPT.rhai")]
    pub script: Option<PathBuf>,

    /// Output file path. Only valid for single-file input.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Root directory for exports: files land in {DIR}/{folder}/{name}.png.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Export folder name, overriding the saved preference for this run.
    #[arg(long, value_name = "NAME")]
    pub folder: Option<String>,

    /// Paste the current clipboard image onto each input before export.
    #[arg(long)]
    pub paste_clipboard: bool,

    /// Print script console output and log to stderr.
    #[arg(short, long)]
    pub verbose: bool,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs) -> ExitCode {
    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    if inputs.len() > 1 && args.output.is_some() {
        eprintln!(
            "error: {} input files given but --output only accepts a single file path.\n\
             Use --output-dir to specify a destination directory for batch processing.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    let script_source = match &args.script {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(src) => Some(src),
            Err(e) => {
                eprintln!("error: could not read script '{}': {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    let settings = load_settings();
    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }
        let file_start = Instant::now();

        match run_one(input_path, &args, &settings, script_source.as_deref()) {
            Ok(saved) => {
                if args.verbose || multi {
                    println!(
                        "  → {} ({:.0}ms)",
                        saved,
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => {
                let msg = match &e {
                    EditorError::Script(se) => se.friendly_message(),
                    other => other.to_string(),
                };
                tracing::error!("{}: {}", input_path.display(), msg);
                eprintln!("  error: {}", msg);
                any_failure = true;
            }
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

// ============================================================================
// Per-file processing pipeline
// ============================================================================

fn run_one(input: &Path, args: &CliArgs, settings: &EditorSettings, script: Option<&str>) -> Result<String> {
    let mut session = EditorSession::new(settings.clone());
    if let Some(folder) = &args.folder {
        // One-off override; the saved preference stays untouched.
        session.set_default_folder(folder, &mut MemoryPreferences::new())?;
    }

    // -- Step 1: Load ----------------------------------------------------
    if is_session_file(input) {
        session.load_project(input)?;
    } else {
        session.capture(&mut FileImageSource::new(input))?;
    }
    if let Some(stem) = input.file_stem() {
        session.set_file_name(stem.to_string_lossy());
    }

    // -- Step 2: Script (optional) ---------------------------------------
    if let Some(src) = script {
        let console = run_script(&mut session, src)?;
        if args.verbose {
            for line in &console {
                println!("  [script] {}", line);
            }
        }
    }

    // -- Step 3: Clipboard paste (optional) ------------------------------
    if args.paste_clipboard {
        match read_system_clipboard() {
            Some(payload) => {
                session.paste(&payload)?;
                session.wait_for_decodes(DECODE_TIMEOUT);
            }
            None => eprintln!("  warning: clipboard holds no image."),
        }
    }

    // -- Step 4: Export --------------------------------------------------
    let mut sink = match (&args.output, &args.output_dir) {
        (Some(out), _) => FileExportSink::to_file(out),
        (None, Some(dir)) => FileExportSink::new(dir),
        (None, None) => FileExportSink::new("."),
    };
    session.export(&mut sink, false)
}

// ============================================================================
// Helpers
// ============================================================================

/// Saved preferences when a settings file exists, defaults otherwise.
fn load_settings() -> EditorSettings {
    let loaded = match FilePreferences::open_default() {
        Some(store) => EditorSettings::load(&store),
        None => Ok(EditorSettings::default()),
    };
    loaded.unwrap_or_else(|e| {
        tracing::warn!("Ignoring unreadable preferences: {}", e);
        EditorSettings::default()
    })
}

fn is_session_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("smk"))
}

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn write_png(path: &Path, w: u32, h: u32) {
        let img = RgbaImage::from_pixel(w, h, Rgba([255, 255, 255, 255]));
        std::fs::write(path, crate::io::encode_png(&img).unwrap()).unwrap();
    }

    fn args(input: Vec<String>) -> CliArgs {
        CliArgs {
            input,
            script: None,
            output: None,
            output_dir: None,
            folder: None,
            paste_clipboard: false,
            verbose: false,
        }
    }

    #[test]
    fn parses_flags() {
        let a = CliArgs::try_parse_from([
            "shotmark", "-i", "a.png", "b.png", "--script", "s.rhai", "--output-dir", "out", "--folder", "f",
        ])
        .unwrap();
        assert_eq!(a.input, vec!["a.png", "b.png"]);
        assert_eq!(a.script.as_deref(), Some(Path::new("s.rhai")));
        assert_eq!(a.folder.as_deref(), Some("f"));
        assert!(!a.paste_clipboard);
        assert!(CliArgs::try_parse_from(["shotmark"]).is_err());
    }

    #[test]
    fn globs_are_expanded_and_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("a.png"), 2, 2);
        write_png(&dir.path().join("b.png"), 2, 2);
        let literal = dir.path().join("a.png").display().to_string();
        let pattern = dir.path().join("*.png").display().to_string();
        let found = resolve_inputs(&[literal, pattern]);
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn annotates_and_exports_to_folder() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("shot.png");
        write_png(&input, 40, 30);

        let mut a = args(vec![input.display().to_string()]);
        a.output_dir = Some(dir.path().to_path_buf());
        a.folder = Some("marked".into());
        let settings = EditorSettings::default();
        let saved = run_one(&input, &a, &settings, Some("rect(2, 2, 30, 20);")).unwrap();

        let expected = dir.path().join("marked").join("shot.png");
        assert_eq!(Path::new(&saved), expected.as_path());
        let out = crate::io::decode_image(&std::fs::read(&expected).unwrap()).unwrap();
        assert_eq!(out.dimensions(), (40, 30));
        assert_ne!(out.get_pixel(2, 10), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn script_errors_fail_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("shot.png");
        write_png(&input, 20, 20);
        let mut a = args(vec![input.display().to_string()]);
        a.output = Some(dir.path().join("out.png"));
        let err = run_one(&input, &a, &EditorSettings::default(), Some("crop(0, 0, 3, 3);")).unwrap_err();
        assert!(matches!(err, EditorError::Script(_)));
        assert!(!dir.path().join("out.png").exists());
    }
}
