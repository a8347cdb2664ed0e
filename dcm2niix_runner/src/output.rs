//! Parsing of the text dcm2niix prints while it converts.
//!
//! The parser is best-effort: lines it does not recognise are skipped, and a
//! conversion that never reports an output file leaves the result fields unset.

use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use log::debug;
use regex::Regex;
use serde::Serialize;

/// Warning dcm2niix emits when it cannot tell the slice direction.
pub const NO_DIRECTION_WARNING: &str =
    "Unable to determine slice direction: please check whether slices are flipped";

/// Extension dcm2niix appends to the reported output basename.
pub const NIFTI_SUFFIX: &str = ".nii.gz";

fn converted_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Convert (\d+) DICOM as (\S+) \((\d+x\d+x\d+x\d+)\)")
            .expect("conversion pattern is valid")
    })
}

fn warning_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Warning: (.*)").expect("warning pattern is valid"))
}

/// Structured result of one dcm2niix run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversionOutput {
    /// File name of the converted image, e.g. `T1_3.nii.gz`.
    pub file_name: Option<String>,
    /// Path of the converted image. The orchestrator rewrites it to the host path.
    pub output_path: Option<PathBuf>,
    /// Image shape as x, y, z, volumes.
    pub image_shape: Option<[u64; 4]>,
    /// Number of DICOM slices that went into the image.
    pub n_slices: Option<String>,
    pub warnings: Vec<String>,
    /// Set when dcm2niix could not determine the slice direction.
    pub no_direction: bool,
}

impl ConversionOutput {
    /// Parses a whole output at once.
    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parser = OutputParser::new();
        for line in lines {
            parser.feed_line(line.as_ref());
        }
        parser.finish()
    }
}

/// Incremental parser, fed one output line at a time.
#[derive(Debug, Default)]
pub struct OutputParser {
    result: ConversionOutput,
}

impl OutputParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed_line(&mut self, line: &str) {
        let line = line.trim();
        debug!("dcm2niix: {}", line);
        self.parse_converted_info(line);
        self.parse_warning(line);
    }

    pub fn finish(self) -> ConversionOutput {
        self.result
    }

    fn parse_converted_info(&mut self, line: &str) {
        let Some(caps) = converted_regex().captures(line) else {
            return;
        };

        let output_path = normalize_path(Path::new(&format!("{}{}", &caps[2], NIFTI_SUFFIX)));
        self.result.file_name = output_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        self.result.output_path = Some(output_path);
        self.result.n_slices = Some(caps[1].to_string());
        self.result.image_shape = parse_shape(&caps[3]);
    }

    fn parse_warning(&mut self, line: &str) {
        let Some(caps) = warning_regex().captures(line) else {
            return;
        };

        let warning = caps[1].to_string();
        if warning == NO_DIRECTION_WARNING {
            self.result.no_direction = true;
        }
        self.result.warnings.push(warning);
    }
}

/// Splits `WxHxDxV` into four integers. Values that overflow give `None`.
fn parse_shape(shape: &str) -> Option<[u64; 4]> {
    let dims = shape
        .split('x')
        .map(|dim| dim.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;
    dims.try_into().ok()
}

/// Lexically normalizes a path: drops `.`, resolves `..` against preceding
/// components and collapses repeated separators. The filesystem is not touched.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if depth > 0 {
                    normalized.pop();
                    depth -= 1;
                } else if !normalized.has_root() {
                    normalized.push("..");
                }
            }
            Component::Normal(part) => {
                normalized.push(part);
                depth += 1;
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    if normalized.as_os_str().is_empty() {
        normalized.push(".");
    }
    normalized
}
