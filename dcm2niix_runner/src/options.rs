//! Typed, validated command-line options for dcm2niix.
//!
//! Every option is described once in [`SCHEMA`]: its wire token, the kinds of
//! logical input it accepts, a lookup table from logical input to wire value,
//! and the set of valid wire values. [`Options`] stores one wire value per
//! schema entry and renders them to an argument list in schema order, so the
//! command line is deterministic.
//!
//! Setters run the same pipeline for every option: kind check, table lookup,
//! value check, commit. A failing setter leaves the stored value untouched.
//!
//! ```
//! use dcm2niix_runner::Options;
//!
//! let mut options = Options::default();
//! options.set_compress(true).unwrap();
//! options.set_merge_2d_slices("auto").unwrap();
//! assert_eq!(options.compress().to_string(), "true");
//! assert!(options.set_compression_level(15).is_err());
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::debug;

use crate::error::{Error, Result};

/// A logical value a caller can assign to an option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Setting {
    Bool(bool),
    Int(i64),
    Str(String),
}

/// The kind of a [`Setting`], used for type validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKind {
    Str,
    Bool,
    Int,
}

impl SettingKind {
    pub fn name(self) -> &'static str {
        match self {
            SettingKind::Str => "str",
            SettingKind::Bool => "bool",
            SettingKind::Int => "int",
        }
    }
}

impl Setting {
    pub fn kind(&self) -> SettingKind {
        match self {
            Setting::Bool(_) => SettingKind::Bool,
            Setting::Int(_) => SettingKind::Int,
            Setting::Str(_) => SettingKind::Str,
        }
    }

    /// Parses a command-line value: `true`/`false` become booleans,
    /// everything else is kept as a string (wire form or named constant).
    pub fn parse_cli(value: &str) -> Self {
        match value {
            "true" => Setting::Bool(true),
            "false" => Setting::Bool(false),
            other => Setting::Str(other.to_string()),
        }
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Setting::Bool(b) => write!(f, "{}", b),
            Setting::Int(i) => write!(f, "{}", i),
            Setting::Str(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Setting {
    fn from(value: bool) -> Self {
        Setting::Bool(value)
    }
}

impl From<i64> for Setting {
    fn from(value: i64) -> Self {
        Setting::Int(value)
    }
}

impl From<i32> for Setting {
    fn from(value: i32) -> Self {
        Setting::Int(value.into())
    }
}

impl From<u8> for Setting {
    fn from(value: u8) -> Self {
        Setting::Int(value.into())
    }
}

impl From<&str> for Setting {
    fn from(value: &str) -> Self {
        Setting::Str(value.to_string())
    }
}

impl From<String> for Setting {
    fn from(value: String) -> Self {
        Setting::Str(value)
    }
}

/// Logical value as it appears in a static conversion table.
#[derive(Debug, Clone, Copy)]
enum Logical {
    Bool(bool),
    Int(i64),
    Str(&'static str),
}

impl Logical {
    fn matches(self, setting: &Setting) -> bool {
        match (self, setting) {
            (Logical::Bool(a), Setting::Bool(b)) => a == *b,
            (Logical::Int(a), Setting::Int(b)) => a == *b,
            (Logical::Str(a), Setting::Str(b)) => a == b,
            _ => false,
        }
    }

    fn to_setting(self) -> Setting {
        match self {
            Logical::Bool(b) => Setting::Bool(b),
            Logical::Int(i) => Setting::Int(i),
            Logical::Str(s) => Setting::Str(s.to_string()),
        }
    }
}

/// Which wire values an option accepts.
#[derive(Debug, Clone, Copy)]
enum Allowed {
    OneOf(&'static [&'static str]),
    /// Free text, optionally capped in length; never empty.
    Text { max_len: Option<usize> },
    Digits,
}

/// How an entry turns into arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Render {
    /// `[token, value]`
    Pair,
    /// `token + value` as one argument, e.g. `-6`
    Joined,
    /// `token` alone when the value is `y`, nothing otherwise
    Switch,
}

/// Identifies one option of the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionId {
    CompressionLevel,
    AdjacentDicoms,
    BidsSidecar,
    AnonymizeBidsSidecar,
    DirectorySearchDepth,
    ExportAsNrrd,
    Filename,
    GenerateDefaults,
    IgnoreDerived,
    LosslesslyScale,
    Merge2dSlices,
    Rename,
    SingleFileMode,
    PrivateTextNotes,
    Verbose,
    ConflictWriteBehavior,
    Crop3d,
    ByteOrder,
    Progress,
    Compress,
    Comment,
    OnlyCrc,
    PhilipsPreciseFloatScaling,
    Terse,
}

impl OptionId {
    pub fn spec(self) -> &'static OptionSpec {
        &SCHEMA[self as usize]
    }

    /// Config key of the option, e.g. `compression_level`.
    pub fn key(self) -> &'static str {
        self.spec().key
    }
}

impl FromStr for OptionId {
    type Err = Error;

    fn from_str(key: &str) -> Result<Self> {
        SCHEMA
            .iter()
            .find(|spec| spec.key == key)
            .map(|spec| spec.id)
            .ok_or_else(|| Error::UnknownOption(key.to_string()))
    }
}

/// Static description of one dcm2niix option.
#[derive(Debug)]
pub struct OptionSpec {
    pub id: OptionId,
    pub key: &'static str,
    pub name: &'static str,
    pub token: &'static str,
    pub help: &'static str,
    kinds: &'static [SettingKind],
    conversions: &'static [(Logical, &'static str)],
    allowed: Allowed,
    render: Render,
    default: Option<&'static str>,
}

impl OptionSpec {
    fn check_kind(&self, setting: &Setting) -> Result<()> {
        if self.kinds.contains(&setting.kind()) {
            return Ok(());
        }
        Err(Error::InvalidType {
            name: self.name,
            allowed: self
                .kinds
                .iter()
                .map(|kind| kind.name())
                .collect::<Vec<_>>()
                .join(", "),
            found: setting.kind().name(),
        })
    }

    fn convert(&self, setting: &Setting) -> String {
        self.conversions
            .iter()
            .find(|(logical, _)| logical.matches(setting))
            .map(|(_, wire)| wire.to_string())
            .unwrap_or_else(|| setting.to_string())
    }

    fn check_value(&self, wire: &str) -> Result<()> {
        let (valid, allowed) = match self.allowed {
            Allowed::OneOf(values) => (values.contains(&wire), values.join(", ")),
            Allowed::Text { max_len: Some(max) } => (
                !wire.is_empty() && wire.chars().count() <= max,
                format!("text of at most {} characters", max),
            ),
            Allowed::Text { max_len: None } => (!wire.is_empty(), "non-empty text".to_string()),
            Allowed::Digits => (
                !wire.is_empty() && wire.chars().all(|c| c.is_ascii_digit()),
                "decimal CRC number".to_string(),
            ),
        };
        if valid {
            Ok(())
        } else {
            Err(Error::InvalidValue {
                name: self.name,
                allowed,
                found: wire.to_string(),
            })
        }
    }

    /// Maps a stored wire value back to the logical value a caller would set.
    fn inverse(&self, wire: &str) -> Setting {
        self.conversions
            .iter()
            .find(|(_, w)| *w == wire)
            .map(|(logical, _)| logical.to_setting())
            .unwrap_or_else(|| Setting::Str(wire.to_string()))
    }
}

const STR_BOOL: &[SettingKind] = &[SettingKind::Str, SettingKind::Bool];
const STR_INT: &[SettingKind] = &[SettingKind::Str, SettingKind::Int];
const STR_BOOL_INT: &[SettingKind] = &[SettingKind::Str, SettingKind::Bool, SettingKind::Int];
const STR_ONLY: &[SettingKind] = &[SettingKind::Str];
const BOOL_ONLY: &[SettingKind] = &[SettingKind::Bool];

const YES_NO: &[(Logical, &str)] = &[(Logical::Bool(true), "y"), (Logical::Bool(false), "n")];
const DIGITS: &[(Logical, &str)] = &[
    (Logical::Int(0), "0"),
    (Logical::Int(1), "1"),
    (Logical::Int(2), "2"),
    (Logical::Int(3), "3"),
    (Logical::Int(4), "4"),
    (Logical::Int(5), "5"),
    (Logical::Int(6), "6"),
    (Logical::Int(7), "7"),
    (Logical::Int(8), "8"),
    (Logical::Int(9), "9"),
];
const MERGE: &[(Logical, &str)] = &[
    (Logical::Bool(true), "y"),
    (Logical::Bool(false), "n"),
    (Logical::Int(0), "0"),
    (Logical::Int(1), "1"),
    (Logical::Int(2), "2"),
    (Logical::Str("auto"), "2"),
];
const VERBOSE: &[(Logical, &str)] = &[
    (Logical::Bool(true), "y"),
    (Logical::Bool(false), "n"),
    (Logical::Int(0), "0"),
    (Logical::Int(1), "1"),
    (Logical::Int(2), "2"),
];
const CONFLICT: &[(Logical, &str)] = &[
    (Logical::Int(0), "0"),
    (Logical::Int(1), "1"),
    (Logical::Int(2), "2"),
];
const COMPRESS: &[(Logical, &str)] = &[
    (Logical::Bool(true), "y"),
    (Logical::Bool(false), "n"),
    (Logical::Int(3), "3"),
];

const YN: &[&str] = &["y", "n"];
const YNO: &[&str] = &["y", "n", "o"];
const DIGIT_VALUES: &[&str] = &["0", "1", "2", "3", "4", "5", "6", "7", "8", "9"];

const fn yes_no(
    id: OptionId,
    key: &'static str,
    name: &'static str,
    token: &'static str,
    help: &'static str,
    default: Option<&'static str>,
) -> OptionSpec {
    OptionSpec {
        id,
        key,
        name,
        token,
        help,
        kinds: STR_BOOL,
        conversions: YES_NO,
        allowed: Allowed::OneOf(YN),
        render: Render::Pair,
        default,
    }
}

/// All options in argument order. Indexed by `OptionId as usize`.
pub static SCHEMA: [OptionSpec; 24] = [
    OptionSpec {
        id: OptionId::CompressionLevel,
        key: "compression_level",
        name: "Compression level",
        token: "-",
        help: "gz compression level (1=fastest, 9=smallest)",
        kinds: STR_INT,
        conversions: DIGITS,
        allowed: Allowed::OneOf(DIGIT_VALUES),
        render: Render::Joined,
        default: Some("6"),
    },
    yes_no(
        OptionId::AdjacentDicoms,
        "adjacent_dicoms",
        "Adjacent DICOM",
        "-a",
        "images from same series always in same folder",
        Some("n"),
    ),
    OptionSpec {
        id: OptionId::BidsSidecar,
        key: "bids_sidecar",
        name: "BIDS sidecar",
        token: "-b",
        help: "BIDS sidecar (y/n/o, o=only: no NIfTI)",
        kinds: STR_BOOL,
        conversions: YES_NO,
        allowed: Allowed::OneOf(YNO),
        render: Render::Pair,
        default: Some("y"),
    },
    yes_no(
        OptionId::AnonymizeBidsSidecar,
        "anonymize_bids_sidecar",
        "Anonymize BIDS sidecar",
        "-ba",
        "anonymize BIDS sidecar",
        Some("y"),
    ),
    OptionSpec {
        id: OptionId::DirectorySearchDepth,
        key: "directory_search_depth",
        name: "Directory search depth",
        token: "-d",
        help: "sub-folder search depth (0..9)",
        kinds: STR_INT,
        conversions: DIGITS,
        allowed: Allowed::OneOf(DIGIT_VALUES),
        render: Render::Pair,
        default: Some("5"),
    },
    yes_no(
        OptionId::ExportAsNrrd,
        "export_as_nrrd",
        "Export as NRRD",
        "-e",
        "export as NRRD instead of NIfTI",
        Some("n"),
    ),
    OptionSpec {
        id: OptionId::Filename,
        key: "filename",
        name: "Filename",
        token: "-f",
        help: "output filename template, e.g. %f_%p_%t_%s",
        kinds: STR_ONLY,
        conversions: &[],
        allowed: Allowed::Text { max_len: None },
        render: Render::Pair,
        default: Some("%f_%p_%t_%s"),
    },
    OptionSpec {
        id: OptionId::GenerateDefaults,
        key: "generate_defaults",
        name: "Generate defaults",
        token: "-g",
        help: "generate defaults file (y/n/o/i)",
        kinds: STR_BOOL,
        conversions: YES_NO,
        allowed: Allowed::OneOf(&["y", "n", "o", "i"]),
        render: Render::Pair,
        default: Some("n"),
    },
    yes_no(
        OptionId::IgnoreDerived,
        "ignore_derived",
        "Ignore derived",
        "-i",
        "ignore derived, localizer and 2D images",
        Some("n"),
    ),
    OptionSpec {
        id: OptionId::LosslesslyScale,
        key: "losslessly_scale",
        name: "Losslessly scale",
        token: "-l",
        help: "losslessly scale 16-bit integers (y/n/o)",
        kinds: STR_BOOL,
        conversions: YES_NO,
        allowed: Allowed::OneOf(YNO),
        render: Render::Pair,
        default: Some("n"),
    },
    OptionSpec {
        id: OptionId::Merge2dSlices,
        key: "merge_2d_slices",
        name: "Merge 2D slices",
        token: "-m",
        help: "merge 2D slices from same series (y/n, 0/1/2 or auto)",
        kinds: STR_BOOL_INT,
        conversions: MERGE,
        allowed: Allowed::OneOf(&["y", "n", "0", "1", "2"]),
        render: Render::Pair,
        default: Some("2"),
    },
    yes_no(
        OptionId::Rename,
        "rename",
        "Rename",
        "-r",
        "rename instead of convert DICOMs",
        Some("n"),
    ),
    yes_no(
        OptionId::SingleFileMode,
        "single_file_mode",
        "Single file mode",
        "-s",
        "do not convert other images in folder",
        Some("n"),
    ),
    yes_no(
        OptionId::PrivateTextNotes,
        "private_text_notes",
        "Private text notes",
        "-t",
        "text notes include private patient details",
        Some("n"),
    ),
    OptionSpec {
        id: OptionId::Verbose,
        key: "verbose",
        name: "Verbose",
        token: "-v",
        help: "verbosity (y/n or 0/1/2)",
        kinds: STR_BOOL_INT,
        conversions: VERBOSE,
        allowed: Allowed::OneOf(&["y", "n", "0", "1", "2"]),
        render: Render::Pair,
        default: Some("0"),
    },
    OptionSpec {
        id: OptionId::ConflictWriteBehavior,
        key: "conflict_write_behavior",
        name: "Conflict write behavior",
        token: "-w",
        help: "name conflicts: 0=skip, 1=overwrite, 2=add suffix",
        kinds: STR_INT,
        conversions: CONFLICT,
        allowed: Allowed::OneOf(&["0", "1", "2"]),
        render: Render::Pair,
        default: Some("2"),
    },
    OptionSpec {
        id: OptionId::Crop3d,
        key: "crop_3d",
        name: "Crop 3D acquisitions",
        token: "-x",
        help: "crop 3D acquisitions (y/n/i, i=neither crop nor rotate)",
        kinds: STR_BOOL,
        conversions: YES_NO,
        allowed: Allowed::OneOf(&["y", "n", "i"]),
        render: Render::Pair,
        default: Some("n"),
    },
    OptionSpec {
        id: OptionId::ByteOrder,
        key: "byte_order",
        name: "Byte order",
        token: "--big-endian",
        help: "big-endian output (y/n/o, o=optimal/native)",
        kinds: STR_BOOL,
        conversions: YES_NO,
        allowed: Allowed::OneOf(YNO),
        render: Render::Pair,
        default: Some("o"),
    },
    yes_no(
        OptionId::Progress,
        "progress",
        "Progress",
        "--progress",
        "report progress",
        Some("n"),
    ),
    OptionSpec {
        id: OptionId::Compress,
        key: "compress",
        name: "Compression",
        token: "-z",
        help: "gz compress images (y/o/i/n/3)",
        kinds: STR_BOOL_INT,
        conversions: COMPRESS,
        allowed: Allowed::OneOf(&["y", "o", "i", "n", "3"]),
        render: Render::Pair,
        default: Some("n"),
    },
    OptionSpec {
        id: OptionId::Comment,
        key: "comment",
        name: "Comment",
        token: "-c",
        help: "comment stored in NIfTI aux_file",
        kinds: STR_ONLY,
        conversions: &[],
        allowed: Allowed::Text { max_len: Some(24) },
        render: Render::Pair,
        default: None,
    },
    OptionSpec {
        id: OptionId::OnlyCrc,
        key: "only_crc",
        name: "Only convert this CRC",
        token: "-n",
        help: "only convert the series with this CRC number",
        kinds: STR_ONLY,
        conversions: &[],
        allowed: Allowed::Digits,
        render: Render::Pair,
        default: None,
    },
    yes_no(
        OptionId::PhilipsPreciseFloatScaling,
        "philips_precise_float_scaling",
        "Philips precise float scaling",
        "-p",
        "Philips precise float (not display) scaling",
        None,
    ),
    OptionSpec {
        id: OptionId::Terse,
        key: "terse",
        name: "Terse",
        token: "--terse",
        help: "omit filename post-fixes",
        kinds: BOOL_ONLY,
        conversions: YES_NO,
        allowed: Allowed::OneOf(YN),
        render: Render::Switch,
        default: None,
    },
];

/// Creates `path` if it does not exist yet. Parent directories are not created.
pub(crate) fn ensure_dir(path: &Path) -> Result<()> {
    match std::fs::create_dir(path) {
        Ok(()) => {
            debug!("Created directory {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(source) => Err(Error::CreateDir {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Generates one setter per option, all routed through [`Options::set`].
macro_rules! setters {
    ($($(#[$meta:meta])* $fn_name:ident => $id:ident;)*) => {
        $(
            $(#[$meta])*
            pub fn $fn_name(&mut self, setting: impl Into<Setting>) -> Result<()> {
                self.set(OptionId::$id, setting)
            }
        )*
    };
}

/// The option map: one validated wire value per schema entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    values: Vec<Option<String>>,
    output_directory: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            values: SCHEMA
                .iter()
                .map(|spec| spec.default.map(str::to_string))
                .collect(),
            output_directory: None,
        }
    }
}

impl Options {
    /// Validates and stores a setting. On error nothing is changed.
    pub fn set(&mut self, id: OptionId, setting: impl Into<Setting>) -> Result<()> {
        let spec = id.spec();
        let setting = setting.into();
        spec.check_kind(&setting)?;
        let wire = spec.convert(&setting);
        spec.check_value(&wire)?;
        debug!("{} = {}", spec.key, wire);
        self.values[id as usize] = Some(wire);
        Ok(())
    }

    /// Same as [`Options::set`], addressing the option by its config key.
    pub fn set_by_key(&mut self, key: &str, setting: impl Into<Setting>) -> Result<()> {
        let id: OptionId = key.parse()?;
        self.set(id, setting)
    }

    /// Removes an option so that it is not passed at all.
    pub fn unset(&mut self, id: OptionId) {
        self.values[id as usize] = None;
    }

    /// The stored wire value, if the option is set.
    pub fn wire_value(&self, id: OptionId) -> Option<&str> {
        self.values[id as usize].as_deref()
    }

    /// The logical value of an option, inverse-mapped from its wire value.
    pub fn get(&self, id: OptionId) -> Option<Setting> {
        self.wire_value(id).map(|wire| id.spec().inverse(wire))
    }

    fn flag(&self, id: OptionId) -> bool {
        self.wire_value(id) == Some("y")
    }

    fn digit(&self, id: OptionId) -> u8 {
        self.wire_value(id)
            .and_then(|wire| wire.parse().ok())
            .unwrap_or_default()
    }

    fn logical(&self, id: OptionId) -> Setting {
        self.get(id)
            .unwrap_or_else(|| Setting::Str(String::new()))
    }

    setters! {
        /// gz compression level, 0..9.
        set_compression_level => CompressionLevel;
        set_adjacent_dicoms => AdjacentDicoms;
        set_bids_sidecar => BidsSidecar;
        set_anonymize_bids_sidecar => AnonymizeBidsSidecar;
        set_directory_search_depth => DirectorySearchDepth;
        set_export_as_nrrd => ExportAsNrrd;
        /// Output filename template (`%f`, `%p`, `%s`, ... placeholders).
        set_filename => Filename;
        set_generate_defaults => GenerateDefaults;
        set_ignore_derived => IgnoreDerived;
        set_losslessly_scale => LosslesslyScale;
        /// Accepts `true`/`false`, `0`/`1`/`2` or `"auto"` (same as 2).
        set_merge_2d_slices => Merge2dSlices;
        set_rename => Rename;
        set_single_file_mode => SingleFileMode;
        set_private_text_notes => PrivateTextNotes;
        set_verbose => Verbose;
        set_conflict_write_behavior => ConflictWriteBehavior;
        set_crop_3d => Crop3d;
        set_byte_order => ByteOrder;
        set_progress => Progress;
        set_compress => Compress;
        /// Comment stored in the NIfTI aux_file, up to 24 characters.
        set_comment => Comment;
        set_only_crc => OnlyCrc;
        set_philips_precise_float_scaling => PhilipsPreciseFloatScaling;
        set_terse => Terse;
    }

    pub fn compression_level(&self) -> u8 {
        self.digit(OptionId::CompressionLevel)
    }

    pub fn adjacent_dicoms(&self) -> bool {
        self.flag(OptionId::AdjacentDicoms)
    }

    /// `y`, `n` or `o`, returned as `Bool` for the first two.
    pub fn bids_sidecar(&self) -> Setting {
        self.logical(OptionId::BidsSidecar)
    }

    pub fn anonymize_bids_sidecar(&self) -> bool {
        self.flag(OptionId::AnonymizeBidsSidecar)
    }

    pub fn directory_search_depth(&self) -> u8 {
        self.digit(OptionId::DirectorySearchDepth)
    }

    pub fn export_as_nrrd(&self) -> bool {
        self.flag(OptionId::ExportAsNrrd)
    }

    pub fn filename(&self) -> &str {
        self.wire_value(OptionId::Filename).unwrap_or_default()
    }

    pub fn generate_defaults(&self) -> Setting {
        self.logical(OptionId::GenerateDefaults)
    }

    pub fn ignore_derived(&self) -> bool {
        self.flag(OptionId::IgnoreDerived)
    }

    pub fn losslessly_scale(&self) -> Setting {
        self.logical(OptionId::LosslesslyScale)
    }

    pub fn merge_2d_slices(&self) -> Setting {
        self.logical(OptionId::Merge2dSlices)
    }

    pub fn rename(&self) -> bool {
        self.flag(OptionId::Rename)
    }

    pub fn single_file_mode(&self) -> bool {
        self.flag(OptionId::SingleFileMode)
    }

    pub fn private_text_notes(&self) -> bool {
        self.flag(OptionId::PrivateTextNotes)
    }

    pub fn verbose(&self) -> Setting {
        self.logical(OptionId::Verbose)
    }

    pub fn conflict_write_behavior(&self) -> u8 {
        self.digit(OptionId::ConflictWriteBehavior)
    }

    pub fn crop_3d(&self) -> Setting {
        self.logical(OptionId::Crop3d)
    }

    pub fn byte_order(&self) -> Setting {
        self.logical(OptionId::ByteOrder)
    }

    pub fn progress(&self) -> bool {
        self.flag(OptionId::Progress)
    }

    pub fn compress(&self) -> Setting {
        self.logical(OptionId::Compress)
    }

    pub fn comment(&self) -> Option<&str> {
        self.wire_value(OptionId::Comment)
    }

    pub fn only_crc(&self) -> Option<&str> {
        self.wire_value(OptionId::OnlyCrc)
    }

    pub fn philips_precise_float_scaling(&self) -> Option<bool> {
        self.wire_value(OptionId::PhilipsPreciseFloatScaling)
            .map(|wire| wire == "y")
    }

    pub fn terse(&self) -> bool {
        self.flag(OptionId::Terse)
    }

    /// Host directory the converted files go to when `convert` is not given one.
    pub fn output_directory(&self) -> Option<&Path> {
        self.output_directory.as_deref()
    }

    /// Sets the output directory, creating it if it does not exist.
    pub fn set_output_directory(&mut self, dir: impl Into<PathBuf>) -> Result<()> {
        let dir = dir.into();
        ensure_dir(&dir)?;
        self.output_directory = Some(dir);
        Ok(())
    }

    /// Every schema entry paired with its stored wire value, in schema order.
    pub fn entries(&self) -> impl Iterator<Item = (&'static OptionSpec, Option<&str>)> + '_ {
        SCHEMA.iter().zip(self.values.iter().map(Option::as_deref))
    }

    /// Renders every set option, in schema order, as dcm2niix arguments.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        for (spec, value) in SCHEMA.iter().zip(&self.values) {
            let Some(value) = value else { continue };
            match spec.render {
                Render::Pair => {
                    args.push(spec.token.to_string());
                    args.push(value.clone());
                }
                Render::Joined => args.push(format!("{}{}", spec.token, value)),
                Render::Switch => {
                    if value == "y" {
                        args.push(spec.token.to_string());
                    }
                }
            }
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const DEFAULT_ARGS: [&str; 39] = [
        "-6", "-a", "n", "-b", "y", "-ba", "y", "-d", "5", "-e", "n", "-f", "%f_%p_%t_%s", "-g",
        "n", "-i", "n", "-l", "n", "-m", "2", "-r", "n", "-s", "n", "-t", "n", "-v", "0", "-w",
        "2", "-x", "n", "--big-endian", "o", "--progress", "n", "-z", "n",
    ];

    #[test]
    fn test_schema_is_indexed_by_id() {
        for (index, spec) in SCHEMA.iter().enumerate() {
            assert_eq!(spec.id as usize, index, "{} is out of place", spec.key);
        }
    }

    #[test]
    fn test_default_args() {
        let options = Options::default();
        assert_eq!(options.to_args(), DEFAULT_ARGS);
    }

    #[test]
    fn test_defaults() {
        let options = Options::default();
        assert_eq!(options.compression_level(), 6);
        assert!(!options.adjacent_dicoms());
        assert_eq!(options.bids_sidecar(), Setting::Bool(true));
        assert!(options.anonymize_bids_sidecar());
        assert_eq!(options.directory_search_depth(), 5);
        assert_eq!(options.filename(), "%f_%p_%t_%s");
        assert_eq!(options.merge_2d_slices(), Setting::Int(2));
        assert_eq!(options.verbose(), Setting::Int(0));
        assert_eq!(options.conflict_write_behavior(), 2);
        assert_eq!(options.byte_order(), Setting::Str("o".into()));
        assert_eq!(options.compress(), Setting::Bool(false));
        assert_eq!(options.comment(), None);
        assert_eq!(options.philips_precise_float_scaling(), None);
        assert!(!options.terse());
        assert_eq!(options.output_directory(), None);
    }

    #[rstest]
    #[case(OptionId::AdjacentDicoms)]
    #[case(OptionId::BidsSidecar)]
    #[case(OptionId::AnonymizeBidsSidecar)]
    #[case(OptionId::ExportAsNrrd)]
    #[case(OptionId::GenerateDefaults)]
    #[case(OptionId::IgnoreDerived)]
    #[case(OptionId::LosslesslyScale)]
    #[case(OptionId::Merge2dSlices)]
    #[case(OptionId::Rename)]
    #[case(OptionId::SingleFileMode)]
    #[case(OptionId::PrivateTextNotes)]
    #[case(OptionId::Verbose)]
    #[case(OptionId::Crop3d)]
    #[case(OptionId::ByteOrder)]
    #[case(OptionId::Progress)]
    #[case(OptionId::Compress)]
    #[case(OptionId::PhilipsPreciseFloatScaling)]
    #[case(OptionId::Terse)]
    fn test_bool_round_trip(#[case] id: OptionId) {
        let mut options = Options::default();

        options.set(id, true).unwrap();
        assert_eq!(options.wire_value(id), Some("y"));
        assert_eq!(options.get(id), Some(Setting::Bool(true)));

        options.set(id, false).unwrap();
        assert_eq!(options.wire_value(id), Some("n"));
        assert_eq!(options.get(id), Some(Setting::Bool(false)));
    }

    #[test]
    fn test_compression_level_int_and_str() {
        let mut options = Options::default();
        for level in 0..=9u8 {
            options.set_compression_level(level).unwrap();
            assert_eq!(options.compression_level(), level);

            options.set_compression_level(level.to_string()).unwrap();
            assert_eq!(options.compression_level(), level);
        }
    }

    #[test]
    fn test_invalid_compression_level() {
        let mut options = Options::default();
        let err = options.set_compression_level(15).unwrap_err();
        assert!(matches!(err, Error::InvalidValue { .. }));
        assert_eq!(
            err.to_string(),
            "Compression level setting should be one of '0, 1, 2, 3, 4, 5, 6, 7, 8, 9', you passed '15'"
        );
        assert_eq!(options.compression_level(), 6);
    }

    #[test]
    fn test_invalid_compression_level_type() {
        let mut options = Options::default();
        let err = options.set_compression_level(true).unwrap_err();
        assert!(matches!(err, Error::InvalidType { .. }));
        assert_eq!(
            err.to_string(),
            "Compression level setting should be one of 'str, int', you passed an argument with type 'bool'"
        );
    }

    #[test]
    fn test_adjacent_dicoms_errors() {
        let mut options = Options::default();
        assert_eq!(
            options.set_adjacent_dicoms(5).unwrap_err().to_string(),
            "Adjacent DICOM setting should be one of 'str, bool', you passed an argument with type 'int'"
        );
        assert_eq!(
            options.set_adjacent_dicoms("5").unwrap_err().to_string(),
            "Adjacent DICOM setting should be one of 'y, n', you passed '5'"
        );
        options.set_adjacent_dicoms("y").unwrap();
        assert!(options.adjacent_dicoms());
    }

    #[rstest]
    #[case(Setting::Bool(true), "y")]
    #[case(Setting::Bool(false), "n")]
    #[case(Setting::Str("o".into()), "o")]
    #[case(Setting::Str("i".into()), "i")]
    #[case(Setting::Str("3".into()), "3")]
    #[case(Setting::Int(3), "3")]
    fn test_compress_values(#[case] setting: Setting, #[case] wire: &str) {
        let mut options = Options::default();
        options.set_compress(setting).unwrap();
        assert_eq!(options.wire_value(OptionId::Compress), Some(wire));
    }

    #[test]
    fn test_compress_set_twice() {
        let mut options = Options::default();
        options.set_compress(true).unwrap();
        options.set_compress(false).unwrap();
        assert_eq!(options.wire_value(OptionId::Compress), Some("n"));
    }

    #[test]
    fn test_merge_auto() {
        let mut options = Options::default();
        options.set_merge_2d_slices(true).unwrap();
        options.set_merge_2d_slices("auto").unwrap();
        assert_eq!(options.wire_value(OptionId::Merge2dSlices), Some("2"));
        assert!(options.set_merge_2d_slices("always").is_err());
    }

    #[test]
    fn test_text_options() {
        let mut options = Options::default();
        options.set_filename("TEST").unwrap();
        assert_eq!(options.filename(), "TEST");
        assert!(options.set_filename("").is_err());
        assert!(options.set_filename(true).is_err());

        options.set_comment("first_visit").unwrap();
        assert_eq!(options.comment(), Some("first_visit"));
        assert!(options.set_comment("x".repeat(25)).is_err());
        assert_eq!(options.comment(), Some("first_visit"));

        assert!(options.set_only_crc("12ab").is_err());
        options.set_only_crc("123456").unwrap();
        assert_eq!(options.only_crc(), Some("123456"));
    }

    #[test]
    fn test_optional_entries_render_after_defaults() {
        let mut options = Options::default();
        options.set_terse(true).unwrap();
        options.set_comment("visit").unwrap();
        options.set_compression_level(9).unwrap();

        let args = options.to_args();
        assert_eq!(args[0], "-9");
        assert_eq!(&args[DEFAULT_ARGS.len()..], ["-c", "visit", "--terse"]);

        options.set_terse(false).unwrap();
        assert_eq!(options.to_args().last().map(String::as_str), Some("visit"));

        options.unset(OptionId::Comment);
        options.set_compression_level(6).unwrap();
        assert_eq!(options.to_args(), DEFAULT_ARGS);
    }

    #[test]
    fn test_terse_only_accepts_bool() {
        let mut options = Options::default();
        let err = options.set_terse("y").unwrap_err();
        assert!(matches!(err, Error::InvalidType { found: "str", .. }));
    }

    #[test]
    fn test_set_by_key() {
        let mut options = Options::default();
        options.set_by_key("directory_search_depth", 2).unwrap();
        assert_eq!(options.directory_search_depth(), 2);
        assert!(matches!(
            options.set_by_key("no_such_option", true),
            Err(Error::UnknownOption(_))
        ));
    }

    #[test]
    fn test_entries_follow_schema() {
        let mut options = Options::default();
        options.set_comment("visit").unwrap();
        let entries: Vec<_> = options.entries().collect();

        assert_eq!(entries.len(), SCHEMA.len());
        assert!(entries.iter().all(|(spec, _)| !spec.help.is_empty()));
        assert_eq!(entries[0].0.id.key(), "compression_level");
        assert_eq!(entries[0].1, Some("6"));

        let lookup = |id: OptionId| entries[id as usize].1;
        assert_eq!(lookup(OptionId::Comment), Some("visit"));
        assert_eq!(lookup(OptionId::OnlyCrc), None);
        assert_eq!(lookup(OptionId::Filename), Some("%f_%p_%t_%s"));
    }

    #[test]
    fn test_parse_cli_setting() {
        assert_eq!(Setting::parse_cli("true"), Setting::Bool(true));
        assert_eq!(Setting::parse_cli("false"), Setting::Bool(false));
        assert_eq!(Setting::parse_cli("5"), Setting::Str("5".into()));
    }

    #[test]
    fn test_output_directory_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nifti");
        assert!(!dir.exists());

        let mut options = Options::default();
        options.set_output_directory(&dir).unwrap();
        assert!(dir.is_dir());
        assert_eq!(options.output_directory(), Some(dir.as_path()));

        // already existing is fine
        options.set_output_directory(&dir).unwrap();
        assert!(options.to_args().iter().all(|arg| arg != "-o"));
    }

    #[test]
    fn test_output_directory_is_not_recursive() {
        let tmp = tempfile::tempdir().unwrap();
        let mut options = Options::default();
        let err = options
            .set_output_directory(tmp.path().join("a").join("b"))
            .unwrap_err();
        assert!(matches!(err, Error::CreateDir { .. }));
        assert_eq!(options.output_directory(), None);
    }
}
