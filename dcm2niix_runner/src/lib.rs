//! Runs dcm2niix (DICOM to NIfTI conversion) inside a Docker or Singularity
//! container.
//!
//! [`Options`] holds validated dcm2niix flags, [`Dcm2niix`] binds the input
//! and output directories into the container and runs it, and
//! [`ConversionOutput`] is what could be read from dcm2niix's log.
//!
//! ```no_run
//! use dcm2niix_runner::Dcm2niix;
//! use std::path::Path;
//!
//! let mut dcm2niix = Dcm2niix::new("1.0.20211006", "docker")?;
//! dcm2niix.options_mut().set_compress(true)?;
//! dcm2niix.options_mut().set_filename("%p_%s")?;
//!
//! let output = dcm2niix.convert(Path::new("/data/dicom"), Some(Path::new("/data/nifti")), &[])?;
//! println!("{:?} {:?}", output.output_path, output.image_shape);
//! # Ok::<(), dcm2niix_runner::Error>(())
//! ```
pub mod config;
pub mod dcm2niix;
pub mod error;
pub mod options;
pub mod output;
pub mod processor;
pub mod registry;
pub mod runtime;

pub use dcm2niix::{Dcm2niix, DEFAULT_VERSION};
pub use error::{Error, Result};
pub use options::{OptionId, Options, Setting};
pub use output::{ConversionOutput, OutputParser};
pub use runtime::{Backend, CommandRuntime, ContainerRuntime, MockRuntime};
