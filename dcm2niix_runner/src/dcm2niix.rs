//! Runs dcm2niix in a container and collects the parsed result.

use std::path::{Path, PathBuf};

use log::info;

use crate::error::{Error, Result};
use crate::options::{ensure_dir, Options};
use crate::output::{ConversionOutput, OutputParser};
use crate::runtime::{Backend, CommandRuntime, ContainerRuntime, INPUT_MOUNT, OUTPUT_MOUNT};

/// dcm2niix image tag used when none is configured.
pub const DEFAULT_VERSION: &str = "1.0.20211006";

/// A configured dcm2niix: container backend, image version and options.
#[derive(Debug, Clone)]
pub struct Dcm2niix<R = CommandRuntime> {
    version: String,
    backend: Backend,
    download_folder: Option<PathBuf>,
    options: Options,
    runtime: R,
}

impl Dcm2niix<CommandRuntime> {
    /// Uses the `docker`/`singularity` executables found on this host.
    pub fn new(version: impl Into<String>, backend: &str) -> Result<Self> {
        Self::with_runtime(version, backend, CommandRuntime)
    }
}

/// Parses the backend name, then checks that the backend is installed.
fn select_backend<R: ContainerRuntime>(runtime: &R, name: &str) -> Result<Backend> {
    let backend: Backend = name.parse()?;
    if !runtime.is_installed(backend) {
        return Err(Error::BackendNotInstalled(backend));
    }
    Ok(backend)
}

/// Arguments passed to dcm2niix: the options, `extra_args`, then the fixed
/// output and input mounts.
pub fn command_line_args(options: &Options, extra_args: &[String]) -> Vec<String> {
    let mut args = options.to_args();
    args.extend(extra_args.iter().cloned());
    args.push("-o".to_string());
    args.push(OUTPUT_MOUNT.to_string());
    args.push(INPUT_MOUNT.to_string());
    args
}

fn bindings(input_dir: &Path, output_dir: &Path) -> Vec<String> {
    vec![
        format!("{}:{}", input_dir.display(), INPUT_MOUNT),
        format!("{}:{}", output_dir.display(), OUTPUT_MOUNT),
    ]
}

impl<R: ContainerRuntime> Dcm2niix<R> {
    pub fn with_runtime(version: impl Into<String>, backend: &str, runtime: R) -> Result<Self> {
        let backend = select_backend(&runtime, backend)?;
        Ok(Self {
            version: version.into(),
            backend,
            download_folder: None,
            options: Options::default(),
            runtime,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn container_backend(&self) -> Backend {
        self.backend
    }

    /// Switches backend. Unknown names fail before any installation check.
    pub fn set_container_backend(&mut self, name: &str) -> Result<()> {
        let backend = select_backend(&self.runtime, name)?;
        if self.download_folder.is_some() && backend != Backend::Singularity {
            return Err(Error::DownloadRequiresSingularity(backend));
        }
        self.backend = backend;
        Ok(())
    }

    /// Registry reference of the image, e.g. `svdvoort/dcm2niix:1.0.20211006`.
    pub fn container_url(&self) -> String {
        self.backend.image_url(&self.version)
    }

    /// File name a downloaded image is stored under.
    pub fn download_name(&self) -> String {
        format!("dcm2niix_{}.sif", self.version)
    }

    /// Path of the downloaded image, when download mode is enabled.
    pub fn downloaded_image(&self) -> Option<PathBuf> {
        self.download_folder
            .as_ref()
            .map(|folder| folder.join(self.download_name()))
    }

    /// Downloads the image into `folder` once and runs it from there from now on.
    pub fn enable_download(&mut self, folder: impl Into<PathBuf>) -> Result<()> {
        if self.backend != Backend::Singularity {
            return Err(Error::DownloadRequiresSingularity(self.backend));
        }
        let folder = folder.into();
        ensure_dir(&folder)?;

        let image = folder.join(self.download_name());
        if image.exists() {
            info!("Using downloaded image {}", image.display());
        } else {
            self.runtime
                .pull(self.backend, &self.container_url(), Some(&image))?;
        }
        self.download_folder = Some(folder);
        Ok(())
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut Options {
        &mut self.options
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn command_line_args(&self, extra_args: &[String]) -> Vec<String> {
        command_line_args(&self.options, extra_args)
    }

    fn image(&self) -> String {
        match self.downloaded_image() {
            Some(path) => path.display().to_string(),
            None => self.container_url(),
        }
    }

    /// Converts the DICOMs in `input_dir`.
    ///
    /// The output goes to `output_dir`, else the configured output directory,
    /// else `input_dir`. It is created if missing.
    pub fn convert(
        &self,
        input_dir: &Path,
        output_dir: Option<&Path>,
        extra_args: &[String],
    ) -> Result<ConversionOutput> {
        self.convert_with(input_dir, output_dir, extra_args, |_| {})
    }

    /// Like [`Dcm2niix::convert`], calling `on_line` with every line dcm2niix prints.
    pub fn convert_with<F>(
        &self,
        input_dir: &Path,
        output_dir: Option<&Path>,
        extra_args: &[String],
        mut on_line: F,
    ) -> Result<ConversionOutput>
    where
        F: FnMut(&str),
    {
        let output_dir = output_dir
            .or(self.options.output_directory())
            .unwrap_or(input_dir);
        ensure_dir(output_dir)?;

        let input_dir = std::path::absolute(input_dir)?;
        let output_dir = std::path::absolute(output_dir)?;
        let args = self.command_line_args(extra_args);
        let binds = bindings(&input_dir, &output_dir);

        info!(
            "Converting {} into {} with {}",
            input_dir.display(),
            output_dir.display(),
            self.backend
        );
        let mut parser = OutputParser::new();
        for line in self.runtime.run(self.backend, &self.image(), &args, &binds)? {
            let line = line?;
            on_line(&line);
            parser.feed_line(&line);
        }

        let mut result = parser.finish();
        result.output_path = result
            .file_name
            .as_ref()
            .map(|name| output_dir.join(name));
        if let Some(path) = &result.output_path {
            info!("Wrote {}", path.display());
        }
        Ok(result)
    }
}
