use crate::dcm2niix::Dcm2niix;
use crate::runtime::ContainerRuntime;
use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::*;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::warn;
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of converting one input directory.
#[derive(Serialize, Default, Debug)]
pub struct ProcessResult {
    pub input: PathBuf,
    pub status: String,
    pub reason: Vec<String>,
    pub output_path: Option<PathBuf>,
    pub image_shape: Option<[u64; 4]>,
    pub n_slices: Option<String>,
    pub warnings: Vec<String>,
    pub no_direction: bool,
    pub timestamp: DateTime<Utc>,
}

/// Output directory for `input` in batch mode: `<root>/<input dir name>`, or
/// the input itself when no root is given.
pub fn batch_output_dir(input: &Path, output_root: Option<&Path>) -> PathBuf {
    match (output_root, input.file_name()) {
        (Some(root), Some(name)) => root.join(name),
        (Some(root), None) => root.to_path_buf(),
        (None, _) => input.to_path_buf(),
    }
}

/// Converts one input directory on the blocking pool, showing a spinner with
/// the most recent dcm2niix line.
pub async fn process_single_input<R>(
    dcm2niix: Arc<Dcm2niix<R>>,
    input: PathBuf,
    output_root: Option<PathBuf>,
    mp: Arc<MultiProgress>,
) -> ProcessResult
where
    R: ContainerRuntime + Send + Sync + 'static,
{
    let pb = setup_progress_bar(&mp, &input.display().to_string());
    let mut res = ProcessResult {
        input: input.clone(),
        timestamp: Utc::now(),
        ..Default::default()
    };

    if !input.is_dir() {
        return finish_with_error(pb, &mut res, "Input directory not found".into());
    }

    let output_dir = batch_output_dir(&input, output_root.as_deref());
    let line_pb = pb.clone();
    let joined = tokio::task::spawn_blocking(move || {
        dcm2niix.convert_with(&input, Some(&output_dir), &[], |line| {
            line_pb.set_message(line.to_string())
        })
    })
    .await;

    let output = match joined {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return finish_with_error(pb, &mut res, format!("Conversion failed: {}", e)),
        Err(e) => return finish_with_error(pb, &mut res, format!("Conversion task failed: {}", e)),
    };

    res.output_path = output.output_path;
    res.image_shape = output.image_shape;
    res.n_slices = output.n_slices;
    res.warnings = output.warnings;
    res.no_direction = output.no_direction;
    if res.output_path.is_none() {
        res.reason.push("No image was converted".into());
    }
    res.status = summarize_status(res.output_path.as_deref(), &res.reason);

    match &res.output_path {
        Some(path) => pb.finish_with_message(format!("{} {}", "✓".green(), path.display())),
        None => pb.finish_with_message(format!("{} no output", "✗".red())),
    }
    res
}

fn setup_progress_bar(mp: &MultiProgress, prefix: &str) -> ProgressBar {
    let pb = mp.add(ProgressBar::new_spinner());
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{prefix}] {msg}")
            .unwrap(),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn finish_with_error(pb: ProgressBar, res: &mut ProcessResult, err: String) -> ProcessResult {
    warn!("{}: {}", res.input.display(), err);
    pb.finish_with_message(format!("{} {}", "✗".red(), err));
    res.status = "Failed".into();
    res.reason.push(err);
    std::mem::take(res)
}

pub fn summarize_status(output_path: Option<&Path>, reasons: &[String]) -> String {
    if reasons.is_empty() { "Success".into() }
    else if output_path.is_some() { "Partial".into() }
    else { "Failed".into() }
}

pub fn write_reports(csv_path: &PathBuf, json_path: &PathBuf, results: &[ProcessResult]) -> Result<()> {
    write_csv_report(csv_path, results)?;
    write_json_report(json_path, results)?;
    Ok(())
}

fn write_json_report(path: &PathBuf, results: &[ProcessResult]) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, results)?;
    Ok(())
}

fn write_csv_report(path: &PathBuf, results: &[ProcessResult]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(["Input", "Status", "Reason", "OutputPath", "Shape", "Slices", "Warnings", "NoDirection", "Timestamp"])?;
    for r in results {
        let input = r.input.to_string_lossy().to_string();
        let output_path = r
            .output_path
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();
        let shape = r
            .image_shape
            .map(|s| format!("{}x{}x{}x{}", s[0], s[1], s[2], s[3]))
            .unwrap_or_default();
        wtr.write_record([
            input.as_str(),
            r.status.as_str(),
            r.reason.join("; ").as_str(),
            output_path.as_str(),
            shape.as_str(),
            r.n_slices.as_deref().unwrap_or(""),
            r.warnings.join("; ").as_str(),
            if r.no_direction { "true" } else { "false" },
            r.timestamp.to_rfc3339().as_str(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use indicatif::ProgressDrawTarget;

    fn hidden_progress() -> Arc<MultiProgress> {
        Arc::new(MultiProgress::with_draw_target(ProgressDrawTarget::hidden()))
    }

    #[test]
    fn test_batch_output_dir() {
        let input = Path::new("/data/study1");
        assert_eq!(batch_output_dir(input, None), PathBuf::from("/data/study1"));
        assert_eq!(
            batch_output_dir(input, Some(Path::new("/nifti"))),
            PathBuf::from("/nifti/study1")
        );
    }

    #[test]
    fn test_summarize_status() {
        assert_eq!(summarize_status(Some(Path::new("a.nii.gz")), &[]), "Success");
        assert_eq!(summarize_status(Some(Path::new("a.nii.gz")), &["x".into()]), "Partial");
        assert_eq!(summarize_status(None, &["x".into()]), "Failed");
    }

    #[tokio::test]
    async fn test_process_single_input() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("study1");
        let root = tmp.path().join("nifti");
        std::fs::create_dir(&input).unwrap();
        std::fs::create_dir(&root).unwrap();

        let runtime = MockRuntime::new().with_output([
            "Warning: Unable to determine slice direction: please check whether slices are flipped",
            "Convert 12 DICOM as /output/T1 (64x64x12x1)",
        ]);
        let dcm2niix = Arc::new(Dcm2niix::with_runtime("1.0", "docker", runtime).unwrap());

        let res = process_single_input(dcm2niix, input, Some(root.clone()), hidden_progress()).await;

        assert_eq!(res.status, "Success");
        assert_eq!(res.output_path, Some(root.join("study1").join("T1.nii.gz")));
        assert_eq!(res.image_shape, Some([64, 64, 12, 1]));
        assert!(res.no_direction);
    }

    #[tokio::test]
    async fn test_process_single_input_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let mut runtime = MockRuntime::new();
        runtime.failure = Some("exit status: 1".into());
        let dcm2niix = Arc::new(Dcm2niix::with_runtime("1.0", "docker", runtime).unwrap());

        let res =
            process_single_input(dcm2niix, tmp.path().to_path_buf(), None, hidden_progress()).await;

        assert_eq!(res.status, "Failed");
        assert!(res.reason[0].starts_with("Conversion failed"));
    }

    #[tokio::test]
    async fn test_process_missing_input_is_not_created() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("missing");
        let dcm2niix = Arc::new(Dcm2niix::with_runtime("1.0", "docker", MockRuntime::new()).unwrap());

        let res = process_single_input(dcm2niix.clone(), input.clone(), None, hidden_progress()).await;

        assert_eq!(res.status, "Failed");
        assert_eq!(res.reason, vec!["Input directory not found".to_string()]);
        assert!(!input.exists());
        assert!(dcm2niix.runtime().calls().is_empty());
    }

    #[test]
    fn test_write_reports() {
        let tmp = tempfile::tempdir().unwrap();
        let csv_path = tmp.path().join("report.csv");
        let json_path = tmp.path().join("report.json");
        let results = vec![ProcessResult {
            input: PathBuf::from("/data/study1"),
            status: "Success".into(),
            output_path: Some(PathBuf::from("/nifti/study1/T1.nii.gz")),
            image_shape: Some([64, 64, 12, 1]),
            n_slices: Some("12".into()),
            ..Default::default()
        }];

        write_reports(&csv_path, &json_path, &results).unwrap();

        let csv = std::fs::read_to_string(&csv_path).unwrap();
        assert!(csv.starts_with("Input,Status,Reason,OutputPath,Shape"));
        assert!(csv.contains("/data/study1,Success,,/nifti/study1/T1.nii.gz,64x64x12x1,12"));

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(json[0]["image_shape"], serde_json::json!([64, 64, 12, 1]));
    }
}
