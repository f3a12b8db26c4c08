use crate::config::{LightgbmParams, Objective};
use crate::error::{ForecastError, Result};
use log::{debug, info};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use uuid::Uuid;

/// Dense row-major design matrix with one regression label per row.
#[derive(Debug, Clone)]
pub struct TrainingMatrix {
    num_features: usize,
    values: Vec<f64>,
    labels: Vec<f64>,
}

impl TrainingMatrix {
    pub fn new(num_features: usize) -> Self {
        Self {
            num_features,
            values: Vec::new(),
            labels: Vec::new(),
        }
    }

    pub fn with_capacity(num_features: usize, rows: usize) -> Self {
        Self {
            num_features,
            values: Vec::with_capacity(rows * num_features),
            labels: Vec::with_capacity(rows),
        }
    }

    pub fn push_row(&mut self, features: &[f64], label: f64) {
        debug_assert_eq!(features.len(), self.num_features);
        self.values.extend_from_slice(features);
        self.labels.push(label);
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn num_rows(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn row(&self, row: usize) -> &[f64] {
        let start = row * self.num_features;
        &self.values[start..start + self.num_features]
    }

    pub fn labels(&self) -> &[f64] {
        &self.labels
    }
}

/// One boosted-tree fit for a single horizon.
pub struct FitRequest<'a> {
    pub horizon: usize,
    pub matrix: &'a TrainingMatrix,
    pub feature_names: &'a [String],
    pub num_threads: usize,
}

/// Fits a regression ensemble and returns it as LightGBM model text.
pub trait BoostedTreeTrainer: Send + Sync {
    fn fit(&self, request: &FitRequest<'_>) -> Result<String>;
}

/// Drives the LightGBM command-line binary through temporary libsvm files.
#[derive(Debug, Clone)]
pub struct LightgbmCli {
    executable: PathBuf,
    params: LightgbmParams,
    num_boost_round: u32,
    work_dir: PathBuf,
}

impl LightgbmCli {
    pub fn new(executable: PathBuf, params: LightgbmParams, num_boost_round: u32) -> Self {
        Self {
            executable,
            params,
            num_boost_round,
            work_dir: std::env::temp_dir(),
        }
    }

    /// Uses `explicit` when given, else `vendor/lightgbm`, else `lightgbm`
    /// on PATH.
    pub fn resolve(
        explicit: Option<&Path>,
        params: LightgbmParams,
        num_boost_round: u32,
    ) -> Result<Self> {
        let executable = resolve_lightgbm_executable(explicit)?;
        info!("Using LightGBM executable at {}", executable.display());
        Ok(Self::new(executable, params, num_boost_round))
    }

    pub fn with_work_dir(mut self, work_dir: PathBuf) -> Self {
        self.work_dir = work_dir;
        self
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    fn build_args(&self, data: &Path, output: &Path, num_threads: usize) -> Vec<String> {
        let params = &self.params;
        let mut args = vec![
            String::from("task=train"),
            format!("objective={}", params.objective.as_str()),
            format!("num_iterations={}", self.num_boost_round),
            format!("learning_rate={}", params.learning_rate),
            format!("num_leaves={}", params.num_leaves),
            format!("max_depth={}", params.max_depth),
            format!("min_data_in_leaf={}", params.min_data_in_leaf),
            format!("min_gain_to_split={}", params.min_gain_to_split),
            format!("feature_fraction={}", params.feature_fraction),
            format!("bagging_fraction={}", params.bagging_fraction),
            format!("bagging_freq={}", params.bagging_freq),
            format!("lambda_l1={}", params.lambda_l1),
            format!("lambda_l2={}", params.lambda_l2),
            format!("num_threads={}", num_threads.max(1)),
        ];
        if matches!(params.objective, Objective::Tweedie) {
            args.push(format!(
                "tweedie_variance_power={}",
                params.tweedie_variance_power
            ));
        }
        if let Some(seed) = params.seed {
            args.push(format!("seed={}", seed));
        }
        args.push(format!("data={}", data.to_string_lossy()));
        args.push(format!("output_model={}", output.to_string_lossy()));
        args.push(String::from("verbosity=-1"));
        args
    }
}

impl BoostedTreeTrainer for LightgbmCli {
    fn fit(&self, request: &FitRequest<'_>) -> Result<String> {
        let horizon = request.horizon;
        let trainer_error = |message: String| ForecastError::Trainer { horizon, message };

        let run_id = Uuid::new_v4();
        let dataset_path = self
            .work_dir
            .join(format!("lightgbm_h{:02}_{}.svm", horizon, run_id));
        let model_path = self
            .work_dir
            .join(format!("lightgbm_h{:02}_{}.txt", horizon, run_id));

        debug!(
            "Horizon {}: writing {} rows x {} features to {}",
            horizon,
            request.matrix.num_rows(),
            request.feature_names.len(),
            dataset_path.display()
        );
        write_libsvm_dataset(request.matrix, &dataset_path)?;

        let args = self.build_args(&dataset_path, &model_path, request.num_threads);
        let output = Command::new(&self.executable).args(&args).output();
        let _ = fs::remove_file(&dataset_path);

        let output = output.map_err(|err| {
            trainer_error(format!(
                "failed to spawn {}: {}",
                self.executable.display(),
                err
            ))
        })?;
        if !output.status.success() {
            let _ = fs::remove_file(&model_path);
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(trainer_error(format!(
                "lightgbm exited with status {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let model_text = fs::read_to_string(&model_path).map_err(|err| {
            trainer_error(format!(
                "failed to read model output {}: {}",
                model_path.display(),
                err
            ))
        });
        let _ = fs::remove_file(&model_path);
        model_text
    }
}

pub fn write_libsvm_dataset(matrix: &TrainingMatrix, path: &Path) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);

    for row in 0..matrix.num_rows() {
        let mut line = format!("{}", matrix.labels()[row]);
        for (idx, value) in matrix.row(row).iter().enumerate() {
            line.push(' ');
            line.push_str(&format!("{}:{:.10}", idx, value));
        }
        line.push('\n');
        writer.write_all(line.as_bytes())?;
    }

    writer.flush()?;
    Ok(())
}

fn resolve_lightgbm_executable(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(ForecastError::Config(format!(
            "paths.lightgbm points to {}, which does not exist",
            path.display()
        )));
    }

    let binary = if cfg!(windows) {
        "lightgbm.exe"
    } else {
        "lightgbm"
    };
    let vendor_path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("vendor")
        .join(binary);
    if vendor_path.exists() {
        return Ok(vendor_path);
    }

    if let Some(path) = find_in_path(binary) {
        return Ok(path);
    }

    Err(ForecastError::Config(String::from(
        "lightgbm executable not found in vendor/ or PATH; install the LightGBM CLI or set paths.lightgbm",
    )))
}

fn find_in_path(binary: &str) -> Option<PathBuf> {
    let path_value = std::env::var_os("PATH")?;
    for entry in std::env::split_paths(&path_value) {
        let candidate = entry.join(binary);
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_label_then_indexed_features() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("train.svm");
        let mut matrix = TrainingMatrix::new(2);
        matrix.push_row(&[1.5, 0.0], 3.0);
        matrix.push_row(&[2.0, 4.25], 0.0);

        write_libsvm_dataset(&matrix, &path).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines[0], "3 0:1.5000000000 1:0.0000000000");
        assert_eq!(lines[1], "0 0:2.0000000000 1:4.2500000000");
    }

    #[test]
    fn cli_arguments_carry_objective_and_threads() {
        let cli = LightgbmCli::new(PathBuf::from("lightgbm"), LightgbmParams::default(), 50);
        let args = cli.build_args(Path::new("d.svm"), Path::new("m.txt"), 0);
        assert!(args.contains(&"objective=tweedie".to_string()));
        assert!(args.contains(&"tweedie_variance_power=1.1".to_string()));
        assert!(args.contains(&"num_iterations=50".to_string()));
        assert!(args.contains(&"num_threads=1".to_string()));
        assert!(args.contains(&"data=d.svm".to_string()));
    }

    #[test]
    fn explicit_missing_executable_is_config_error() {
        let err = resolve_lightgbm_executable(Some(Path::new("/nonexistent/lightgbm"))).unwrap_err();
        assert!(matches!(err, ForecastError::Config(_)));
    }

    #[test]
    fn failing_executable_surfaces_trainer_error() {
        let dir = tempdir().unwrap();
        let cli = LightgbmCli::new(
            dir.path().join("missing-binary"),
            LightgbmParams::default(),
            10,
        )
        .with_work_dir(dir.path().to_path_buf());
        let mut matrix = TrainingMatrix::new(1);
        matrix.push_row(&[1.0], 1.0);
        let names = vec!["f".to_string()];
        let err = cli
            .fit(&FitRequest {
                horizon: 4,
                matrix: &matrix,
                feature_names: &names,
                num_threads: 1,
            })
            .unwrap_err();
        assert!(matches!(err, ForecastError::Trainer { horizon: 4, .. }));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
