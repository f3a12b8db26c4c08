use crate::booster::HorizonModel;
use crate::error::{ForecastError, Result};
use crate::features::FeatureFrame;
use crate::lightgbm_cli::{BoostedTreeTrainer, FitRequest, TrainingMatrix};
use crate::panel::PanelSplit;
use crossbeam_channel::{bounded, Receiver, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use statrs::statistics::Statistics;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

/// Models indexed by horizon `1..=H`. Starts empty and is filled one horizon
/// at a time, in any order.
#[derive(Debug, Clone)]
pub struct HorizonModels {
    slots: Vec<Option<HorizonModel>>,
}

impl HorizonModels {
    pub fn new(horizons: usize) -> Self {
        Self {
            slots: vec![None; horizons],
        }
    }

    pub fn insert(&mut self, model: HorizonModel) -> Result<()> {
        let horizon = model.horizon();
        let len = self.slots.len();
        let slot = horizon
            .checked_sub(1)
            .and_then(|idx| self.slots.get_mut(idx))
            .ok_or_else(|| ForecastError::Trainer {
                horizon,
                message: format!("horizon outside 1..={}", len),
            })?;
        if slot.is_some() {
            return Err(ForecastError::Trainer {
                horizon,
                message: "model already trained for this horizon".to_string(),
            });
        }
        *slot = Some(model);
        Ok(())
    }

    pub fn get(&self, horizon: usize) -> Option<&HorizonModel> {
        horizon
            .checked_sub(1)
            .and_then(|idx| self.slots.get(idx))
            .and_then(Option::as_ref)
    }

    /// Number of horizons this collection covers.
    pub fn horizons(&self) -> usize {
        self.slots.len()
    }

    pub fn trained(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Trained models in horizon order.
    pub fn iter(&self) -> impl Iterator<Item = &HorizonModel> {
        self.slots.iter().flatten()
    }
}

/// Trains one independent model per horizon on horizon-shifted features.
pub struct HorizonTrainer {
    trainer: Box<dyn BoostedTreeTrainer>,
    horizons: usize,
    parallel_horizons: usize,
    show_progress: bool,
}

impl HorizonTrainer {
    pub fn new(trainer: Box<dyn BoostedTreeTrainer>, horizons: usize) -> Self {
        Self {
            trainer,
            horizons,
            parallel_horizons: 1,
            show_progress: true,
        }
    }

    pub fn with_parallel_horizons(mut self, parallel_horizons: usize) -> Self {
        self.parallel_horizons = parallel_horizons.max(1);
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn horizons(&self) -> usize {
        self.horizons
    }

    /// Fits horizons `1..=H` on the rows of `split.train_rows`. The first
    /// failure stops the remaining horizons and is returned; no partial
    /// model set escapes.
    pub fn train(&self, frame: &FeatureFrame, split: &PanelSplit) -> Result<HorizonModels> {
        let horizons = self.horizons;
        let mut models = HorizonModels::new(horizons);
        if horizons == 0 {
            return Ok(models);
        }

        let cpus = std::cmp::max(1, num_cpus::get());
        let num_workers = horizons.min(self.parallel_horizons).min(cpus).max(1);
        let threads_per_fit = std::cmp::max(1, cpus / num_workers);
        info!(
            "Training {} horizon models on {} rows ({} features) with {} workers x {} threads",
            horizons,
            split.train_rows.len(),
            frame.num_features(),
            num_workers,
            threads_per_fit
        );

        let (task_tx, task_rx): (Sender<usize>, Receiver<usize>) = bounded(horizons);
        let (result_tx, result_rx): (
            Sender<(usize, Result<HorizonModel>)>,
            Receiver<(usize, Result<HorizonModel>)>,
        ) = bounded(horizons);
        for horizon in 1..=horizons {
            task_tx.send(horizon).map_err(|_| ForecastError::Trainer {
                horizon,
                message: "horizon task queue closed".to_string(),
            })?;
        }
        drop(task_tx);

        let abort = AtomicBool::new(false);
        let pb = self.progress_bar(horizons);
        let started = Instant::now();
        let mut first_error: Option<ForecastError> = None;

        thread::scope(|scope| {
            for _ in 0..num_workers {
                let task_rx = task_rx.clone();
                let result_tx = result_tx.clone();
                let abort = &abort;
                scope.spawn(move || {
                    while let Ok(horizon) = task_rx.recv() {
                        if abort.load(Ordering::SeqCst) {
                            break;
                        }
                        let result = self.train_horizon(frame, split, horizon, threads_per_fit);
                        if result.is_err() {
                            abort.store(true, Ordering::SeqCst);
                        }
                        if result_tx.send((horizon, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(result_tx);

            while let Ok((horizon, result)) = result_rx.recv() {
                pb.inc(1);
                let outcome = result.and_then(|model| models.insert(model));
                if let Err(err) = outcome {
                    warn!("Horizon {} failed: {}", horizon, err);
                    abort.store(true, Ordering::SeqCst);
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        });

        if let Some(err) = first_error {
            pb.abandon_with_message("Horizon training failed");
            return Err(err);
        }
        pb.finish_with_message("Horizon training completed");

        if !models.is_complete() {
            return Err(ForecastError::Trainer {
                horizon: models.trained() + 1,
                message: "worker pool stopped before every horizon was trained".to_string(),
            });
        }
        info!(
            "Trained {} horizon models in {:.1}s",
            models.trained(),
            started.elapsed().as_secs_f64()
        );
        Ok(models)
    }

    fn train_horizon(
        &self,
        frame: &FeatureFrame,
        split: &PanelSplit,
        horizon: usize,
        num_threads: usize,
    ) -> Result<HorizonModel> {
        let started = Instant::now();
        let matrix = build_training_matrix(frame, &split.train_rows, horizon);
        if matrix.is_empty() {
            return Err(ForecastError::InsufficientData { horizon });
        }
        let labels = matrix.labels();
        debug!(
            "Horizon {}: {} of {} train rows complete, label mean {:.4}, std {:.4}, max {:.1}",
            horizon,
            matrix.num_rows(),
            split.train_rows.len(),
            labels.mean(),
            labels.std_dev(),
            labels.max()
        );

        let model_text = self.trainer.fit(&FitRequest {
            horizon,
            matrix: &matrix,
            feature_names: frame.names(),
            num_threads,
        })?;
        drop(matrix);

        let model =
            HorizonModel::from_model_text(horizon, model_text).map_err(|err| {
                ForecastError::Trainer {
                    horizon,
                    message: err.to_string(),
                }
            })?;
        debug!(
            "Horizon {} trained ({} trees) in {:.1}s",
            horizon,
            model.booster().num_trees(),
            started.elapsed().as_secs_f64()
        );
        Ok(model)
    }

    fn progress_bar(&self, horizons: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(horizons as u64);
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} horizons ({eta})",
        ) {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    }
}

/// Rows of `rows` whose horizon-shifted feature vector is complete, labelled
/// with the row's own sales.
pub fn build_training_matrix(
    frame: &FeatureFrame,
    rows: &[usize],
    horizon: usize,
) -> TrainingMatrix {
    let mut matrix = TrainingMatrix::with_capacity(frame.num_features(), rows.len());
    let mut buffer = vec![0.0; frame.num_features()];
    let records = frame.panel().records();
    for &row in rows {
        if frame.horizon_row(row, horizon, &mut buffer) {
            matrix.push_row(&buffer, records[row].sales);
        }
    }
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureEngineer;
    use crate::models::{GroupKey, HierarchyLevel};
    use crate::test_support::{series_info, synthetic_panel, ScriptedTrainer};
    use std::sync::Arc;

    struct SharedTrainer(Arc<ScriptedTrainer>);

    impl BoostedTreeTrainer for SharedTrainer {
        fn fit(&self, request: &FitRequest<'_>) -> Result<String> {
            self.0.fit(request)
        }
    }

    fn frame(days: usize, lags: Vec<usize>) -> FeatureFrame {
        let panel = synthetic_panel(
            vec![
                series_info("A", "I1", "S1", "CA"),
                series_info("B", "I2", "S1", "CA"),
            ],
            days,
        );
        FeatureEngineer::new(lags, vec![2])
            .create_all_features(panel, &[HierarchyLevel::new(vec![GroupKey::Id], "id")])
            .unwrap()
    }

    #[test]
    fn trains_one_model_per_horizon() {
        let frame = frame(12, vec![1]);
        let split = frame.panel().split(3).unwrap();
        let scripted = Arc::new(ScriptedTrainer::new(1.0));
        let trainer = HorizonTrainer::new(Box::new(SharedTrainer(scripted.clone())), 3)
            .with_parallel_horizons(2)
            .with_progress(false);

        let models = trainer.train(&frame, &split).unwrap();
        assert!(models.is_complete());
        assert_eq!(models.horizons(), 3);
        let horizons: Vec<usize> = models.iter().map(|m| m.horizon()).collect();
        assert_eq!(horizons, vec![1, 2, 3]);
        let zeros = vec![0.0; frame.num_features()];
        assert_eq!(models.get(2).unwrap().predict(&zeros), 2.0);
        assert!(models.get(4).is_none());
        let fits = scripted.recorded();
        assert_eq!(fits.len(), 3);
        let lag_col = frame.names().iter().position(|n| n == "id_lag_1").unwrap();
        for fit in &fits {
            assert!(fit.num_threads >= 1);
            let expected = build_training_matrix(&frame, &split.train_rows, fit.horizon);
            assert_eq!(fit.labels, expected.labels());
            assert_eq!(fit.rows.len(), expected.num_rows());
            for (row, label) in fit.rows.iter().zip(&fit.labels) {
                assert_eq!(row[lag_col], label - (fit.horizon + 1) as f64);
            }
        }
    }

    #[test]
    fn training_rows_use_features_shifted_by_horizon() {
        let frame = frame(10, vec![1]);
        let split = frame.panel().split(2).unwrap();
        let lag_col = frame.names().iter().position(|n| n == "id_lag_1").unwrap();

        for horizon in 1..=2 {
            let matrix = build_training_matrix(&frame, &split.train_rows, horizon);
            // per series: 8 train rows; roll_2 needs 2 priors, shift needs h more
            assert_eq!(matrix.num_rows(), 2 * (8 - 2 - horizon));
            for row in 0..matrix.num_rows() {
                let features = matrix.row(row);
                assert!(features.iter().all(|v| !v.is_nan()));
                // lag_1 of the row h earlier is the sales h + 1 days before the label
                assert_eq!(features[lag_col], matrix.labels()[row] - (horizon + 1) as f64);
            }
        }
    }

    #[test]
    fn empty_horizon_is_insufficient_data() {
        let frame = frame(6, vec![5]);
        let split = frame.panel().split(2).unwrap();
        let trainer = HorizonTrainer::new(Box::new(ScriptedTrainer::new(1.0)), 2)
            .with_progress(false);

        let err = trainer.train(&frame, &split).unwrap_err();
        assert!(matches!(err, ForecastError::InsufficientData { horizon: 1 | 2 }));
    }

    #[test]
    fn first_failure_aborts_without_partial_models() {
        let frame = frame(12, vec![1]);
        let split = frame.panel().split(3).unwrap();
        let trainer = HorizonTrainer::new(Box::new(ScriptedTrainer::new(1.0).failing_on(2)), 3)
            .with_parallel_horizons(1)
            .with_progress(false);

        let err = trainer.train(&frame, &split).unwrap_err();
        assert!(matches!(err, ForecastError::Trainer { horizon: 2, .. }));
    }

    #[test]
    fn collection_rejects_duplicates_and_out_of_range() {
        let text = crate::test_support::constant_model_text(1.0, 1);
        let mut models = HorizonModels::new(2);
        models
            .insert(HorizonModel::from_model_text(2, text.clone()).unwrap())
            .unwrap();
        assert_eq!(models.trained(), 1);
        assert!(!models.is_complete());
        assert!(models
            .insert(HorizonModel::from_model_text(2, text.clone()).unwrap())
            .is_err());
        assert!(models
            .insert(HorizonModel::from_model_text(3, text).unwrap())
            .is_err());
    }
}
