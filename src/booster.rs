use crate::error::{ForecastError, Result};
use std::str::FromStr;

#[derive(Debug, Clone)]
struct LightGBMTree {
    split_features: Vec<usize>,
    thresholds: Vec<f64>,
    left_child: Vec<i32>,
    right_child: Vec<i32>,
    leaf_values: Vec<f64>,
}

impl LightGBMTree {
    fn from_lines<'a, I>(lines: &mut std::iter::Peekable<I>) -> Result<Self>
    where
        I: Iterator<Item = &'a str>,
    {
        let mut num_leaves: Option<usize> = None;
        let mut split_features = Vec::new();
        let mut thresholds = Vec::new();
        let mut left_child = Vec::new();
        let mut right_child = Vec::new();
        let mut leaf_values = Vec::new();

        while let Some(peeked) = lines.peek() {
            let peeked = peeked.trim();
            if peeked.starts_with("Tree=") || peeked.starts_with("end of trees") {
                break;
            }
            let Some(line) = lines.next() else {
                break;
            };
            let line = line.trim();

            if line.starts_with("num_leaves=") {
                num_leaves = Some(parse_value(line, "num_leaves=")?);
            } else if line.starts_with("split_feature=") {
                split_features = parse_array(line, "split_feature=")?;
            } else if line.starts_with("threshold=") {
                thresholds = parse_array(line, "threshold=")?;
            } else if line.starts_with("left_child=") {
                left_child = parse_array(line, "left_child=")?;
            } else if line.starts_with("right_child=") {
                right_child = parse_array(line, "right_child=")?;
            } else if line.starts_with("leaf_value=") {
                leaf_values = parse_array(line, "leaf_value=")?;
            }
        }

        let internal_nodes = split_features.len();
        if thresholds.len() != internal_nodes
            || left_child.len() != internal_nodes
            || right_child.len() != internal_nodes
        {
            return Err(model_error(
                "tree definition invalid: split/child/threshold length mismatch",
            ));
        }

        let declared_leaves = num_leaves.unwrap_or(leaf_values.len());
        if declared_leaves != leaf_values.len() || leaf_values.is_empty() {
            return Err(model_error(format!(
                "tree leaf count mismatch: expected {declared_leaves}, found {}",
                leaf_values.len()
            )));
        }

        Ok(Self {
            split_features,
            thresholds,
            left_child,
            right_child,
            leaf_values,
        })
    }

    /// Leaf values in saved models already include the learning-rate
    /// shrinkage, so they are summed as-is.
    fn predict(&self, features: &[f64]) -> f64 {
        if self.split_features.is_empty() {
            return self.leaf_values[0];
        }
        let mut node_idx = 0usize;
        loop {
            let feature_idx = self.split_features[node_idx];
            let threshold = self.thresholds[node_idx];
            let feature_value = features.get(feature_idx).copied().unwrap_or(0.0);
            let child = if feature_value <= threshold {
                self.left_child[node_idx]
            } else {
                self.right_child[node_idx]
            };

            if child < 0 {
                let leaf_idx = (-child - 1) as usize;
                return self.leaf_values.get(leaf_idx).copied().unwrap_or_default();
            }

            node_idx = child as usize;
            if node_idx >= self.split_features.len() {
                return 0.0;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFunction {
    Identity,
    /// Log-link objectives (poisson, tweedie, gamma) predict `exp(raw)`.
    Exp,
}

/// Regression tree ensemble parsed from LightGBM model text.
#[derive(Debug, Clone)]
pub struct LightGBMBooster {
    trees: Vec<LightGBMTree>,
    feature_count: usize,
    link: LinkFunction,
}

impl LightGBMBooster {
    pub fn from_model_text(text: &str) -> Result<Self> {
        let mut lines = text.lines().peekable();
        let mut trees = Vec::new();
        let mut max_feature_idx: Option<usize> = None;
        let mut link = LinkFunction::Identity;

        while let Some(line) = lines.next() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with("end of trees") {
                break;
            }

            if let Some(objective) = trimmed.strip_prefix("objective=") {
                link = link_for_objective(objective)?;
            } else if trimmed.starts_with("max_feature_idx=") {
                max_feature_idx = Some(parse_value(trimmed, "max_feature_idx=")?);
            } else if trimmed.starts_with("Tree=") {
                trees.push(LightGBMTree::from_lines(&mut lines)?);
            }
        }

        if trees.is_empty() {
            return Err(model_error("model contained no trees"));
        }

        let inferred_max_feature = trees
            .iter()
            .flat_map(|tree| tree.split_features.iter())
            .copied()
            .max()
            .unwrap_or(0);
        let feature_count = max_feature_idx
            .map(|idx| idx + 1)
            .unwrap_or(inferred_max_feature + 1);

        Ok(Self {
            trees,
            feature_count,
            link,
        })
    }

    pub fn raw_score(&self, features: &[f64]) -> f64 {
        self.trees.iter().map(|tree| tree.predict(features)).sum()
    }

    pub fn predict(&self, features: &[f64]) -> f64 {
        let raw = self.raw_score(features);
        match self.link {
            LinkFunction::Identity => raw,
            LinkFunction::Exp => raw.exp(),
        }
    }

    pub fn num_features(&self) -> usize {
        self.feature_count
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn link(&self) -> LinkFunction {
        self.link
    }
}

/// Trained model for one forecast horizon, kept with its source text so it
/// can be written back out unchanged.
#[derive(Debug, Clone)]
pub struct HorizonModel {
    horizon: usize,
    booster: LightGBMBooster,
    model_text: String,
}

impl HorizonModel {
    pub fn from_model_text(horizon: usize, model_text: String) -> Result<Self> {
        let booster = LightGBMBooster::from_model_text(&model_text)?;
        Ok(Self {
            horizon,
            booster,
            model_text,
        })
    }

    pub fn horizon(&self) -> usize {
        self.horizon
    }

    pub fn booster(&self) -> &LightGBMBooster {
        &self.booster
    }

    pub fn model_text(&self) -> &str {
        &self.model_text
    }

    pub fn predict(&self, features: &[f64]) -> f64 {
        self.booster.predict(features)
    }
}

fn link_for_objective(objective_line: &str) -> Result<LinkFunction> {
    let name = objective_line.split_whitespace().next().unwrap_or_default();
    match name {
        "regression" | "regression_l2" | "regression_l1" | "huber" | "fair" | "quantile"
        | "mape" => Ok(LinkFunction::Identity),
        "poisson" | "tweedie" | "gamma" => Ok(LinkFunction::Exp),
        other => Err(model_error(format!(
            "unsupported objective {other} for a regression forecast"
        ))),
    }
}

fn model_error(message: impl Into<String>) -> ForecastError {
    ForecastError::Artifact(format!("LightGBM model: {}", message.into()))
}

fn parse_value<T>(line: &str, prefix: &str) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let raw = line
        .strip_prefix(prefix)
        .ok_or_else(|| model_error(format!("expected prefix {prefix}")))?;
    raw.trim().parse::<T>().map_err(|err| {
        model_error(format!(
            "failed to parse value for {prefix} from \"{line}\": {err}"
        ))
    })
}

fn parse_array<T>(line: &str, prefix: &str) -> Result<Vec<T>>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let raw = line
        .strip_prefix(prefix)
        .ok_or_else(|| model_error(format!("expected prefix {prefix}")))?;
    raw.split_whitespace()
        .map(|token| {
            token
                .parse::<T>()
                .map_err(|err| model_error(format!("failed to parse value {token} for {prefix}: {err}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = "tree
version=v4
num_class=1
num_tree_per_iteration=1
label_index=0
max_feature_idx=2
objective=regression
feature_names=f0 f1 f2

Tree=0
num_leaves=3
num_cat=0
split_feature=0 2
split_gain=1 1
threshold=1.5 10
decision_type=2 2
left_child=-1 -2
right_child=1 -3
leaf_value=1 2 3
leaf_weight=1 1 1
leaf_count=1 1 1
internal_value=0 0
internal_weight=0 0
internal_count=3 2
is_linear=0
shrinkage=0.5

Tree=1
num_leaves=1
num_cat=0
split_feature=
threshold=
left_child=
right_child=
leaf_value=0.25
shrinkage=1

end of trees

feature_importances:
f0=1
";

    #[test]
    fn walks_splits_and_sums_trees() {
        let booster = LightGBMBooster::from_model_text(MODEL).unwrap();
        assert_eq!(booster.num_trees(), 2);
        assert_eq!(booster.num_features(), 3);
        assert_eq!(booster.link(), LinkFunction::Identity);

        assert_eq!(booster.predict(&[1.0, 0.0, 0.0]), 1.25);
        assert_eq!(booster.predict(&[2.0, 0.0, 5.0]), 2.25);
        assert_eq!(booster.predict(&[2.0, 0.0, 11.0]), 3.25);
    }

    #[test]
    fn log_link_objectives_exponentiate() {
        let text = MODEL.replace(
            "objective=regression",
            "objective=tweedie tweedie_variance_power:1.1",
        );
        let model = HorizonModel::from_model_text(3, text.clone()).unwrap();
        assert_eq!(model.horizon(), 3);
        assert_eq!(model.model_text(), text);
        assert!((model.predict(&[1.0, 0.0, 0.0]) - 1.25f64.exp()).abs() < 1e-12);
    }

    #[test]
    fn rejects_models_without_trees() {
        let err = LightGBMBooster::from_model_text("tree\nobjective=regression\n").unwrap_err();
        assert!(matches!(err, ForecastError::Artifact(_)));
    }

    #[test]
    fn rejects_classification_objectives() {
        let text = MODEL.replace("objective=regression", "objective=binary sigmoid:1");
        assert!(LightGBMBooster::from_model_text(&text).is_err());
    }
}
