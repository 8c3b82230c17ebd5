//! Dev-ready scoring.
//!
//! A node gets points from five independent checks (naming, size,
//! completion, export sanity, semantic quality). The total is normalised to
//! `[0, 1]` and mapped to a [`DevReadyStatus`], with keywords in the name
//! taking precedence over the score.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::EXPORTABLE_TYPES;

static KEBAB_CASE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(-[a-z0-9]+)*$").expect("static regex"));

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevReadyStatus {
    Draft,
    Review,
    Approved,
    Ready,
    #[default]
    Unknown,
}

impl DevReadyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DevReadyStatus::Draft => "draft",
            DevReadyStatus::Review => "review",
            DevReadyStatus::Approved => "approved",
            DevReadyStatus::Ready => "ready",
            DevReadyStatus::Unknown => "unknown",
        }
    }
}

/// Points awarded by each check. The defaults add up to 100.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessWeights {
    pub naming: f64,
    pub square: f64,
    pub standard_size: f64,
    pub completion: f64,
    pub export: f64,
    pub semantic: f64,
}

impl Default for ReadinessWeights {
    fn default() -> Self {
        Self {
            naming: 25.0,
            square: 10.0,
            standard_size: 10.0,
            completion: 20.0,
            export: 20.0,
            semantic: 15.0,
        }
    }
}

impl ReadinessWeights {
    pub fn sum(&self) -> f64 {
        self.naming + self.square + self.standard_size + self.completion + self.export + self.semantic
    }
}

#[derive(Debug, Clone)]
pub struct ReadinessRules {
    pub standard_sizes: Vec<f64>,
    pub square_tolerance: f64,
    pub size_tolerance: f64,
    pub large_dimension: f64,
    pub wip_keywords: Vec<String>,
    pub approved_keywords: Vec<String>,
    pub min_name_len: usize,
    pub max_name_len: usize,
}

impl Default for ReadinessRules {
    fn default() -> Self {
        Self {
            standard_sizes: vec![16.0, 24.0, 32.0, 48.0, 64.0],
            square_tolerance: 1.0,
            size_tolerance: 2.0,
            large_dimension: 1000.0,
            wip_keywords: ["wip", "draft", "temp", "test", "placeholder"]
                .map(String::from)
                .to_vec(),
            approved_keywords: ["approved", "ready", "final", "production"]
                .map(String::from)
                .to_vec(),
            min_name_len: 2,
            max_name_len: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub score: f64,
    pub issues: Vec<String>,
    pub status: DevReadyStatus,
}

#[derive(Debug, Clone, Default)]
pub struct DevReadyScorer {
    weights: ReadinessWeights,
    rules: ReadinessRules,
}

impl DevReadyScorer {
    pub fn new(weights: ReadinessWeights, rules: ReadinessRules) -> Self {
        Self { weights, rules }
    }

    pub fn assess(&self, name: &str, width: f64, height: f64, node_type: &str) -> Assessment {
        let mut issues = Vec::new();
        let lowered = name.to_lowercase();

        let mut points = 0.0;
        points += self.naming(&lowered, name, &mut issues);
        points += self.size(width, height, &mut issues);
        points += self.completion(&lowered, name, &mut issues);
        points += self.export(width, height, node_type, &mut issues);
        points += self.semantic(name, &mut issues);

        let total = self.weights.sum();
        let score = if total > 0.0 {
            (points / total).clamp(0.0, 1.0)
        } else {
            0.0
        };
        Assessment {
            score,
            status: self.status(&lowered, score),
            issues,
        }
    }

    fn naming(&self, lowered: &str, name: &str, issues: &mut Vec<String>) -> f64 {
        if KEBAB_CASE.is_match(lowered) {
            self.weights.naming
        } else {
            issues.push(format!(
                "naming: '{name}' should be kebab-case (e.g. 'user-profile')"
            ));
            0.0
        }
    }

    fn size(&self, width: f64, height: f64, issues: &mut Vec<String>) -> f64 {
        let mut points = 0.0;
        if (width - height).abs() < self.rules.square_tolerance {
            points += self.weights.square;
        } else {
            issues.push(format!("size: icons should be square, got {width}x{height}"));
        }

        let tol = self.rules.size_tolerance;
        let standard = self
            .rules
            .standard_sizes
            .iter()
            .any(|s| (width - s).abs() < tol && (height - s).abs() < tol);
        if standard {
            points += self.weights.standard_size;
        } else {
            let suggested: Vec<String> = self
                .rules
                .standard_sizes
                .iter()
                .map(|s| format!("{s}x{s}"))
                .collect();
            issues.push(format!(
                "size: non-standard {width}x{height}, expected one of {}",
                suggested.join(", ")
            ));
        }
        points
    }

    fn completion(&self, lowered: &str, name: &str, issues: &mut Vec<String>) -> f64 {
        let mut points = self.weights.completion;
        if self.has_keyword(lowered, &self.rules.wip_keywords) {
            points = self.weights.completion * 0.25;
            issues.push(format!("completion: '{name}' contains a work-in-progress keyword"));
        }
        if lowered.contains("untitled") || name.starts_with("Frame ") || name.starts_with("Group ") {
            points = 0.0;
            issues.push(format!("completion: '{name}' looks like a default layer name"));
        }
        points
    }

    fn export(&self, width: f64, height: f64, node_type: &str, issues: &mut Vec<String>) -> f64 {
        let mut points = self.weights.export;
        if width <= 0.0 || height <= 0.0 {
            points = 0.0;
            issues.push("export: node has no renderable size".to_string());
        } else if width > self.rules.large_dimension || height > self.rules.large_dimension {
            points = self.weights.export * 0.5;
            issues.push(format!("export: {width}x{height} is large and may render poorly"));
        }
        if !EXPORTABLE_TYPES.contains(&node_type) {
            points = 0.0;
            issues.push(format!("export: type '{node_type}' may not export cleanly"));
        }
        points
    }

    fn semantic(&self, name: &str, issues: &mut Vec<String>) -> f64 {
        let mut points = self.weights.semantic;
        let len = name.chars().count();
        if len < self.rules.min_name_len {
            points = 0.0;
            issues.push("semantic: name is too short".to_string());
        } else if len > self.rules.max_name_len {
            points = self.weights.semantic / 3.0;
            issues.push("semantic: name is too long".to_string());
        }
        if name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            points *= 0.5;
            issues.push("semantic: avoid starting names with a digit".to_string());
        }
        points
    }

    fn status(&self, lowered: &str, score: f64) -> DevReadyStatus {
        if self.has_keyword(lowered, &self.rules.approved_keywords) {
            return if score >= 0.8 {
                DevReadyStatus::Approved
            } else {
                DevReadyStatus::Review
            };
        }
        if self.has_keyword(lowered, &self.rules.wip_keywords) {
            return DevReadyStatus::Draft;
        }
        if score >= 0.9 {
            DevReadyStatus::Ready
        } else if score >= 0.8 {
            DevReadyStatus::Approved
        } else if score >= 0.6 {
            DevReadyStatus::Review
        } else {
            DevReadyStatus::Draft
        }
    }

    fn has_keyword(&self, lowered: &str, keywords: &[String]) -> bool {
        keywords.iter().any(|k| lowered.contains(k.as_str()))
    }
}

/// Per-status counts, every status present.
pub fn status_counts<'a>(
    statuses: impl IntoIterator<Item = &'a DevReadyStatus>,
) -> BTreeMap<DevReadyStatus, usize> {
    let mut counts: BTreeMap<DevReadyStatus, usize> = [
        DevReadyStatus::Draft,
        DevReadyStatus::Review,
        DevReadyStatus::Approved,
        DevReadyStatus::Ready,
        DevReadyStatus::Unknown,
    ]
    .into_iter()
    .map(|s| (s, 0))
    .collect();
    for status in statuses {
        *counts.entry(*status).or_default() += 1;
    }
    counts
}
