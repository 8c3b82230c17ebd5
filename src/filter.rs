//! Node selection and file naming.
//!
//! Two independent predicates pick nodes for export: a wildcard
//! [`PatternFilter`] over the display name and a [`TargetFilter`] over node
//! ids. [`NodeFilter`] combines them with an explicit [`FilterCombinator`].
//! [`FileNamer`] turns a selected node name into a unique file stem.

use std::collections::{HashMap, HashSet};

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{Config, FilterPatterns, NamingPrefixes, TargetNodes};
use crate::error::{Result, SyncError};
use crate::export::sanitize_filename;
use crate::node_id::NodeIdFormat;
use crate::types::NodeRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterCombinator {
    /// A node passes when either filter matches
    Or,
    /// A node passes only when both filters match
    And,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// Drop the later node
    Skip,
    /// Append `-2`, `-3`, ... to the later node
    #[default]
    Rename,
    /// Reuse the name; the last node written wins
    Overwrite,
}

#[derive(Debug, Clone)]
pub struct PatternFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
    options: MatchOptions,
}

impl PatternFilter {
    pub fn new(include: &[String], exclude: &[String], case_sensitive: bool) -> Result<Self> {
        let compile = |patterns: &[String]| -> Result<Vec<Pattern>> {
            patterns
                .iter()
                .map(|p| Pattern::new(p).map_err(SyncError::from))
                .collect()
        };
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
            options: MatchOptions {
                case_sensitive,
                require_literal_separator: false,
                require_literal_leading_dot: false,
            },
        })
    }

    pub fn from_config(patterns: &FilterPatterns) -> Result<Self> {
        Self::new(&patterns.include, &patterns.exclude, patterns.case_sensitive)
    }

    /// Included by at least one include pattern (or there are none) and by
    /// no exclude pattern.
    pub fn matches(&self, name: &str) -> bool {
        let included = self.include.is_empty()
            || self
                .include
                .iter()
                .any(|p| p.matches_with(name, self.options));
        included
            && !self
                .exclude
                .iter()
                .any(|p| p.matches_with(name, self.options))
    }
}

/// Explicit node-id allow-list.
///
/// Ids given in share-URL form (`12-34`) also match their API form (`12:34`).
#[derive(Debug, Clone, Default)]
pub struct TargetFilter {
    ids: HashSet<String>,
    enabled: bool,
    process_children: bool,
}

impl TargetFilter {
    pub fn new(ids: &[String], enabled: bool, process_children: bool) -> Self {
        let mut set = HashSet::new();
        for id in ids.iter().map(|id| id.trim()).filter(|id| !id.is_empty()) {
            set.insert(id.to_string());
            if NodeIdFormat::detect(id) == Some(NodeIdFormat::Dash) {
                set.insert(id.replace('-', ":"));
            }
        }
        Self {
            ids: set,
            enabled,
            process_children,
        }
    }

    pub fn from_config(targets: &TargetNodes) -> Self {
        Self::new(&targets.node_ids, targets.enabled, targets.process_children)
    }

    pub fn is_active(&self) -> bool {
        self.enabled && !self.ids.is_empty()
    }

    pub fn matches(&self, node: &NodeRecord) -> bool {
        self.ids.contains(&node.id)
            || (self.process_children && node.ancestor_ids.iter().any(|a| self.ids.contains(a)))
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterOutcome {
    pub kept: Vec<NodeRecord>,
    pub total: usize,
    pub pattern_matches: usize,
    pub target_matches: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combinator: Option<FilterCombinator>,
}

#[derive(Debug, Clone)]
pub struct NodeFilter {
    patterns: PatternFilter,
    targets: TargetFilter,
    combinator: Option<FilterCombinator>,
}

impl NodeFilter {
    /// Fails when the target filter is active but no combinator was chosen.
    pub fn new(
        patterns: PatternFilter,
        targets: TargetFilter,
        combinator: Option<FilterCombinator>,
    ) -> Result<Self> {
        if targets.is_active() && combinator.is_none() {
            return Err(SyncError::config(
                "both a name-pattern filter and a target-node filter are active; choose how to combine them (filter_patterns.combinator or --combine)",
            ));
        }
        Ok(Self {
            patterns,
            targets,
            combinator,
        })
    }

    /// `combinator` overrides `filter_patterns.combinator` when given.
    pub fn from_config(config: &Config, combinator: Option<FilterCombinator>) -> Result<Self> {
        Self::new(
            PatternFilter::from_config(&config.filter_patterns)?,
            TargetFilter::from_config(&config.target_nodes),
            combinator.or(config.filter_patterns.combinator),
        )
    }

    pub fn targets(&self) -> &TargetFilter {
        &self.targets
    }

    /// Target ids that are not present in `nodes`.
    pub fn missing_targets(&self, nodes: &[NodeRecord]) -> Vec<String> {
        if !self.targets.is_active() {
            return Vec::new();
        }
        let present: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        let mut missing: Vec<String> = self
            .targets
            .ids
            .iter()
            .filter(|id| NodeIdFormat::detect(id) != Some(NodeIdFormat::Dash))
            .filter(|id| !present.contains(id.as_str()))
            .cloned()
            .collect();
        missing.sort();
        missing
    }

    pub fn accepts(&self, node: &NodeRecord) -> bool {
        let by_pattern = self.patterns.matches(&node.name);
        if !self.targets.is_active() {
            return by_pattern;
        }
        let by_target = self.targets.matches(node);
        match self.combinator {
            Some(FilterCombinator::And) => by_pattern && by_target,
            Some(FilterCombinator::Or) | None => by_pattern || by_target,
        }
    }

    /// Keep the accepted nodes, in input order.
    pub fn apply(&self, nodes: &[NodeRecord]) -> FilterOutcome {
        let mut outcome = FilterOutcome {
            total: nodes.len(),
            combinator: self.targets.is_active().then_some(self.combinator).flatten(),
            ..Default::default()
        };
        for node in nodes {
            if self.patterns.matches(&node.name) {
                outcome.pattern_matches += 1;
            }
            if self.targets.is_active() && self.targets.matches(node) {
                outcome.target_matches += 1;
            }
            if self.accepts(node) {
                outcome.kept.push(node.clone());
            }
        }
        debug!(
            total = outcome.total,
            kept = outcome.kept.len(),
            pattern_matches = outcome.pattern_matches,
            target_matches = outcome.target_matches,
            "filtered nodes"
        );
        outcome
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameAssignment {
    Assigned(String),
    /// The stem is taken and the policy is `skip`
    Collision(String),
}

/// Strips naming prefixes and hands out unique file stems.
#[derive(Debug, Clone)]
pub struct FileNamer {
    prefixes: Vec<String>,
    case_sensitive: bool,
    policy: CollisionPolicy,
    used: HashMap<String, usize>,
}

impl FileNamer {
    pub fn new(prefixes: &NamingPrefixes, case_sensitive: bool, policy: CollisionPolicy) -> Self {
        Self {
            prefixes: prefixes.all(),
            case_sensitive,
            policy,
            used: HashMap::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.naming_prefixes,
            config.filter_patterns.case_sensitive,
            config.export_settings.collision_policy,
        )
    }

    /// `name` with the first matching prefix removed. Names that are nothing
    /// but a prefix keep their full text.
    pub fn strip_prefix<'a>(&self, name: &'a str) -> &'a str {
        for prefix in &self.prefixes {
            let Some(head) = name.get(..prefix.len()) else {
                continue;
            };
            let hit = if self.case_sensitive {
                head == prefix
            } else {
                head.eq_ignore_ascii_case(prefix)
            };
            if hit && name.len() > prefix.len() {
                return &name[prefix.len()..];
            }
        }
        name
    }

    pub fn stem(&self, name: &str) -> String {
        sanitize_filename(self.strip_prefix(name))
    }

    pub fn assign(&mut self, name: &str) -> NameAssignment {
        let stem = self.stem(name);
        let seen = self.used.entry(stem.clone()).or_insert(0);
        *seen += 1;
        if *seen == 1 {
            return NameAssignment::Assigned(stem);
        }
        match self.policy {
            CollisionPolicy::Skip => NameAssignment::Collision(stem),
            CollisionPolicy::Overwrite => NameAssignment::Assigned(stem),
            CollisionPolicy::Rename => {
                let mut n = *seen;
                loop {
                    let candidate = format!("{stem}-{n}");
                    if !self.used.contains_key(&candidate) {
                        self.used.insert(candidate.clone(), 1);
                        return NameAssignment::Assigned(candidate);
                    }
                    n += 1;
                }
            }
        }
    }
}
