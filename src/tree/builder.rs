use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::Utc;
use indexmap::IndexMap;
use log::{debug, info, warn};
use regex::Regex;
use serde_json::Value;

use super::fields::FieldValue;
use super::forest::{Forest, ForestMetadata, ForestStats, RejectReason, RejectedRecord};
use super::node::TreeNode;
use crate::config::TreeConfig;
use crate::error::{Result, StoryMapError};
use crate::lark::types::Record;

const NO_DESCRIPTION: &str = "No description";

/// Turns flat story records into a validated forest.
///
/// Holds only configuration and the compiled story pattern, so one builder
/// can serve concurrent builds.
#[derive(Debug, Clone)]
pub struct TreeBuilder {
    config: TreeConfig,
    pattern: Regex,
}

/// A validated record before it is linked.
struct Draft {
    record_id: String,
    story_no: String,
    description: String,
    criteria: Option<String>,
    ticket: Option<String>,
    declared_parent: Option<String>,
    extra_fields: IndexMap<String, Value>,
}

impl TreeBuilder {
    /// # Errors
    ///
    /// Returns `StoryMapError::Config` if the story pattern is not a valid
    /// regular expression.
    pub fn new(config: &TreeConfig) -> Result<Self> {
        let pattern = Regex::new(&config.story_pattern).map_err(|e| {
            StoryMapError::Config(format!(
                "Invalid story pattern '{}': {e}",
                config.story_pattern
            ))
        })?;

        Ok(Self {
            config: config.clone(),
            pattern,
        })
    }

    /// Builds the forest for one batch of records.
    ///
    /// # Errors
    ///
    /// Returns `StoryMapError::StructuralCycle` when a parent chain loops back
    /// on itself and `StoryMapError::DepthLimitExceeded` when a node would sit
    /// at or below the configured maximum depth.
    pub fn build(&self, records: &[Record]) -> Result<Forest> {
        let mut stats = ForestStats {
            total_records: records.len(),
            ..ForestStats::default()
        };
        let mut rejected = Vec::new();
        let mut drafts: Vec<Draft> = Vec::with_capacity(records.len());
        let mut index: HashMap<String, usize> = HashMap::with_capacity(records.len());

        for record in records {
            match self.validate(record, &index) {
                Ok(draft) => {
                    index.insert(draft.record_id.clone(), drafts.len());
                    drafts.push(draft);
                }
                Err(entry) => {
                    match entry.reason {
                        RejectReason::EmptyStoryNo => stats.empty_story_no += 1,
                        RejectReason::InvalidFormat => stats.invalid_format += 1,
                        RejectReason::MissingRecordId => stats.missing_record_id += 1,
                        RejectReason::DuplicateRecordId => stats.duplicate_record_id += 1,
                    }
                    warn!(
                        "Skipping record '{}' ({}): {}",
                        entry.record_id,
                        entry.story_no.as_deref().unwrap_or("-"),
                        entry.reason
                    );
                    rejected.push(entry);
                }
            }
        }

        // Link in encounter order
        let mut parents: Vec<Option<usize>> = vec![None; drafts.len()];
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); drafts.len()];
        let mut roots = Vec::new();

        for (i, draft) in drafts.iter().enumerate() {
            match draft.declared_parent.as_deref() {
                Some(parent_id) if parent_id == draft.record_id => {
                    return Err(StoryMapError::StructuralCycle {
                        path: format!("{} -> {}", draft.story_no, draft.story_no),
                    });
                }
                Some(parent_id) => match index.get(parent_id) {
                    Some(&p) => {
                        parents[i] = Some(p);
                        children[p].push(i);
                    }
                    None => {
                        stats.orphan_nodes += 1;
                        debug!(
                            "{} references missing parent {}, treating as root",
                            draft.story_no, parent_id
                        );
                        roots.push(i);
                    }
                },
                None => roots.push(i),
            }
        }

        let (levels, order) = self.assign_levels(&drafts, &roots, &children)?;

        if let Some(start) = levels.iter().position(Option::is_none) {
            return Err(StoryMapError::StructuralCycle {
                path: cycle_path(start, &parents, &drafts),
            });
        }

        stats.valid_records = drafts.len();
        stats.root_nodes = roots.len();
        stats.leaf_nodes = children.iter().filter(|c| c.is_empty()).count();
        stats.criteria_nodes = drafts.iter().filter(|d| d.criteria.is_some()).count();
        stats.ticket_links = drafts.iter().filter(|d| d.ticket.is_some()).count();
        let mut distribution = BTreeMap::new();
        for level in levels.iter().flatten() {
            *distribution.entry(*level).or_insert(0) += 1;
        }
        stats.max_depth = distribution.keys().next_back().copied().unwrap_or(0);
        stats.level_distribution = distribution;

        // Children before parents, so every subtree is complete when moved
        let mut slots: Vec<Option<Draft>> = drafts.into_iter().map(Some).collect();
        let mut built: Vec<Option<TreeNode>> = (0..slots.len()).map(|_| None).collect();
        for &i in order.iter().rev() {
            let Some(draft) = slots[i].take() else {
                continue;
            };
            let kids = children[i]
                .iter()
                .filter_map(|&c| built[c].take())
                .collect();
            built[i] = Some(TreeNode {
                record_id: draft.record_id,
                story_no: draft.story_no,
                description: draft.description,
                criteria: draft.criteria,
                ticket: draft.ticket,
                parent_id: parents[i].and(draft.declared_parent),
                level: levels[i].unwrap_or(0),
                extra_fields: draft.extra_fields,
                children: kids,
            });
        }
        let roots: Vec<TreeNode> = roots.iter().filter_map(|&r| built[r].take()).collect();

        info!(
            "Built forest: {} roots, {} valid of {} records, max depth {}, {} rejected, {} orphans",
            stats.root_nodes,
            stats.valid_records,
            stats.total_records,
            stats.max_depth,
            stats.rejected_total(),
            stats.orphan_nodes
        );

        Ok(Forest {
            metadata: ForestMetadata {
                built_at: Utc::now(),
                story_pattern: self.config.story_pattern.clone(),
                builder_version: env!("CARGO_PKG_VERSION").to_string(),
            },
            stats,
            roots,
            rejected,
        })
    }

    fn validate(
        &self,
        record: &Record,
        seen: &HashMap<String, usize>,
    ) -> std::result::Result<Draft, RejectedRecord> {
        let record_id = record.record_id.trim().to_string();
        let story_no = self.text(record, &self.config.story_no_field);

        let reject = |reason| RejectedRecord {
            record_id: record_id.clone(),
            story_no: story_no.clone(),
            reason,
        };

        if record_id.is_empty() {
            return Err(reject(RejectReason::MissingRecordId));
        }
        let Some(story_no) = story_no.clone() else {
            return Err(reject(RejectReason::EmptyStoryNo));
        };
        if !self.pattern.is_match(&story_no) {
            return Err(reject(RejectReason::InvalidFormat));
        }
        if seen.contains_key(&record_id) {
            return Err(reject(RejectReason::DuplicateRecordId));
        }

        Ok(Draft {
            description: self.description(record),
            criteria: self.text(record, &self.config.criteria_field),
            ticket: self.field(record, &self.config.ticket_field).first_text(),
            declared_parent: self.parent_reference(record),
            extra_fields: self.extra_fields(record),
            record_id,
            story_no,
        })
    }

    fn field(&self, record: &Record, name: &str) -> FieldValue {
        FieldValue::decode(record.fields.get(name))
    }

    fn text(&self, record: &Record, name: &str) -> Option<String> {
        self.field(record, name).as_text()
    }

    fn description(&self, record: &Record) -> String {
        let role = self.text(record, &self.config.role_field);
        let want = self.text(record, &self.config.want_field);

        match (role, want) {
            (Some(role), Some(want)) => format!("As a {role}, I want {want}"),
            (Some(part), None) | (None, Some(part)) => part,
            (None, None) => self
                .text(record, &self.config.features_field)
                .unwrap_or_else(|| NO_DESCRIPTION.to_string()),
        }
    }

    fn parent_reference(&self, record: &Record) -> Option<String> {
        self.config
            .parent_field_names
            .iter()
            .find_map(|name| self.field(record, name).first_reference())
    }

    fn extra_fields(&self, record: &Record) -> IndexMap<String, Value> {
        if !self.config.preserve_extra_fields {
            return IndexMap::new();
        }

        let known: HashSet<&str> = [
            &self.config.story_no_field,
            &self.config.role_field,
            &self.config.want_field,
            &self.config.features_field,
            &self.config.criteria_field,
            &self.config.ticket_field,
        ]
        .into_iter()
        .chain(self.config.parent_field_names.iter())
        .map(String::as_str)
        .collect();

        record
            .fields
            .iter()
            .filter(|(name, _)| !known.contains(name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Levels from an explicit-stack walk down from the roots, plus the
    /// pre-order in which nodes were reached. Unreached nodes stay `None`.
    fn assign_levels(
        &self,
        drafts: &[Draft],
        roots: &[usize],
        children: &[Vec<usize>],
    ) -> Result<(Vec<Option<usize>>, Vec<usize>)> {
        let mut levels = vec![None; drafts.len()];
        let mut order = Vec::with_capacity(drafts.len());
        let mut stack: Vec<(usize, usize)> = roots.iter().rev().map(|&r| (r, 0)).collect();

        while let Some((i, level)) = stack.pop() {
            if level >= self.config.max_depth {
                return Err(StoryMapError::DepthLimitExceeded {
                    record_id: drafts[i].record_id.clone(),
                    max_depth: self.config.max_depth,
                });
            }
            levels[i] = Some(level);
            order.push(i);
            stack.extend(children[i].iter().rev().map(|&c| (c, level + 1)));
        }

        Ok((levels, order))
    }
}

/// Follows parent links from a node that no root reaches until a node
/// repeats. Such a node always has a resolved parent, and no chain of them
/// ends at a root, so the walk terminates on a loop.
fn cycle_path(start: usize, parents: &[Option<usize>], drafts: &[Draft]) -> String {
    let mut chain = vec![start];
    let mut position: HashMap<usize, usize> = HashMap::from([(start, 0)]);
    let mut current = start;

    while let Some(parent) = parents[current] {
        if let Some(&at) = position.get(&parent) {
            let mut path: Vec<&str> = chain[at..]
                .iter()
                .map(|&i| drafts[i].story_no.as_str())
                .collect();
            path.push(drafts[parent].story_no.as_str());
            return path.join(" -> ");
        }
        position.insert(parent, chain.len());
        chain.push(parent);
        current = parent;
    }

    drafts[start].story_no.clone()
}
