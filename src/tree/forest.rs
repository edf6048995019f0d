use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::node::{RenderNode, TreeNode};
use crate::config::JiraConfig;
use crate::lark::links::story_group;

/// Roots of one build together with its metadata and counters.
#[derive(Debug, Clone, Serialize)]
pub struct Forest {
    pub metadata: ForestMetadata,
    pub stats: ForestStats,
    pub roots: Vec<TreeNode>,
    /// Records left out of the forest, with the reason
    pub rejected: Vec<RejectedRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForestMetadata {
    pub built_at: DateTime<Utc>,
    pub story_pattern: String,
    pub builder_version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ForestStats {
    pub total_records: usize,
    pub valid_records: usize,
    pub empty_story_no: usize,
    pub invalid_format: usize,
    pub missing_record_id: usize,
    pub duplicate_record_id: usize,
    pub orphan_nodes: usize,
    pub root_nodes: usize,
    pub leaf_nodes: usize,
    /// Deepest level reached, root = 0
    pub max_depth: usize,
    pub level_distribution: BTreeMap<usize, usize>,
    pub criteria_nodes: usize,
    pub ticket_links: usize,
}

impl ForestStats {
    pub fn rejected_total(&self) -> usize {
        self.empty_story_no + self.invalid_format + self.missing_record_id + self.duplicate_record_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedRecord {
    pub record_id: String,
    pub story_no: Option<String>,
    pub reason: RejectReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    EmptyStoryNo,
    InvalidFormat,
    MissingRecordId,
    DuplicateRecordId,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::EmptyStoryNo => "empty story number",
            Self::InvalidFormat => "invalid story number format",
            Self::MissingRecordId => "missing record id",
            Self::DuplicateRecordId => "duplicate record id",
        };
        f.write_str(reason)
    }
}

impl Forest {
    pub fn node_count(&self) -> usize {
        self.roots
            .iter()
            .map(|root| 1 + root.descendant_count())
            .sum()
    }

    /// Roots and every sibling list in story-number order.
    pub fn sorted(&self) -> Vec<TreeNode> {
        let mut roots = self.roots.clone();
        roots.sort_by(|a, b| a.story_no.cmp(&b.story_no));
        for root in &mut roots {
            root.sort_children();
        }
        roots
    }

    pub fn render(&self, jira: &JiraConfig) -> Vec<RenderNode> {
        let mut roots: Vec<&TreeNode> = self.roots.iter().collect();
        roots.sort_by(|a, b| a.story_no.cmp(&b.story_no));
        roots
            .into_iter()
            .map(|root| RenderNode::from_tree(root, jira))
            .collect()
    }

    /// Map title: the group segment of the first root's story number.
    pub fn title(&self) -> Option<&str> {
        self.roots
            .iter()
            .map(|root| root.story_no.as_str())
            .min()
            .map(story_group)
    }

    /// Depth-first walk over all nodes in story-number order.
    pub fn walk(&self) -> Vec<Visit<'_>> {
        let mut visited = Vec::with_capacity(self.stats.valid_records);
        let mut stack: Vec<Visit<'_>> = Vec::new();
        push_siblings(&mut stack, &self.roots, &[]);

        while let Some(visit) = stack.pop() {
            push_siblings(&mut stack, &visit.node.children, &visit.lineage);
            visited.push(visit);
        }
        visited
    }
}

/// A node reached by [`Forest::walk`].
///
/// `lineage[i]` tells whether the ancestor at depth `i` was the last of its
/// siblings; the final entry describes the node itself.
#[derive(Debug, Clone)]
pub struct Visit<'a> {
    pub node: &'a TreeNode,
    pub lineage: Vec<bool>,
}

impl Visit<'_> {
    pub fn depth(&self) -> usize {
        self.lineage.len().saturating_sub(1)
    }

    pub fn is_last(&self) -> bool {
        self.lineage.last().copied().unwrap_or(true)
    }
}

// Pushed in reverse so the first sibling pops first.
fn push_siblings<'a>(stack: &mut Vec<Visit<'a>>, siblings: &'a [TreeNode], lineage: &[bool]) {
    let mut sorted: Vec<&TreeNode> = siblings.iter().collect();
    sorted.sort_by(|a, b| a.story_no.cmp(&b.story_no));

    let last = sorted.len().saturating_sub(1);
    for (i, node) in sorted.into_iter().enumerate().rev() {
        let mut child_lineage = lineage.to_vec();
        child_lineage.push(i == last);
        stack.push(Visit {
            node,
            lineage: child_lineage,
        });
    }
}
