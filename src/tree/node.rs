use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::config::JiraConfig;
use crate::lark::links::ticket_url;

/// One validated story, placed exactly once in the forest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeNode {
    pub record_id: String,
    pub story_no: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub criteria: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<String>,
    /// Set only when the declared parent resolved to another node
    pub parent_id: Option<String>,
    pub level: usize,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub extra_fields: IndexMap<String, Value>,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Number of nodes below this one.
    pub fn descendant_count(&self) -> usize {
        let mut count = 0;
        let mut stack: Vec<&TreeNode> = self.children.iter().collect();
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }

    /// Sorts every sibling list below this node by story number.
    pub fn sort_children(&mut self) {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            node.children.sort_by(|a, b| a.story_no.cmp(&b.story_no));
            stack.extend(node.children.iter_mut());
        }
    }
}

/// The view handed to renderers: label, display text, optional tooltip and
/// link, children in story-number order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderNode {
    pub label: String,
    pub display: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    pub children: Vec<RenderNode>,
}

impl RenderNode {
    // Recursion depth is bounded by the builder's depth guard.
    pub fn from_tree(node: &TreeNode, jira: &JiraConfig) -> Self {
        let mut children: Vec<&TreeNode> = node.children.iter().collect();
        children.sort_by(|a, b| a.story_no.cmp(&b.story_no));

        Self {
            label: node.story_no.clone(),
            display: node.description.clone(),
            tooltip: node.criteria.clone(),
            link: node
                .ticket
                .as_deref()
                .and_then(|ticket| ticket_url(jira, ticket)),
            children: children
                .into_iter()
                .map(|child| Self::from_tree(child, jira))
                .collect(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn node(story_no: &str, children: Vec<TreeNode>) -> TreeNode {
        TreeNode {
            record_id: format!("rec{story_no}"),
            story_no: story_no.to_string(),
            description: format!("Description of {story_no}"),
            criteria: None,
            ticket: None,
            parent_id: None,
            level: 0,
            extra_fields: IndexMap::new(),
            children,
        }
    }

    #[test]
    fn test_descendant_count() {
        let tree = node(
            "Story-ARD-00001",
            vec![
                node("Story-ARD-00002", vec![node("Story-ARD-00004", vec![])]),
                node("Story-ARD-00003", vec![]),
            ],
        );
        assert_eq!(tree.descendant_count(), 3);
    }

    #[test]
    fn test_sort_children_is_recursive() {
        let mut tree = node(
            "Story-ARD-00001",
            vec![
                node(
                    "Story-ARD-00003",
                    vec![node("Story-ARD-00009", vec![]), node("Story-ARD-00005", vec![])],
                ),
                node("Story-ARD-00002", vec![]),
            ],
        );
        tree.sort_children();

        assert_eq!(tree.children[0].story_no, "Story-ARD-00002");
        assert_eq!(tree.children[1].story_no, "Story-ARD-00003");
        assert_eq!(tree.children[1].children[0].story_no, "Story-ARD-00005");
    }

    #[test]
    fn test_render_node_sorts_and_links() {
        let mut child_b = node("Story-ARD-00003", vec![]);
        child_b.ticket = Some("TCG-42".to_string());
        child_b.criteria = Some("Given/When/Then".to_string());
        let tree = node(
            "Story-ARD-00001",
            vec![child_b, node("Story-ARD-00002", vec![])],
        );

        let render = RenderNode::from_tree(&tree, &JiraConfig::default());
        assert_eq!(render.label, "Story-ARD-00001");
        assert!(render.link.is_none());
        assert_eq!(render.children[0].label, "Story-ARD-00002");
        assert_eq!(render.children[1].tooltip.as_deref(), Some("Given/When/Then"));
        assert_eq!(
            render.children[1].link.as_deref(),
            Some("https://jira.example.com/browse/TCG-42")
        );
    }
}
