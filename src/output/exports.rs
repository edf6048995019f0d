use std::io::Write;

use anyhow::Result;
use serde::Serialize;

use crate::config::{JiraConfig, OutputFormat};
use crate::lark::links::ticket_url;
use crate::tree::{Forest, ForestMetadata, ForestStats, RejectedRecord, RenderNode, TreeNode};

use super::summary::render_summary;

const DEFAULT_TITLE: &str = "User Story Map";

#[derive(Serialize)]
struct ForestDocument<'a> {
    metadata: &'a ForestMetadata,
    stats: &'a ForestStats,
    rejected: &'a [RejectedRecord],
    trees: Vec<TreeNode>,
}

#[derive(Serialize)]
struct RenderDocument<'a> {
    title: &'a str,
    metadata: &'a ForestMetadata,
    trees: Vec<RenderNode>,
}

/// Writes a built forest in the requested format.
///
/// - Summary: the terminal overview
/// - JSON: nodes, stats and rejected records
/// - Render: the label/display/tooltip/link view for mind-map renderers
/// - Text: an indented tree for reading in a terminal or a diff
/// - Markdown: markmap-compatible headings
pub fn export_forest(
    forest: &Forest,
    format: OutputFormat,
    pretty: bool,
    jira: &JiraConfig,
    output: &mut dyn Write,
) -> Result<()> {
    match format {
        OutputFormat::Summary => {
            writeln!(output, "{}", render_summary(forest, None))?;
            Ok(())
        }
        OutputFormat::Json => {
            let document = ForestDocument {
                metadata: &forest.metadata,
                stats: &forest.stats,
                rejected: &forest.rejected,
                trees: forest.sorted(),
            };
            write_json(&document, pretty, output)
        }
        OutputFormat::Render => {
            let document = RenderDocument {
                title: forest.title().unwrap_or(DEFAULT_TITLE),
                metadata: &forest.metadata,
                trees: forest.render(jira),
            };
            write_json(&document, pretty, output)
        }
        OutputFormat::Text => export_text(forest, output),
        OutputFormat::Markdown => export_markdown(forest, jira, output),
    }
}

pub fn write_json<T: Serialize>(value: &T, pretty: bool, output: &mut dyn Write) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    writeln!(output, "{json}")?;
    Ok(())
}

fn export_text(forest: &Forest, output: &mut dyn Write) -> Result<()> {
    let stats = &forest.stats;
    let rule = "=".repeat(80);

    writeln!(output, "{rule}")?;
    writeln!(output, "🌳 {}", forest.title().unwrap_or(DEFAULT_TITLE))?;
    writeln!(output, "{rule}")?;
    writeln!(output)?;
    writeln!(output, "📊 Statistics:")?;
    writeln!(output, "  Total records: {}", stats.total_records)?;
    writeln!(output, "  Valid stories: {}", stats.valid_records)?;
    writeln!(output, "  Root nodes: {}", stats.root_nodes)?;
    writeln!(output, "  Leaf nodes: {}", stats.leaf_nodes)?;
    writeln!(output, "  Max depth: {}", stats.max_depth)?;
    writeln!(output, "  Rejected: {}", stats.rejected_total())?;
    let levels: Vec<String> = stats
        .level_distribution
        .iter()
        .map(|(level, count)| format!("{level}: {count}"))
        .collect();
    writeln!(output, "  Level distribution: {}", levels.join(", "))?;
    writeln!(output)?;
    writeln!(output, "🌲 Trees:")?;

    for visit in forest.walk() {
        let node = visit.node;
        if visit.depth() == 0 {
            writeln!(output)?;
            writeln!(output, "{}: {}", node.story_no, node.description)?;
            continue;
        }

        let mut line = String::new();
        for &ancestor_last in &visit.lineage[1..visit.lineage.len() - 1] {
            line.push_str(if ancestor_last { "    " } else { "│   " });
        }
        line.push_str(if visit.is_last() { "└── " } else { "├── " });
        writeln!(
            output,
            "{line}{}: {} (Level {})",
            node.story_no, node.description, node.level
        )?;
    }

    Ok(())
}

fn export_markdown(forest: &Forest, jira: &JiraConfig, output: &mut dyn Write) -> Result<()> {
    writeln!(output, "---")?;
    writeln!(output, "title: {DEFAULT_TITLE}")?;
    writeln!(output, "markmap:")?;
    writeln!(output, "  colorFreezeLevel: 2")?;
    writeln!(output, "  maxWidth: 400")?;
    writeln!(output, "  spacingHorizontal: 150")?;
    writeln!(output, "  spacingVertical: 15")?;
    writeln!(output, "  autoFit: true")?;
    writeln!(output, "  fontSize: 14")?;
    writeln!(output, "---")?;
    writeln!(output)?;
    writeln!(
        output,
        "# **{}**",
        forest.title().unwrap_or(DEFAULT_TITLE)
    )?;
    writeln!(output)?;

    for visit in forest.walk() {
        let node = visit.node;
        let story = match node.ticket.as_deref().and_then(|t| ticket_url(jira, t)) {
            Some(url) => format!(
                r#"<a href="{}" target="_blank" title="Open {} in JIRA">{}</a>"#,
                escape_html(&url),
                escape_html(node.ticket.as_deref().unwrap_or_default()),
                escape_html(&node.story_no)
            ),
            None => escape_html(&node.story_no),
        };
        let criteria = node
            .criteria
            .as_deref()
            .map(|c| format!(r#" data-criteria="{}""#, escape_html(c)))
            .unwrap_or_default();

        writeln!(
            output,
            "{} <span{criteria}><small>{story}</small><br/><strong>{}</strong></span>",
            "#".repeat(visit.depth() + 2),
            escape_html(&node.description)
        )?;
        writeln!(output)?;
    }

    Ok(())
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '\n' => escaped.push_str("&#10;"),
            '\r' => escaped.push_str("&#13;"),
            '\t' => escaped.push_str("&#9;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TreeConfig;
    use crate::lark::types::Record;
    use crate::tree::TreeBuilder;
    use indexmap::IndexMap;
    use serde_json::{json, Value};

    fn record(id: &str, story_no: &str, parent: Option<&str>) -> Record {
        let mut fields = IndexMap::new();
        fields.insert("Story.No".to_string(), json!(story_no));
        fields.insert("Want".to_string(), json!(format!("story {story_no}")));
        if let Some(parent) = parent {
            fields.insert("parent".to_string(), json!(parent));
        }
        Record::new(id, fields)
    }

    fn sample_forest() -> Forest {
        let mut ticketed = record("recC", "Story-ARD-00003", Some("recA"));
        ticketed
            .fields
            .insert("TCG".to_string(), json!([{"type": "text", "text": "TCG-7"}]));
        ticketed
            .fields
            .insert("Criteria".to_string(), json!("Given \"x\"\nThen <y>"));

        TreeBuilder::new(&TreeConfig::default())
            .unwrap()
            .build(&[
                record("recA", "Story-ARD-00001", None),
                ticketed,
                record("recB", "Story-ARD-00002", Some("recA")),
                record("recD", "Story-ARD-00004", Some("recB")),
            ])
            .unwrap()
    }

    fn export(format: OutputFormat) -> String {
        let mut buffer = Vec::new();
        export_forest(
            &sample_forest(),
            format,
            false,
            &JiraConfig::default(),
            &mut buffer,
        )
        .unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn test_json_export_sorts_children() {
        let value: Value = serde_json::from_str(&export(OutputFormat::Json)).unwrap();
        let children = value["trees"][0]["children"].as_array().unwrap();
        assert_eq!(children[0]["story_no"], "Story-ARD-00002");
        assert_eq!(children[1]["story_no"], "Story-ARD-00003");
        assert_eq!(value["stats"]["valid_records"], 4);
    }

    #[test]
    fn test_render_export_carries_links_and_tooltips() {
        let value: Value = serde_json::from_str(&export(OutputFormat::Render)).unwrap();
        assert_eq!(value["title"], "ARD");
        let ticketed = &value["trees"][0]["children"][1];
        assert_eq!(ticketed["label"], "Story-ARD-00003");
        assert_eq!(ticketed["link"], "https://jira.example.com/browse/TCG-7");
        assert_eq!(ticketed["tooltip"], "Given \"x\"\nThen <y>");
        assert!(value["trees"][0].get("link").is_none());
    }

    #[test]
    fn test_text_export_draws_tree() {
        let text = export(OutputFormat::Text);
        assert!(text.contains("Story-ARD-00001: story Story-ARD-00001"));
        assert!(text.contains("├── Story-ARD-00002: story Story-ARD-00002 (Level 1)"));
        assert!(text.contains("│   └── Story-ARD-00004: story Story-ARD-00004 (Level 2)"));
        assert!(text.contains("└── Story-ARD-00003: story Story-ARD-00003 (Level 1)"));
        assert!(text.contains("Level distribution: 0: 1, 1: 2, 2: 1"));
    }

    #[test]
    fn test_markdown_export_headings_and_links() {
        let markdown = export(OutputFormat::Markdown);
        assert!(markdown.starts_with("---\ntitle: User Story Map\n"));
        assert!(markdown.contains("# **ARD**"));
        assert!(markdown.contains("## <span><small>Story-ARD-00001</small>"));
        assert!(markdown.contains("#### <span><small>Story-ARD-00004</small>"));
        assert!(markdown.contains(
            r#"href="https://jira.example.com/browse/TCG-7" target="_blank" title="Open TCG-7 in JIRA">Story-ARD-00003</a>"#
        ));
        assert!(markdown.contains(r#"data-criteria="Given &quot;x&quot;&#10;Then &lt;y&gt;""#));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("a & b <c>"), "a &amp; b &lt;c&gt;");
    }
}
