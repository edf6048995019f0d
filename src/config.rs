use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration file structure for StoryMap.
///
/// Holds the Lark credentials and client tuning, the field layout the tree
/// builder reads, ticket-link settings and output preferences. Loaded once at
/// process start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Lark API credentials and client tuning
    #[serde(default)]
    pub lark: LarkConfig,

    /// Field layout of the story table
    #[serde(default)]
    pub tree: TreeConfig,

    /// Ticket link settings
    #[serde(default)]
    pub jira: JiraConfig,

    /// Output format preferences
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LarkConfig {
    /// Application id used to obtain tenant access tokens
    pub app_id: Option<String>,

    /// Application secret paired with `app_id`
    pub app_secret: Option<String>,

    /// Open API base URL
    #[serde(default = "default_lark_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Additional attempts for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff delay in seconds
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay: f64,

    /// Upper bound on any single backoff delay in seconds
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay: f64,

    /// Attempts per credential refresh
    #[serde(default = "default_auth_retries")]
    pub auth_retries: u32,

    /// Base delay in seconds between credential refresh attempts
    #[serde(default = "default_auth_retry_base_delay")]
    pub auth_retry_base_delay: f64,

    /// Seconds subtracted from the server-reported token lifetime
    #[serde(default = "default_token_refresh_buffer")]
    pub token_refresh_buffer: i64,

    #[serde(default = "default_true")]
    pub rate_limit_enabled: bool,

    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: usize,

    /// Default page size for record listing (server cap 500)
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TreeConfig {
    #[serde(default = "default_story_no_field")]
    pub story_no_field: String,

    #[serde(default = "default_role_field")]
    pub role_field: String,

    #[serde(default = "default_want_field")]
    pub want_field: String,

    /// Legacy description column used when role and want are both empty
    #[serde(default = "default_features_field")]
    pub features_field: String,

    #[serde(default = "default_criteria_field")]
    pub criteria_field: String,

    /// Column holding the external ticket reference
    #[serde(default = "default_ticket_field")]
    pub ticket_field: String,

    /// Candidate parent columns, first non-empty wins
    #[serde(default = "default_parent_field_names")]
    pub parent_field_names: Vec<String>,

    /// Regex every story number must match (case-insensitive by default)
    #[serde(default = "default_story_pattern")]
    pub story_pattern: String,

    /// Deepest level a node may occupy before the build is rejected
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Keep unrecognized columns on each node
    #[serde(default = "default_true")]
    pub preserve_extra_fields: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JiraConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_jira_base_url")]
    pub base_url: String,

    /// Template with `{base_url}` and `{ticket}` placeholders
    #[serde(default = "default_issue_url_template")]
    pub issue_url_template: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Default output format
    #[serde(default)]
    pub format: OutputFormat,

    /// Pretty-print JSON output
    #[serde(default)]
    pub pretty: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Summary,
    Json,
    Render,
    Text,
    Markdown,
}

impl Default for LarkConfig {
    fn default() -> Self {
        Self {
            app_id: None,
            app_secret: None,
            base_url: default_lark_base_url(),
            timeout: default_timeout(),
            max_retries: default_max_retries(),
            retry_base_delay: default_retry_base_delay(),
            retry_max_delay: default_retry_max_delay(),
            auth_retries: default_auth_retries(),
            auth_retry_base_delay: default_auth_retry_base_delay(),
            token_refresh_buffer: default_token_refresh_buffer(),
            rate_limit_enabled: true,
            requests_per_minute: default_requests_per_minute(),
            max_page_size: default_max_page_size(),
        }
    }
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            story_no_field: default_story_no_field(),
            role_field: default_role_field(),
            want_field: default_want_field(),
            features_field: default_features_field(),
            criteria_field: default_criteria_field(),
            ticket_field: default_ticket_field(),
            parent_field_names: default_parent_field_names(),
            story_pattern: default_story_pattern(),
            max_depth: default_max_depth(),
            preserve_extra_fields: true,
        }
    }
}

impl Default for JiraConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_jira_base_url(),
            issue_url_template: default_issue_url_template(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_lark_base_url() -> String {
    "https://open.larksuite.com/open-apis".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay() -> f64 {
    1.0
}

fn default_retry_max_delay() -> f64 {
    60.0
}

fn default_auth_retries() -> u32 {
    3
}

fn default_auth_retry_base_delay() -> f64 {
    1.0
}

fn default_token_refresh_buffer() -> i64 {
    300
}

fn default_requests_per_minute() -> usize {
    100
}

fn default_max_page_size() -> usize {
    500
}

fn default_story_no_field() -> String {
    "Story.No".to_string()
}

fn default_role_field() -> String {
    "Role".to_string()
}

fn default_want_field() -> String {
    "Want".to_string()
}

fn default_features_field() -> String {
    "Features".to_string()
}

fn default_criteria_field() -> String {
    "Criteria".to_string()
}

fn default_ticket_field() -> String {
    "TCG".to_string()
}

fn default_parent_field_names() -> Vec<String> {
    ["Parent Tickets", "父記錄", "parent", "parent_record"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

fn default_story_pattern() -> String {
    r"(?i)^[a-z]+(?:-[a-z0-9]+){2,}$".to_string()
}

fn default_max_depth() -> usize {
    20
}

fn default_jira_base_url() -> String {
    "https://jira.example.com".to_string()
}

fn default_issue_url_template() -> String {
    "{base_url}/browse/{ticket}".to_string()
}

const CANDIDATES: [&str; 4] = [
    "storymap.toml",
    "storymap.json",
    "storymap.yaml",
    "storymap.yml",
];

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path (must exist)
    /// 2. ./storymap.toml, ./storymap.json, ./storymap.yaml, ./storymap.yml
    /// 3. `<config dir>/storymap/storymap.toml`
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        for candidate in &CANDIDATES {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::load_from_path(path);
            }
        }

        if let Some(path) = Self::user_config_path().filter(|p| p.exists()) {
            return Self::load_from_path(&path);
        }

        log::debug!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("storymap").join("storymap.toml"))
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("");

        let config: Self = match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display()))?,
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?,
            _ => toml::from_str(&contents)
                .or_else(|_| serde_json::from_str(&contents))
                .or_else(|_| serde_yaml::from_str(&contents))
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
        };

        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            Some("yaml") | Some("yml") => serde_yaml::to_string(self)?,
            _ => toml::to_string_pretty(self)?,
        };

        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.lark.base_url, "https://open.larksuite.com/open-apis");
        assert_eq!(config.lark.timeout, 30);
        assert_eq!(config.lark.max_retries, 3);
        assert_eq!(config.lark.auth_retries, 3);
        assert_eq!(config.lark.token_refresh_buffer, 300);
        assert_eq!(config.lark.requests_per_minute, 100);
        assert_eq!(config.lark.max_page_size, 500);
        assert_eq!(config.tree.max_depth, 20);
        assert_eq!(config.tree.parent_field_names[0], "Parent Tickets");
        assert!(matches!(config.output.format, OutputFormat::Summary));
    }

    #[test]
    fn test_load_toml_config() {
        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        let toml_content = r#"
[lark]
app-id = "cli_a1b2c3"
app-secret = "secret"
requests-per-minute = 50
retry-base-delay = 0.5

[tree]
story-no-field = "Story No"
parent-field-names = ["Parent"]

[output]
format = "markdown"
pretty = true
"#;
        write!(temp_file, "{}", toml_content).unwrap();

        let config = Config::load(Some(temp_file.path())).unwrap();
        assert_eq!(config.lark.app_id.as_deref(), Some("cli_a1b2c3"));
        assert_eq!(config.lark.requests_per_minute, 50);
        assert!((config.lark.retry_base_delay - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.lark.max_retries, 3);
        assert_eq!(config.tree.story_no_field, "Story No");
        assert_eq!(config.tree.parent_field_names, vec!["Parent".to_string()]);
        assert_eq!(config.tree.role_field, "Role");
        assert!(matches!(config.output.format, OutputFormat::Markdown));
        assert!(config.output.pretty);
    }

    #[test]
    fn test_load_json_config() {
        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        let json_content = r#"{
  "lark": {
    "base-url": "https://open.feishu.cn/open-apis",
    "max-page-size": 100
  },
  "jira": {
    "base-url": "https://jira.internal"
  }
}"#;
        write!(temp_file, "{}", json_content).unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.lark.base_url, "https://open.feishu.cn/open-apis");
        assert_eq!(config.lark.max_page_size, 100);
        assert_eq!(config.jira.base_url, "https://jira.internal");
        assert_eq!(config.jira.issue_url_template, "{base_url}/browse/{ticket}");
    }

    #[test]
    fn test_load_yaml_config() {
        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        let yaml_content = "tree:\n  max-depth: 5\n  preserve-extra-fields: false\n";
        write!(temp_file, "{}", yaml_content).unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.tree.max_depth, 5);
        assert!(!config.tree.preserve_extra_fields);
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let result = Config::load(Some(Path::new("definitely-missing-storymap.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("storymap.yaml");

        let mut config = Config::default();
        config.lark.app_id = Some("cli_saved".to_string());
        config.output.format = OutputFormat::Text;
        config.save(&path).unwrap();

        let reloaded = Config::load(Some(&path)).unwrap();
        assert_eq!(reloaded.lark.app_id.as_deref(), Some("cli_saved"));
        assert!(matches!(reloaded.output.format, OutputFormat::Text));
    }
}
