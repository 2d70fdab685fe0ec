//! Skill Scanner: a pure function from a skills root's bytes to a sequence of tool
//! records. Never touches the index or manifest.

use crate::core::hash_manifest::{combine_hashes, hash_file};
use crate::error::CoreResult;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One declared entry point, scoped to its skill.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolRecord {
    pub skill_name: String,
    pub tool_name: String,
    pub description: String,
    pub long_docstring: String,
    pub file_path: PathBuf,
    pub entry_point: String,
    pub parameters: Vec<Parameter>,
    pub keywords: Vec<String>,
    pub execution_mode: ExecutionMode,
    pub file_hash: String,
}

impl ToolRecord {
    pub fn id(&self) -> String {
        format!("{}.{}", self.skill_name, self.tool_name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExecutionMode {
    Python,
    Shell,
    JavaScript,
    Unknown,
}

impl ExecutionMode {
    fn from_extension(ext: &str) -> Self {
        match ext {
            "py" => ExecutionMode::Python,
            "sh" | "bash" => ExecutionMode::Shell,
            "js" | "mjs" => ExecutionMode::JavaScript,
            _ => ExecutionMode::Unknown,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub param_type: ParamType,
    pub required: bool,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Boolean,
    Number,
    Array,
    Object,
}

impl ParamType {
    fn from_annotation(annotation: &str) -> Self {
        match annotation.trim() {
            "int" => ParamType::Integer,
            "bool" => ParamType::Boolean,
            "float" => ParamType::Number,
            "list" | "List" => ParamType::Array,
            "dict" | "Dict" => ParamType::Object,
            _ => ParamType::String,
        }
    }
}

/// A file the scanner could not parse — surfaced to the watcher, never aborts the scan.
#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Result of scanning a skills root (or a change-set within it).
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub tools: Vec<ToolRecord>,
    pub skipped: Vec<SkippedFile>,
}

/// Declarative metadata parsed out of a skill's `SKILL.md` frontmatter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillManifest {
    pub name: String,
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub routing_keywords: Vec<String>,
    #[serde(default)]
    pub intents: Vec<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_yaml::Value>,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

/// Extracts the `---`-delimited YAML block at the top of `content`, reusing the
/// same frontmatter convention as the rest of the codebase's Markdown parsing.
pub fn parse_frontmatter(content: &str) -> Option<HashMap<String, serde_yaml::Value>> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() || lines[0].trim() != "---" {
        return None;
    }

    let mut body = Vec::new();
    let mut closed = false;
    for line in lines.iter().skip(1) {
        if line.trim() == "---" {
            closed = true;
            break;
        }
        body.push(*line);
    }

    if !closed {
        return None;
    }

    serde_yaml::from_str(&body.join("\n")).ok()
}

fn parse_skill_manifest(content: &str) -> Option<SkillManifest> {
    let mut map = parse_frontmatter(content)?;
    let name = map
        .remove("name")
        .and_then(|v| serde_yaml::from_value(v).ok())?;
    let description = map
        .remove("description")
        .and_then(|v| serde_yaml::from_value(v).ok())
        .unwrap_or_else(|| "".to_string());
    let version = map
        .remove("version")
        .and_then(|v| serde_yaml::from_value(v).ok())
        .unwrap_or_else(default_version);
    let routing_keywords = map
        .remove("routing_keywords")
        .and_then(|v| serde_yaml::from_value(v).ok())
        .unwrap_or_default();
    let intents = map
        .remove("intents")
        .and_then(|v| serde_yaml::from_value(v).ok())
        .unwrap_or_default();
    let authors = map
        .remove("authors")
        .and_then(|v| serde_yaml::from_value(v).ok())
        .unwrap_or_default();

    Some(SkillManifest {
        name,
        description,
        version,
        routing_keywords,
        intents,
        authors,
        extra: map,
    })
}

static DEF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^def\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(([^)]*)\)").unwrap());
static DOCSTRING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)"""(.*?)"""|'''(.*?)'''"#).unwrap());

fn split_top_level_commas(params: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in params.chars() {
        match c {
            '[' | '(' | '{' => {
                depth += 1;
                current.push(c);
            }
            ']' | ')' | '}' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                out.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        out.push(current.trim().to_string());
    }
    out
}

fn parse_parameters(raw: &str) -> Vec<Parameter> {
    split_top_level_commas(raw)
        .into_iter()
        .filter(|p| p != "self" && !p.starts_with('*'))
        .map(|p| {
            let (name_and_type, default) = match p.split_once('=') {
                Some((lhs, rhs)) => (lhs.trim().to_string(), Some(rhs.trim().to_string())),
                None => (p.trim().to_string(), None),
            };
            let (name, annotation) = match name_and_type.split_once(':') {
                Some((n, t)) => (n.trim().to_string(), t.trim().to_string()),
                None => (name_and_type, String::new()),
            };
            Parameter {
                name,
                param_type: ParamType::from_annotation(&annotation),
                required: default.is_none(),
                description: None,
            }
        })
        .collect()
}

/// Extracts the first docstring-plus-signature entry point from a script's source.
/// Parsing errors yield `None`, which the caller turns into a `SkippedFile` rather
/// than aborting the whole scan.
fn parse_entry_point(content: &str) -> Option<(String, String, String, Vec<Parameter>)> {
    let def_match = DEF_RE.captures(content)?;
    let entry_point = def_match.get(1)?.as_str().to_string();
    let params_raw = def_match.get(2)?.as_str();
    let parameters = parse_parameters(params_raw);

    let after_def = &content[def_match.get(0)?.end()..];
    let docstring = DOCSTRING_RE
        .captures(after_def)
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();

    let description = docstring
        .lines()
        .next()
        .unwrap_or("")
        .trim()
        .to_string();

    Some((entry_point, description, docstring, parameters))
}

/// Scans one skill directory (`<skills_root>/<skill_name>/`) for its manifest and
/// every declared tool under `scripts/`.
pub(crate) fn scan_skill_dir(skill_dir: &Path, result: &mut ScanResult) -> CoreResult<()> {
    let skill_md = skill_dir.join("SKILL.md");
    if !skill_md.exists() {
        return Ok(());
    }

    let skill_name = skill_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let content = match std::fs::read_to_string(&skill_md) {
        Ok(c) => c,
        Err(e) => {
            result.skipped.push(SkippedFile {
                path: skill_md,
                reason: format!("could not read SKILL.md: {e}"),
            });
            return Ok(());
        }
    };

    let manifest = match parse_skill_manifest(&content) {
        Some(m) => m,
        None => {
            result.skipped.push(SkippedFile {
                path: skill_md,
                reason: "missing or malformed YAML frontmatter".to_string(),
            });
            return Ok(());
        }
    };

    let skill_md_hash = match hash_file(&skill_dir.join("SKILL.md")) {
        Ok(h) => h,
        Err(e) => {
            result.skipped.push(SkippedFile {
                path: skill_dir.join("SKILL.md"),
                reason: format!("could not hash SKILL.md: {e}"),
            });
            return Ok(());
        }
    };

    let scripts_dir = skill_dir.join("scripts");
    if !scripts_dir.exists() {
        debug!("skill '{}' declares no scripts directory", skill_name);
        return Ok(());
    }

    for entry in walkdir::WalkDir::new(&scripts_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path().to_path_buf();
        let tool_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();

        let script_content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                result.skipped.push(SkippedFile {
                    path,
                    reason: format!("could not read script: {e}"),
                });
                continue;
            }
        };

        let parsed = parse_entry_point(&script_content);
        let (entry_point, description, long_docstring, parameters) = match parsed {
            Some(v) => v,
            None => {
                warn!("skipping {}: no entry point found", path.display());
                result.skipped.push(SkippedFile {
                    path,
                    reason: "no recognizable entry point (def ...) found".to_string(),
                });
                continue;
            }
        };

        let file_hash = match hash_file(&path) {
            Ok(h) => combine_hashes(&skill_md_hash, &h),
            Err(e) => {
                result.skipped.push(SkippedFile {
                    path,
                    reason: format!("could not hash script: {e}"),
                });
                continue;
            }
        };

        let description = if description.is_empty() {
            manifest.description.clone()
        } else {
            description
        };

        result.tools.push(ToolRecord {
            skill_name: skill_name.clone(),
            tool_name,
            description,
            long_docstring,
            file_path: path,
            entry_point,
            parameters,
            keywords: manifest.routing_keywords.clone(),
            execution_mode: ExecutionMode::from_extension(&ext),
            file_hash,
        });
    }

    Ok(())
}

/// A light best-effort syntax check over a script's source: balanced
/// parens/brackets/braces and string quotes. Not a real parser — matches the
/// scanner's resilience-over-correctness posture, used by the watcher to drop
/// a sync-triggering event for a file mid-edit rather than reindex garbage.
pub fn quick_syntax_check(source: &str) -> bool {
    let mut stack = Vec::new();
    let mut in_string: Option<char> = None;
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        if let Some(quote) = in_string {
            if c == '\\' {
                chars.next();
            } else if c == quote {
                in_string = None;
            }
            continue;
        }

        match c {
            '\'' | '"' => in_string = Some(c),
            '(' | '[' | '{' => stack.push(c),
            ')' => {
                if stack.pop() != Some('(') {
                    return false;
                }
            }
            ']' => {
                if stack.pop() != Some('[') {
                    return false;
                }
            }
            '}' => {
                if stack.pop() != Some('{') {
                    return false;
                }
            }
            _ => {}
        }
    }

    stack.is_empty() && in_string.is_none()
}

/// Walks `skills_root` and produces tool records for every skill found. Parsing
/// errors on individual files are collected in `ScanResult::skipped`, never abort
/// the scan.
pub fn scan_skills_root(skills_root: &Path) -> CoreResult<ScanResult> {
    let mut result = ScanResult::default();
    if !skills_root.exists() {
        return Ok(result);
    }

    for entry in walkdir::WalkDir::new(skills_root)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .filter(|e| {
            !e.file_name()
                .to_str()
                .map(|n| n.starts_with('.') || n.starts_with('_'))
                .unwrap_or(false)
        })
    {
        scan_skill_dir(entry.path(), &mut result)?;
    }

    Ok(result)
}
