//! Built-in workspace tools and the tool registry.
//!
//! Each tool is a named function over JSON arguments, resolved against the
//! workspace root. Only tools listed in
//! [`MUTATING_TOOLS`](crate::core::tool_policy::MUTATING_TOOLS) change the workspace.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::core::types::ToolCall;
use crate::io::process::run_command_with_timeout;

const SKIPPED_DIRS: &[&str] = &["target", "node_modules", "__pycache__", ".venv"];
const SYNTAX_CHECK_TIMEOUT: Duration = Duration::from_secs(10);
const SYNTAX_CHECK_SCRIPT: &str = "import ast, sys\nast.parse(sys.stdin.read())\n";

/// Where tools run and how far they may reach.
#[derive(Debug, Clone, Copy)]
pub struct ToolContext<'a> {
    pub root: &'a Path,
    pub allow_outside_root: bool,
    pub output_limit_bytes: usize,
}

impl ToolContext<'_> {
    /// Resolve `path` against the root, rejecting escapes unless allowed.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        if path.trim().is_empty() {
            bail!("path must be non-empty");
        }
        let raw = Path::new(path);
        let joined = if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            self.root.join(raw)
        };
        let normalized = normalize(&joined);
        if !self.allow_outside_root && !normalized.starts_with(normalize(self.root)) {
            bail!("path '{path}' escapes the workspace root");
        }
        Ok(normalized)
    }
}

/// Lexically normalize `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component.as_os_str());
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// A named operation over JSON arguments.
pub trait Tool {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn run(&self, args: &Map<String, Value>, ctx: &ToolContext<'_>) -> Result<Value>;
}

type ToolFn = fn(&Map<String, Value>, &ToolContext<'_>) -> Result<Value>;

/// A tool backed by a plain function.
pub struct FnTool {
    name: &'static str,
    description: &'static str,
    run: ToolFn,
}

impl Tool for FnTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn run(&self, args: &Map<String, Value>, ctx: &ToolContext<'_>) -> Result<Value> {
        (self.run)(args, ctx)
    }
}

const BUILTINS: &[(&str, &str, ToolFn)] = &[
    (
        "list_files",
        "List workspace files as sorted relative paths. Args: path (optional subdirectory).",
        list_files,
    ),
    ("read_file", "Read a text file. Args: path.", read_file),
    (
        "write_file",
        "Create or overwrite a file. Args: path, content.",
        write_file,
    ),
    (
        "append_file",
        "Append text to a file. Args: path, content.",
        append_file,
    ),
    ("delete_file", "Delete a file. Args: path.", delete_file),
    (
        "copy_file",
        "Copy a file. Args: source, destination.",
        copy_file,
    ),
    (
        "move_file",
        "Move or rename a file. Args: source, destination.",
        move_file,
    ),
    (
        "replace_in_file",
        "Replace every occurrence of text in a file. Args: path, old, new.",
        replace_in_file,
    ),
    (
        "python_ast_dependencies",
        "List the imports of a Python file and which resolve inside the workspace. Args: path.",
        python_dependencies,
    ),
    (
        "python_ast_dependencies_multifile",
        "Map imports across several Python files. Args: paths.",
        python_dependencies_multifile,
    ),
    (
        "validate_python_syntax",
        "Check Python source for syntax errors. Args: code.",
        validate_python_syntax,
    ),
];

/// Immutable name → tool mapping.
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Box<dyn Tool>>) -> Self {
        Self {
            tools: tools
                .into_iter()
                .map(|tool| (tool.name().to_string(), tool))
                .collect(),
        }
    }

    /// Registry with every built-in tool.
    pub fn builtin() -> Self {
        Self::new(builtin_tools())
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|tool| tool.as_ref())
    }

    /// `(name, description)` pairs in name order, for prompts.
    pub fn inventory(&self) -> Vec<(String, String)> {
        self.tools
            .values()
            .map(|tool| (tool.name().to_string(), tool.description().to_string()))
            .collect()
    }

    pub fn run(&self, call: &ToolCall, ctx: &ToolContext<'_>) -> Result<Value> {
        let tool = self
            .get(&call.tool)
            .ok_or_else(|| anyhow!("Unknown tool: {}", call.tool))?;
        debug!(tool = %call.tool, "running tool");
        tool.run(&call.args, ctx)
    }
}

pub fn builtin_tools() -> Vec<Box<dyn Tool>> {
    BUILTINS
        .iter()
        .map(|&(name, description, run)| {
            Box::new(FnTool {
                name,
                description,
                run,
            }) as Box<dyn Tool>
        })
        .collect()
}

fn str_arg<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("Missing required parameter '{key}'"))
}

fn first_str_arg<'a>(args: &'a Map<String, Value>, keys: &[&str]) -> Result<&'a str> {
    keys.iter()
        .find_map(|key| args.get(*key).and_then(Value::as_str))
        .ok_or_else(|| anyhow!("Missing required parameter '{}'", keys[0]))
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn list_files(args: &Map<String, Value>, ctx: &ToolContext<'_>) -> Result<Value> {
    let root = normalize(ctx.root);
    let start = match args.get("path").and_then(Value::as_str) {
        Some(sub) if !sub.is_empty() && sub != "." => ctx.resolve(sub)?,
        _ => root.clone(),
    };
    let mut files = Vec::new();
    walk(&start, &mut files)?;
    let mut paths: Vec<String> = files.iter().map(|path| relative(&root, path)).collect();
    paths.sort();
    Ok(Value::from(paths))
}

fn walk(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let entries = fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_str()) {
            continue;
        }
        let path = entry.path();
        let file_type = entry
            .file_type()
            .with_context(|| format!("stat {}", path.display()))?;
        if file_type.is_dir() {
            walk(&path, files)?;
        } else if file_type.is_file() {
            files.push(path);
        }
    }
    Ok(())
}

fn read_file(args: &Map<String, Value>, ctx: &ToolContext<'_>) -> Result<Value> {
    let path = ctx.resolve(str_arg(args, "path")?)?;
    let mut contents =
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    if contents.len() > ctx.output_limit_bytes {
        let mut cut = ctx.output_limit_bytes;
        while !contents.is_char_boundary(cut) {
            cut -= 1;
        }
        let dropped = contents.len() - cut;
        contents.truncate(cut);
        contents.push_str(&format!("\n[truncated {dropped} bytes]\n"));
    }
    Ok(Value::String(contents))
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create dir {}", parent.display()))?;
    }
    Ok(())
}

fn write_file(args: &Map<String, Value>, ctx: &ToolContext<'_>) -> Result<Value> {
    let raw = str_arg(args, "path")?;
    let content = first_str_arg(args, &["content", "code"])?;
    let path = ctx.resolve(raw)?;
    ensure_parent(&path)?;
    fs::write(&path, content).with_context(|| format!("write {}", path.display()))?;
    Ok(Value::String(format!("wrote {} bytes", content.len())))
}

fn append_file(args: &Map<String, Value>, ctx: &ToolContext<'_>) -> Result<Value> {
    let raw = str_arg(args, "path")?;
    let content = first_str_arg(args, &["content", "text"])?;
    let path = ctx.resolve(raw)?;
    ensure_parent(&path)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("append {}", path.display()))?;
    Ok(Value::String(format!("appended {} bytes", content.len())))
}

fn delete_file(args: &Map<String, Value>, ctx: &ToolContext<'_>) -> Result<Value> {
    let raw = str_arg(args, "path")?;
    let path = ctx.resolve(raw)?;
    fs::remove_file(&path).with_context(|| format!("delete {}", path.display()))?;
    Ok(Value::String(format!("deleted {raw}")))
}

fn copy_file(args: &Map<String, Value>, ctx: &ToolContext<'_>) -> Result<Value> {
    let (source, destination) = endpoints(args, ctx)?;
    ensure_parent(&destination)?;
    fs::copy(&source, &destination).with_context(|| {
        format!("copy {} to {}", source.display(), destination.display())
    })?;
    Ok(Value::String(format!(
        "copied {} to {}",
        str_arg(args, "source")?,
        str_arg(args, "destination")?
    )))
}

fn move_file(args: &Map<String, Value>, ctx: &ToolContext<'_>) -> Result<Value> {
    let (source, destination) = endpoints(args, ctx)?;
    ensure_parent(&destination)?;
    fs::rename(&source, &destination).with_context(|| {
        format!("move {} to {}", source.display(), destination.display())
    })?;
    Ok(Value::String(format!(
        "moved {} to {}",
        str_arg(args, "source")?,
        str_arg(args, "destination")?
    )))
}

fn endpoints(args: &Map<String, Value>, ctx: &ToolContext<'_>) -> Result<(PathBuf, PathBuf)> {
    let source = ctx.resolve(str_arg(args, "source")?)?;
    let destination = ctx.resolve(str_arg(args, "destination")?)?;
    if !source.is_file() {
        bail!("source {} is not a file", source.display());
    }
    Ok((source, destination))
}

fn replace_in_file(args: &Map<String, Value>, ctx: &ToolContext<'_>) -> Result<Value> {
    let path = ctx.resolve(str_arg(args, "path")?)?;
    let old = first_str_arg(args, &["old", "search", "find"])?;
    let new = first_str_arg(args, &["new", "replacement", "replace"])?;
    if old.is_empty() {
        bail!("replacement target must be non-empty");
    }
    let contents = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let count = contents.matches(old).count();
    if count == 0 {
        bail!("text to replace not found in {}", path.display());
    }
    fs::write(&path, contents.replace(old, new))
        .with_context(|| format!("write {}", path.display()))?;
    Ok(Value::String(format!("replaced {count} occurrence(s)")))
}

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*import\s+([A-Za-z_][\w.]*(?:\s+as\s+\w+)?(?:\s*,\s*[A-Za-z_][\w.]*(?:\s+as\s+\w+)?)*)").unwrap()
});
static FROM_IMPORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*from\s+(\.*[A-Za-z_][\w.]*|\.+)\s+import\b").unwrap());

/// Module names imported by Python `source`, in first-seen order.
pub fn scan_imports(source: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = Vec::new();
    for caps in IMPORT_RE.captures_iter(source) {
        let start = caps.get(0).map_or(0, |m| m.start());
        for item in caps[1].split(',') {
            if let Some(module) = item.split_whitespace().next() {
                found.push((start, module.to_string()));
            }
        }
    }
    for caps in FROM_IMPORT_RE.captures_iter(source) {
        let start = caps.get(0).map_or(0, |m| m.start());
        found.push((start, caps[1].to_string()));
    }
    found.sort_by_key(|(start, _)| *start);
    let mut seen = BTreeSet::new();
    found
        .into_iter()
        .filter_map(|(_, module)| seen.insert(module.clone()).then_some(module))
        .collect()
}

/// Workspace-relative file a module resolves to, if it exists.
fn resolve_module(root: &Path, importer: &Path, module: &str) -> Option<String> {
    let leading_dots = module.chars().take_while(|ch| *ch == '.').count();
    let rest = &module[leading_dots..];
    let mut base = if leading_dots > 0 {
        let mut dir = importer.parent()?.to_path_buf();
        for _ in 1..leading_dots {
            dir.pop();
        }
        dir
    } else {
        root.to_path_buf()
    };
    if rest.is_empty() {
        return None;
    }
    for part in rest.split('.') {
        base.push(part);
    }
    let candidates = [base.with_extension("py"), base.join("__init__.py")];
    let sibling = if leading_dots == 0 {
        importer
            .parent()
            .map(|dir| dir.join(rest.replace('.', "/")).with_extension("py"))
    } else {
        None
    };
    candidates
        .into_iter()
        .chain(sibling)
        .find(|path| path.is_file())
        .map(|path| relative(root, &path))
}

fn dependencies_of(path: &Path, ctx: &ToolContext<'_>) -> Result<Value> {
    let root = normalize(ctx.root);
    let source = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let imports = scan_imports(&source);
    let local: Vec<String> = imports
        .iter()
        .filter_map(|module| resolve_module(&root, path, module))
        .collect();
    Ok(json!({
        "path": relative(&root, path),
        "imports": imports,
        "local": local,
    }))
}

fn python_dependencies(args: &Map<String, Value>, ctx: &ToolContext<'_>) -> Result<Value> {
    let path = ctx.resolve(str_arg(args, "path")?)?;
    dependencies_of(&path, ctx)
}

fn python_dependencies_multifile(
    args: &Map<String, Value>,
    ctx: &ToolContext<'_>,
) -> Result<Value> {
    let paths = args
        .get("paths")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("Missing required parameter 'paths'"))?;
    let mut files = Map::new();
    for item in paths {
        let raw = item
            .as_str()
            .ok_or_else(|| anyhow!("paths must contain strings"))?;
        let path = ctx.resolve(raw)?;
        files.insert(raw.to_string(), dependencies_of(&path, ctx)?);
    }
    Ok(json!({ "files": files }))
}

fn validate_python_syntax(args: &Map<String, Value>, ctx: &ToolContext<'_>) -> Result<Value> {
    let code = str_arg(args, "code")?;
    let mut cmd = Command::new("python3");
    cmd.arg("-c").arg(SYNTAX_CHECK_SCRIPT).current_dir(ctx.root);
    let output = run_command_with_timeout(
        cmd,
        Some(code.as_bytes()),
        SYNTAX_CHECK_TIMEOUT,
        ctx.output_limit_bytes,
    )
    .context("run python3 syntax check")?;
    if output.timed_out {
        bail!("syntax check timed out");
    }
    if output.status.success() {
        return Ok(json!({ "valid": true }));
    }
    let stderr = output.stderr_text();
    let detail = stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("syntax error")
        .trim()
        .to_string();
    Ok(json!({ "valid": false, "error": detail }))
}
