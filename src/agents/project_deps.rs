use crate::agents::command_runner::CommandRunner;
use crate::error::{DevupError, Result};
use crate::utils::progress;
use crate::workflow::Stage;
use colored::Colorize;
use semver::{Version, VersionReq};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencySection {
    Dependencies,
    DevDependencies,
}

impl DependencySection {
    pub fn key(self) -> &'static str {
        match self {
            DependencySection::Dependencies => "dependencies",
            DependencySection::DevDependencies => "devDependencies",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateAction {
    Upgrade,
    /// Newest version allowed by peers is older than the current pin
    Downgrade,
    Same,
    /// Nothing published satisfies the root and peer ranges
    Conflict,
    /// Not a registry range, or no version list could be fetched
    Skip,
}

impl CandidateAction {
    pub fn changes_manifest(self) -> bool {
        matches!(self, CandidateAction::Upgrade | CandidateAction::Downgrade)
    }
}

impl fmt::Display for CandidateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CandidateAction::Upgrade => "UPGRADE",
            CandidateAction::Downgrade => "DOWNGRADE peer-deps",
            CandidateAction::Same => "SAME",
            CandidateAction::Conflict => "CONFLICT",
            CandidateAction::Skip => "SKIP",
        };
        f.write_str(label)
    }
}

/// Proposed change for one root dependency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub section: DependencySection,
    pub old_spec: String,
    pub new_spec: Option<String>,
    pub action: CandidateAction,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CANDIDATE → {:30} {:15} -> {}  [{}]",
            self.name,
            self.old_spec,
            self.new_spec.as_deref().unwrap_or("--"),
            self.action
        )
    }
}

/// Reconciles package.json dependencies with the peer ranges of installed packages
pub struct ProjectDepsStage {
    package_root: Option<PathBuf>,
}

impl ProjectDepsStage {
    pub fn new(package_root: Option<PathBuf>) -> Self {
        Self { package_root }
    }

    fn execute(&self) -> Result<()> {
        let Some(root) = &self.package_root else {
            println!(
                "{}",
                "package.json not found; skipping project dependency update".yellow()
            );
            info!("package.json not found; project stage skipped");
            return Ok(());
        };

        println!("\n{}", "1. Checking prerequisites...".yellow());
        CommandRunner::require_program("npm")?;
        println!("   Project root: {}", root.display().to_string().bright_cyan());
        info!("Project root: {}", root.display());

        let manifest_path = root.join("package.json");
        let mut manifest = read_manifest(&manifest_path)?;
        let runner = CommandRunner::new().in_dir(root);

        println!("\n{}", "2. Collecting peer dependency ranges...".yellow());
        let tree = runner.capture("npm", &["ls", "--json", "--depth=1"])?;
        // npm ls exits non-zero on peer problems but still prints the tree
        let peers = serde_json::from_str::<Value>(&tree.stdout)
            .map(|tree| collect_peer_ranges(&tree))
            .unwrap_or_default();
        println!("   {} package(s) carry peer requirements", peers.len());

        println!("\n{}", "3. Selecting dependency versions...".yellow());
        let roots = root_dependencies(&manifest);
        let pb = progress::bar(roots.len());
        let candidates = plan_updates(&manifest, &peers, |name| {
            pb.set_message(name.to_string());
            let versions = fetch_versions(&runner, name);
            pb.inc(1);
            versions
        });
        pb.finish_and_clear();

        for candidate in &candidates {
            info!("{candidate}");
            if candidate.action.changes_manifest() {
                println!(
                    "   • {} {} → {}  [{}]",
                    candidate.name.bright_cyan(),
                    candidate.old_spec.red(),
                    candidate.new_spec.as_deref().unwrap_or("--").green(),
                    candidate.action
                );
            } else if candidate.action == CandidateAction::Conflict {
                println!(
                    "   • {} {}  [{}]",
                    candidate.name.bright_cyan(),
                    candidate.old_spec,
                    candidate.action.to_string().red()
                );
            }
        }

        let changed = apply_candidates(&mut manifest, &candidates);
        if changed == 0 {
            println!("{}", "✓ No dependency changes needed".green());
            info!("No dependency changes needed");
        } else {
            println!("\n{}", "4. Installing updated dependencies...".yellow());
            fs::write(&manifest_path, render_manifest(&manifest)?)?;
            install(&runner)?;

            let dedupe = runner.capture("npm", &["dedupe"])?;
            if !dedupe.success() {
                warn!("npm dedupe failed: {}", dedupe.failure_detail());
            }
            println!(
                "{}",
                format!("✓ Dependency upgrade complete ({changed} packages)").green()
            );
            info!("Dependency upgrade complete ({changed} packages)");
        }

        println!("\n{}", "5. Running npm audit...".yellow());
        let audit = runner.capture("npm", &["audit", "--omit=dev"])?;
        if audit.success() {
            println!("{}", "✓ npm audit found no issues".green());
        } else {
            warn!("npm audit issues:\n{}", audit.stdout);
        }

        println!("\n{}", "✨ Project dependency update complete".green().bold());
        Ok(())
    }
}

impl Stage for ProjectDepsStage {
    fn name(&self) -> &str {
        "project"
    }

    fn run(&mut self) -> Result<()> {
        self.execute()
    }
}

fn read_manifest(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path).map_err(|e| {
        DevupError::ProjectValidation(format!("Failed to read {}: {e}", path.display()))
    })?;
    Ok(serde_json::from_str(&content)?)
}

/// `npm install --legacy-peer-deps`, retrying with `--force`
fn install(runner: &CommandRunner) -> Result<()> {
    if runner.stream("npm", &["install", "--legacy-peer-deps"])?.success() {
        return Ok(());
    }
    warn!("npm install --legacy-peer-deps failed; retrying with --force");
    if runner.stream("npm", &["install", "--force"])?.success() {
        return Ok(());
    }
    Err(DevupError::ToolUpgrade("npm install failed".to_string()))
}

fn fetch_versions(runner: &CommandRunner, name: &str) -> Option<Vec<String>> {
    let output = runner
        .capture("npm", &["view", name, "versions", "--json"])
        .ok()?;
    if !output.success() || output.stdout.is_empty() {
        return None;
    }
    parse_view_versions(&output.stdout).ok()
}

/// Root dependencies sorted by name; `dependencies` wins over `devDependencies`
pub fn root_dependencies(manifest: &Value) -> Vec<(String, DependencySection, String)> {
    let mut roots: BTreeMap<String, (DependencySection, String)> = BTreeMap::new();
    for section in [
        DependencySection::DevDependencies,
        DependencySection::Dependencies,
    ] {
        if let Some(table) = manifest.get(section.key()).and_then(Value::as_object) {
            for (name, spec) in table {
                if let Some(spec) = spec.as_str() {
                    roots.insert(name.clone(), (section, spec.to_string()));
                }
            }
        }
    }
    roots
        .into_iter()
        .map(|(name, (section, spec))| (name, section, spec))
        .collect()
}

/// Peer ranges declared by the direct children in `npm ls --json` output
pub fn collect_peer_ranges(tree: &Value) -> BTreeMap<String, Vec<String>> {
    let mut peers: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let Some(children) = tree.get("dependencies").and_then(Value::as_object) else {
        return peers;
    };

    for child in children.values() {
        if let Some(peer_deps) = child.get("peerDependencies").and_then(Value::as_object) {
            for (name, range) in peer_deps {
                if let Some(range) = range.as_str() {
                    peers.entry(name.clone()).or_default().push(range.to_string());
                }
            }
        }
    }
    peers
}

/// `npm view <pkg> versions --json` prints a bare string when only one version exists
pub fn parse_view_versions(json: &str) -> Result<Vec<String>> {
    match serde_json::from_str::<Value>(json)? {
        Value::String(version) => Ok(vec![version]),
        Value::Array(items) => Ok(items
            .into_iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect()),
        other => Err(DevupError::ProjectValidation(format!(
            "Unexpected npm view output: {other}"
        ))),
    }
}

/// Choose a target version for every root dependency.
///
/// `fetch_versions` returns the published versions of a package, or `None`
/// when they cannot be retrieved.
pub fn plan_updates<F>(
    manifest: &Value,
    peers: &BTreeMap<String, Vec<String>>,
    mut fetch_versions: F,
) -> Vec<Candidate>
where
    F: FnMut(&str) -> Option<Vec<String>>,
{
    root_dependencies(manifest)
        .into_iter()
        .map(|(name, section, old_spec)| {
            let mut candidate = Candidate {
                name,
                section,
                old_spec,
                new_spec: None,
                action: CandidateAction::Skip,
            };

            if translate_range(&candidate.old_spec).is_none() {
                return candidate;
            }
            let Some(versions) = fetch_versions(&candidate.name) else {
                return candidate;
            };

            let peer_ranges = peers.get(&candidate.name).cloned().unwrap_or_default();
            let mut ranges = vec![candidate.old_spec.clone()];
            ranges.extend(peer_ranges.iter().cloned());

            let best = highest_satisfying(&versions, &ranges).or_else(|| {
                if peer_ranges.is_empty() {
                    None
                } else {
                    highest_satisfying(&versions, &peer_ranges)
                }
            });

            let Some(best) = best else {
                candidate.action = CandidateAction::Conflict;
                return candidate;
            };

            candidate.action = classify(&candidate.old_spec, &best);
            candidate.new_spec = Some(format!("^{best}"));
            candidate
        })
        .collect()
}

fn classify(old_spec: &str, best: &str) -> CandidateAction {
    // "*" or "latest" already float to the newest release
    let (Some(current), Some(best)) = (loose_version(old_spec), loose_version(best)) else {
        return CandidateAction::Skip;
    };
    if best == current {
        CandidateAction::Same
    } else if best > current {
        CandidateAction::Upgrade
    } else {
        CandidateAction::Downgrade
    }
}

/// Write new specs for every upgrade/downgrade; returns how many changed
pub fn apply_candidates(manifest: &mut Value, candidates: &[Candidate]) -> usize {
    let mut changed = 0;
    for candidate in candidates.iter().filter(|c| c.action.changes_manifest()) {
        let Some(new_spec) = &candidate.new_spec else {
            continue;
        };
        if let Some(entry) = manifest
            .get_mut(candidate.section.key())
            .and_then(Value::as_object_mut)
            .and_then(|table| table.get_mut(&candidate.name))
        {
            *entry = Value::String(new_spec.clone());
            changed += 1;
        }
    }
    changed
}

/// package.json text with two-space indentation and a trailing newline
pub fn render_manifest(manifest: &Value) -> Result<String> {
    Ok(serde_json::to_string_pretty(manifest)? + "\n")
}

/// Newest stable version satisfying every range
pub fn highest_satisfying(versions: &[String], ranges: &[String]) -> Option<String> {
    let requirements: Vec<Vec<VersionReq>> = ranges
        .iter()
        .map(|range| translate_range(range))
        .collect::<Option<_>>()?;

    let mut stable: Vec<Version> = versions
        .iter()
        .filter_map(|v| Version::parse(v.trim_start_matches('v')).ok())
        .filter(|v| v.pre.is_empty())
        .collect();
    stable.sort_unstable_by(|a, b| b.cmp(a));

    stable
        .into_iter()
        .find(|version| {
            requirements
                .iter()
                .all(|alternatives| alternatives.iter().any(|req| req.matches(version)))
        })
        .map(|version| version.to_string())
}

/// Translate an npm range into `||` alternatives of semver requirements.
///
/// Returns `None` for anything that is not a registry range (git URLs,
/// `file:` paths, dist-tags other than `latest`).
pub fn translate_range(range: &str) -> Option<Vec<VersionReq>> {
    range
        .split("||")
        .map(|set| translate_comparator_set(set.trim()))
        .collect()
}

fn translate_comparator_set(set: &str) -> Option<VersionReq> {
    if set.is_empty() || matches!(set, "*" | "x" | "X" | "latest") {
        return Some(VersionReq::STAR);
    }

    if let Some((low, high)) = set.split_once(" - ") {
        let low = low.trim().trim_start_matches('v');
        let high = high.trim().trim_start_matches('v');
        return VersionReq::parse(&format!(">={low}, <={high}")).ok();
    }

    let mut comparators = Vec::new();
    let mut pending_op = String::new();
    for token in set.split_whitespace() {
        if token.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^')) {
            pending_op.push_str(token);
            continue;
        }
        let op_len = token
            .find(|c: char| !matches!(c, '<' | '>' | '=' | '~' | '^'))
            .unwrap_or(token.len());
        let (op, version) = token.split_at(op_len);
        let op = format!("{pending_op}{op}");
        pending_op.clear();

        let version = version.trim_start_matches('v');
        if !version.starts_with(|c: char| c.is_ascii_digit()) {
            return None;
        }
        // A bare npm version is an exact match; cargo would read it as a caret
        let is_wildcard = version.contains(['x', 'X', '*']);
        let op = if op.is_empty() && !is_wildcard {
            "=".to_string()
        } else {
            op
        };
        comparators.push(format!("{op}{version}"));
    }

    if comparators.is_empty() {
        return None;
    }
    VersionReq::parse(&comparators.join(", ")).ok()
}

/// Leading `X[.Y[.Z]]` of a spec with any operator prefix removed, zero-padded
fn loose_version(spec: &str) -> Option<Version> {
    let start = spec.find(|c: char| c.is_ascii_digit())?;
    let core: String = spec[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let mut parts = core.split('.').filter(|part| !part.is_empty());
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().map_or(Some(0), |p| p.parse().ok())?;
    let patch = parts.next().map_or(Some(0), |p| p.parse().ok())?;
    Some(Version::new(major, minor, patch))
}
