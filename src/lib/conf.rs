//! Defines what makes for a valid configuration, on both sides of the fence:
//! the `.slipway.yml` a deployed repository carries, and the `slipway.toml`
//! driving the watcher binary.

use std::collections::HashMap;
use std::fs::{create_dir_all, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::Pattern;
use log::{debug, error};
use serde::{Deserialize, Serialize};

use crate::notifs::Notifier;
use crate::utils::git;
use crate::Env;

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::conf::{Repository, SlipwayBinaryConfig};
    use crate::utils::tests::{deserialize, get_sample_resource_file};

    #[test]
    fn basic_config() {
        let s = get_sample_resource_file("basic_config.yml").expect("could not find basic_config");
        let c = deserialize(&s).expect("could not deserialize basic config");
        assert_eq!(c.target.app, "word-mail-merge");
        assert_eq!(c.target.slot, "production");
        assert_eq!(c.target.domain, "azurewebsites.net");
        assert_eq!(c.target.credential_env, "SLIPWAY_PUBLISH_CREDENTIAL");
        assert_eq!(c.target.endpoint, None);
        assert_eq!(c.runtime.python, "3");
        assert_eq!(c.manifest, "requirements.txt");
        assert!(c.exclude.is_empty());
        assert!(c.env.is_empty());
    }

    #[test]
    fn full_config() {
        let s = get_sample_resource_file("full_config.yml").expect("could not find full_config");
        let c = deserialize(&s).expect("could not deserialize full config");
        assert_eq!(c.target.slot, "staging");
        assert_eq!(c.target.credential_env, "WMM_PUBLISH_CREDENTIAL");
        assert_eq!(
            c.target.endpoint,
            Some("http://localhost:8111/api/zipdeploy".to_string())
        );
        assert_eq!(c.runtime.python, "3.9");
        assert_eq!(c.exclude, vec!["*.pyc".to_string(), "tests".to_string()]);
        assert_eq!(
            c.env.get("PIP_DISABLE_PIP_VERSION_CHECK"),
            Some(&"1".to_string())
        );
    }

    #[test]
    fn exclude_patterns_carry_the_builtins() {
        let s = get_sample_resource_file("full_config.yml").expect("could not find full_config");
        let c = deserialize(&s).expect("could not deserialize full config");
        let pats = c.exclude_patterns().expect("could not compile excludes");
        assert!(pats.iter().any(|p| p.matches(".git")));
        assert!(pats.iter().any(|p| p.matches(".venv")));
        assert!(pats.iter().any(|p| p.matches("__pycache__")));
        assert!(pats.iter().any(|p| p.matches("precompiled.pyc")));
    }

    #[test]
    fn bad_exclude_pattern_is_an_error() {
        let s = "target:\n  app: demo\nexclude:\n  - \"[\"\n";
        let c = deserialize(s).expect("could not deserialize config");
        assert!(c.exclude_patterns().is_err());
    }

    #[cfg(feature = "mails")]
    #[test]
    fn binary_config() {
        let s = get_sample_resource_file("binary_config.toml")
            .expect("could not find binary_config");
        let c: SlipwayBinaryConfig = toml::from_str(&s).expect("could not parse binary config");
        assert_eq!(c.watch_interval, 120);
        assert_eq!(c.state_dir, ".slipway");
        assert_eq!(c.repositories.len(), 1);
        let r = &c.repositories[0];
        assert_eq!(r.name, "word-mail-merge");
        assert_eq!(r.branches, vec!["main".to_string()]);
        assert!(r.notifiers.is_some());
    }

    #[test]
    fn branch_globs() {
        let r = Repository {
            name: "demo".to_string(),
            uri: ".".to_string(),
            branches: vec!["main".to_string(), "release/*".to_string()],
            notifiers: None,
            heads: Default::default(),
        };
        assert!(r.wants_branch("main"));
        assert!(r.wants_branch("release/1.2"));
        assert!(!r.wants_branch("feature/shiny"));
    }
}

/// Paths never shipped in an artifact, whatever the repository says
pub const BUILTIN_EXCLUDES: &[&str] = &[".git", ".venv", "__pycache__"];

fn default_slot() -> String {
    "production".to_string()
}

fn default_domain() -> String {
    "azurewebsites.net".to_string()
}

fn default_credential_env() -> String {
    "SLIPWAY_PUBLISH_CREDENTIAL".to_string()
}

fn default_python() -> String {
    "3".to_string()
}

fn default_manifest() -> String {
    "requirements.txt".to_string()
}

fn default_branches() -> Vec<String> {
    vec!["main".to_string()]
}

fn default_watch_interval() -> u32 {
    60
}

fn default_state_dir() -> String {
    ".slipway".to_string()
}

#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Clone)]
/// Where the artifact goes. Serializes to:
/// ```yaml
/// app: word-mail-merge      # the hosting application's name
/// slot: staging             # hosting slot, defaults to "production"
/// domain: azurewebsites.net # platform domain the app lives under
/// credential_env: WMM_PUBLISH_CREDENTIAL  # env var holding "user:password"
/// endpoint: "https://deploy.example.org/api/zipdeploy"  # optional override
/// ```
pub struct SlipwayTarget {
    /// Name of the hosting application
    pub app: String,
    #[serde(default = "default_slot")]
    /// Named hosting slot to publish to
    pub slot: String,
    #[serde(default = "default_domain")]
    /// Base domain of the hosting platform
    pub domain: String,
    #[serde(default = "default_credential_env")]
    /// Name of the environment variable holding the publish credential
    pub credential_env: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Full publish endpoint, overriding the one derived from app/slot/domain
    pub endpoint: Option<String>,
}

impl Default for SlipwayTarget {
    fn default() -> Self {
        SlipwayTarget {
            app: String::new(),
            slot: default_slot(),
            domain: default_domain(),
            credential_env: default_credential_env(),
            endpoint: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Eq, PartialEq, Clone)]
/// The language runtime the application needs
pub struct SlipwayRuntime {
    #[serde(default = "default_python")]
    /// Pinned interpreter version, matched by prefix: "3.9" accepts 3.9.18
    pub python: String,
}

impl Default for SlipwayRuntime {
    fn default() -> Self {
        SlipwayRuntime {
            python: default_python(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Eq, PartialEq)]
/// Represents an entire `.slipway.yml`
pub struct SlipwayDeployConfig {
    /// Deployment target identifiers
    pub target: SlipwayTarget,
    #[serde(default)]
    /// Runtime to provision. Defaults to any python 3
    pub runtime: SlipwayRuntime,
    #[serde(default = "default_manifest")]
    /// Path of the dependency manifest, relative to the repository root
    pub manifest: String,
    #[serde(default)]
    /// Extra glob patterns excluded from the artifact, on top of the built-ins
    pub exclude: Vec<String>,
    #[serde(default)]
    /// Environment passed to the provisioning and install stages
    pub env: Env,
}

impl Default for SlipwayDeployConfig {
    fn default() -> Self {
        SlipwayDeployConfig {
            target: SlipwayTarget::default(),
            runtime: SlipwayRuntime::default(),
            manifest: default_manifest(),
            exclude: Vec::new(),
            env: Env::new(),
        }
    }
}

impl SlipwayDeployConfig {
    /// Compiles the built-in exclusions plus the repository's own into glob
    /// patterns, erroring out on the first invalid one
    pub fn exclude_patterns(&self) -> Result<Vec<Pattern>> {
        BUILTIN_EXCLUDES
            .iter()
            .copied()
            .chain(self.exclude.iter().map(String::as_str))
            .map(|p| Pattern::new(p).with_context(|| format!("invalid exclude pattern {:?}", p)))
            .collect()
    }
}

#[derive(Serialize, Deserialize, Debug)]
/// A repository the watcher polls for pushes
pub struct Repository {
    /// Display name, also names the persisted state file
    pub name: String,
    /// Anything `git clone` accepts
    pub uri: String,
    #[serde(default = "default_branches")]
    /// Glob patterns of the branches worth deploying
    pub branches: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    /// Who to tell about finished runs
    pub notifiers: Option<Vec<Notifier>>,
    #[serde(skip)]
    /// Last seen branch heads, kept across polls
    pub heads: HashMap<String, String>,
}

impl Repository {
    fn state_file(&self, state_dir: &Path) -> PathBuf {
        state_dir.join(format!("{}.json", self.name))
    }

    /// Loads the persisted branch heads, falling back to the remote's current
    /// ones so a fresh watcher does not redeploy everything it sees
    pub fn init(&mut self, state_dir: &Path) {
        match File::open(self.state_file(state_dir)) {
            Ok(f) => match serde_json::from_reader(f) {
                Ok(heads) => {
                    self.heads = heads;
                    return;
                }
                Err(e) => debug!("could not parse state for {}: {}", self.name, e),
            },
            Err(e) => debug!("no persisted state for {}: {}", self.name, e),
        }
        match git::fetch(&self.uri) {
            Ok(heads) => self.heads = heads,
            Err(e) => error!("could not list heads of {}: {:#}", self.name, e),
        }
    }

    /// Fetches the remote's advertised heads and returns the branches whose
    /// head moved since the last call
    pub fn update_branches(&mut self) -> Result<HashMap<String, String>> {
        let remote = git::fetch(&self.uri)?;
        let mut changes = HashMap::new();
        for (branch, hash) in &remote {
            if self.heads.get(branch) != Some(hash) {
                changes.insert(branch.clone(), hash.clone());
            }
        }
        self.heads = remote;
        Ok(changes)
    }

    /// Whether a branch matches any of the configured branch globs
    pub fn wants_branch(&self, branch: &str) -> bool {
        self.branches
            .iter()
            .filter_map(|p| Pattern::new(p).ok())
            .any(|p| p.matches(branch))
    }

    /// Writes the currently known branch heads under `state_dir`
    pub fn persist(&self, state_dir: &Path) -> Result<()> {
        create_dir_all(state_dir)
            .with_context(|| format!("could not create {}", state_dir.display()))?;
        let f = File::create(self.state_file(state_dir))?;
        serde_json::to_writer(f, &self.heads)?;
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug)]
/// Represents the watcher's own `slipway.toml`
pub struct SlipwayBinaryConfig {
    #[serde(default = "default_watch_interval")]
    /// Seconds between two polls of the watched repositories
    pub watch_interval: u32,
    #[serde(default = "default_state_dir")]
    /// Where branch-head state lands between runs
    pub state_dir: String,
    #[serde(default)]
    /// The repositories to poll
    pub repositories: Vec<Repository>,
}
