use std::env;
use std::fmt::{Display, Formatter};
use std::fs::File;
use std::mem::take;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use tempdir::TempDir;

use crate::conf::SlipwayDeployConfig;
use crate::utils::{archive, git, python};

pub mod conf;
pub mod deploy;
pub mod notifs;
pub mod secrets;
pub mod utils;

pub use crate::utils::git::Commit;

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempdir::TempDir;

    use crate::conf::{SlipwayDeployConfig, SlipwayRuntime, SlipwayTarget};
    use crate::utils::tests::with_dir;
    use crate::{
        execute_config, launch, repo_name_from_url, ExecutionContext, Stage, TriggerEvent,
    };
    use chrono::Utc;

    fn test_config(python: &str) -> SlipwayDeployConfig {
        SlipwayDeployConfig {
            target: SlipwayTarget {
                app: "word-mail-merge".to_string(),
                ..Default::default()
            },
            runtime: SlipwayRuntime {
                python: python.to_string(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn checkout_failure_halts_the_run() {
        let _ = pretty_env_logger::try_init();
        let r = launch("/definitely/not/a/repository", "main", TriggerEvent::Manual)
            .expect("launch should not hard-error on a bad repo");
        assert!(!r.success());
        assert_eq!(r.stage_results.len(), 1);
        assert_eq!(r.stage_results[0].stage, Stage::Checkout);
        assert_eq!(r.url, None);
    }

    #[test]
    fn provision_failure_halts_the_run() {
        let _ = pretty_env_logger::try_init();
        let conf = test_config("99.99");
        let r = execute_config(conf, ExecutionContext::default(), vec![], Utc::now())
            .expect("execute_config should not hard-error");
        assert!(!r.success());
        assert_eq!(r.stage_results.len(), 1);
        assert_eq!(r.stage_results[0].stage, Stage::Provision);
        assert!(!r.stage_results[0].success);
        assert_eq!(r.url, None);
    }

    #[test]
    fn later_stages_never_run_after_a_failure() {
        let _ = pretty_env_logger::try_init();
        let tmp = TempDir::new("slipway_halt").expect("could not create temp dir");
        with_dir(tmp.path(), || {
            // the manifest does not exist, so the run dies at Provision (no
            // matching interpreter) or at Install (missing manifest),
            // depending on what the host has installed
            let mut conf = test_config("3");
            conf.manifest = "does-not-exist.txt".to_string();
            let r = execute_config(conf, ExecutionContext::default(), vec![], Utc::now())
                .expect("execute_config should not hard-error");
            assert!(!r.success());
            assert!(r.stage_results.len() <= 2);
            assert!(!r.stage_results.last().unwrap().success);
            assert!(!r.stage_results.iter().any(|s| s.stage == Stage::Package));
            assert!(!r.stage_results.iter().any(|s| s.stage == Stage::Deploy));
            assert_eq!(r.url, None);
        });
    }

    #[test]
    fn repo_names_from_urls() {
        assert_eq!(
            repo_name_from_url("https://example.com/acme/word-mail-merge.git"),
            "word-mail-merge"
        );
        assert_eq!(
            repo_name_from_url("git@example.com:acme/word-mail-merge.git"),
            "word-mail-merge"
        );
        assert_eq!(
            repo_name_from_url("/srv/git/word-mail-merge/"),
            "word-mail-merge"
        );
        assert_eq!(repo_name_from_url("."), ".");
    }
}

/// Environment variables handed to the stages' child processes
pub type Env = std::collections::HashMap<String, String>;

/// Name of the deploy configuration looked up in the checked-out repository
pub const DEPLOY_CONFIG_FILE: &str = ".slipway.yml";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// What caused a pipeline run
pub enum TriggerEvent {
    /// A watched branch head moved
    Push,
    /// Someone asked for a run, no questions asked
    Manual,
}

impl Default for TriggerEvent {
    fn default() -> Self {
        TriggerEvent::Manual
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
/// The five pipeline stages, in execution order
pub enum Stage {
    Checkout,
    Provision,
    Install,
    Package,
    Deploy,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Stage::Checkout => "checkout",
            Stage::Provision => "provision",
            Stage::Install => "install",
            Stage::Package => "package",
            Stage::Deploy => "deploy",
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
/// Outcome of a single stage
pub struct StageResult {
    pub stage: Stage,
    pub success: bool,
    pub logs: Vec<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
/// Everything we know about the run besides its outcome
pub struct ExecutionContext {
    pub repo_name: String,
    pub repo_url: String,
    pub branch: String,
    #[serde(default)]
    pub trigger: TriggerEvent,
    pub commit: Commit,
}

#[derive(Serialize, Deserialize, Debug, Default)]
/// Outcome of a whole pipeline run. `url` is set iff every stage succeeded.
pub struct PipelineResult {
    pub stage_results: Vec<StageResult>,
    pub context: ExecutionContext,
    pub url: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl PipelineResult {
    /// A run succeeded if it executed at least one stage and none failed
    pub fn success(&self) -> bool {
        !self.stage_results.is_empty() && self.stage_results.iter().all(|r| r.success)
    }
}

/// Runs `f`, collecting its logs into a [StageResult] appended to `result`.
/// Returns whether the stage succeeded, so callers can stop the run.
fn record<F>(result: &mut PipelineResult, stage: Stage, f: F) -> bool
where
    F: FnOnce(&mut Vec<String>) -> Result<()>,
{
    info!("Running stage \"{}\"", stage);
    let start_date = Utc::now();
    let mut logs: Vec<String> = Vec::new();
    let success = match f(&mut logs) {
        Ok(()) => true,
        Err(e) => {
            error!("Stage \"{}\" failed: {:#}", stage, e);
            logs.push(format!("stage \"{}\" failed: {:#}", stage, e));
            false
        }
    };
    for l in &logs {
        debug!("  {}: {}", stage, l);
    }
    result.stage_results.push(StageResult {
        stage,
        success,
        logs,
        start_date,
        end_date: Utc::now(),
    });
    success
}

fn seal(mut result: PipelineResult) -> PipelineResult {
    result.end_date = Utc::now();
    result
}

/// Runs Provision → Install → Package → Deploy in the current directory,
/// halting at the first failure. `prior` carries the checkout stage's result
/// when called from [launch].
fn execute_config(
    conf: SlipwayDeployConfig,
    ctx: ExecutionContext,
    prior: Vec<StageResult>,
    started: DateTime<Utc>,
) -> Result<PipelineResult> {
    let mut result = PipelineResult {
        stage_results: prior,
        context: ctx,
        url: None,
        start_date: started,
        end_date: started,
    };

    let mut venv: Option<PathBuf> = None;
    let ok = record(&mut result, Stage::Provision, |logs| {
        let v = python::provision(&conf.runtime, &conf.env, logs)?;
        venv = Some(v);
        Ok(())
    });
    if !ok {
        return Ok(seal(result));
    }
    let venv = venv.expect("provision succeeded without a venv");

    let ok = record(&mut result, Stage::Install, |logs| {
        python::install_requirements(&venv, Path::new(&conf.manifest), &conf.env, logs)
    });
    if !ok {
        return Ok(seal(result));
    }

    let archive_path = PathBuf::from(format!(
        "slipway-{}-{}.zip",
        conf.target.app,
        archive::rng_suffix(4)
    ));
    let ok = record(&mut result, Stage::Package, |logs| {
        let excludes = conf.exclude_patterns()?;
        archive::pack_workdir(Path::new("."), &archive_path, &excludes, logs)
    });
    if !ok {
        return Ok(seal(result));
    }

    let mut url: Option<String> = None;
    let ok = record(&mut result, Stage::Deploy, |logs| {
        let u = deploy::deploy_archive(&conf.target, &archive_path, logs)?;
        url = Some(u);
        Ok(())
    });
    if ok {
        result.url = url;
        if let Some(u) = &result.url {
            info!("Deployed {} to {}", result.context.repo_name, u);
        }
    }
    Ok(seal(result))
}

fn read_deploy_config(path: &Path) -> Result<SlipwayDeployConfig> {
    let f = File::open(path).with_context(|| format!("could not open {}", path.display()))?;
    serde_yaml::from_reader(f).with_context(|| format!("could not parse {}", path.display()))
}

pub(crate) fn repo_name_from_url(uri: &str) -> String {
    let tail = uri.trim_end_matches('/');
    let tail = tail.rsplit(['/', ':']).next().unwrap_or(tail);
    tail.trim_end_matches(".git").to_string()
}

/// One pipeline run, from trigger to final status.
///
/// Clones `repo_url` at `branch` into an ephemeral directory, reads the
/// repository's `.slipway.yml` and runs the remaining stages there. Stage
/// failures are reported through the returned [PipelineResult]; `Err` is
/// reserved for the harness itself breaking (no temp dir, cwd gone, …).
pub fn launch(repo_url: &str, branch: &str, trigger: TriggerEvent) -> Result<PipelineResult> {
    let started = Utc::now();
    let root = TempDir::new("slipway_run")?;
    let ctx = ExecutionContext {
        repo_name: repo_name_from_url(repo_url),
        repo_url: repo_url.to_string(),
        branch: branch.to_string(),
        trigger,
        commit: Commit::default(),
    };

    let mut logs: Vec<String> = Vec::new();
    if let Err(e) = git::clone_with_branch_and_path(repo_url, branch, root.path()) {
        error!("could not check out {}#{}: {:#}", repo_url, branch, e);
        logs.push(format!("checkout failed: {:#}", e));
        return Ok(PipelineResult {
            stage_results: vec![StageResult {
                stage: Stage::Checkout,
                success: false,
                logs,
                start_date: started,
                end_date: Utc::now(),
            }],
            context: ctx,
            url: None,
            start_date: started,
            end_date: Utc::now(),
        });
    }
    logs.push(format!("checked out {}#{}", repo_url, branch));

    let old_path = env::current_dir()?;
    env::set_current_dir(root.path())?;
    let r = run_in_checkout(ctx, logs, started);
    env::set_current_dir(old_path)?;
    r
}

/// The part of [launch] that runs with the checkout as current directory
fn run_in_checkout(
    mut ctx: ExecutionContext,
    mut logs: Vec<String>,
    started: DateTime<Utc>,
) -> Result<PipelineResult> {
    match git::get_commit("HEAD") {
        Ok(c) => {
            logs.push(format!("HEAD is at {}", c.hash));
            ctx.commit = c;
        }
        Err(e) => debug!("could not read HEAD commit: {:#}", e),
    }
    let checkout_end = Utc::now();
    match read_deploy_config(Path::new(DEPLOY_CONFIG_FILE)) {
        Ok(conf) => {
            let checkout = StageResult {
                stage: Stage::Checkout,
                success: true,
                logs: take(&mut logs),
                start_date: started,
                end_date: checkout_end,
            };
            execute_config(conf, ctx, vec![checkout], started)
        }
        Err(e) => {
            error!("{:#}", e);
            logs.push(format!("{:#}", e));
            Ok(PipelineResult {
                stage_results: vec![StageResult {
                    stage: Stage::Checkout,
                    success: false,
                    logs,
                    start_date: started,
                    end_date: Utc::now(),
                }],
                context: ctx,
                url: None,
                start_date: started,
                end_date: Utc::now(),
            })
        }
    }
}
