use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Locating a pinned python, building the venv, installing the manifest
use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

use crate::conf::SlipwayRuntime;
use crate::utils::trim_newline;
use crate::Env;

lazy_static! {
    static ref VERSION_PATTERN: Regex =
        Regex::new(r"Python ([0-9]+(?:\.[0-9]+)*)").expect("could not compile pattern");
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use pretty_assertions::assert_eq;
    use tempdir::TempDir;

    use crate::conf::SlipwayRuntime;
    use crate::utils::python::{
        candidates, find_interpreter, install_requirements, parse_version, provision,
        version_matches,
    };
    use crate::utils::tests::with_dir;
    use crate::Env;

    #[test]
    fn version_parsing() {
        assert_eq!(parse_version("Python 3.9.18"), Some("3.9.18".to_string()));
        assert_eq!(parse_version("Python 3.13.0rc2"), Some("3.13.0".to_string()));
        assert_eq!(parse_version("not a python"), None);
    }

    #[test]
    fn version_matching_is_segment_wise() {
        assert!(version_matches("3.9.18", "3.9"));
        assert!(version_matches("3.9.18", "3"));
        assert!(version_matches("3.9.18", "3.9.18"));
        assert!(!version_matches("3.19.1", "3.9"));
        assert!(!version_matches("2.7.18", "3"));
        assert!(!version_matches("3.9", "3.9.18"));
    }

    #[test]
    fn candidate_binaries() {
        assert_eq!(candidates("3.9"), vec!["python3.9", "python3", "python"]);
        assert_eq!(candidates("3"), vec!["python3", "python"]);
    }

    #[test]
    fn unobtainable_interpreter() {
        let _ = pretty_env_logger::try_init();
        assert!(find_interpreter("99.99").is_err());
    }

    #[test]
    #[ignore] // needs a python3 with the venv module on the host
    fn provision_and_install() {
        let _ = pretty_env_logger::try_init();
        let tmp = TempDir::new("slipway_venv").expect("could not create temp dir");
        with_dir(tmp.path(), || {
            let runtime = SlipwayRuntime {
                python: "3".to_string(),
            };
            let mut logs = Vec::new();
            let venv = provision(&runtime, &Env::new(), &mut logs).expect("could not provision");
            let _ = File::create("requirements.txt").expect("could not write manifest");
            install_requirements(
                &venv,
                std::path::Path::new("requirements.txt"),
                &Env::new(),
                &mut logs,
            )
            .expect("could not install an empty manifest");
        });
    }
}

/// Where the virtual environment lands inside the checkout
pub(crate) const VENV_DIR: &str = ".venv";

pub(crate) fn parse_version(s: &str) -> Option<String> {
    VERSION_PATTERN.captures(s).map(|c| c[1].to_string())
}

/// `"3.9"` accepts `3.9.18` but neither `3.19.1` nor a bare `3.9` pin against
/// a shorter reported version
pub(crate) fn version_matches(found: &str, pinned: &str) -> bool {
    let found: Vec<&str> = found.split('.').collect();
    pinned
        .split('.')
        .enumerate()
        .all(|(i, p)| found.get(i) == Some(&p))
}

pub(crate) fn candidates(pinned: &str) -> Vec<String> {
    let mut v = vec![format!("python{}", pinned)];
    if let Some(major) = pinned.split('.').next() {
        if major != pinned {
            v.push(format!("python{}", major));
        }
    }
    for fallback in ["python3", "python"] {
        if !v.iter().any(|c| c == fallback) {
            v.push(fallback.to_string());
        }
    }
    v
}

/// Asks `bin --version` and extracts the version number. Python 2 printed it
/// on stderr, so both streams are checked.
pub fn interpreter_version(bin: &str) -> Result<String> {
    let out = Command::new(bin).arg("--version").output()?;
    let mut s = String::from_utf8_lossy(&out.stdout).to_string();
    if s.trim().is_empty() {
        s = String::from_utf8_lossy(&out.stderr).to_string();
    }
    trim_newline(&mut s);
    parse_version(&s).ok_or_else(|| anyhow!("could not parse a python version from {:?}", s))
}

/// Walks the candidate binaries and returns the first whose reported version
/// matches the pin
pub fn find_interpreter(pinned: &str) -> Result<String> {
    for candidate in candidates(pinned) {
        match interpreter_version(&candidate) {
            Ok(v) if version_matches(&v, pinned) => {
                debug!("{} is {}, matches {}", candidate, v, pinned);
                return Ok(candidate);
            }
            Ok(v) => debug!("{} is {}, want {}", candidate, v, pinned),
            Err(e) => debug!("no {}: {:#}", candidate, e),
        }
    }
    Err(anyhow!(
        "no python interpreter matching {:?} on this machine",
        pinned
    ))
}

/// Captures a finished child's streams into the stage logs: one log entry
/// per stream, line-by-line at debug
fn push_output(output: &Output, logs: &mut Vec<String>) {
    if !output.stdout.is_empty() {
        let s = String::from_utf8_lossy(&output.stdout);
        for l in s.lines() {
            debug!("    stdout: {}", l);
        }
        logs.push(s.to_string());
    }
    if !output.stderr.is_empty() {
        let s = String::from_utf8_lossy(&output.stderr);
        for l in s.lines() {
            debug!("    stderr: {}", l);
        }
        logs.push(s.to_string());
    }
}

/// Provisions the pinned runtime in the current directory: finds a matching
/// interpreter and creates `.venv` with it. Returns the venv path.
pub fn provision(runtime: &SlipwayRuntime, env: &Env, logs: &mut Vec<String>) -> Result<PathBuf> {
    let python = find_interpreter(&runtime.python)?;
    let version = interpreter_version(&python)?;
    logs.push(format!("using {} ({})", python, version));
    debug!("Running {} -m venv {}", python, VENV_DIR);
    let output = Command::new(&python)
        .args(["-m", "venv", VENV_DIR])
        .envs(env)
        .output()?;
    push_output(&output, logs);
    if !output.status.success() {
        return Err(anyhow!("{} could not create {}", python, VENV_DIR));
    }
    logs.push(format!("created virtual environment in {}", VENV_DIR));
    Ok(PathBuf::from(VENV_DIR))
}

pub(crate) fn venv_bin(venv: &Path, name: &str) -> PathBuf {
    venv.join("bin").join(name)
}

/// Installs the dependency manifest into the venv with its own pip
pub fn install_requirements(
    venv: &Path,
    manifest: &Path,
    env: &Env,
    logs: &mut Vec<String>,
) -> Result<()> {
    if !manifest.is_file() {
        return Err(anyhow!(
            "dependency manifest {} not found",
            manifest.display()
        ));
    }
    let pip = venv_bin(venv, "pip");
    debug!("Running {} install -r {}", pip.display(), manifest.display());
    let output = Command::new(&pip)
        .args(["install", "--disable-pip-version-check", "-r"])
        .arg(manifest)
        .envs(env)
        .output()?;
    push_output(&output, logs);
    if !output.status.success() {
        return Err(anyhow!("pip install failed for {}", manifest.display()));
    }
    logs.push(format!("installed {}", manifest.display()));
    Ok(())
}
