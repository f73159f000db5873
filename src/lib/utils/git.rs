use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::process::Command;

/// all utility functions git-related
use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use log::{debug, error};
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref REF_PATTERN: Regex = Regex::new(r"([0-9a-fA-F]+)[ \t]+refs/heads/(\S+)")
        .expect("could not compile pattern");
    static ref COMMIT_PERSON_PATTERN: Regex =
        Regex::new(r"([A-Za-z\-_ ]+) <([a-z0-9_\-\.\+]+@[a-z0-9\.\-_]+)> ([0-9]+ (\+|\-)[0-9]{4})")
            .expect("could not compile pattern");
}


#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CommitPerson {
    pub name: String,
    pub email: String,
    pub date: DateTime<Utc>,
}

impl CommitPerson {
    /// (email, display name) pair, the shape mail builders want
    pub fn to_addr(&self) -> (String, String) {
        (self.email.clone(), self.name.clone())
    }
}

impl From<&str> for CommitPerson {
    fn from(s: &str) -> Self {
        let matches = COMMIT_PERSON_PATTERN.captures(s);
        if let Some(matches) = matches {
            let dt = match DateTime::parse_from_str(&matches[3], "%s %z") {
                Ok(dt) => dt.with_timezone(&Utc),
                Err(_) => return CommitPerson::default(),
            };
            return CommitPerson {
                name: matches[1].to_string(),
                email: matches[2].to_string(),
                date: dt,
            };
        }
        CommitPerson::default()
    }
}

impl Display for CommitPerson {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <{}> {}", self.name, self.email, self.date.to_rfc3339())
    }
}

impl Default for CommitPerson {
    fn default() -> Self {
        CommitPerson {
            name: "".to_string(),
            email: "".to_string(),
            date: Utc.timestamp_opt(0, 0).single().unwrap_or_default(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct Commit {
    pub hash: String,
    pub author: CommitPerson,
    pub committer: CommitPerson,
    pub message: String,
    pub tree: String,
    pub parents: Vec<String>,
}

pub(crate) fn parse_raw_commit(raw: &str) -> Result<Commit> {
    let mut c = Commit::default();
    let mut in_message = false;
    let mut in_gpg_sig = false;
    for line in raw.lines() {
        if let Some(msg) = line.strip_prefix("    ") {
            in_message = true;
            c.message.push_str(msg);
            continue;
        }
        if line.is_empty() {
            if in_message {
                c.message.push('\n');
            }
            continue;
        }
        if in_gpg_sig && line.starts_with(' ') {
            continue;
        }
        let tokens = line.split_whitespace().collect::<Vec<&str>>();
        if tokens.len() < 2 {
            return Err(anyhow!("unexpected commit header line: {:?}", line));
        }
        match tokens[0] {
            "commit" => c.hash = tokens[1].to_string(),
            "tree" => c.tree = tokens[1].to_string(),
            "parent" => c.parents.push(tokens[1].to_string()),
            "author" => c.author = CommitPerson::from(tokens[1..].join(" ").as_str()),
            "committer" => c.committer = CommitPerson::from(tokens[1..].join(" ").as_str()),
            "gpgsig" => in_gpg_sig = true,
            _ => {}
        };
    }
    Ok(c)
}

/// Reads the commit the given reference points at, in the current directory
pub fn get_commit(reference: &str) -> Result<Commit> {
    let out = Command::new("git")
        .args(["log", "-n", "1", "--format=raw", reference])
        .output()?;
    if !out.status.success() {
        return Err(anyhow!("Could not read commit {}", reference));
    }
    parse_raw_commit(&String::from_utf8_lossy(&out.stdout))
}

/// Lists the branch heads the remote advertises, as a branch → hash map
/// ```no_run
/// # use slipway::utils::git::fetch;
/// let res = fetch("https://example.com/acme/word-mail-merge.git").expect("could not list remote");
/// assert!(res.contains_key("main"));
/// ```
pub fn fetch(uri: &str) -> Result<HashMap<String, String>> {
    debug!("Running git ls-remote --heads {}", uri);
    let o = Command::new("git")
        .arg("ls-remote")
        .arg("--heads")
        .arg(uri)
        .output()?;
    if !o.status.success() {
        error!("failed to run git ls-remote --heads {}", uri);
        return Err(anyhow!("failed to run git ls-remote --heads {}", uri));
    }

    Ok(String::from_utf8(o.stdout)?
        .lines()
        .filter_map(|line| REF_PATTERN.captures(line))
        .map(|capture| (capture[2].to_string(), capture[1].to_string()))
        .collect())
}

/// Clones `repo_url` into `to`, then checks out `branch` there
pub fn clone_with_branch_and_path(repo_url: &str, branch: &str, to: &Path) -> Result<()> {
    let output = Command::new("git")
        .args([
            "clone",
            repo_url,
            to.to_str().expect("Could not convert from path to str"),
        ])
        .output()?;
    if !output.status.success() {
        error!("could not git clone {}", repo_url);
        return Err(anyhow!(
            "Could not git clone {}: {}",
            repo_url,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    let output = Command::new("git")
        .args([
            &format!("--git-dir={}/.git", to.display()),
            &format!("--work-tree={}", to.display()),
            "checkout",
            branch,
        ])
        .output()?;
    if !output.status.success() {
        error!("Could not checkout {}", branch);
        return Err(anyhow!(
            "Could not checkout {}: {}",
            branch,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(())
}
