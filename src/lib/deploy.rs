use std::fs;
use std::path::Path;
use std::time::Duration;

/// Deployment dispatch: ship the artifact to the hosting slot, report the URL
use anyhow::{anyhow, Context, Result};
use log::{debug, info};

use crate::conf::SlipwayTarget;
use crate::secrets;


/// Slot publishes can sit behind slow platform plumbing
const DEPLOY_TIMEOUT: Duration = Duration::from_secs(600);

fn host_prefix(target: &SlipwayTarget) -> String {
    if target.slot == "production" {
        target.app.clone()
    } else {
        format!("{}-{}", target.app, target.slot)
    }
}

/// The public URL a successful deployment is reachable at. Pure function of
/// the target, so re-deploying the same commit lands at the same address.
pub fn site_url(target: &SlipwayTarget) -> String {
    format!("https://{}.{}", host_prefix(target), target.domain)
}

/// Where the archive gets POSTed; the `endpoint` override wins
pub fn publish_endpoint(target: &SlipwayTarget) -> String {
    match &target.endpoint {
        Some(e) => e.clone(),
        None => format!(
            "https://{}.scm.{}/api/zipdeploy",
            host_prefix(target),
            target.domain
        ),
    }
}

/// Publish profiles come as `user:password`; the password may itself carry
/// colons
pub(crate) fn split_credential(credential: &str) -> Result<(&str, &str)> {
    credential
        .split_once(':')
        .ok_or_else(|| anyhow!("credential must look like user:password"))
}

/// Uploads the archive to the target's hosting slot and returns the site URL.
/// The credential is resolved here, used for the one request, and masked out
/// of everything that could end up in front of eyes.
pub fn deploy_archive(
    target: &SlipwayTarget,
    archive: &Path,
    logs: &mut Vec<String>,
) -> Result<String> {
    let credential = secrets::resolve(&target.credential_env)?;
    let (user, password) = split_credential(&credential)?;
    let bytes = fs::read(archive)
        .with_context(|| format!("could not read artifact {}", archive.display()))?;
    let endpoint = publish_endpoint(target);
    logs.push(secrets::mask(
        &format!("publishing {} bytes to {}", bytes.len(), endpoint),
        &[credential.as_str(), password],
    ));
    debug!("POST {} ({} bytes)", endpoint, bytes.len());

    let client = reqwest::blocking::Client::builder()
        .timeout(DEPLOY_TIMEOUT)
        .build()?;
    let resp = client
        .post(&endpoint)
        .basic_auth(user, Some(password))
        .header("content-type", "application/zip")
        .body(bytes)
        .send()
        .with_context(|| format!("could not reach {}", endpoint))?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().unwrap_or_default();
        return Err(anyhow!(
            "publish rejected with {}: {}",
            status,
            secrets::mask(body.trim(), &[credential.as_str(), password])
        ));
    }
    logs.push(format!("publish accepted with {}", status));
    let url = site_url(target);
    info!("artifact published, site at {}", url);
    Ok(url)
}
