use std::fs::File;
use std::path::Path;

/// Artifact packaging: the working tree goes into one zip, exclusions stay out
use anyhow::{anyhow, Context, Result};
use glob::Pattern;
use log::debug;
use rand::Rng;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;


pub(crate) const NAME_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// A short random archive-name suffix, so two runs never fight over a file
pub(crate) fn rng_suffix(n: u8) -> String {
    let mut rng = rand::thread_rng();
    (0..n)
        .map(|_| {
            let idx = rng.gen_range(0..NAME_CHARSET.len());
            NAME_CHARSET[idx] as char
        })
        .collect()
}

/// A path is excluded if the whole relative path or any single component
/// matches one of the patterns. `.git` prunes the directory, `*.pyc` prunes
/// by file name wherever it sits.
pub(crate) fn is_excluded(rel: &str, excludes: &[Pattern]) -> bool {
    excludes
        .iter()
        .any(|p| p.matches(rel) || rel.split('/').any(|comp| p.matches(comp)))
}

/// Compresses `src_dir` into `dest_zip`, skipping excluded paths and the
/// archive itself
pub fn pack_workdir(
    src_dir: &Path,
    dest_zip: &Path,
    excludes: &[Pattern],
    logs: &mut Vec<String>,
) -> Result<()> {
    let file = File::create(dest_zip)
        .with_context(|| format!("could not create {}", dest_zip.display()))?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default();

    let mut files: u64 = 0;
    let mut bytes: u64 = 0;
    for entry in WalkDir::new(src_dir).follow_links(false) {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        let rel = path.strip_prefix(src_dir).unwrap_or(path);
        if path == dest_zip || rel == dest_zip {
            continue;
        }
        let name = rel.to_string_lossy().replace('\\', "/");
        if is_excluded(&name, excludes) {
            debug!("excluding {}", name);
            continue;
        }
        zip.start_file(name, options)?;
        let mut f = File::open(path)?;
        bytes += std::io::copy(&mut f, &mut zip)?;
        files += 1;
    }
    let _ = zip.finish()?;
    if files == 0 {
        return Err(anyhow!("nothing to package in {}", src_dir.display()));
    }
    logs.push(format!(
        "packaged {} files ({} bytes) into {}",
        files,
        bytes,
        dest_zip.display()
    ));
    Ok(())
}
