pub mod archive;
pub mod git;
pub mod python;

#[cfg(test)]
pub mod tests {
    use std::env::{current_dir, set_current_dir};
    use std::fs::File;
    use std::io::Read;
    use std::path::{Path, PathBuf};

    use anyhow::Result;
    use log::debug;

    use crate::conf::SlipwayDeployConfig;

    pub fn serialize(conf: &SlipwayDeployConfig) -> Result<String> {
        Ok(serde_yaml::to_string(conf)?)
    }

    pub fn deserialize(s: &str) -> Result<SlipwayDeployConfig> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn get_sample_resource_file(p: &str) -> Result<String> {
        let mut s = String::new();
        let root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        let file_path = root.join("resources/tests").join(p);
        let mut f = File::open(file_path)?;
        let _count = f.read_to_string(&mut s);
        Ok(s)
    }

    pub fn with_dir<F>(path: &Path, f: F)
    where
        F: FnOnce(),
    {
        use lazy_static::lazy_static;
        use std::sync::Mutex;
        lazy_static! {
            static ref WITH_DIR_MUTEX: Mutex<u8> = Mutex::new(0u8);
        }
        let _lock = WITH_DIR_MUTEX
            .lock()
            .expect("Could not aquire lock in with_dir");
        let old_path = current_dir().expect("could not get current dir");
        debug!("path: {}", old_path.display());
        if path != old_path {
            let _ = set_current_dir(path);
            debug!("new path: {}", path.display());
        }
        f();
        if path != old_path {
            let _ = set_current_dir(&old_path);
            debug!("new path: {}", old_path.display());
        }
    }
}

/// Trims newlines (\r & \n) from the given string
/// ```rust
/// use slipway::utils::trim_newline;
/// let mut s = "hi!\n".to_string();
/// trim_newline(&mut s);
/// assert_eq!(s, "hi!");
/// ```
pub fn trim_newline(s: &mut String) {
    if s.ends_with('\n') {
        s.pop();
        if s.ends_with('\r') {
            s.pop();
        }
    }
}
