//! Credential injection: the publish secret lives in the watcher's
//! environment, gets resolved right before the deploy stage, and never lands
//! in logs or files.

use std::env;

use anyhow::{Context, Result};

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::secrets::{mask, resolve};

    #[test]
    fn resolving_credentials() {
        std::env::set_var("SLIPWAY_SECRETS_TEST_CREDENTIAL", "deployer:hunter2");
        assert_eq!(
            resolve("SLIPWAY_SECRETS_TEST_CREDENTIAL").unwrap(),
            "deployer:hunter2"
        );
        assert!(resolve("SLIPWAY_SECRETS_TEST_UNSET").is_err());
    }

    #[test]
    fn masking_blots_out_every_occurrence() {
        let s = "auth hunter2 then\nhunter2 again";
        assert_eq!(mask(s, &["hunter2"]), "auth *** then\n*** again");
        assert_eq!(mask(s, &[]), s);
        assert_eq!(mask(s, &[""]), s);
    }
}

/// What a masked secret reads as
pub const MASK: &str = "***";

/// Reads a credential from the named environment variable. The value is
/// returned to the caller and nowhere else; anything captured downstream must
/// go through [mask] first.
pub fn resolve(env_name: &str) -> Result<String> {
    env::var(env_name).with_context(|| format!("credential variable {} is not set", env_name))
}

/// Blots out every occurrence of every given secret
pub fn mask(text: &str, secrets: &[&str]) -> String {
    let mut s = text.to_string();
    for secret in secrets {
        if secret.is_empty() {
            continue;
        }
        s = s.replace(secret, MASK);
    }
    s
}
