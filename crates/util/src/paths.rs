//! Resolution of user-configurable directories.

use std::{env, path::PathBuf};

use dirs_next::{config_dir, home_dir};

/// Expands a leading `~` segment to the user's home directory.
///
/// `~name` forms are left alone, as is everything when no home directory is known.
pub fn expand_tilde(path: &str) -> PathBuf {
    let trimmed = path.trim();
    match (trimmed.strip_prefix('~'), home_dir()) {
        (Some(""), Some(home)) => home,
        (Some(rest), Some(home)) if rest.starts_with(['/', '\\']) => home.join(rest.trim_start_matches(['/', '\\'])),
        _ => PathBuf::from(trimmed),
    }
}

/// Directory named by `env_var` when set and non-blank, else `<config dir>/<segments..>`.
pub fn env_or_config_dir(env_var: &str, segments: &[&str]) -> PathBuf {
    if let Ok(value) = env::var(env_var)
        && !value.trim().is_empty()
    {
        return expand_tilde(&value);
    }
    segments
        .iter()
        .fold(config_dir().unwrap_or_else(|| PathBuf::from(".")), |path, segment| path.join(segment))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_plain_paths_untouched() {
        assert_eq!(expand_tilde(" /tmp/stepwise "), PathBuf::from("/tmp/stepwise"));
        assert_eq!(expand_tilde("relative/dir"), PathBuf::from("relative/dir"));
        assert_eq!(expand_tilde("~someone/dir"), PathBuf::from("~someone/dir"));
    }

    #[test]
    fn expands_home_prefix() {
        if let Some(home) = home_dir() {
            assert_eq!(expand_tilde("~"), home);
            assert_eq!(expand_tilde("~/checkpoints"), home.join("checkpoints"));
        }
    }

    #[test]
    fn blank_override_falls_back_to_config_dir() {
        temp_env::with_var("STEPWISE_TEST_DIR", Some("   "), || {
            let resolved = env_or_config_dir("STEPWISE_TEST_DIR", &["stepwise", "data"]);
            assert!(resolved.ends_with("stepwise/data"));
        });
        temp_env::with_var("STEPWISE_TEST_DIR", Some("/srv/stepwise"), || {
            assert_eq!(env_or_config_dir("STEPWISE_TEST_DIR", &["ignored"]), PathBuf::from("/srv/stepwise"));
        });
    }
}
