//! Copying fillings into the staging root.

use anyhow::{bail, Context, Result};
use serde_json::Number;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;
use walkdir::WalkDir;

/// Two-digit prefix for a run priority, or `None` if it is not an integer
/// of one or two digits.
///
/// `3` becomes `03`, `42` stays `42`, `100` and `-1` have no prefix.
pub fn priority_prefix(priority: &Number) -> Option<String> {
    let value = priority.as_u64()?;
    let digits = value.to_string();
    match digits.len() {
        1 | 2 => Some(format!("{:02}", value)),
        _ => None,
    }
}

/// Staged directory name: `{prefix}-{name}`.
pub fn staged_name(prefix: &str, name: &str) -> String {
    format!("{}-{}", prefix, name)
}

/// Recursively copy `src` to `dst`. `dst` must not exist yet.
///
/// Symlinks are recreated rather than followed; permissions are kept.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    if dst.exists() {
        bail!("{} already exists", dst.display());
    }

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to walk {}", src.display()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("{} escaped {}", entry.path().display(), src.display()))?;
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
            let perms = entry.metadata()?.permissions();
            fs::set_permissions(&target, perms)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())
                .with_context(|| format!("Failed to read link {}", entry.path().display()))?;
            symlink(&link, &target)
                .with_context(|| format!("Failed to create link {}", target.display()))?;
        } else {
            fs::copy(entry.path(), &target).with_context(|| {
                format!(
                    "Failed to copy {} to {}",
                    entry.path().display(),
                    target.display()
                )
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn num(v: serde_json::Value) -> Number {
        match v {
            serde_json::Value::Number(n) => n,
            other => panic!("not a number: {}", other),
        }
    }

    #[test]
    fn test_single_digit_is_padded() {
        for p in 0..=9u64 {
            assert_eq!(priority_prefix(&Number::from(p)), Some(format!("0{}", p)));
        }
    }

    #[test]
    fn test_two_digits_pass_through() {
        assert_eq!(priority_prefix(&Number::from(10u64)).as_deref(), Some("10"));
        assert_eq!(priority_prefix(&Number::from(42u64)).as_deref(), Some("42"));
        assert_eq!(priority_prefix(&Number::from(99u64)).as_deref(), Some("99"));
    }

    #[test]
    fn test_out_of_range_has_no_prefix() {
        assert_eq!(priority_prefix(&Number::from(100u64)), None);
        assert_eq!(priority_prefix(&Number::from(1234u64)), None);
        assert_eq!(priority_prefix(&Number::from(-5i64)), None);
        assert_eq!(priority_prefix(&num(serde_json::json!(3.5))), None);
    }

    #[test]
    fn test_staged_name() {
        assert_eq!(staged_name("03", "wifi"), "03-wifi");
    }

    #[test]
    fn test_copy_tree() {
        let temp = tempfile::TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("files/etc")).unwrap();
        fs::write(src.join("00-run.sh"), "#!/bin/bash\necho hi\n").unwrap();
        fs::set_permissions(src.join("00-run.sh"), fs::Permissions::from_mode(0o755)).unwrap();
        fs::write(src.join("files/etc/motd"), "welcome\n").unwrap();
        symlink("etc/motd", src.join("files/motd")).unwrap();

        let dst = temp.path().join("stage/00-base");
        copy_tree(&src, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("files/etc/motd")).unwrap(), "welcome\n");
        let mode = fs::metadata(dst.join("00-run.sh")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(
            fs::read_link(dst.join("files/motd")).unwrap(),
            Path::new("etc/motd")
        );
    }

    #[test]
    fn test_copy_tree_refuses_existing_target() {
        let temp = tempfile::TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir(&src).unwrap();
        assert!(copy_tree(&src, temp.path()).is_err());
    }
}
