//! Mount point validation and option handling.

use std::path::Path;

use thiserror::Error;

/// Mount options for the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountOptions {
    /// Allow other users to access.
    pub allow_other: bool,
    /// Allow root to access.
    pub allow_root: bool,
    /// Use default permissions.
    pub default_permissions: bool,
    /// Auto unmount on exit.
    pub auto_unmount: bool,
    /// Read-only mount.
    pub ro: bool,
}

impl Default for MountOptions {
    fn default() -> Self {
        MountOptions {
            allow_other: false,
            allow_root: false,
            default_permissions: false,
            auto_unmount: true,
            ro: false,
        }
    }
}

/// Errors from mount setup.
#[derive(Debug, Error)]
pub enum MountError {
    /// Path does not exist.
    #[error("Path not found: {0}")]
    PathNotFound(String),

    /// Path is not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(String),

    /// Invalid option.
    #[error("Invalid option: {0}")]
    InvalidOption(String),
}

/// Validate a mountpoint path.
pub fn validate_mountpoint(path: &Path) -> Result<(), MountError> {
    if !path.exists() {
        return Err(MountError::PathNotFound(path.display().to_string()));
    }

    if !path.is_dir() {
        return Err(MountError::NotADirectory(path.display().to_string()));
    }

    Ok(())
}

/// Parse mount options from a comma-separated string.
///
/// Valid options: allow_other, allow_root, default_permissions,
/// auto_unmount, ro, rw.
pub fn parse_mount_options(opts_str: &str) -> Result<MountOptions, MountError> {
    let mut options = MountOptions::default();

    if opts_str.is_empty() {
        return Ok(options);
    }

    for opt in opts_str.split(',') {
        let opt = opt.trim();
        match opt {
            "allow_other" => options.allow_other = true,
            "allow_root" => options.allow_root = true,
            "default_permissions" => options.default_permissions = true,
            "auto_unmount" => options.auto_unmount = true,
            "ro" => options.ro = true,
            "rw" => options.ro = false,
            "" => {}
            _ => {
                return Err(MountError::InvalidOption(opt.to_string()));
            }
        }
    }

    Ok(options)
}

/// Convert [`MountOptions`] to the fuser option vec.
pub fn options_to_fuser(opts: &MountOptions) -> Vec<fuser::MountOption> {
    let mut fuser_opts = vec![fuser::MountOption::FSName("casfs".to_string())];

    if opts.allow_other {
        fuser_opts.push(fuser::MountOption::AllowOther);
    }

    if opts.allow_root {
        fuser_opts.push(fuser::MountOption::AllowRoot);
    }

    if opts.default_permissions {
        fuser_opts.push(fuser::MountOption::DefaultPermissions);
    }

    if opts.auto_unmount {
        fuser_opts.push(fuser::MountOption::AutoUnmount);
    }

    if opts.ro {
        fuser_opts.push(fuser::MountOption::RO);
    }

    fuser_opts
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_default_options_have_expected_values() {
        let opts = MountOptions::default();
        assert!(!opts.allow_other);
        assert!(!opts.allow_root);
        assert!(!opts.default_permissions);
        assert!(opts.auto_unmount);
        assert!(!opts.ro);
    }

    #[test]
    fn test_parse_mount_options_allow_other_and_ro() {
        let opts = parse_mount_options("allow_other,ro").unwrap();
        assert!(opts.allow_other);
        assert!(opts.ro);
    }

    #[test]
    fn test_parse_mount_options_unknown_returns_error() {
        let result = parse_mount_options("unknown");
        assert!(matches!(result, Err(MountError::InvalidOption(_))));
    }

    #[test]
    fn test_parse_mount_options_empty_returns_default() {
        let opts = parse_mount_options("").unwrap();
        assert_eq!(opts, MountOptions::default());
    }

    #[test]
    fn test_parse_mount_options_ro_rw() {
        let opts = parse_mount_options("ro").unwrap();
        assert!(opts.ro);

        let opts = parse_mount_options("rw").unwrap();
        assert!(!opts.ro);
    }

    #[test]
    fn test_parse_mount_options_with_spaces() {
        let opts = parse_mount_options("allow_other, ro ").unwrap();
        assert!(opts.allow_other);
        assert!(opts.ro);
    }

    #[test]
    fn test_validate_mountpoint_with_nonexistent_path() {
        let result = validate_mountpoint(Path::new("/nonexistent_path_12345"));
        assert!(matches!(result, Err(MountError::PathNotFound(_))));
    }

    #[test]
    fn test_validate_mountpoint_with_file_not_dir() {
        let temp_dir = std::env::temp_dir();
        let temp_file = temp_dir.join("casfs_test_file.txt");

        fs::write(&temp_file, "test").ok();

        let result = validate_mountpoint(&temp_file);

        fs::remove_file(&temp_file).ok();

        assert!(matches!(result, Err(MountError::NotADirectory(_))));
    }

    #[test]
    fn test_options_to_fuser_carries_fs_name() {
        let fuser_opts = options_to_fuser(&MountOptions::default());
        assert!(fuser_opts
            .iter()
            .any(|o| matches!(o, fuser::MountOption::FSName(n) if n == "casfs")));
        assert!(fuser_opts
            .iter()
            .any(|o| matches!(o, fuser::MountOption::AutoUnmount)));
    }

    #[test]
    fn test_options_to_fuser_includes_selected() {
        let opts = MountOptions {
            allow_other: true,
            allow_root: true,
            default_permissions: true,
            auto_unmount: false,
            ro: true,
        };
        let fuser_opts = options_to_fuser(&opts);
        assert!(fuser_opts
            .iter()
            .any(|o| matches!(o, fuser::MountOption::AllowOther)));
        assert!(fuser_opts
            .iter()
            .any(|o| matches!(o, fuser::MountOption::AllowRoot)));
        assert!(fuser_opts
            .iter()
            .any(|o| matches!(o, fuser::MountOption::DefaultPermissions)));
        assert!(fuser_opts
            .iter()
            .any(|o| matches!(o, fuser::MountOption::RO)));
        assert!(!fuser_opts
            .iter()
            .any(|o| matches!(o, fuser::MountOption::AutoUnmount)));
    }
}
