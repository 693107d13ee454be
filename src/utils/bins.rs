use std::{
    env,
    path::{Path, PathBuf},
};

use anyhow::{Result, bail};

/// Fail early when a required external binary is not installed, rather
/// than mid-job with a cryptic spawn error.
pub fn ensure_bins<'a, I>(bins: I) -> Result<()>
where
    I: IntoIterator<Item = &'a str>,
{
    let missing: Vec<&str> = bins.into_iter().filter(|b| which(b).is_none()).collect();
    if missing.is_empty() {
        Ok(())
    } else {
        bail!("missing required binaries in PATH: {}", missing.join(", "))
    }
}

pub fn which(bin: &str) -> Option<PathBuf> {
    let direct = Path::new(bin);
    if direct.is_absolute() {
        return executable(direct).then(|| direct.to_path_buf());
    }
    env::split_paths(&env::var_os("PATH")?)
        .map(|dir| dir.join(bin))
        .find(|cand| executable(cand))
}

fn executable(p: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(p)
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        p.is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_bin_is_reported_by_name() {
        let err = ensure_bins(["definitely-not-a-real-binary-xyz"])
            .unwrap_err()
            .to_string();
        assert!(err.contains("definitely-not-a-real-binary-xyz"));
    }

    #[test]
    fn sh_is_found() {
        assert!(ensure_bins(["sh"]).is_ok());
    }
}
