use std::{
    fmt,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use config as cfg;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::volume::FsKind;

/// Default name filter: scratch and swap datasets are never worth
/// shipping to the backup destination.
const DEFAULT_EXCLUDE_RE: &str = "tmp|swap";

#[derive(Debug, Clone)]
pub struct Config {
    pub job: Job,
    pub destination: Destination,
    pub source: Source,
}

#[derive(Debug, Clone)]
pub struct Job {
    /// Directory layer on the destination: `{mountpoint}/{name}/…`.
    pub name: String,
    pub exclude_re: Option<Regex>,
    pub exclude_re_src: Option<String>,
}

impl Job {
    /// Whether a volume name passes the exclude filter.
    pub fn allows(&self, name: &str) -> bool {
        self.exclude_re
            .as_ref()
            .map(|re| !re.is_match(name))
            .unwrap_or(true)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Destination {
    pub device: Option<String>,
    pub mountpoint: Option<PathBuf>,
    pub options: Option<String>,
}

/// Destination with CLI overrides applied; everything required is present.
#[derive(Debug, Clone)]
pub struct ResolvedDestination {
    pub device: String,
    pub mountpoint: PathBuf,
    pub options: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Source {
    Zfs { pools: Vec<String> },
    Btrfs { root: PathBuf },
}

impl Source {
    #[inline]
    pub fn kind(&self) -> FsKind {
        match self {
            Source::Zfs { .. } => FsKind::Zfs,
            Source::Btrfs { .. } => FsKind::Btrfs,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Zfs { pools } => write!(f, "zfs(pools={})", pools.join(",")),
            Source::Btrfs { root } => write!(f, "btrfs(root={})", root.display()),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw: RawConfig = cfg::Config::builder()
            .add_source(cfg::File::from(path))
            .build()
            .with_context(|| format!("load {}", path.display()))?
            .try_deserialize()
            .with_context(|| format!("deserialize {}", path.display()))?;

        let n = config_helpers::Normalizer;
        let raw_job = raw.job.unwrap_or_default();

        let name = n
            .trim_opt(raw_job.name)
            .unwrap_or_else(|| format!("backup_{}", n.hostname()));
        if !Self::valid_name(&name) {
            bail!("bad job name '{}': use [A-Za-z0-9_-], length 1..32", name);
        }

        let exclude_re_src = match raw_job.exclude_re {
            // absent -> the default filter; set-but-empty -> no filter
            None => Some(DEFAULT_EXCLUDE_RE.to_string()),
            Some(s) => {
                let t = s.trim().to_string();
                (!t.is_empty()).then_some(t)
            }
        };
        let exclude_re = match &exclude_re_src {
            Some(s) => {
                Some(Regex::new(s).with_context(|| format!("bad job.exclude_re: {s}"))?)
            }
            None => None,
        };

        let destination = Destination {
            device: n.trim_opt(raw.destination.device),
            mountpoint: n.trim_opt(raw.destination.mountpoint).map(PathBuf::from),
            options: n.trim_opt(raw.destination.options),
        };

        let source = match (raw.source.zfs, raw.source.btrfs) {
            (Some(_), Some(_)) => {
                bail!("configure exactly one of [source.zfs] and [source.btrfs], not both")
            }
            (None, None) => bail!("configure one of [source.zfs] or [source.btrfs]"),
            (Some(z), None) => {
                let pools = n.dedup(z.pools);
                if pools.is_empty() {
                    bail!("source.zfs.pools must not be empty");
                }
                Source::Zfs { pools }
            }
            (None, Some(b)) => {
                let root = n
                    .trim_opt(b.root)
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/"));
                Source::Btrfs { root }
            }
        };

        Ok(Self {
            job: Job {
                name,
                exclude_re,
                exclude_re_src,
            },
            destination,
            source,
        })
    }

    /// Destination settings with CLI values taking precedence.
    pub fn resolve_destination(
        &self,
        device: Option<String>,
        mountpoint: Option<PathBuf>,
        options: Option<String>,
    ) -> Result<ResolvedDestination> {
        let device = device
            .or_else(|| self.destination.device.clone())
            .context("no backup device; pass --device or set [destination].device")?;
        let mountpoint = mountpoint
            .or_else(|| self.destination.mountpoint.clone())
            .context("no mountpoint; pass --mountpoint or set [destination].mountpoint")?;
        let options = options.or_else(|| self.destination.options.clone());
        Ok(ResolvedDestination {
            device,
            mountpoint,
            options,
        })
    }

    #[inline]
    fn valid_name(name: &str) -> bool {
        (1..=32).contains(&name.len())
            && name
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    }

    pub fn to_toml(&self) -> Result<String> {
        #[derive(Serialize)]
        struct JobOut<'a> {
            name: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            exclude_re: Option<&'a str>,
        }
        #[derive(Serialize)]
        struct DestinationOut<'a> {
            #[serde(skip_serializing_if = "Option::is_none")]
            device: Option<&'a str>,
            #[serde(skip_serializing_if = "Option::is_none")]
            mountpoint: Option<String>,
            #[serde(skip_serializing_if = "Option::is_none")]
            options: Option<&'a str>,
        }
        #[derive(Serialize)]
        struct ZfsOut<'a> {
            pools: &'a [String],
        }
        #[derive(Serialize)]
        struct BtrfsOut {
            root: String,
        }
        #[derive(Serialize, Default)]
        struct SourceOut<'a> {
            #[serde(skip_serializing_if = "Option::is_none")]
            zfs: Option<ZfsOut<'a>>,
            #[serde(skip_serializing_if = "Option::is_none")]
            btrfs: Option<BtrfsOut>,
        }
        #[derive(Serialize)]
        struct Out<'a> {
            job: JobOut<'a>,
            destination: DestinationOut<'a>,
            source: SourceOut<'a>,
        }

        let mut source = SourceOut::default();
        match &self.source {
            Source::Zfs { pools } => source.zfs = Some(ZfsOut { pools }),
            Source::Btrfs { root } => {
                source.btrfs = Some(BtrfsOut {
                    root: root.display().to_string(),
                })
            }
        }

        let out = Out {
            job: JobOut {
                name: &self.job.name,
                exclude_re: self.job.exclude_re_src.as_deref(),
            },
            destination: DestinationOut {
                device: self.destination.device.as_deref(),
                mountpoint: self
                    .destination
                    .mountpoint
                    .as_ref()
                    .map(|p| p.display().to_string()),
                options: self.destination.options.as_deref(),
            },
            source,
        };
        Ok(toml::to_string_pretty(&out)?)
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    job: Option<RawJob>,

    #[serde(default)]
    destination: RawDestination,

    #[serde(default)]
    source: RawSource,
}

#[derive(Debug, Deserialize, Default)]
struct RawJob {
    name: Option<String>,
    exclude_re: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawDestination {
    device: Option<String>,
    mountpoint: Option<String>,
    options: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RawSource {
    #[serde(default)]
    zfs: Option<RawZfs>,
    #[serde(default)]
    btrfs: Option<RawBtrfs>,
}

#[derive(Debug, Deserialize)]
struct RawZfs {
    pools: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawBtrfs {
    root: Option<String>,
}

mod config_helpers {
    use std::{collections::HashSet, process::Command};

    pub(super) struct Normalizer;

    impl Normalizer {
        #[inline]
        pub fn trim_opt(&self, s: Option<String>) -> Option<String> {
            s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
        }

        pub fn hostname(&self) -> String {
            Command::new("hostname")
                .output()
                .ok()
                .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "host".into())
        }

        pub fn dedup(&self, items: Vec<String>) -> Vec<String> {
            let mut seen = HashSet::new();
            let mut out = Vec::new();
            for s in items
                .into_iter()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
            {
                if seen.insert(s.clone()) {
                    out.push(s);
                }
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    fn write(path: &Path, s: &str) {
        fs::write(path, s).unwrap();
    }

    #[test]
    fn load_minimal_zfs() {
        let tmp = TempDir::new().unwrap();
        let cfg_path = tmp.path().join("config.toml");
        write(
            &cfg_path,
            r#"
[job]
name = "backup_macmini"

[destination]
device = "lacie-d2.local:/srv/Files"
mountpoint = "/mnt"

[source.zfs]
pools = ["tank", "tank", " "]
"#,
        );

        let cfg = Config::load(&cfg_path).unwrap();
        assert_eq!(cfg.job.name, "backup_macmini");
        assert_eq!(cfg.source.kind(), FsKind::Zfs);
        match &cfg.source {
            Source::Zfs { pools } => assert_eq!(pools, &vec!["tank".to_string()]),
            other => panic!("unexpected source {other}"),
        }
        // default exclusion filter applies when nothing is configured
        assert!(!cfg.job.allows("tank/tmp"));
        assert!(!cfg.job.allows("tank/swap0"));
        assert!(cfg.job.allows("tank/data"));
    }

    #[test]
    fn both_sources_rejected() {
        let tmp = TempDir::new().unwrap();
        let cfg_path = tmp.path().join("config.toml");
        write(
            &cfg_path,
            r#"
[job]
name = "j"

[source.zfs]
pools = ["tank"]

[source.btrfs]
root = "/"
"#,
        );
        let err = Config::load(&cfg_path).unwrap_err().to_string();
        assert!(err.contains("exactly one"), "err was: {err}");
    }

    #[test]
    fn missing_source_rejected() {
        let tmp = TempDir::new().unwrap();
        let cfg_path = tmp.path().join("config.toml");
        write(&cfg_path, "[job]\nname = \"j\"\n");
        assert!(Config::load(&cfg_path).is_err());
    }

    #[test]
    fn btrfs_root_defaults_to_slash() {
        let tmp = TempDir::new().unwrap();
        let cfg_path = tmp.path().join("config.toml");
        write(&cfg_path, "[job]\nname = \"j\"\n\n[source.btrfs]\n");
        let cfg = Config::load(&cfg_path).unwrap();
        match &cfg.source {
            Source::Btrfs { root } => assert_eq!(root, &PathBuf::from("/")),
            other => panic!("unexpected source {other}"),
        }
    }

    #[test]
    fn destination_cli_overrides_win() {
        let tmp = TempDir::new().unwrap();
        let cfg_path = tmp.path().join("config.toml");
        write(
            &cfg_path,
            r#"
[job]
name = "j"

[destination]
device = "nas:/srv/a"
mountpoint = "/mnt"

[source.zfs]
pools = ["tank"]
"#,
        );
        let cfg = Config::load(&cfg_path).unwrap();

        let d = cfg
            .resolve_destination(Some("nas:/srv/b".into()), None, Some("ro".into()))
            .unwrap();
        assert_eq!(d.device, "nas:/srv/b");
        assert_eq!(d.mountpoint, PathBuf::from("/mnt"));
        assert_eq!(d.options.as_deref(), Some("ro"));
    }

    #[test]
    fn destination_required_somewhere() {
        let tmp = TempDir::new().unwrap();
        let cfg_path = tmp.path().join("config.toml");
        write(&cfg_path, "[job]\nname = \"j\"\n\n[source.zfs]\npools = [\"t\"]\n");
        let cfg = Config::load(&cfg_path).unwrap();
        assert!(cfg.resolve_destination(None, None, None).is_err());
    }

    #[test]
    fn print_config_roundtrips_sections() {
        let tmp = TempDir::new().unwrap();
        let cfg_path = tmp.path().join("config.toml");
        write(
            &cfg_path,
            r#"
[job]
name = "j"

[destination]
device = "nas:/srv/a"
mountpoint = "/mnt"

[source.zfs]
pools = ["tank"]
"#,
        );
        let cfg = Config::load(&cfg_path).unwrap();
        let printed = cfg.to_toml().unwrap();
        assert!(printed.contains("[job]"));
        assert!(printed.contains("[source.zfs]"));
        assert!(printed.contains("pools = [\"tank\"]"));
    }
}
