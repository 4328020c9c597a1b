//! Repository configuration (`.wit/config`): a small INI-like `[section]` /
//! `key=value` grammar, hand-rolled rather than pulled in via a parser
//! crate, scoped to a single file for a single repository.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write as _;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::Error;
use crate::object_id::HashAlgorithm;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoreConfig {
    pub bare: bool,
}

/// A remote object store endpoint (spec §4.2: the object store is
/// pluggable behind a second, network-backed implementation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub endpoint: String,
    /// Directory (relative to `.wit`) the remote backend caches objects in.
    pub cache_dir: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            cache_dir: "remote_cache".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum BackendKind {
    #[default]
    Local,
    Remote(RemoteConfig),
}

#[derive(Debug, Clone)]
pub struct RepoConfig {
    /// Set once at `init` and never changed afterward (spec §3.1, §9 open
    /// question resolution).
    pub hash_algorithm: HashAlgorithm,
    pub core: CoreConfig,
    /// Which `StorageBackend` to construct; defaults to the local
    /// filesystem backend when no `[remote]` section is present.
    pub backend: BackendKind,
    /// Any keys not recognized by this crate, preserved verbatim so a
    /// round-trip through `load`/`save` does not silently drop them.
    raw_sections: BTreeMap<String, Vec<(String, String)>>,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            hash_algorithm: HashAlgorithm::default(),
            core: CoreConfig::default(),
            backend: BackendKind::default(),
            raw_sections: BTreeMap::new(),
        }
    }
}

impl RepoConfig {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(Error::Other(e)),
        };
        Self::parse(&text)
    }

    fn parse(text: &str) -> Result<Self, Error> {
        let mut config = Self::default();
        let mut section = String::new();
        let mut remote = RemoteConfig::default();
        let mut saw_remote = false;
        for (lineno, raw_line) in text.lines().enumerate() {
            let line = raw_line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                section = name.trim().to_owned();
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(Error::MalformedObject(
                    None,
                    format!("malformed config line {}: {raw_line:?}", lineno + 1),
                ));
            };
            let key = key.trim().to_owned();
            let value = value.trim().to_owned();
            match (section.as_str(), key.as_str()) {
                ("wit", "hashAlgorithm") => {
                    config.hash_algorithm = HashAlgorithm::parse(&value).ok_or_else(|| {
                        Error::MalformedObject(None, format!("unknown hash algorithm {value:?}"))
                    })?;
                }
                ("core", "bare") => {
                    config.core.bare = value == "true";
                }
                ("remote", "endpoint") => {
                    saw_remote = true;
                    remote.endpoint = value;
                }
                ("remote", "cacheDir") => {
                    saw_remote = true;
                    remote.cache_dir = value;
                }
                _ => {
                    config
                        .raw_sections
                        .entry(section.clone())
                        .or_default()
                        .push((key, value));
                }
            }
        }
        if saw_remote {
            config.backend = BackendKind::Remote(remote);
        }
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let mut out = String::new();
        out.push_str("[core]\n");
        out.push_str(&format!("\tbare = {}\n", self.core.bare));
        for (key, value) in self.raw_sections.get("core").into_iter().flatten() {
            out.push_str(&format!("\t{key} = {value}\n"));
        }
        out.push_str("[wit]\n");
        out.push_str(&format!("\thashAlgorithm = {}\n", self.hash_algorithm.as_str()));
        for (key, value) in self.raw_sections.get("wit").into_iter().flatten() {
            out.push_str(&format!("\t{key} = {value}\n"));
        }
        if let BackendKind::Remote(remote) = &self.backend {
            out.push_str("[remote]\n");
            out.push_str(&format!("\tendpoint = {}\n", remote.endpoint));
            out.push_str(&format!("\tcacheDir = {}\n", remote.cache_dir));
        }
        for (section, entries) in &self.raw_sections {
            if section == "core" || section == "wit" || section == "remote" {
                continue;
            }
            out.push_str(&format!("[{section}]\n"));
            for (key, value) in entries {
                out.push_str(&format!("\t{key} = {value}\n"));
            }
        }
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(out.as_bytes())?;
        temp.as_file().sync_data()?;
        temp.persist(path).map_err(|e| Error::Other(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RepoConfig::load(&dir.path().join("config")).unwrap();
        assert_eq!(config.hash_algorithm, HashAlgorithm::Sha256);
    }

    #[test]
    fn parses_hash_algorithm_and_core_bare() {
        let config = RepoConfig::parse("[core]\n\tbare = true\n[wit]\n\thashAlgorithm = sha1\n").unwrap();
        assert_eq!(config.hash_algorithm, HashAlgorithm::Sha1);
        assert!(config.core.bare);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        let mut config = RepoConfig::default();
        config.hash_algorithm = HashAlgorithm::Sha1;
        config.core.bare = true;
        config.save(&path).unwrap();
        let reloaded = RepoConfig::load(&path).unwrap();
        assert_eq!(reloaded.hash_algorithm, HashAlgorithm::Sha1);
        assert!(reloaded.core.bare);
    }

    #[test]
    fn rejects_malformed_line() {
        let err = RepoConfig::parse("[core]\nnotakeyvalue\n").unwrap_err();
        assert!(matches!(err, Error::MalformedObject(_, _)));
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let config = RepoConfig::parse("# a comment\n\n[wit]\n\thashAlgorithm = sha256 # trailing\n").unwrap();
        assert_eq!(config.hash_algorithm, HashAlgorithm::Sha256);
    }

    #[test]
    fn no_remote_section_selects_local_backend() {
        let config = RepoConfig::parse("[core]\n\tbare = false\n").unwrap();
        assert_eq!(config.backend, BackendKind::Local);
    }

    #[test]
    fn remote_section_selects_remote_backend_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        let mut config = RepoConfig::default();
        config.backend = BackendKind::Remote(RemoteConfig {
            endpoint: "https://objects.example.test".to_owned(),
            cache_dir: "remote_cache".to_owned(),
        });
        config.save(&path).unwrap();
        let reloaded = RepoConfig::load(&path).unwrap();
        assert_eq!(
            reloaded.backend,
            BackendKind::Remote(RemoteConfig {
                endpoint: "https://objects.example.test".to_owned(),
                cache_dir: "remote_cache".to_owned(),
            })
        );
    }
}
