// SPDX-License-Identifier: GPL-3.0-or-later
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::info;

const MAGNETS_FILE: &str = "not_wanted_magnets.txt";
const URLS_FILE: &str = "not_wanted_urls.txt";

/// The two on-disk rejection sets consulted before anything reaches the
/// debrid provider: magnet infohashes and release URLs. One entry per line;
/// writes go through a temp file and rename so a crash never truncates a
/// set. The mutex covers the whole read-modify-write.
pub struct NotWantedSets {
    dir: PathBuf,
    inner: Mutex<Inner>,
}

struct Inner {
    magnets: HashSet<String>,
    urls: HashSet<String>,
}

impl NotWantedSets {
    pub fn load(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let magnets = read_set(&dir.join(MAGNETS_FILE))?;
        let urls = read_set(&dir.join(URLS_FILE))?;
        info!(target: "not_wanted", magnets = magnets.len(), urls = urls.len(), "loaded rejection sets");
        Ok(Self {
            dir,
            inner: Mutex::new(Inner { magnets, urls }),
        })
    }

    pub fn contains_magnet(&self, hash: &str) -> bool {
        let inner = self.inner.lock().expect("not-wanted lock poisoned");
        inner.magnets.contains(&hash.to_lowercase())
    }

    pub fn contains_url(&self, url: &str) -> bool {
        let inner = self.inner.lock().expect("not-wanted lock poisoned");
        inner.urls.contains(url)
    }

    pub fn add_magnet(&self, hash: &str) -> io::Result<()> {
        let mut inner = self.inner.lock().expect("not-wanted lock poisoned");
        if inner.magnets.insert(hash.to_lowercase()) {
            write_set(&self.dir.join(MAGNETS_FILE), &inner.magnets)?;
        }
        Ok(())
    }

    pub fn add_url(&self, url: &str) -> io::Result<()> {
        let mut inner = self.inner.lock().expect("not-wanted lock poisoned");
        if inner.urls.insert(url.to_string()) {
            write_set(&self.dir.join(URLS_FILE), &inner.urls)?;
        }
        Ok(())
    }

    /// Startup policy: forget everything rejected in previous runs so a
    /// fresh run can reconsider releases that failed transiently.
    pub fn purge(&self) -> io::Result<()> {
        let mut inner = self.inner.lock().expect("not-wanted lock poisoned");
        let dropped = inner.magnets.len() + inner.urls.len();
        inner.magnets.clear();
        inner.urls.clear();
        write_set(&self.dir.join(MAGNETS_FILE), &inner.magnets)?;
        write_set(&self.dir.join(URLS_FILE), &inner.urls)?;
        info!(target: "not_wanted", dropped, "purged rejection sets");
        Ok(())
    }

    pub fn counts(&self) -> (usize, usize) {
        let inner = self.inner.lock().expect("not-wanted lock poisoned");
        (inner.magnets.len(), inner.urls.len())
    }
}

fn read_set(path: &Path) -> io::Result<HashSet<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(HashSet::new()),
        Err(e) => Err(e),
    }
}

fn write_set(path: &Path, set: &HashSet<String>) -> io::Result<()> {
    let mut lines: Vec<&str> = set.iter().map(String::as_str).collect();
    lines.sort_unstable();
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, lines.join("\n"))?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn persists_across_reload() {
        let dir = tempdir().expect("tempdir");

        let sets = NotWantedSets::load(dir.path()).expect("load");
        sets.add_magnet("ABCDEF0123456789ABCDEF0123456789ABCDEF01")
            .expect("add magnet");
        sets.add_url("https://indexer.example/release/1").expect("add url");

        let reloaded = NotWantedSets::load(dir.path()).expect("reload");
        assert!(reloaded.contains_magnet("abcdef0123456789abcdef0123456789abcdef01"));
        assert!(reloaded.contains_url("https://indexer.example/release/1"));
        assert_eq!(reloaded.counts(), (1, 1));
    }

    #[test]
    fn magnet_lookup_is_case_insensitive() {
        let dir = tempdir().expect("tempdir");
        let sets = NotWantedSets::load(dir.path()).expect("load");

        sets.add_magnet("AAAA0123456789ABCDEF0123456789ABCDEF0101")
            .expect("add");
        assert!(sets.contains_magnet("aaaa0123456789abcdef0123456789abcdef0101"));
        assert!(sets.contains_magnet("AAAA0123456789ABCDEF0123456789ABCDEF0101"));
    }

    #[test]
    fn purge_empties_both_sets_on_disk() {
        let dir = tempdir().expect("tempdir");
        let sets = NotWantedSets::load(dir.path()).expect("load");
        sets.add_magnet("aaaa0123456789abcdef0123456789abcdef0101")
            .expect("add");
        sets.add_url("https://x.example/1").expect("add");

        sets.purge().expect("purge");
        assert_eq!(sets.counts(), (0, 0));

        let reloaded = NotWantedSets::load(dir.path()).expect("reload");
        assert_eq!(reloaded.counts(), (0, 0));
    }

    #[test]
    fn missing_files_load_as_empty() {
        let dir = tempdir().expect("tempdir");
        let sets = NotWantedSets::load(dir.path()).expect("load");
        assert_eq!(sets.counts(), (0, 0));
    }
}
