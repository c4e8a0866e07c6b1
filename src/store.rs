//! On-disk cache of downloaded artifacts.
//!
//! Each artifact is stored as `<dir>/<name>` with its detached signature, if
//! any, in `<dir>/<name>.sig`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::Error;

/// Raw artifact bytes plus the detached signature that authenticates them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub data: Vec<u8>,
    pub signature: Option<Vec<u8>>,
}

impl Artifact {
    pub fn new(data: Vec<u8>, signature: Option<Vec<u8>>) -> Self {
        Self { data, signature }
    }

    pub fn signed(data: Vec<u8>, signature: Vec<u8>) -> Self {
        Self::new(data, Some(signature))
    }

    pub fn unsigned(data: Vec<u8>) -> Self {
        Self::new(data, None)
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn signature_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.sig", name))
    }

    /// Read a cached artifact. A missing data file is a cache miss, not an
    /// error; a missing signature file leaves `signature` empty.
    pub fn read(&self, name: &str) -> Result<Option<Artifact>, Error> {
        let data = match read_optional(&self.path_for(name))? {
            Some(data) => data,
            None => return Ok(None),
        };
        let signature = read_optional(&self.signature_path(name))?;
        Ok(Some(Artifact { data, signature }))
    }

    /// Persist an artifact. Each file is written to a temporary sibling and
    /// renamed into place. A stale signature file is removed when the new
    /// artifact carries none.
    pub fn write(&self, name: &str, artifact: &Artifact) -> Result<(), Error> {
        std::fs::create_dir_all(&self.dir)?;

        let sig_path = self.signature_path(name);
        match &artifact.signature {
            Some(signature) => write_atomic(&sig_path, signature)?,
            None => match std::fs::remove_file(&sig_path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            },
        }
        write_atomic(&self.path_for(name), &artifact.data)?;
        log::debug!("Cached artifact {} in {}", name, self.dir.display());
        Ok(())
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, Error> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io(e)),
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_artifact_is_cache_miss() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert_eq!(store.read("at_trustlist").unwrap(), None);
    }

    #[test]
    fn test_write_then_read_signed() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join("data"));
        let artifact = Artifact::signed(b"list".to_vec(), b"sig".to_vec());

        store.write("at_trustlist", &artifact).unwrap();
        assert_eq!(store.read("at_trustlist").unwrap(), Some(artifact));
        assert!(dir.path().join("data/at_trustlist.sig").exists());
        assert!(!dir.path().join("data/at_trustlist.tmp").exists());
    }

    #[test]
    fn test_missing_signature_file() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        std::fs::write(dir.path().join("at_trustlist"), b"list").unwrap();

        let artifact = store.read("at_trustlist").unwrap().unwrap();
        assert_eq!(artifact.data, b"list");
        assert_eq!(artifact.signature, None);
    }

    #[test]
    fn test_unsigned_write_removes_stale_signature() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        store
            .write("de.json", &Artifact::signed(b"a".to_vec(), b"s".to_vec()))
            .unwrap();
        store
            .write("de.json", &Artifact::unsigned(b"b".to_vec()))
            .unwrap();

        assert_eq!(
            store.read("de.json").unwrap(),
            Some(Artifact::unsigned(b"b".to_vec()))
        );
    }
}
