//! Content stamps for `watch`-guarded commands.
//!
//! After a watched command succeeds, the blake3 digest of its watched files
//! is recorded. The command is converged while the digest is unchanged.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Digest the given files. Directories are walked in name order; missing
/// paths hash to a fixed marker.
pub fn digest(paths: &[PathBuf]) -> io::Result<String> {
    let mut hasher = blake3::Hasher::new();
    for path in paths {
        update(&mut hasher, path)?;
    }
    Ok(hasher.finalize().to_hex().to_string())
}

fn update(hasher: &mut blake3::Hasher, path: &Path) -> io::Result<()> {
    hasher.update(path.to_string_lossy().as_bytes());
    hasher.update(&[0]);

    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            hasher.update(b"<missing>");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    if metadata.is_dir() {
        let mut entries = fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<Vec<_>>>()?;
        entries.sort();
        hasher.update(b"<dir>");
        for entry in entries {
            update(hasher, &entry)?;
        }
        return Ok(());
    }

    let content = fs::read(path)?;
    hasher.update(&(content.len() as u64).to_le_bytes());
    hasher.update(&content);
    Ok(())
}

/// Stamp files under a state directory, one per resource id.
#[derive(Debug, Clone)]
pub struct StampStore {
    dir: PathBuf,
}

impl StampStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, id: &str) -> PathBuf {
        let safe: String = id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.b3"))
    }

    pub fn read(&self, id: &str) -> Option<String> {
        fs::read_to_string(self.path(id))
            .ok()
            .map(|s| s.trim().to_string())
    }

    pub fn write(&self, id: &str, digest: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path(id), format!("{digest}\n"))
    }

    /// Whether the recorded stamp matches the current digest.
    pub fn matches(&self, id: &str, current: &str) -> bool {
        self.read(id).is_some_and(|recorded| recorded == current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_changes_with_content() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("requirements.txt");
        fs::write(&file, "Django==1.8\n").unwrap();
        let first = digest(&[file.clone()]).unwrap();

        assert_eq!(first, digest(&[file.clone()]).unwrap());

        fs::write(&file, "Django==1.9\n").unwrap();
        assert_ne!(first, digest(&[file]).unwrap());
    }

    #[test]
    fn test_digest_of_missing_file() {
        let missing = PathBuf::from("/nonexistent/requirements.txt");
        assert_eq!(digest(&[missing.clone()]).unwrap(), digest(&[missing]).unwrap());
    }

    #[test]
    fn test_digest_walks_directories() {
        let dir = tempfile::tempdir().unwrap();
        let migrations = dir.path().join("migrations");
        fs::create_dir(&migrations).unwrap();
        fs::write(migrations.join("0001_initial.py"), "operations = []\n").unwrap();
        let first = digest(&[migrations.clone()]).unwrap();
        assert_eq!(first, digest(&[migrations.clone()]).unwrap());

        fs::write(migrations.join("0002_expiry.py"), "operations = []\n").unwrap();
        let second = digest(&[migrations.clone()]).unwrap();
        assert_ne!(first, second);

        fs::write(migrations.join("0002_expiry.py"), "operations = [1]\n").unwrap();
        assert_ne!(second, digest(&[migrations]).unwrap());
    }

    #[test]
    fn test_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StampStore::new(dir.path().join("stamps"));

        assert!(store.read("pip-requirements").is_none());
        assert!(!store.matches("pip-requirements", "abc"));

        store.write("pip-requirements", "abc").unwrap();
        assert!(store.matches("pip-requirements", "abc"));
        assert!(!store.matches("pip-requirements", "def"));
    }

    #[test]
    fn test_ids_are_sanitised() {
        let store = StampStore::new("/var/lib/provision/stamps");
        assert_eq!(
            store.path("../etc/passwd"),
            PathBuf::from("/var/lib/provision/stamps/___etc_passwd.b3")
        );
    }
}
