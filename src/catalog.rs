//! Server-side file catalog
//!
//! Maps a storage key (`owner_name`) to the stored file. Entries appear only
//! after an upload has been fully written and renamed into place.

use crate::error::{DepotError, DepotResult};
use crate::protocol::{MAX_IDENTITY_LEN, MAX_NAME_LEN, PARTIAL_SUFFIX, STORAGE_SEPARATOR};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn new(owner: &str, name: &str) -> Self {
        StorageKey(format!("{}{}{}", owner, STORAGE_SEPARATOR, name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Inverse of [`StorageKey::new`]. Owners never contain the separator,
    /// so the first one found is the boundary.
    pub fn split(file_name: &str) -> Option<(&str, &str)> {
        let (owner, name) = file_name.split_once(STORAGE_SEPARATOR)?;
        if owner.is_empty() || name.is_empty() {
            return None;
        }
        Some((owner, name))
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub storage_key: StorageKey,
    pub owner: String,
    pub display_name: String,
    pub byte_length: u64,
    pub path: PathBuf,
}

/// One line of a LIST reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub display_name: String,
    pub owner: String,
}

impl ListEntry {
    /// Parse a rendered `"<name> by <owner>"` line.
    pub fn parse(line: &str) -> Option<ListEntry> {
        let (name, owner) = line.trim_end().rsplit_once(" by ")?;
        if name.is_empty() || owner.is_empty() {
            return None;
        }
        Some(ListEntry { display_name: name.to_string(), owner: owner.to_string() })
    }
}

impl fmt::Display for ListEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} by {}", self.display_name, self.owner)
    }
}

pub fn render_listing(entries: &[ListEntry]) -> String {
    entries.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n")
}

pub fn parse_listing(text: &str) -> Vec<ListEntry> {
    text.lines().filter_map(ListEntry::parse).collect()
}

pub fn validate_identity(identity: &str) -> DepotResult<()> {
    let reason = if identity.is_empty() {
        "name is empty"
    } else if identity.len() > MAX_IDENTITY_LEN {
        "name is too long"
    } else if identity.chars().any(|c| c.is_whitespace() || c.is_control()) {
        "name contains whitespace or control characters"
    } else if identity.contains(STORAGE_SEPARATOR) {
        "name contains '_'"
    } else if identity.contains(['/', '\\', '\0']) {
        "name contains a path separator"
    } else {
        return Ok(());
    };
    Err(DepotError::InvalidName(reason.to_string()))
}

/// Display names are flat: no directories, no traversal.
pub fn validate_display_name(name: &str) -> DepotResult<()> {
    let reason = if name.is_empty() {
        "file name is empty"
    } else if name.len() > MAX_NAME_LEN {
        "file name is too long"
    } else if name == "." || name == ".." {
        "file name is a directory reference"
    } else if name.contains(['/', '\\', '\0']) {
        "file name contains a path separator"
    } else if name.chars().any(char::is_control) {
        // LIST is newline separated
        "file name contains control characters"
    } else if name.ends_with(PARTIAL_SUFFIX) {
        "file name uses a reserved suffix"
    } else {
        return Ok(());
    };
    Err(DepotError::MalformedRequest(reason.to_string()))
}

pub struct Catalog {
    root: PathBuf,
    entries: Mutex<BTreeMap<StorageKey, StoredFile>>,
}

impl Catalog {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Rebuild a catalog from files already in the upload directory.
    /// Unfinished uploads are removed.
    pub fn restore<P: Into<PathBuf>>(root: P) -> DepotResult<Self> {
        let catalog = Self::new(root);
        for entry in std::fs::read_dir(&catalog.root)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name.ends_with(PARTIAL_SUFFIX) {
                std::fs::remove_file(entry.path()).ok();
                continue;
            }
            let Some((owner, name)) = StorageKey::split(&file_name) else {
                continue;
            };
            if validate_identity(owner).is_err() || validate_display_name(name).is_err() {
                continue;
            }
            catalog.insert(catalog.stored_file(owner, name, meta.len()));
        }
        Ok(catalog)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn storage_path(&self, key: &StorageKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    pub fn partial_path(&self, key: &StorageKey) -> PathBuf {
        self.root.join(format!("{}{}", key.as_str(), PARTIAL_SUFFIX))
    }

    pub fn stored_file(&self, owner: &str, name: &str, byte_length: u64) -> StoredFile {
        let storage_key = StorageKey::new(owner, name);
        StoredFile {
            path: self.storage_path(&storage_key),
            storage_key,
            owner: owner.to_string(),
            display_name: name.to_string(),
            byte_length,
        }
    }

    /// Last write wins: an existing entry under the same key is replaced and returned.
    pub fn insert(&self, file: StoredFile) -> Option<StoredFile> {
        self.entries.lock().insert(file.storage_key.clone(), file)
    }

    pub fn lookup(&self, key: &StorageKey) -> DepotResult<StoredFile> {
        self.entries
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| DepotError::NotFound(format!("no stored file {}", key)))
    }

    pub fn remove_by_key(&self, key: &StorageKey) -> DepotResult<StoredFile> {
        self.entries
            .lock()
            .remove(key)
            .ok_or_else(|| DepotError::NotFound(format!("no stored file {}", key)))
    }

    /// Snapshot of the catalog, ordered by storage key.
    pub fn list_all(&self) -> Vec<ListEntry> {
        self.entries
            .lock()
            .values()
            .map(|f| ListEntry { display_name: f.display_name.clone(), owner: f.owner.clone() })
            .collect()
    }

    pub fn exists_owner(&self, owner: &str) -> bool {
        self.entries.lock().values().any(|f| f.owner == owner)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn storage_key_joins_and_splits() {
        let key = StorageKey::new("alice", "notes_v2.txt");
        assert_eq!(key.as_str(), "alice_notes_v2.txt");
        assert_eq!(StorageKey::split(key.as_str()), Some(("alice", "notes_v2.txt")));
        assert_eq!(StorageKey::split("nounderscore"), None);
        assert_eq!(StorageKey::split("_x"), None);
    }

    #[test]
    fn same_name_different_owners_coexist() {
        let catalog = Catalog::new("/srv/depot");
        catalog.insert(catalog.stored_file("alice", "notes.txt", 12));
        catalog.insert(catalog.stored_file("bob", "notes.txt", 3));
        assert_eq!(catalog.len(), 2);
        assert_eq!(
            catalog.list_all(),
            vec![
                ListEntry { display_name: "notes.txt".into(), owner: "alice".into() },
                ListEntry { display_name: "notes.txt".into(), owner: "bob".into() },
            ]
        );
    }

    #[test]
    fn insert_replaces_existing_entry() {
        let catalog = Catalog::new("/srv/depot");
        assert!(catalog.insert(catalog.stored_file("alice", "a.bin", 1)).is_none());
        let old = catalog.insert(catalog.stored_file("alice", "a.bin", 99)).unwrap();
        assert_eq!(old.byte_length, 1);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.lookup(&StorageKey::new("alice", "a.bin")).unwrap().byte_length, 99);
    }

    #[test]
    fn lookup_remove_and_owner_checks() {
        let catalog = Catalog::new("/srv/depot");
        catalog.insert(catalog.stored_file("alice", "notes.txt", 12));
        assert!(catalog.exists_owner("alice"));
        assert!(!catalog.exists_owner("carol"));

        let bobs = StorageKey::new("bob", "notes.txt");
        assert!(matches!(catalog.remove_by_key(&bobs), Err(DepotError::NotFound(_))));
        assert_eq!(catalog.len(), 1);

        let key = StorageKey::new("alice", "notes.txt");
        let removed = catalog.remove_by_key(&key).unwrap();
        assert_eq!(removed.path, PathBuf::from("/srv/depot/alice_notes.txt"));
        assert!(catalog.is_empty());
        assert!(!catalog.exists_owner("alice"));
        assert!(catalog.lookup(&key).is_err());
    }

    #[test]
    fn listing_renders_and_parses() {
        let entries = vec![
            ListEntry { display_name: "notes.txt".into(), owner: "alice".into() },
            ListEntry { display_name: "road by night.jpg".into(), owner: "bob".into() },
        ];
        let text = render_listing(&entries);
        assert_eq!(text, "notes.txt by alice\nroad by night.jpg by bob");
        assert_eq!(parse_listing(&text), entries);
        assert!(parse_listing("").is_empty());
        assert_eq!(render_listing(&[]), "");
    }

    #[test]
    fn identity_rules() {
        assert!(validate_identity("alice").is_ok());
        assert!(validate_identity("").is_err());
        assert!(validate_identity("john_doe").is_err());
        assert!(validate_identity("two words").is_err());
        assert!(validate_identity("a/b").is_err());
        assert!(validate_identity(&"x".repeat(MAX_IDENTITY_LEN + 1)).is_err());
    }

    #[test]
    fn display_name_rules() {
        assert!(validate_display_name("notes.txt").is_ok());
        assert!(validate_display_name("with space.txt").is_ok());
        assert!(validate_display_name("..").is_err());
        assert!(validate_display_name("dir/file").is_err());
        assert!(validate_display_name("dir\\file").is_err());
        assert!(validate_display_name("upload.part").is_err());
        assert!(validate_display_name(&"n".repeat(MAX_NAME_LEN)).is_ok());
        assert!(validate_display_name(&"n".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn names_cannot_forge_listing_lines() {
        assert!(validate_display_name("fake.txt by alice\nreal.txt").is_err());
        assert!(validate_display_name("tab\there").is_err());
        assert!(validate_display_name("bell\u{7}").is_err());
        assert!(validate_identity("mal\rlory").is_err());

        let catalog = Catalog::new("/srv/depot");
        catalog.insert(catalog.stored_file("mallory", "real.txt", 1));
        let listed = parse_listing(&render_listing(&catalog.list_all()));
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].owner, "mallory");
    }

    #[test]
    fn longest_names_fit_on_disk() {
        let catalog = Catalog::new("/srv/depot");
        let owner = "o".repeat(MAX_IDENTITY_LEN);
        let name = "n".repeat(MAX_NAME_LEN);
        assert!(validate_identity(&owner).is_ok());
        let partial = catalog.partial_path(&StorageKey::new(&owner, &name));
        let file_name = partial.file_name().unwrap().to_str().unwrap();
        assert_eq!(file_name.len(), crate::protocol::MAX_FILE_NAME_LEN);
    }

    #[test]
    fn restore_scans_upload_dir() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("alice_notes.txt"), b"hello world!").unwrap();
        std::fs::write(tmp.path().join("bob_a_b.bin"), b"xyz").unwrap();
        std::fs::write(tmp.path().join("carol_half.bin.part"), b"partial").unwrap();
        std::fs::write(tmp.path().join("stray"), b"?").unwrap();
        std::fs::create_dir(tmp.path().join("dave_dir")).unwrap();

        let catalog = Catalog::restore(tmp.path()).unwrap();
        assert_eq!(catalog.len(), 2);
        let notes = catalog.lookup(&StorageKey::new("alice", "notes.txt")).unwrap();
        assert_eq!(notes.byte_length, 12);
        assert!(catalog.lookup(&StorageKey::new("bob", "a_b.bin")).is_ok());
        assert!(!tmp.path().join("carol_half.bin.part").exists());
    }
}
