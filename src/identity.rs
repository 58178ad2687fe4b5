//! uid/gid ↔ name tables loaded from colon-separated text (SPEC_FULL §4.3).
//!
//! Grounded on `export/mod.rs`'s directory-scan-into-registry shape, adapted to a
//! line-scan-into-registry shape with a secondary reverse-lookup map built once at load
//! time, matching the teacher's doc-comment density for small data-loading modules.

use std::collections::HashMap;
use std::path::Path;

use tracing::warn;

/// A numeric id ↔ name table, e.g. the uid table loaded from a `passwd`-style file or the
/// gid table loaded from a `group`-style file.
#[derive(Debug, Clone)]
pub struct IdentityTable {
    by_id: HashMap<u32, String>,
    by_name: HashMap<String, u32>,
}

impl IdentityTable {
    /// Loads a table from `path`. Each non-empty line is split on `:`; field 0 is the
    /// name, field 2 is the numeric id. Malformed lines are logged and skipped; parsing
    /// continues. The uid 0 / name "root" entry always exists, even if `path` doesn't
    /// mention it (or doesn't exist at all).
    pub fn load(path: &Path) -> IdentityTable {
        let mut table = IdentityTable {
            by_id: HashMap::new(),
            by_name: HashMap::new(),
        };
        table.insert(0, "root".to_string());

        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cannot read identity mapping file");
                return table;
            }
        };

        for (lineno, line) in contents.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() < 3 {
                warn!(path = %path.display(), line = lineno + 1, "malformed identity mapping line, skipping");
                continue;
            }
            let name = fields[0];
            match fields[2].parse::<u32>() {
                Ok(id) => table.insert(id, name.to_string()),
                Err(_) => {
                    warn!(path = %path.display(), line = lineno + 1, "non-numeric id field, skipping");
                }
            }
        }

        table
    }

    fn insert(&mut self, id: u32, name: String) {
        self.by_name.insert(name.clone(), id);
        self.by_id.insert(id, name);
    }

    /// Looks up a name by numeric id.
    pub fn name_of(&self, id: u32) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    /// Looks up a numeric id by name. O(1) via the reverse map built at load time.
    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }
}

/// The two identity tables the emulated shell needs: uid→name (`passwd`-style) and
/// gid→name (`group`-style).
#[derive(Debug, Clone)]
pub struct Identities {
    pub users: IdentityTable,
    pub groups: IdentityTable,
}

impl Identities {
    /// Loads both tables. Resolves SPEC_FULL's Open Question 3: the group table is loaded
    /// from `gid_path`, not `uid_path` -- the original implementation's reuse of the uid
    /// file path for group loading as well is a bug, not a behavior to preserve.
    pub fn load(uid_path: &Path, gid_path: &Path) -> Identities {
        Identities {
            users: IdentityTable::load(uid_path),
            groups: IdentityTable::load(gid_path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn root_always_present_even_without_a_file() {
        let table = IdentityTable::load(Path::new("/nonexistent/does/not/exist"));
        assert_eq!(table.name_of(0), Some("root"));
        assert_eq!(table.id_of("root"), Some(0));
    }

    #[test]
    fn parses_colon_separated_fields() {
        let f = write_temp("daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin\nbin:x:2:2:bin:/bin:/usr/sbin/nologin\n");
        let table = IdentityTable::load(f.path());
        assert_eq!(table.name_of(1), Some("daemon"));
        assert_eq!(table.id_of("bin"), Some(2));
        assert_eq!(table.name_of(0), Some("root"));
    }

    #[test]
    fn malformed_lines_are_skipped_without_aborting() {
        let f = write_temp("daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin\nnotenoughfields\nbin:x:2:2:bin:/bin:/usr/sbin/nologin\n");
        let table = IdentityTable::load(f.path());
        assert_eq!(table.name_of(1), Some("daemon"));
        assert_eq!(table.name_of(2), Some("bin"));
    }

    #[test]
    fn groups_load_from_the_gid_file_not_the_uid_file() {
        let uid_file = write_temp("root:x:0:0:root:/root:/bin/bash\nalice:x:1000:1000:Alice:/home/alice:/bin/bash\n");
        let gid_file = write_temp("root:x:0:\nstaff:x:50:\n");
        let identities = Identities::load(uid_file.path(), gid_file.path());
        assert_eq!(identities.users.name_of(1000), Some("alice"));
        assert_eq!(identities.groups.name_of(50), Some("staff"));
        assert_eq!(identities.groups.name_of(1000), None);
    }
}
