//! Command registry: builtins, VFS-backed emulated externals, and the flat "known but
//! unimplemented" command list (SPEC_FULL §4.5, §9 "Polymorphism for commands").
//!
//! Grounded on `mount/mod.rs`'s protocol-registry style: a small trait plus a map from
//! name to a boxed implementation, rather than one large dispatch match.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::session::Session;
use crate::vfs::Vfs;

use super::Io;

/// One dispatchable command: `(argv, io, session, vfs) -> exit status` (SPEC_FULL §9).
/// Builtins that mutate session state (`cd`, `export`, `exit`) take the mutable `session`
/// handle seriously; emulated externals share the same signature but leave it untouched.
#[async_trait]
pub trait Command: Send + Sync {
    async fn run(&self, argv: &[String], io: &mut Io, session: &mut Session, vfs: &dyn Vfs) -> i32;
}

/// The in-process registry: name → implementation, plus the "known" list that decides
/// between `command not found` (127) and `Permission denied` (126) for everything else.
pub struct Catalogue {
    commands: HashMap<String, Arc<dyn Command>>,
    known: HashSet<String>,
}

impl Catalogue {
    pub fn new() -> Catalogue {
        let mut catalogue = Catalogue { commands: HashMap::new(), known: HashSet::new() };
        super::commands::register(&mut catalogue);
        catalogue
    }

    pub fn register(&mut self, name: &str, command: Arc<dyn Command>) {
        self.commands.insert(name.to_string(), command);
    }

    /// Loads the "known but unimplemented" list, one name per non-empty line
    /// (SPEC_FULL §6.3 `command list path`). Missing or unreadable files leave the list
    /// empty -- every unregistered command then reads as `command not found`.
    pub fn load_known_commands(&mut self, path: &Path) {
        let Ok(contents) = std::fs::read_to_string(path) else { return };
        for line in contents.lines() {
            let name = line.trim();
            if !name.is_empty() {
                self.known.insert(name.to_string());
            }
        }
    }

    /// Dispatches one simple command per SPEC_FULL §4.5's three outcomes.
    pub async fn dispatch(&self, argv: Vec<String>, io: &mut Io, session: &mut Session, vfs: &dyn Vfs) -> i32 {
        let Some(name) = argv.first().cloned() else { return 0 };
        if let Some(command) = self.commands.get(&name) {
            return command.run(&argv, io, session, vfs).await;
        }
        if self.known.contains(&name) {
            io.stderr.extend_from_slice(format!("{name}: Permission denied\n").as_bytes());
            126
        } else {
            io.stderr.extend_from_slice(format!("{name}: command not found\n").as_bytes());
            127
        }
    }
}

impl Default for Catalogue {
    fn default() -> Catalogue {
        Catalogue::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{recorder::Recorder, DelayParams, Session, User};
    use crate::vfs::OverlayVfs;
    use std::sync::Arc as StdArc;

    fn test_session() -> Session {
        let user = User {
            name: "attacker".into(),
            uid: 1000,
            gid: 1000,
            home: "/home/attacker".into(),
            shell: "/bin/bash".into(),
        };
        Session::new(1, user, "spr1139".into(), StdArc::new(std::sync::Mutex::new(Recorder::discard())), DelayParams::disabled())
    }

    fn empty_vfs() -> OverlayVfs {
        OverlayVfs::new(StdArc::new(crate::archive::Index::from_entries_for_test(vec![])), None)
    }

    #[tokio::test]
    async fn unknown_command_is_not_found() {
        let catalogue = Catalogue::new();
        let mut session = test_session();
        let vfs = empty_vfs();
        let mut io = Io::default();
        let status = catalogue.dispatch(vec!["nosuchcmd".to_string()], &mut io, &mut session, &vfs).await;
        assert_eq!(status, 127);
        assert_eq!(io.stderr, b"nosuchcmd: command not found\n".to_vec());
    }

    #[tokio::test]
    async fn known_but_unimplemented_command_is_permission_denied() {
        let mut catalogue = Catalogue::new();
        catalogue.known.insert("nmap".to_string());
        let mut session = test_session();
        let vfs = empty_vfs();
        let mut io = Io::default();
        let status = catalogue.dispatch(vec!["nmap".to_string()], &mut io, &mut session, &vfs).await;
        assert_eq!(status, 126);
        assert_eq!(io.stderr, b"nmap: Permission denied\n".to_vec());
    }

    #[tokio::test]
    async fn registered_builtin_runs_in_process() {
        let catalogue = Catalogue::new();
        let mut session = test_session();
        let vfs = empty_vfs();
        let mut io = Io::default();
        let status = catalogue.dispatch(vec!["echo".to_string(), "hi".to_string()], &mut io, &mut session, &vfs).await;
        assert_eq!(status, 0);
        assert_eq!(io.stdout, b"hi\n".to_vec());
    }
}
