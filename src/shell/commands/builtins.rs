//! Builtins that run in-process with full access to session state: `cd`, `pwd`,
//! `export`, `exit`, `echo` (SPEC_FULL §4.5 outcome 1, §9: "Builtins that mutate session
//! state MUST receive a mutable session handle").

use async_trait::async_trait;

use crate::archive::Kind;
use crate::session::Session;
use crate::vfs::{self, Vfs, VfsError};

use super::super::catalogue::Command;
use super::super::Io;

pub struct Cd;

#[async_trait]
impl Command for Cd {
    async fn run(&self, argv: &[String], io: &mut Io, session: &mut Session, vfs: &dyn Vfs) -> i32 {
        let target = argv.get(1).cloned().unwrap_or_else(|| session.user.home.clone());
        let resolved = match vfs::resolve(&session.cwd, &target) {
            Ok(p) => p,
            Err(_) => {
                io.stderr.extend_from_slice(format!("cd: {target}: Invalid argument\n").as_bytes());
                return 1;
            }
        };
        match vfs.stat(&resolved).await {
            Ok(stat) if stat.kind == Kind::Directory => {
                session.cwd = resolved;
                0
            }
            Ok(_) => {
                io.stderr.extend_from_slice(format!("cd: {target}: Not a directory\n").as_bytes());
                1
            }
            Err(VfsError::NotFound) => {
                io.stderr.extend_from_slice(format!("cd: {target}: No such file or directory\n").as_bytes());
                1
            }
            Err(_) => {
                io.stderr.extend_from_slice(format!("cd: {target}: Permission denied\n").as_bytes());
                1
            }
        }
    }
}

pub struct Pwd;

#[async_trait]
impl Command for Pwd {
    async fn run(&self, _argv: &[String], io: &mut Io, session: &mut Session, _vfs: &dyn Vfs) -> i32 {
        io.stdout.extend_from_slice(session.cwd.as_bytes());
        io.stdout.push(b'\n');
        0
    }
}

pub struct Export;

#[async_trait]
impl Command for Export {
    async fn run(&self, argv: &[String], io: &mut Io, session: &mut Session, _vfs: &dyn Vfs) -> i32 {
        for assignment in &argv[1..] {
            match assignment.split_once('=') {
                Some((key, value)) => session.env.set(key, value),
                None => {
                    io.stderr.extend_from_slice(format!("export: {assignment}: not a valid identifier\n").as_bytes());
                    return 1;
                }
            }
        }
        0
    }
}

pub struct Exit;

#[async_trait]
impl Command for Exit {
    async fn run(&self, argv: &[String], _io: &mut Io, session: &mut Session, _vfs: &dyn Vfs) -> i32 {
        let status = argv.get(1).and_then(|s| s.parse::<i32>().ok()).unwrap_or(0);
        session.should_exit = Some(status);
        status
    }
}

pub struct Echo;

#[async_trait]
impl Command for Echo {
    async fn run(&self, argv: &[String], io: &mut Io, _session: &mut Session, _vfs: &dyn Vfs) -> i32 {
        io.stdout.extend_from_slice(argv[1..].join(" ").as_bytes());
        io.stdout.push(b'\n');
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{Entry, Time};
    use crate::session::{recorder::Recorder, DelayParams, User};
    use crate::vfs::OverlayVfs;
    use std::sync::Arc;

    fn session() -> Session {
        let user = User { name: "attacker".into(), uid: 1000, gid: 1000, home: "/home/attacker".into(), shell: "/bin/bash".into() };
        Session::new(1, user, "spr1139".into(), Arc::new(std::sync::Mutex::new(Recorder::discard())), DelayParams::disabled())
    }

    fn vfs_with_home() -> OverlayVfs {
        let entries = vec![
            Entry {
                path: "/".to_string(),
                kind: Kind::Directory,
                mode: 0o755,
                size: 0,
                uid: 0,
                gid: 0,
                mtime: Time(0),
                atime: Time(0),
                ctime: Time(0),
                symlink_target: None,
                body: None,
            },
            Entry {
                path: "/home/attacker".to_string(),
                kind: Kind::Directory,
                mode: 0o755,
                size: 0,
                uid: 1000,
                gid: 1000,
                mtime: Time(0),
                atime: Time(0),
                ctime: Time(0),
                symlink_target: None,
                body: None,
            },
        ];
        OverlayVfs::new(Arc::new(crate::archive::Index::from_entries_for_test(entries)), None)
    }

    #[tokio::test]
    async fn cd_updates_cwd_on_success() {
        let mut session = session();
        let vfs = vfs_with_home();
        let mut io = Io::default();
        let status = Cd.run(&["cd".to_string(), "/".to_string()], &mut io, &mut session, &vfs).await;
        assert_eq!(status, 0);
        assert_eq!(session.cwd, "/");
    }

    #[tokio::test]
    async fn cd_to_missing_path_is_an_error() {
        let mut session = session();
        let vfs = vfs_with_home();
        let mut io = Io::default();
        let status = Cd.run(&["cd".to_string(), "/nope".to_string()], &mut io, &mut session, &vfs).await;
        assert_eq!(status, 1);
        assert!(io.stderr.starts_with(b"cd: /nope"));
    }

    #[tokio::test]
    async fn export_sets_an_env_var() {
        let mut session = session();
        let vfs = vfs_with_home();
        let mut io = Io::default();
        let status = Export.run(&["export".to_string(), "FOO=bar".to_string()], &mut io, &mut session, &vfs).await;
        assert_eq!(status, 0);
        assert_eq!(session.env.get("FOO"), Some("bar"));
    }

    #[tokio::test]
    async fn exit_sets_the_session_exit_flag() {
        let mut session = session();
        let vfs = vfs_with_home();
        let mut io = Io::default();
        let status = Exit.run(&["exit".to_string(), "3".to_string()], &mut io, &mut session, &vfs).await;
        assert_eq!(status, 3);
        assert_eq!(session.should_exit, Some(3));
    }
}
