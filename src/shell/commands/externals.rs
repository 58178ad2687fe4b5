//! VFS-backed emulated externals -- `ls`, `cat`, `uname`, `id`, `ps`, `whoami`
//! (SPEC_FULL §4.5 outcome 2: "runs against the VFS; produces output sized to realistic
//! UNIX output").

use async_trait::async_trait;

use crate::session::Session;
use crate::vfs::{self, Vfs, VfsError};

use super::super::catalogue::Command;
use super::super::Io;

pub struct Ls;

#[async_trait]
impl Command for Ls {
    async fn run(&self, argv: &[String], io: &mut Io, session: &mut Session, vfs: &dyn Vfs) -> i32 {
        let targets: Vec<String> = argv[1..].iter().filter(|a| !a.starts_with('-')).cloned().collect();
        let paths: Vec<String> = if targets.is_empty() { vec![session.cwd.clone()] } else { targets };
        let show_headers = paths.len() > 1;
        let mut status = 0;

        for (idx, target) in paths.iter().enumerate() {
            let resolved = match vfs::resolve(&session.cwd, target) {
                Ok(p) => p,
                Err(_) => {
                    io.stderr.extend_from_slice(format!("ls: cannot access '{target}': Invalid argument\n").as_bytes());
                    status = 2;
                    continue;
                }
            };
            match vfs.readdir(&resolved).await {
                Ok(mut entries) => {
                    if show_headers {
                        io.stdout.extend_from_slice(format!("{resolved}:\n").as_bytes());
                    }
                    entries.sort_by(|a, b| a.name.cmp(&b.name));
                    for entry in entries {
                        io.stdout.extend_from_slice(entry.name.as_bytes());
                        io.stdout.push(b'\n');
                    }
                    if show_headers && idx + 1 < paths.len() {
                        io.stdout.push(b'\n');
                    }
                }
                Err(VfsError::NotADirectory) => {
                    io.stdout.extend_from_slice(target.as_bytes());
                    io.stdout.push(b'\n');
                }
                Err(VfsError::NotFound) => {
                    io.stderr.extend_from_slice(format!("ls: cannot access '{target}': No such file or directory\n").as_bytes());
                    status = 2;
                }
                Err(_) => {
                    io.stderr.extend_from_slice(format!("ls: cannot access '{target}': Permission denied\n").as_bytes());
                    status = 2;
                }
            }
        }
        status
    }
}

pub struct Cat;

#[async_trait]
impl Command for Cat {
    async fn run(&self, argv: &[String], io: &mut Io, session: &mut Session, vfs: &dyn Vfs) -> i32 {
        if argv.len() < 2 {
            let data = io.stdin.clone();
            io.stdout.extend_from_slice(&data);
            return 0;
        }
        let mut status = 0;
        for target in &argv[1..] {
            let resolved = match vfs::resolve(&session.cwd, target) {
                Ok(p) => p,
                Err(_) => {
                    io.stderr.extend_from_slice(format!("cat: {target}: Invalid argument\n").as_bytes());
                    status = 1;
                    continue;
                }
            };
            match vfs.open_read(&resolved).await {
                Ok(data) => io.stdout.extend_from_slice(&data),
                Err(VfsError::IsADirectory) => {
                    io.stderr.extend_from_slice(format!("cat: {target}: Is a directory\n").as_bytes());
                    status = 1;
                }
                Err(VfsError::NotFound) => {
                    io.stderr.extend_from_slice(format!("cat: {target}: No such file or directory\n").as_bytes());
                    status = 1;
                }
                Err(_) => {
                    io.stderr.extend_from_slice(format!("cat: {target}: Permission denied\n").as_bytes());
                    status = 1;
                }
            }
        }
        status
    }
}

pub struct Uname;

#[async_trait]
impl Command for Uname {
    async fn run(&self, argv: &[String], io: &mut Io, session: &mut Session, _vfs: &dyn Vfs) -> i32 {
        if argv.iter().any(|a| a == "-a") {
            io.stdout.extend_from_slice(
                format!("Linux {} 4.15.0-112-generic #113-Ubuntu SMP x86_64 GNU/Linux\n", session.hostname).as_bytes(),
            );
        } else {
            io.stdout.extend_from_slice(b"Linux\n");
        }
        0
    }
}

pub struct Id;

#[async_trait]
impl Command for Id {
    async fn run(&self, _argv: &[String], io: &mut Io, session: &mut Session, _vfs: &dyn Vfs) -> i32 {
        let user = &session.user;
        io.stdout.extend_from_slice(
            format!(
                "uid={}({}) gid={}({}) groups={}({})\n",
                user.uid, user.name, user.gid, user.name, user.gid, user.name
            )
            .as_bytes(),
        );
        0
    }
}

pub struct Ps;

#[async_trait]
impl Command for Ps {
    async fn run(&self, _argv: &[String], io: &mut Io, session: &mut Session, _vfs: &dyn Vfs) -> i32 {
        let shell_name = session.user.shell.rsplit('/').next().unwrap_or("bash");
        io.stdout.extend_from_slice(b"  PID TTY          TIME CMD\n");
        io.stdout.extend_from_slice(format!("    1 pts/0    00:00:00 {shell_name}\n").as_bytes());
        0
    }
}

pub struct Whoami;

#[async_trait]
impl Command for Whoami {
    async fn run(&self, _argv: &[String], io: &mut Io, session: &mut Session, _vfs: &dyn Vfs) -> i32 {
        io.stdout.extend_from_slice(session.user.name.as_bytes());
        io.stdout.push(b'\n');
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{Entry, Kind, Time};
    use crate::session::{recorder::Recorder, DelayParams, User};
    use crate::vfs::OverlayVfs;
    use std::sync::Arc;

    fn session() -> Session {
        let user = User { name: "attacker".into(), uid: 1000, gid: 1000, home: "/".into(), shell: "/bin/bash".into() };
        Session::new(1, user, "spr1139".into(), Arc::new(std::sync::Mutex::new(Recorder::discard())), DelayParams::disabled())
    }

    fn vfs() -> OverlayVfs {
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
                path: "/etc".to_string(),
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
                path: "/etc/motd".to_string(),
                kind: Kind::Regular,
                mode: 0o644,
                size: 5,
                uid: 0,
                gid: 0,
                mtime: Time(0),
                atime: Time(0),
                ctime: Time(0),
                symlink_target: None,
                body: Some(b"howdy".to_vec()),
            },
        ];
        OverlayVfs::new(Arc::new(crate::archive::Index::from_entries_for_test(entries)), None)
    }

    #[tokio::test]
    async fn ls_lists_lexicographically_sorted_entries() {
        let mut session = session();
        let vfs = vfs();
        let mut io = Io::default();
        let status = Ls.run(&["ls".to_string(), "/".to_string()], &mut io, &mut session, &vfs).await;
        assert_eq!(status, 0);
        assert_eq!(io.stdout, b"etc\n".to_vec());
    }

    #[tokio::test]
    async fn cat_reads_a_file_through_the_vfs() {
        let mut session = session();
        let vfs = vfs();
        let mut io = Io::default();
        let status = Cat.run(&["cat".to_string(), "/etc/motd".to_string()], &mut io, &mut session, &vfs).await;
        assert_eq!(status, 0);
        assert_eq!(io.stdout, b"howdy".to_vec());
    }

    #[tokio::test]
    async fn cat_missing_file_reports_posix_wording() {
        let mut session = session();
        let vfs = vfs();
        let mut io = Io::default();
        let status = Cat.run(&["cat".to_string(), "/nope".to_string()], &mut io, &mut session, &vfs).await;
        assert_eq!(status, 1);
        assert_eq!(io.stderr, b"cat: /nope: No such file or directory\n".to_vec());
    }

    #[tokio::test]
    async fn whoami_reports_the_session_user() {
        let mut session = session();
        let vfs = vfs();
        let mut io = Io::default();
        Whoami.run(&[], &mut io, &mut session, &vfs).await;
        assert_eq!(io.stdout, b"attacker\n".to_vec());
    }
}
