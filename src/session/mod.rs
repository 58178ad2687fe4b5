//! Per-connection session state (SPEC_FULL §3 "Session state", §4.4, §4.6, §4.7).
//!
//! Grounded on `vfs::mod.rs`'s small, field-per-concern state struct style; the delay
//! function and environment ordering follow SPEC_FULL §4.5 and §3 literally.

pub mod linedisc;
pub mod recorder;
pub mod throttle;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;

const MAX_COMMAND_HISTORY: usize = 500;

/// The emulated UNIX identity a session presents as.
#[derive(Debug, Clone)]
pub struct User {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: String,
    pub shell: String,
}

/// Ordered environment mapping where a later `set` of an existing key overwrites it in
/// place (SPEC_FULL §3: "environment as an ordered mapping, later keys override earlier").
#[derive(Debug, Clone, Default)]
pub struct Env {
    entries: Vec<(String, String)>,
}

impl Env {
    pub fn new() -> Env {
        Env::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value.into(),
            None => self.entries.push((key, value.into())),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn unset(&mut self, key: &str) {
        self.entries.retain(|(k, _)| k != key);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// PTY geometry as reported by window-size change requests.
#[derive(Debug, Clone, Copy)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
}

impl Default for WindowSize {
    fn default() -> WindowSize {
        WindowSize { rows: 24, cols: 80 }
    }
}

/// Parameters for the optional per-command delay (SPEC_FULL §4.5): sleeps `base ± jitter`
/// milliseconds, drawn uniformly at random, to simulate a slow host. `base_ms < 0`
/// disables the delay entirely.
#[derive(Debug, Clone, Copy)]
pub struct DelayParams {
    pub base_ms: i64,
    pub jitter_ms: i64,
}

impl DelayParams {
    pub fn disabled() -> DelayParams {
        DelayParams { base_ms: -1, jitter_ms: 0 }
    }

    fn sample(&self) -> Option<Duration> {
        if self.base_ms < 0 {
            return None;
        }
        let offset = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(-self.jitter_ms..=self.jitter_ms)
        } else {
            0
        };
        let millis = (self.base_ms + offset).max(0) as u64;
        Some(Duration::from_millis(millis))
    }
}

/// Everything the shell emulator and SFTP subsystem need about one connected session.
/// Owned exclusively by the worker task handling it (SPEC_FULL §5: "no two workers touch
/// the same session").
pub struct Session {
    pub channel_id: u32,
    pub user: User,
    pub hostname: String,
    pub cwd: String,
    pub env: Env,
    pub window: WindowSize,
    pub history: VecDeque<String>,
    /// Shared with the idle-timeout watchdog task, which calls `record_disconnect` on the
    /// same recorder when a session times out with no channel activity to trigger it.
    pub recorder: Arc<Mutex<recorder::Recorder>>,
    pub delay: DelayParams,
    pub linedisc: linedisc::LineDiscipline,
    /// Set by the `exit` builtin; the session loop checks this after each dispatched line
    /// and closes the channel with this status once it's `Some`.
    pub should_exit: Option<i32>,
}

impl Session {
    pub fn new(channel_id: u32, user: User, hostname: String, recorder: Arc<Mutex<recorder::Recorder>>, delay: DelayParams) -> Session {
        let mut env = Env::new();
        env.set("HOME", user.home.clone());
        env.set("USER", user.name.clone());
        env.set("SHELL", user.shell.clone());
        env.set("PATH", "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin");
        let cwd = user.home.clone();
        Session {
            channel_id,
            user,
            hostname,
            cwd,
            env,
            window: WindowSize::default(),
            history: VecDeque::new(),
            recorder,
            delay,
            linedisc: linedisc::LineDiscipline::new(),
            should_exit: None,
        }
    }

    pub fn push_command_history(&mut self, line: String) {
        self.history.push_back(line);
        if self.history.len() > MAX_COMMAND_HISTORY {
            self.history.pop_front();
        }
    }

    /// Sleeps for the configured process delay, if any (SPEC_FULL §4.5).
    pub async fn pace(&self) {
        if let Some(duration) = self.delay.sample() {
            tokio::time::sleep(duration).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_set_overwrites_existing_key_in_place() {
        let mut env = Env::new();
        env.set("PATH", "/bin");
        env.set("PATH", "/usr/bin");
        assert_eq!(env.get("PATH"), Some("/usr/bin"));
        assert_eq!(env.iter().count(), 1);
    }

    #[test]
    fn env_unset_removes_the_key() {
        let mut env = Env::new();
        env.set("FOO", "bar");
        env.unset("FOO");
        assert_eq!(env.get("FOO"), None);
    }

    #[test]
    fn disabled_delay_samples_to_none() {
        assert!(DelayParams::disabled().sample().is_none());
    }

    #[test]
    fn enabled_delay_samples_within_base_plus_or_minus_jitter() {
        let params = DelayParams { base_ms: 100, jitter_ms: 20 };
        for _ in 0..20 {
            let sample = params.sample().unwrap().as_millis() as i64;
            assert!((80..=120).contains(&sample));
        }
    }
}
