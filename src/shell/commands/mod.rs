//! Aggregates command registration: builtins plus VFS-backed emulated externals
//! (SPEC_FULL §4.5).

pub mod builtins;
pub mod externals;

use std::sync::Arc;

use super::catalogue::Catalogue;

pub fn register(catalogue: &mut Catalogue) {
    catalogue.register("cd", Arc::new(builtins::Cd));
    catalogue.register("pwd", Arc::new(builtins::Pwd));
    catalogue.register("export", Arc::new(builtins::Export));
    catalogue.register("exit", Arc::new(builtins::Exit));
    catalogue.register("echo", Arc::new(builtins::Echo));

    catalogue.register("ls", Arc::new(externals::Ls));
    catalogue.register("cat", Arc::new(externals::Cat));
    catalogue.register("uname", Arc::new(externals::Uname));
    catalogue.register("id", Arc::new(externals::Id));
    catalogue.register("ps", Arc::new(externals::Ps));
    catalogue.register("whoami", Arc::new(externals::Whoami));
}
