//! Server entrypoint: loads configuration, opens the archive image, loads identity
//! tables and the command catalogue, then starts the accept loop (SPEC_FULL §6.3, §7
//! "only archive-load and bind failures are fatal").

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use syruphole::archive::Index;
use syruphole::config::Cli;
use syruphole::identity::Identities;
use syruphole::server::{Honeypot, Shared};
use syruphole::shell::Catalogue;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).json().init();

    let config = Cli::parse().resolve();

    let index = match Index::open(&config.image_file) {
        Ok(index) => index,
        Err(err) => {
            tracing::error!(error = %err, path = %config.image_file.display(), "cannot open archive image, refusing to start");
            std::process::exit(1);
        }
    };

    let identities = Identities::load(&config.uid_file, &config.gid_file);

    let mut catalogue = Catalogue::new();
    catalogue.load_known_commands(&config.command_list_path);

    let host_key = load_or_generate_host_key(Path::new("id_ed25519"));
    let russh_config = Arc::new(russh::server::Config {
        auth_rejection_time: Duration::from_secs(1),
        inactivity_timeout: Some(config.idle_timeout()),
        server_id: russh::SshId::Standard(config.server_ident.clone()),
        keys: vec![host_key],
        ..Default::default()
    });

    let listen = config.listen;
    let shared = Arc::new(Shared::new(config, index, identities, catalogue));
    let honeypot = Honeypot::new(shared);

    if let Err(err) = honeypot.serve(russh_config).await {
        tracing::error!(error = %err, addr = %listen, "accept loop exited, refusing to restart");
        std::process::exit(1);
    }
}

/// Loads the host key from disk, or generates an ephemeral one for this run if absent.
/// Unlike the archive image, a missing host key is not treated as fatal: a fresh key
/// still lets the honeypot serve connections, it just won't present the same host
/// fingerprint across restarts.
fn load_or_generate_host_key(path: &Path) -> russh_keys::key::KeyPair {
    match russh_keys::load_secret_key(path, None) {
        Ok(key) => key,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "no host key on disk, generating an ephemeral one for this run");
            russh_keys::key::KeyPair::generate_ed25519().expect("ed25519 keygen should never fail")
        }
    }
}
