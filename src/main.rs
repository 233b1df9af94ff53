// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2025, Nathan Gill

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod grab;
pub mod guard;
pub mod keys;
pub mod lock;
pub mod palette;
pub mod passphrase;
pub mod server;
pub mod session;
#[cfg(test)]
mod testing;
pub mod x11;

use std::process;

use anyhow::Result;
use tracing::debug;

use crate::{
    auth::{AuthConfig, Authenticator, PamAuthenticator, run_auth_loop},
    cli::{XLockArgs, run_cli},
    config::XLockConfig,
    grab::GrabPolicy,
    server::Server,
    session::LockSession,
    x11::XcbServer,
};

fn start(args: XLockArgs) -> Result<()> {
    let mut config = XLockConfig::load(args.config_file.as_deref())?;
    config.merge_args(&args);

    #[cfg(target_os = "linux")]
    guard::dontkillme()?;

    let username = guard::check_user()?;

    let server = XcbServer::connect()?;
    let policy = GrabPolicy::new(&config.grab);
    let session = LockSession::lock_screens(server, config.colors.as_array(), &policy)?;

    if !args.command.is_empty() {
        guard::spawn_post_lock(&args.command, session.server().connection_fd())?;
    }

    let auth_config = AuthConfig::new(&config);
    let mut auth = PamAuthenticator::new(&auth_config, &username, session)?;

    run_auth_loop(&mut auth, &auth_config.retry)?;

    auth.conversation_mut().unlock_all()?;

    Ok(())
}

fn main() {
    let args = run_cli();

    tracing_subscriber::fmt()
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .with_writer(std::io::stderr)
        .with_max_level(args.log_level.to_level())
        .init();

    let now = chrono::Local::now();
    debug!("xlock started at {}", now.to_rfc3339());

    let status = match start(args) {
        Ok(()) => 0,
        Err(e) => {
            debug!("Fatal: {e:?}");
            eprintln!("xlock: {e:#}");
            1
        }
    };

    let now = chrono::Local::now();
    debug!("xlock exited at {}", now.to_rfc3339());

    process::exit(status);
}
