// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2025, Nathan Gill

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use config::{Config, File, FileFormat};
use dirs::config_dir;
use serde::Deserialize;
use tracing::debug;

use crate::{cli::XLockArgs, error::LockError, palette::ColorSpec};

const CONFIG_FILE_NAME: &str = "xlock.toml";
const CONFIG_DIR_NAME: &str = "xlock";
const SYSTEM_CONFIG_DIR: &str = "/etc";

/// PAM service used unless the configuration names another one.
pub const PAM_SERVICE: &str = match option_env!("XLOCK_PAM_SERVICE") {
    Some(service) => service,
    None => "login",
};

#[derive(Default, Deserialize)]
pub struct XLockConfig {
    #[serde(default)]
    pub colors: XLockConfigColors,

    #[serde(default)]
    pub auth: XLockConfigAuth,

    #[serde(default)]
    pub grab: XLockConfigGrab,
}

#[derive(Deserialize)]
pub struct XLockConfigColors {
    #[serde(default = "default_init_color")]
    pub init: ColorSpec,

    #[serde(default = "default_input_color")]
    pub input: ColorSpec,

    #[serde(default = "default_empty_color")]
    pub empty: ColorSpec,
}

impl Default for XLockConfigColors {
    fn default() -> Self {
        Self {
            init: default_init_color(),
            input: default_input_color(),
            empty: default_empty_color(),
        }
    }
}

impl XLockConfigColors {
    /// Colors in palette index order.
    pub fn as_array(&self) -> [&ColorSpec; 3] {
        [&self.init, &self.input, &self.empty]
    }
}

fn default_init_color() -> ColorSpec {
    ColorSpec::named("black")
}

fn default_input_color() -> ColorSpec {
    ColorSpec::Rgb {
        red: 0x0000,
        green: 0x5555,
        blue: 0x7777,
    }
}

fn default_empty_color() -> ColorSpec {
    ColorSpec::Rgb {
        red: 0xcccc,
        green: 0x3333,
        blue: 0x3333,
    }
}

#[derive(Deserialize)]
pub struct XLockConfigAuth {
    #[serde(default = "default_service")]
    pub service: String,

    #[serde(default, rename = "allowEmpty")]
    pub allow_empty: bool,

    #[serde(default, rename = "maxAttempts")]
    pub max_attempts: u32,

    #[serde(default, rename = "lockoutSeconds")]
    pub lockout_secs: u64,
}

impl Default for XLockConfigAuth {
    fn default() -> Self {
        Self {
            service: default_service(),
            allow_empty: false,
            max_attempts: 0,
            lockout_secs: 0,
        }
    }
}

fn default_service() -> String {
    PAM_SERVICE.to_string()
}

#[derive(Deserialize)]
pub struct XLockConfigGrab {
    #[serde(default = "default_grab_attempts")]
    pub attempts: u32,

    #[serde(default = "default_grab_interval", rename = "intervalMs")]
    pub interval_ms: u64,
}

impl Default for XLockConfigGrab {
    fn default() -> Self {
        Self {
            attempts: default_grab_attempts(),
            interval_ms: default_grab_interval(),
        }
    }
}

fn default_grab_attempts() -> u32 {
    6
}

fn default_grab_interval() -> u64 {
    100
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or(anyhow!("Config path {path:?} is not valid UTF-8"))
}

impl XLockConfig {
    /// Loads the system and user configuration files, or only `explicit`
    /// when given.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = explicit {
            builder = builder.add_source(File::new(path_str(path)?, FileFormat::Toml));
            debug!("Including config file {:#?}", path);
        } else {
            let mut system_config = PathBuf::from(SYSTEM_CONFIG_DIR);
            system_config.push(CONFIG_DIR_NAME);
            system_config.push(CONFIG_FILE_NAME);

            if system_config.is_file() {
                builder = builder
                    .add_source(File::new(path_str(&system_config)?, FileFormat::Toml));
                debug!("Including config file {:#?}", system_config);
            }

            if let Some(mut user_config) = config_dir() {
                user_config.push(CONFIG_DIR_NAME);
                user_config.push(CONFIG_FILE_NAME);

                if user_config.is_file() {
                    builder = builder
                        .add_source(File::new(path_str(&user_config)?, FileFormat::Toml));
                    debug!("Including config file {:#?}", user_config);
                }
            }
        }

        let config = builder.build().map_err(LockError::Config)?;

        Ok(config.try_deserialize::<Self>().map_err(LockError::Config)?)
    }

    /// Applies command-line overrides on top of the loaded files.
    pub fn merge_args(&mut self, args: &XLockArgs) {
        if let Some(init) = &args.colors.init {
            self.colors.init = init.clone();
        }
        if let Some(input) = &args.colors.input {
            self.colors.input = input.clone();
        }
        if let Some(empty) = &args.colors.empty {
            self.colors.empty = empty.clone();
        }
    }
}
