// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2025, Nathan Gill

use std::{ffi::OsString, path::PathBuf, process, str::FromStr};

use clap::{
    Arg, ArgAction, ArgMatches, Command, ValueEnum,
    builder::{
        EnumValueParser, Styles,
        styling::{AnsiColor, Effects},
    },
};

use crate::palette::ColorSpec;

pub const VERSION_BANNER: &str = concat!(
    "xlock-",
    env!("CARGO_PKG_VERSION"),
    " (built ",
    env!("XLOCK_BUILD_DATE"),
    ")"
);

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

pub trait LoadArgMatches {
    fn load_arg_matches(matches: &ArgMatches) -> Self;
}

macro_rules! args_get_value {
    ($matches:expr, $obj:ty, $name:expr) => {
        $matches.get_one::<$obj>($name).cloned()
    };
}

pub struct XLockArgs {
    pub log_level: LogLevel,
    pub config_file: Option<PathBuf>,
    pub colors: XLockArgsColors,
    /// Program and arguments to run once the screens are locked.
    pub command: Vec<String>,
}

impl LoadArgMatches for XLockArgs {
    fn load_arg_matches(matches: &ArgMatches) -> Self {
        let log_level = matches
            .get_one::<LogLevel>("log_level")
            .cloned()
            .unwrap_or(LogLevel::Info);
        let config_file = args_get_value!(matches, PathBuf, "config_file");
        let command = matches
            .get_many::<String>("command")
            .map(|values| values.cloned().collect())
            .unwrap_or_default();

        Self {
            log_level,
            config_file,
            colors: XLockArgsColors::load_arg_matches(matches),
            command,
        }
    }
}

macro_rules! color_arg {
    ($id:expr, $long:expr, $help:expr) => {
        Arg::new($id)
            .help($help)
            .long($long)
            .value_name("COLOR")
            .value_parser(ColorSpec::from_str)
    };
}

pub struct XLockArgsColors {
    pub init: Option<ColorSpec>,
    pub input: Option<ColorSpec>,
    pub empty: Option<ColorSpec>,
}

impl LoadArgMatches for XLockArgsColors {
    fn load_arg_matches(matches: &ArgMatches) -> Self {
        let init = args_get_value!(matches, ColorSpec, "init_color");
        let input = args_get_value!(matches, ColorSpec, "input_color");
        let empty = args_get_value!(matches, ColorSpec, "empty_color");

        Self { init, input, empty }
    }
}

fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::BrightGreen.on_default().effects(Effects::BOLD))
        .usage(AnsiColor::BrightGreen.on_default().effects(Effects::BOLD))
        .literal(AnsiColor::BrightCyan.on_default().effects(Effects::BOLD))
        .placeholder(AnsiColor::BrightYellow.on_default())
        .valid(AnsiColor::BrightGreen.on_default())
        .invalid(AnsiColor::BrightRed.on_default())
}

fn build_cli() -> Command {
    Command::new("xlock")
        .about("Simple screen locker for X")
        .styles(styles())
        .disable_version_flag(true)
        .disable_help_flag(true)
        .arg(
            Arg::new("version")
                .help("Print version and exit")
                .short('v')
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("help")
                .help("Print usage and exit")
                .short('h')
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("log_level")
                .help("Log level verbosity")
                .short('l')
                .long("log-level")
                .value_name("LOG LEVEL")
                .value_parser(EnumValueParser::<LogLevel>::new())
                .default_value("info"),
        )
        .arg(
            Arg::new("config_file")
                .help("Path to the configuration file")
                .short('c')
                .long("config-file")
                .value_name("CONFIG FILE")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(color_arg!(
            "init_color",
            "init-color",
            "Sets the color shown before any input"
        ))
        .arg(color_arg!(
            "input_color",
            "input-color",
            "Sets the color shown while typing"
        ))
        .arg(color_arg!(
            "empty_color",
            "empty-color",
            "Sets the color shown after clearing input or a failed attempt"
        ))
        .arg(
            Arg::new("command")
                .help("Command to run once the screen is locked")
                .value_name("CMD")
                .num_args(1..)
                .trailing_var_arg(true),
        )
}

pub enum CliAction {
    Run(XLockArgs),
    Version,
    Help(String),
}

pub fn parse_args<I, T>(args: I) -> Result<CliAction, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let mut cli = build_cli();
    let matches = cli.try_get_matches_from_mut(args)?;

    if matches.get_flag("version") {
        return Ok(CliAction::Version);
    }
    if matches.get_flag("help") {
        return Ok(CliAction::Help(cli.render_help().to_string()));
    }

    Ok(CliAction::Run(XLockArgs::load_arg_matches(&matches)))
}

/// Parses the process arguments. Version, help and usage errors are
/// reported on stderr and end the process with status 1.
pub fn run_cli() -> XLockArgs {
    match parse_args(std::env::args_os()) {
        Ok(CliAction::Run(args)) => args,
        Ok(CliAction::Version) => {
            eprintln!("{VERSION_BANNER}");
            process::exit(1);
        }
        Ok(CliAction::Help(help)) => {
            eprint!("{help}");
            process::exit(1);
        }
        Err(e) => {
            let _ = e.print();
            process::exit(1);
        }
    }
}
