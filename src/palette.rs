// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2025, Nathan Gill

use std::{fmt, ops::Index, str::FromStr};

use serde::{Deserialize, de};

/// Background state shared by every lock window.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PaletteIndex {
    Init,
    Input,
    Empty,
}

impl PaletteIndex {
    pub const ALL: [PaletteIndex; 3] = [Self::Init, Self::Input, Self::Empty];

    pub fn as_usize(self) -> usize {
        match self {
            Self::Init => 0,
            Self::Input => 1,
            Self::Empty => 2,
        }
    }
}

/// Server-allocated pixel values, one per palette index.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Palette(pub [u32; 3]);

impl Index<PaletteIndex> for Palette {
    type Output = u32;

    fn index(&self, index: PaletteIndex) -> &u32 {
        &self.0[index.as_usize()]
    }
}

/// A configured color: either a name looked up in the server's color
/// database, or an explicit `#rgb` / `#rrggbb` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColorSpec {
    Named(String),
    Rgb { red: u16, green: u16, blue: u16 },
}

impl ColorSpec {
    pub fn named(name: &str) -> Self {
        Self::Named(name.to_string())
    }
}

fn scale_channel(s: &str) -> Result<u16, String> {
    let v = u16::from_str_radix(s, 16).map_err(|e| format!("invalid hex digits '{s}': {e}"))?;
    // Replicate digits so that 0xf -> 0xffff and 0x80 -> 0x8080
    Ok(match s.len() {
        1 => v * 0x1111,
        2 => v * 0x0101,
        _ => v,
    })
}

impl FromStr for ColorSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty color".to_string());
        }

        let Some(hex) = s.strip_prefix('#') else {
            return Ok(Self::Named(s.to_string()));
        };

        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("expected #RGB or #RRGGBB, got '{s}'"));
        }

        let width = match hex.len() {
            3 => 1,
            6 => 2,
            _ => return Err(format!("expected #RGB or #RRGGBB, got '{s}'")),
        };

        let red = scale_channel(&hex[0..width])?;
        let green = scale_channel(&hex[width..width * 2])?;
        let blue = scale_channel(&hex[width * 2..width * 3])?;

        Ok(Self::Rgb { red, green, blue })
    }
}

impl fmt::Display for ColorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "{name}"),
            Self::Rgb { red, green, blue } => {
                write!(f, "#{:04x}{:04x}{:04x}", red, green, blue)
            }
        }
    }
}

impl<'de> Deserialize<'de> for ColorSpec {
    fn deserialize<D>(d: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(d)?;
        ColorSpec::from_str(&s).map_err(de::Error::custom)
    }
}
