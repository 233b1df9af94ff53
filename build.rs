// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2025, Nathan Gill

use time::{OffsetDateTime, format_description::well_known::Rfc3339};

fn main() {
    let date = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map(|s| s[..10].to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    println!("cargo:rustc-env=XLOCK_BUILD_DATE={date}");
    println!("cargo:rerun-if-env-changed=XLOCK_PAM_SERVICE");
    println!("cargo:rerun-if-changed=build.rs");
}
