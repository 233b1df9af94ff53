// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2025, Nathan Gill

use xkbcommon::xkb::keysyms;

const KEY_KP_SPACE: u32 = keysyms::KEY_KP_Space;
const KEY_KP_EQUAL: u32 = keysyms::KEY_KP_Equal;
const PRIVATE_KEYPAD_FIRST: u32 = 0x1100_0000;
const PRIVATE_KEYPAD_LAST: u32 = 0x1100_ffff;

/// What a keypress means to the passphrase reader.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum KeyAction {
    Submit,
    Clear,
    Erase,
    Text,
    Ignore,
}

pub fn is_keypad(keysym: u32) -> bool {
    (KEY_KP_SPACE..=KEY_KP_EQUAL).contains(&keysym)
}

pub fn is_private_keypad(keysym: u32) -> bool {
    (PRIVATE_KEYPAD_FIRST..=PRIVATE_KEYPAD_LAST).contains(&keysym)
}

pub fn is_function(keysym: u32) -> bool {
    (keysyms::KEY_F1..=keysyms::KEY_F35).contains(&keysym)
}

pub fn is_misc_function(keysym: u32) -> bool {
    (keysyms::KEY_Select..=keysyms::KEY_Break).contains(&keysym)
}

pub fn is_pf(keysym: u32) -> bool {
    (keysyms::KEY_KP_F1..=keysyms::KEY_KP_F4).contains(&keysym)
}

/// Folds keypad Enter into Return and keypad digits into top-row digits.
pub fn normalize(keysym: u32) -> u32 {
    if !is_keypad(keysym) {
        return keysym;
    }

    match keysym {
        keysyms::KEY_KP_Enter => keysyms::KEY_Return,
        k if (keysyms::KEY_KP_0..=keysyms::KEY_KP_9).contains(&k) => {
            k - keysyms::KEY_KP_0 + keysyms::KEY_0
        }
        k => k,
    }
}

pub fn classify(keysym: u32) -> KeyAction {
    let keysym = normalize(keysym);

    if is_function(keysym)
        || is_keypad(keysym)
        || is_misc_function(keysym)
        || is_pf(keysym)
        || is_private_keypad(keysym)
    {
        return KeyAction::Ignore;
    }

    match keysym {
        keysyms::KEY_Return => KeyAction::Submit,
        keysyms::KEY_Escape => KeyAction::Clear,
        keysyms::KEY_BackSpace => KeyAction::Erase,
        _ => KeyAction::Text,
    }
}
