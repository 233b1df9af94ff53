// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2025, Nathan Gill

use std::{thread, time::Duration};

use anyhow::{Result, bail};
use tracing::{debug, info, trace, warn};

use crate::{
    auth::Conversation,
    error::LockError,
    grab::GrabPolicy,
    lock::{ScreenLock, lock_screen, unlock_screen},
    palette::{ColorSpec, PaletteIndex},
    passphrase::{KeyOutcome, Passphrase, PassphraseInput},
    server::{Server, ServerEvent},
};

/// Percent volume of the bell rung on a failed attempt.
const REJECT_BELL_PERCENT: i8 = 100;

/// The server connection together with every screen that was locked on it.
///
/// Any lock still held when the session is dropped is released then.
pub struct LockSession<S: Server> {
    server: S,
    locks: Vec<ScreenLock<S>>,
}

impl<S: Server> LockSession<S> {
    /// Attempts to lock every screen of `server`, keeping the ones that
    /// succeeded in screen order. Fails when none could be locked.
    pub fn lock_screens(server: S, colors: [&ColorSpec; 3], policy: &GrabPolicy) -> Result<Self> {
        let count = server.screen_count();

        let mut locks = Vec::new();
        locks
            .try_reserve_exact(count)
            .map_err(|_| LockError::Alloc)?;

        let mut session = Self { server, locks };

        for screen in 0..count {
            if let Some(lock) = lock_screen(&mut session.server, screen, colors, policy) {
                session.locks.push(lock);
            }
        }

        session.server.sync()?;

        if session.locks.is_empty() {
            bail!("unable to lock any of {count} screen(s)");
        }

        info!("Locked {} of {count} screen(s)", session.locks.len());

        Ok(session)
    }

    pub fn server(&self) -> &S {
        &self.server
    }

    #[cfg(test)]
    pub fn server_mut(&mut self) -> &mut S {
        &mut self.server
    }

    pub fn locks(&self) -> &[ScreenLock<S>] {
        &self.locks
    }

    /// Paints every lock window with the palette color at `index`.
    pub fn blank(&mut self, index: PaletteIndex) {
        for lock in &self.locks {
            self.server.set_background(lock.window, lock.palette[index]);
            self.server.clear_window(lock.window);
        }
    }

    fn raise_all(&mut self) {
        for lock in &self.locks {
            self.server.raise_window(lock.window);
        }
    }

    fn resize(&mut self, window: S::Window, width: u16, height: u16) {
        if let Some(lock) = self.locks.iter().find(|lock| lock.window == window) {
            debug!("Screen {} resized to {width}x{height}", lock.screen);
            self.server.resize_window(window, width, height);
            self.server.clear_window(window);
        }
    }

    /// Pumps server events until Return is pressed and hands back what was
    /// typed.
    pub fn read_passphrase(&mut self) -> Result<Passphrase> {
        let mut input = PassphraseInput::new();

        loop {
            match self.server.next_event()? {
                ServerEvent::KeyPress(key) => match input.handle_key(&key) {
                    KeyOutcome::Submit => {
                        trace!("Passphrase submitted");
                        return Ok(input.into_passphrase());
                    }
                    KeyOutcome::Continue(Some(index)) => self.blank(index),
                    KeyOutcome::Continue(None) => {}
                },
                ServerEvent::ScreenChange {
                    window,
                    width,
                    height,
                } if self.server.has_screen_change() => self.resize(window, width, height),
                _ => self.raise_all(),
            }
        }
    }

    /// Releases every lock in screen order.
    pub fn unlock_all(&mut self) -> Result<()> {
        for lock in self.locks.drain(..) {
            unlock_screen(&mut self.server, Some(lock));
        }

        self.server.flush()
    }
}

impl<S: Server> Conversation for LockSession<S> {
    fn read_secret(&mut self) -> Result<Passphrase> {
        self.read_passphrase()
    }

    fn reject(&mut self) -> Result<()> {
        self.blank(PaletteIndex::Empty);
        self.server.bell(REJECT_BELL_PERCENT);
        self.server.flush()
    }

    fn pause(&mut self, duration: Duration) -> Result<()> {
        self.server.flush()?;
        thread::sleep(duration);
        self.server.discard_pending_events()
    }
}

impl<S: Server> Drop for LockSession<S> {
    fn drop(&mut self) {
        if self.locks.is_empty() {
            return;
        }

        warn!("Releasing {} lock(s) on teardown", self.locks.len());
        if let Err(e) = self.unlock_all() {
            warn!("Failed to flush unlock requests: {e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use xkbcommon::xkb::keysyms;

    use super::*;
    use crate::{
        server::GrabStatus,
        testing::{FakeServer, Request, assert_all_released},
    };

    const NO_WAIT: GrabPolicy = GrabPolicy {
        attempts: 6,
        interval: Duration::ZERO,
    };

    // Pixels handed out by the fake server on screen 0
    const INPUT: u32 = 102;
    const EMPTY: u32 = 103;

    fn session(server: FakeServer) -> Result<LockSession<FakeServer>> {
        let colors: [ColorSpec; 3] = [
            ColorSpec::named("black"),
            "#005577".parse().unwrap(),
            "#CC3333".parse().unwrap(),
        ];
        LockSession::lock_screens(server, [&colors[0], &colors[1], &colors[2]], &NO_WAIT)
    }

    fn window(session: &LockSession<FakeServer>, index: usize) -> u32 {
        session.locks()[index].window
    }

    #[test]
    fn typed_passphrase_paints_input_once() {
        let mut server = FakeServer::new(&[(800, 600)]);
        server.type_text("hi");
        server.push_return();

        let mut session = session(server).unwrap();
        let w = window(&session, 0);

        let pw = session.read_passphrase().unwrap();
        assert_eq!(pw.as_bytes(), b"hi");
        assert_eq!(session.server().backgrounds(w), vec![INPUT]);

        session.unlock_all().unwrap();
        let server = session.server();
        assert_eq!(server.count(|r| matches!(r, Request::GrabPointer { .. })), 1);
        assert_eq!(server.count(|r| matches!(r, Request::GrabKeyboard { .. })), 1);
        assert_eq!(server.count(|r| *r == Request::UngrabPointer), 1);
        assert_eq!(server.count(|r| *r == Request::UngrabKeyboard), 1);
    }

    #[test]
    fn escape_then_retype_paints_empty_between() {
        let mut server = FakeServer::new(&[(800, 600)]);
        server.type_text("a");
        server.push_key(keysyms::KEY_Escape, b"\x1b");
        server.type_text("b");
        server.push_return();

        let mut session = session(server).unwrap();
        let w = window(&session, 0);

        let pw = session.read_passphrase().unwrap();
        assert_eq!(pw.as_bytes(), b"b");
        assert_eq!(session.server().backgrounds(w), vec![INPUT, EMPTY, INPUT]);
    }

    #[test]
    fn failed_screen_is_skipped() {
        let mut server = FakeServer::new(&[(800, 600), (1024, 768)]);
        server.script_pointer(1, &[GrabStatus::NotViewable]);
        server.type_text("x");
        server.push_return();

        let mut session = session(server).unwrap();
        assert_eq!(session.locks().len(), 1);
        assert_eq!(session.locks()[0].screen, 0);
        let w = window(&session, 0);

        session.read_passphrase().unwrap();
        session.unlock_all().unwrap();

        let server = session.server();
        assert!(server.requests.contains(&Request::DestroyWindow(w)));
        assert_eq!(
            server.count(|r| matches!(r, Request::FreeColors { screen: 0, .. })),
            1
        );
        // Screen 1's partial lock released its own colors during setup
        assert_eq!(
            server.count(|r| matches!(r, Request::FreeColors { screen: 1, .. })),
            1
        );
    }

    #[test]
    fn no_lockable_screen_is_an_error() {
        let mut server = FakeServer::new(&[(800, 600)]);
        server.script_keyboard(0, &[GrabStatus::Frozen]);
        assert!(session(server).is_err());
    }

    #[test]
    fn resize_updates_matching_window_only() {
        let mut server = FakeServer::new(&[(800, 600), (800, 600)]);
        server.screen_change = true;
        server.type_text("a");

        let mut session = session(server).unwrap();
        let (w0, w1) = (window(&session, 0), window(&session, 1));

        session.server_mut().events.push_back(ServerEvent::ScreenChange {
            window: w1,
            width: 1920,
            height: 1080,
        });
        session.server_mut().type_text("b");
        session.server_mut().push_return();

        let pw = session.read_passphrase().unwrap();
        assert_eq!(pw.as_bytes(), b"ab");

        let server = session.server();
        assert!(server.requests.contains(&Request::Resize {
            window: w1,
            width: 1920,
            height: 1080,
        }));
        assert!(server.requests.contains(&Request::Clear(w1)));
        assert_eq!(server.count(|r| matches!(r, Request::Resize { .. })), 1);
        assert_eq!(server.backgrounds(w0), vec![INPUT]);
        assert_eq!(server.backgrounds(w1), vec![202]);
    }

    #[test]
    fn resize_without_extension_raises_instead() {
        let mut server = FakeServer::new(&[(800, 600)]);
        server.events.push_back(ServerEvent::ScreenChange {
            window: 1,
            width: 1920,
            height: 1080,
        });
        server.push_return();

        let mut session = session(server).unwrap();
        let w = window(&session, 0);
        session.read_passphrase().unwrap();

        let server = session.server();
        assert_eq!(server.count(|r| matches!(r, Request::Resize { .. })), 0);
        assert_eq!(server.count(|r| *r == Request::Raise(w)), 1);
    }

    #[test]
    fn other_events_raise_every_window() {
        let mut server = FakeServer::new(&[(800, 600), (800, 600)]);
        server.events.push_back(ServerEvent::Other);
        server.push_return();

        let mut session = session(server).unwrap();
        session.read_passphrase().unwrap();

        assert_eq!(
            session.server().count(|r| matches!(r, Request::Raise(_))),
            2
        );
    }

    #[test]
    fn reject_paints_empty_and_rings() {
        let mut session = session(FakeServer::new(&[(800, 600)])).unwrap();
        let w = window(&session, 0);

        session.reject().unwrap();

        assert_eq!(session.server().backgrounds(w), vec![EMPTY]);
        assert_eq!(session.server().bells(), 1);
        assert!(session.server().requests.contains(&Request::Bell(100)));
    }

    #[test]
    fn pause_discards_queued_input() {
        let mut session = session(FakeServer::new(&[(800, 600)])).unwrap();
        session.pause(Duration::ZERO).unwrap();
        assert_eq!(
            session.server().count(|r| *r == Request::DiscardPending),
            1
        );
    }

    #[test]
    fn unlock_all_empties_the_session() {
        let mut session = session(FakeServer::new(&[(800, 600), (800, 600)])).unwrap();
        session.unlock_all().unwrap();
        assert!(session.locks().is_empty());

        // A second pass has nothing left to release
        let before = session.server().requests.len();
        session.unlock_all().unwrap();
        assert_eq!(session.server().requests.len(), before);
    }

    #[test]
    fn blank_twice_paints_same_color() {
        let mut session = session(FakeServer::new(&[(800, 600)])).unwrap();
        let w = window(&session, 0);
        session.blank(PaletteIndex::Empty);
        session.blank(PaletteIndex::Empty);
        assert_eq!(session.server().backgrounds(w), vec![EMPTY, EMPTY]);
    }

    #[test]
    fn dropped_session_releases_held_locks() {
        let journal = Rc::new(RefCell::new(Vec::new()));
        let mut server = FakeServer::new(&[(800, 600), (1024, 768)]);
        server.journal = Some(journal.clone());
        server.type_text("abc");

        {
            let mut session = session(server).unwrap();
            assert_eq!(session.locks().len(), 2);
            // Script runs out before Return, as a lost connection would
            assert!(session.read_passphrase().is_err());
        }

        let requests = journal.borrow();
        let count = |pred: &dyn Fn(&Request) -> bool| {
            requests.iter().filter(|&r| pred(r)).count()
        };
        assert_eq!(count(&|r| *r == Request::UngrabPointer), 2);
        assert_eq!(count(&|r| *r == Request::UngrabKeyboard), 2);
        assert_eq!(count(&|r| matches!(r, Request::FreeColors { screen: 0, .. })), 1);
        assert_eq!(count(&|r| matches!(r, Request::FreeColors { screen: 1, .. })), 1);
        assert_eq!(count(&|r| matches!(r, Request::DestroyWindow(_))), 2);
        assert_all_released(&requests);
    }
}
