//! Input injection through rdev (events) and arboard (clipboard).

use std::thread;
use std::time::Duration;

use arboard::Clipboard;
use rdev::{Button, EventType, Key};
use tracing::{debug, info};

use super::{InputDevice, MouseButton};
use crate::errors::InputError;

// Some platforms drop events that arrive faster than the event tap drains them
const EVENT_GAP: Duration = Duration::from_millis(5);

// The target window reads the clipboard after it sees the paste chord
const CLIPBOARD_HOLD: Duration = Duration::from_millis(50);

#[cfg(target_os = "macos")]
const PASTE_MODIFIER: Key = Key::MetaLeft;
#[cfg(not(target_os = "macos"))]
const PASTE_MODIFIER: Key = Key::ControlLeft;

/// Sends synthesized events to whatever window has focus
#[derive(Debug, Default)]
pub struct NativeDevice {
    _private: (),
}

impl NativeDevice {
    pub fn new() -> Result<Self, InputError> {
        info!("Initializing native input device");
        Ok(Self::default())
    }

    fn send(&self, event: &EventType) -> Result<(), InputError> {
        rdev::simulate(event).map_err(|e| InputError::Simulate(format!("{:?}: {:?}", event, e)))?;
        thread::sleep(EVENT_GAP);
        Ok(())
    }

    fn tap(&self, key: Key) -> Result<(), InputError> {
        self.send(&EventType::KeyPress(key))?;
        self.send(&EventType::KeyRelease(key))
    }

    fn chord(&self, modifier: Key, key: Key) -> Result<(), InputError> {
        self.send(&EventType::KeyPress(modifier))?;
        let result = self.tap(key);
        // Never leave the modifier held down
        let released = self.send(&EventType::KeyRelease(modifier));
        result.and(released)
    }
}

fn button(button: MouseButton) -> Button {
    match button {
        MouseButton::Left => Button::Left,
        MouseButton::Right => Button::Right,
    }
}

impl InputDevice for NativeDevice {
    fn move_cursor(&self, x: i32, y: i32) -> Result<(), InputError> {
        self.send(&EventType::MouseMove {
            x: x as f64,
            y: y as f64,
        })
    }

    fn press(&self, which: MouseButton) -> Result<(), InputError> {
        self.send(&EventType::ButtonPress(button(which)))
    }

    fn release(&self, which: MouseButton) -> Result<(), InputError> {
        self.send(&EventType::ButtonRelease(button(which)))
    }

    fn paste_text(&self, text: &str) -> Result<(), InputError> {
        let mut clipboard = Clipboard::new().map_err(|e| InputError::Clipboard(e.to_string()))?;
        clipboard
            .set_text(text.to_owned())
            .map_err(|e| InputError::Clipboard(e.to_string()))?;
        debug!(chars = text.chars().count(), "Clipboard set, sending paste chord");
        let result = self.chord(PASTE_MODIFIER, Key::KeyV);
        thread::sleep(CLIPBOARD_HOLD);
        result
    }

    fn type_char(&self, ch: char) -> Result<bool, InputError> {
        let Some((key, shifted)) = char_to_key(ch) else {
            return Ok(false);
        };
        if shifted {
            self.chord(Key::ShiftLeft, key)?;
        } else {
            self.tap(key)?;
        }
        Ok(true)
    }
}

/// Map a character to a key on a US layout, with the shift state it needs
fn char_to_key(ch: char) -> Option<(Key, bool)> {
    if ch.is_ascii_alphabetic() {
        let key = letter_key(ch.to_ascii_lowercase())?;
        return Some((key, ch.is_ascii_uppercase()));
    }
    let plain = match ch {
        '0' => Key::Num0,
        '1' => Key::Num1,
        '2' => Key::Num2,
        '3' => Key::Num3,
        '4' => Key::Num4,
        '5' => Key::Num5,
        '6' => Key::Num6,
        '7' => Key::Num7,
        '8' => Key::Num8,
        '9' => Key::Num9,
        ' ' => Key::Space,
        '\n' => Key::Return,
        '\t' => Key::Tab,
        '-' => Key::Minus,
        '=' => Key::Equal,
        '[' => Key::LeftBracket,
        ']' => Key::RightBracket,
        ';' => Key::SemiColon,
        '\'' => Key::Quote,
        '\\' => Key::BackSlash,
        ',' => Key::Comma,
        '.' => Key::Dot,
        '/' => Key::Slash,
        '`' => Key::BackQuote,
        _ => return shifted_symbol(ch).map(|key| (key, true)),
    };
    Some((plain, false))
}

fn shifted_symbol(ch: char) -> Option<Key> {
    let key = match ch {
        '!' => Key::Num1,
        '@' => Key::Num2,
        '#' => Key::Num3,
        '$' => Key::Num4,
        '%' => Key::Num5,
        '^' => Key::Num6,
        '&' => Key::Num7,
        '*' => Key::Num8,
        '(' => Key::Num9,
        ')' => Key::Num0,
        '_' => Key::Minus,
        '+' => Key::Equal,
        '{' => Key::LeftBracket,
        '}' => Key::RightBracket,
        ':' => Key::SemiColon,
        '"' => Key::Quote,
        '|' => Key::BackSlash,
        '<' => Key::Comma,
        '>' => Key::Dot,
        '?' => Key::Slash,
        '~' => Key::BackQuote,
        _ => return None,
    };
    Some(key)
}

fn letter_key(ch: char) -> Option<Key> {
    let key = match ch {
        'a' => Key::KeyA,
        'b' => Key::KeyB,
        'c' => Key::KeyC,
        'd' => Key::KeyD,
        'e' => Key::KeyE,
        'f' => Key::KeyF,
        'g' => Key::KeyG,
        'h' => Key::KeyH,
        'i' => Key::KeyI,
        'j' => Key::KeyJ,
        'k' => Key::KeyK,
        'l' => Key::KeyL,
        'm' => Key::KeyM,
        'n' => Key::KeyN,
        'o' => Key::KeyO,
        'p' => Key::KeyP,
        'q' => Key::KeyQ,
        'r' => Key::KeyR,
        's' => Key::KeyS,
        't' => Key::KeyT,
        'u' => Key::KeyU,
        'v' => Key::KeyV,
        'w' => Key::KeyW,
        'x' => Key::KeyX,
        'y' => Key::KeyY,
        'z' => Key::KeyZ,
        _ => return None,
    };
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letters_carry_shift_state() {
        assert!(matches!(char_to_key('a'), Some((Key::KeyA, false))));
        assert!(matches!(char_to_key('Q'), Some((Key::KeyQ, true))));
    }

    #[test]
    fn test_symbols_map_on_us_layout() {
        assert!(matches!(char_to_key('7'), Some((Key::Num7, false))));
        assert!(matches!(char_to_key('&'), Some((Key::Num7, true))));
        assert!(matches!(char_to_key('\n'), Some((Key::Return, false))));
    }

    #[test]
    fn test_non_ascii_has_no_key() {
        assert!(char_to_key('中').is_none());
        assert!(char_to_key('é').is_none());
    }
}
