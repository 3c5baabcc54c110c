//! Blocking line input for the monitor prompt.
//!
//! Pulls scancodes from the keyboard driver, first from the IRQ-fed ring
//! buffer and then by polling the controller directly, so the prompt also
//! works inside a trap handler with interrupts disabled.

use alloc::string::String;
use spin::Mutex;

use crate::drivers::ps2_keyboard::{self, ScancodeDecoder};
use crate::{kprint, kprintln};

const LINE_CAPACITY: usize = 256;

// Modifier state survives across lines.
static DECODER: Mutex<ScancodeDecoder> = Mutex::new(ScancodeDecoder::new());

/// Print `prompt`, then block until the operator finishes a line. Echoes
/// input, handles backspace rubout and Ctrl-C line abort.
pub fn readline(prompt: &str) -> String {
    kprint!("{}", prompt);
    let mut line = String::new();

    loop {
        let scancode = match ps2_keyboard::dequeue_scancode().or_else(ps2_keyboard::poll_scancode)
        {
            Some(scancode) => scancode,
            None => {
                core::hint::spin_loop();
                continue;
            }
        };

        let key = match DECODER.lock().process_scancode(scancode) {
            Some(key) => key,
            None => continue,
        };

        if key.ctrl && key.character == 'c' {
            kprintln!("^C");
            line.clear();
            kprint!("{}", prompt);
            continue;
        }

        match key.character {
            '\n' => {
                kprintln!();
                return line;
            }
            '\x08' => {
                if line.pop().is_some() {
                    kprint!("\x08");
                }
            }
            ch if ch.is_ascii() && !ch.is_control() => {
                if line.len() < LINE_CAPACITY {
                    line.push(ch);
                    kprint!("{}", ch);
                }
            }
            _ => {}
        }
    }
}
