//! PS/2 keyboard input.
//!
//! The IRQ1 handler enqueues raw scancodes into a lock-free ring buffer;
//! `poll_scancode` reads the controller directly so input keeps working
//! while interrupts are disabled (the monitor runs inside the breakpoint
//! trap). Both paths feed the same set-1 decoder.

use core::sync::atomic::{AtomicUsize, Ordering};

use x86_64::instructions::port::Port;

const BUFFER_SIZE: usize = 256;

const STATUS_PORT: u16 = 0x64;
const DATA_PORT: u16 = 0x60;
const STATUS_OUTPUT_FULL: u8 = 1 << 0;
const STATUS_AUX_DATA: u8 = 1 << 5;

static mut RING_BUF: [u8; BUFFER_SIZE] = [0; BUFFER_SIZE];
static HEAD: AtomicUsize = AtomicUsize::new(0);
static TAIL: AtomicUsize = AtomicUsize::new(0);

pub fn enqueue_scancode(scancode: u8) {
    let head = HEAD.load(Ordering::Relaxed);
    let next = head.wrapping_add(1) % BUFFER_SIZE;
    let tail = TAIL.load(Ordering::Acquire);
    if next != tail {
        unsafe {
            RING_BUF[head] = scancode;
        }
        HEAD.store(next, Ordering::Release);
    }
}

pub fn dequeue_scancode() -> Option<u8> {
    let tail = TAIL.load(Ordering::Relaxed);
    let head = HEAD.load(Ordering::Acquire);
    if tail == head {
        None
    } else {
        let scancode = unsafe { RING_BUF[tail] };
        let next = tail.wrapping_add(1) % BUFFER_SIZE;
        TAIL.store(next, Ordering::Release);
        Some(scancode)
    }
}

/// Read a scancode straight from the controller, bypassing the IRQ path.
/// Ignores auxiliary (mouse) bytes.
pub fn poll_scancode() -> Option<u8> {
    let mut status_port = Port::<u8>::new(STATUS_PORT);
    let mut data_port = Port::<u8>::new(DATA_PORT);

    let status: u8 = unsafe { status_port.read() };
    if status & STATUS_OUTPUT_FULL == 0 {
        return None;
    }
    let data: u8 = unsafe { data_port.read() };
    if status & STATUS_AUX_DATA != 0 {
        return None;
    }
    Some(data)
}

#[derive(Copy, Clone, Debug)]
pub struct KeyEvent {
    pub character: char,
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
}

const SC_LSHIFT: u8 = 0x2A;
const SC_RSHIFT: u8 = 0x36;
const SC_CTRL: u8 = 0x1D;
const SC_ALT: u8 = 0x38;

/// Set-1 make codes to (plain, shifted) ASCII; 0 marks keys with no
/// character meaning here.
const KEYMAP: [(u8, u8); 0x3A] = [
    (0, 0),         // 0x00
    (0, 0),         // 0x01 esc
    (b'1', b'!'),
    (b'2', b'@'),
    (b'3', b'#'),
    (b'4', b'$'),
    (b'5', b'%'),
    (b'6', b'^'),
    (b'7', b'&'),
    (b'8', b'*'),
    (b'9', b'('),
    (b'0', b')'),
    (b'-', b'_'),
    (b'=', b'+'),
    (0x08, 0x08),   // 0x0e backspace
    (b'\t', b'\t'),
    (b'q', b'Q'),
    (b'w', b'W'),
    (b'e', b'E'),
    (b'r', b'R'),
    (b't', b'T'),
    (b'y', b'Y'),
    (b'u', b'U'),
    (b'i', b'I'),
    (b'o', b'O'),
    (b'p', b'P'),
    (b'[', b'{'),
    (b']', b'}'),
    (b'\n', b'\n'), // 0x1c enter
    (0, 0),         // 0x1d ctrl
    (b'a', b'A'),
    (b's', b'S'),
    (b'd', b'D'),
    (b'f', b'F'),
    (b'g', b'G'),
    (b'h', b'H'),
    (b'j', b'J'),
    (b'k', b'K'),
    (b'l', b'L'),
    (b';', b':'),
    (b'\'', b'"'),
    (b'`', b'~'),
    (0, 0),         // 0x2a left shift
    (b'\\', b'|'),
    (b'z', b'Z'),
    (b'x', b'X'),
    (b'c', b'C'),
    (b'v', b'V'),
    (b'b', b'B'),
    (b'n', b'N'),
    (b'm', b'M'),
    (b',', b'<'),
    (b'.', b'>'),
    (b'/', b'?'),
    (0, 0),         // 0x36 right shift
    (b'*', b'*'),
    (0, 0),         // 0x38 alt
    (b' ', b' '),
];

pub struct ScancodeDecoder {
    is_extended: bool,
    shift_pressed: bool,
    ctrl_pressed: bool,
    alt_pressed: bool,
}

impl ScancodeDecoder {
    pub const fn new() -> Self {
        Self {
            is_extended: false,
            shift_pressed: false,
            ctrl_pressed: false,
            alt_pressed: false,
        }
    }

    pub fn process_scancode(&mut self, scancode: u8) -> Option<KeyEvent> {
        if scancode == 0xE0 {
            self.is_extended = true;
            return None;
        }

        let is_release = scancode & 0x80 != 0;
        let key_code = scancode & 0x7F;

        match key_code {
            SC_LSHIFT | SC_RSHIFT => {
                self.shift_pressed = !is_release;
                return None;
            }
            SC_CTRL => {
                self.ctrl_pressed = !is_release;
                return None;
            }
            SC_ALT => {
                self.alt_pressed = !is_release;
                return None;
            }
            _ => {}
        }

        let extended = self.is_extended;
        self.is_extended = false;
        if is_release || extended {
            return None;
        }

        let (plain, shifted) = *KEYMAP.get(usize::from(key_code))?;
        let byte = if self.shift_pressed { shifted } else { plain };
        if byte == 0 {
            return None;
        }

        Some(KeyEvent {
            character: char::from(byte),
            ctrl: self.ctrl_pressed,
            alt: self.alt_pressed,
            shift: self.shift_pressed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_letters_with_shift_state() {
        let mut decoder = ScancodeDecoder::new();
        assert_eq!(decoder.process_scancode(0x23).unwrap().character, 'h');
        assert!(decoder.process_scancode(0x2A).is_none()); // shift down
        assert_eq!(decoder.process_scancode(0x23).unwrap().character, 'H');
        assert!(decoder.process_scancode(0xAA).is_none()); // shift up
        assert_eq!(decoder.process_scancode(0x23).unwrap().character, 'h');
    }

    #[test]
    fn ctrl_is_reported_alongside_the_character() {
        let mut decoder = ScancodeDecoder::new();
        decoder.process_scancode(0x1D); // ctrl down
        let key = decoder.process_scancode(0x2E).unwrap(); // 'c'
        assert_eq!(key.character, 'c');
        assert!(key.ctrl);
    }

    #[test]
    fn releases_and_extended_codes_emit_nothing() {
        let mut decoder = ScancodeDecoder::new();
        assert!(decoder.process_scancode(0xA3).is_none()); // release
        assert!(decoder.process_scancode(0xE0).is_none()); // extended prefix
        assert!(decoder.process_scancode(0x48).is_none()); // extended arrow
    }
}
