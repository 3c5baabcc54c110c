//! # ANSI Output Filter
//!
//! Stateful per-character transducer between formatted output and the raw
//! console sink. Recognizes CSI color sequences (`ESC [ ... m`) embedded in
//! the output stream, folds them into a persistent foreground/background
//! color pair, and forwards every plain character to the sink together with
//! the colors in effect.
//!
//! ## States
//!
//! | State         | Meaning                                         |
//! |---------------|-------------------------------------------------|
//! | `Normal`      | plain text, forwarded verbatim                  |
//! | `EscapeStart` | saw ESC, waiting for `[`                        |
//! | `Escaping`    | accumulating parameter bytes until a letter     |
//! | `Overflow`    | parameter buffer exhausted, discarding to letter|
//!
//! Transitions are mutually exclusive per character: a byte is handled by
//! exactly one state arm. Nothing seen in `Escaping` or `Overflow` ever
//! reaches the sink.

use super::ConsoleSink;

/// Escape introducer (`ESC`, `\x1b`).
const ESC: u8 = 0x1b;

/// Parameter buffer capacity; a sequence longer than this overflows and is
/// discarded without applying any color change.
const PARAM_CAPACITY: usize = 99;

/// Default colors: light gray on black.
pub const DEFAULT_FG: u8 = 7;
pub const DEFAULT_BG: u8 = 0;

/// ANSI color number (0-9, after subtracting the 30/40 base) to hardware
/// palette index. The tail covers the bright variants so the full 16-entry
/// palette stays reachable through a single table.
const ANSI_TO_PALETTE: [u8; 16] = [0, 4, 2, 6, 1, 5, 3, 7, 8, 12, 10, 14, 9, 13, 11, 15];

/// Foreground/background palette indices currently in effect.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ColorPair {
    pub fg: u8,
    pub bg: u8,
}

impl ColorPair {
    pub const fn default_colors() -> Self {
        Self {
            fg: DEFAULT_FG,
            bg: DEFAULT_BG,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum State {
    Normal,
    EscapeStart,
    Escaping,
    Overflow,
}

/// The filter owns its sink, its FSM state and the color pair, so its
/// lifecycle is scoped to console bring-up rather than a process-wide
/// variable.
pub struct AnsiFilter<S> {
    sink: S,
    state: State,
    params: [u8; PARAM_CAPACITY],
    param_len: usize,
    colors: ColorPair,
}

impl<S: ConsoleSink> AnsiFilter<S> {
    pub const fn new(sink: S) -> Self {
        Self {
            sink,
            state: State::Normal,
            params: [0; PARAM_CAPACITY],
            param_len: 0,
            colors: ColorPair::default_colors(),
        }
    }

    /// Colors currently in effect.
    pub fn colors(&self) -> ColorPair {
        self.colors
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Feed one byte of formatted output through the filter.
    pub fn putc(&mut self, byte: u8) {
        match self.state {
            State::Normal => {
                if byte == ESC {
                    self.state = State::EscapeStart;
                } else {
                    self.sink.put(byte, self.colors);
                }
            }
            State::EscapeStart => {
                if byte == b'[' {
                    self.state = State::Escaping;
                } else {
                    // False escape start: forward the introducer and this
                    // byte verbatim, then resume plain text.
                    self.sink.put(ESC, self.colors);
                    self.sink.put(byte, self.colors);
                    self.state = State::Normal;
                }
            }
            State::Escaping => {
                if byte.is_ascii_alphabetic() {
                    if byte == b'm' {
                        self.apply_params();
                    }
                    self.param_len = 0;
                    self.state = State::Normal;
                } else if self.param_len == PARAM_CAPACITY {
                    self.param_len = 0;
                    self.state = State::Overflow;
                } else {
                    self.params[self.param_len] = byte;
                    self.param_len += 1;
                }
            }
            State::Overflow => {
                if byte.is_ascii_alphabetic() {
                    self.state = State::Normal;
                }
            }
        }
    }

    /// Apply the accumulated `;`-separated SGR codes to the color pair.
    fn apply_params(&mut self) {
        let len = self.param_len;
        let mut buf = [0u8; PARAM_CAPACITY];
        buf[..len].copy_from_slice(&self.params[..len]);
        for part in buf[..len].split(|&b| b == b';') {
            self.apply_code(decimal_value(part));
        }
    }

    fn apply_code(&mut self, code: u32) {
        match code {
            0 => self.colors = ColorPair::default_colors(),
            30..=39 => self.colors.fg = ANSI_TO_PALETTE[(code - 30) as usize],
            40..=49 => self.colors.bg = ANSI_TO_PALETTE[(code - 40) as usize],
            _ => {}
        }
    }
}

/// Decimal value of a parameter segment. Non-digit bytes are skipped; an
/// empty segment reads as 0, which is the SGR reset.
fn decimal_value(part: &[u8]) -> u32 {
    let mut value: u32 = 0;
    for &b in part {
        if b.is_ascii_digit() {
            value = value.wrapping_mul(10).wrapping_add(u32::from(b - b'0'));
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    /// Records every byte reaching the sink with the colors in effect.
    struct Recorder {
        out: Vec<(u8, ColorPair)>,
    }

    impl Recorder {
        fn new() -> Self {
            Self { out: Vec::new() }
        }
    }

    impl ConsoleSink for Recorder {
        fn put(&mut self, byte: u8, colors: ColorPair) {
            self.out.push((byte, colors));
        }
    }

    fn feed(filter: &mut AnsiFilter<Recorder>, text: &str) {
        for b in text.bytes() {
            filter.putc(b);
        }
    }

    #[test]
    fn plain_text_passes_through_with_default_colors() {
        let mut f = AnsiFilter::new(Recorder::new());
        feed(&mut f, "ok");
        let out = &f.sink_mut().out;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], (b'o', ColorPair::default_colors()));
        assert_eq!(out[1], (b'k', ColorPair::default_colors()));
    }

    #[test]
    fn red_sequence_recolors_and_reset_restores_defaults() {
        let mut f = AnsiFilter::new(Recorder::new());
        feed(&mut f, "\x1b[31mRED\x1b[0m");

        // Exactly R, E, D reach the sink, each painted ANSI red, which the
        // palette remap turns into hardware index 4.
        let out = &f.sink_mut().out;
        assert_eq!(out.len(), 3);
        for (expected, &(byte, colors)) in b"RED".iter().zip(out.iter()) {
            assert_eq!(byte, *expected);
            assert_eq!(colors.fg, 4);
            assert_eq!(colors.bg, DEFAULT_BG);
        }
        assert_eq!(f.colors(), ColorPair::default_colors());
    }

    #[test]
    fn background_and_multiple_params() {
        let mut f = AnsiFilter::new(Recorder::new());
        feed(&mut f, "\x1b[33;44mx");
        assert_eq!(f.colors().fg, 6); // ANSI yellow -> hardware 6
        assert_eq!(f.colors().bg, 1); // ANSI blue -> hardware 1
        assert_eq!(f.sink_mut().out.len(), 1);
    }

    #[test]
    fn codes_outside_color_ranges_are_ignored() {
        let mut f = AnsiFilter::new(Recorder::new());
        feed(&mut f, "\x1b[31m\x1b[99m");
        assert_eq!(f.colors().fg, 4);
    }

    #[test]
    fn empty_parameter_list_is_a_reset() {
        let mut f = AnsiFilter::new(Recorder::new());
        feed(&mut f, "\x1b[31m\x1b[m");
        assert_eq!(f.colors(), ColorPair::default_colors());
    }

    #[test]
    fn non_sgr_terminator_applies_nothing() {
        let mut f = AnsiFilter::new(Recorder::new());
        feed(&mut f, "\x1b[31Hx");
        assert_eq!(f.colors(), ColorPair::default_colors());
        assert_eq!(f.sink_mut().out, [(b'x', ColorPair::default_colors())]);
    }

    #[test]
    fn false_escape_start_forwards_both_bytes_once() {
        let mut f = AnsiFilter::new(Recorder::new());
        feed(&mut f, "\x1b?x");
        let bytes: Vec<u8> = f.sink_mut().out.iter().map(|&(b, _)| b).collect();
        // Introducer and the unexpected byte recover verbatim; the byte is
        // not also consumed as an escape parameter.
        assert_eq!(bytes, [ESC, b'?', b'x']);
        assert_eq!(f.colors(), ColorPair::default_colors());
    }

    #[test]
    fn overflowing_sequence_forwards_nothing_until_a_letter() {
        let mut f = AnsiFilter::new(Recorder::new());
        f.putc(ESC);
        f.putc(b'[');
        for _ in 0..150 {
            f.putc(b'1');
        }
        assert!(f.sink_mut().out.is_empty());

        // A letter leaves Overflow without any color change.
        f.putc(b'm');
        assert_eq!(f.colors(), ColorPair::default_colors());
        f.putc(b'x');
        assert_eq!(f.sink_mut().out, [(b'x', ColorPair::default_colors())]);
    }
}
