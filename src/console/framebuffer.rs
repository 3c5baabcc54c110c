//! Framebuffer text console, drawn with embedded-graphics.
//!
//! This is the hardware end of the output path: a fixed cell grid over the
//! bootloader-provided linear framebuffer. It knows nothing about escape
//! sequences; it receives plain bytes plus the resolved color pair from the
//! ANSI filter and renders them with the 16-entry hardware palette.

use bootloader_api::info::{FrameBuffer, PixelFormat};
use embedded_graphics::{
    mono_font::{ascii::FONT_8X13, MonoTextStyle},
    pixelcolor::Rgb888,
    prelude::*,
    primitives::{PrimitiveStyle, Rectangle},
    text::{Baseline, Text},
    Drawable,
};

use super::{ansi::ColorPair, ConsoleSink};

const CHAR_WIDTH: usize = 8;
const CHAR_HEIGHT: usize = 13;
const TAB_STOP: usize = 8;

/// The classic 16-color hardware palette the ANSI filter indexes into.
pub const PALETTE: [Rgb888; 16] = [
    Rgb888::new(0x00, 0x00, 0x00), // 0 black
    Rgb888::new(0x00, 0x00, 0xaa), // 1 blue
    Rgb888::new(0x00, 0xaa, 0x00), // 2 green
    Rgb888::new(0x00, 0xaa, 0xaa), // 3 cyan
    Rgb888::new(0xaa, 0x00, 0x00), // 4 red
    Rgb888::new(0xaa, 0x00, 0xaa), // 5 magenta
    Rgb888::new(0xaa, 0x55, 0x00), // 6 brown
    Rgb888::new(0xaa, 0xaa, 0xaa), // 7 light gray
    Rgb888::new(0x55, 0x55, 0x55), // 8 dark gray
    Rgb888::new(0x55, 0x55, 0xff), // 9 light blue
    Rgb888::new(0x55, 0xff, 0x55), // 10 light green
    Rgb888::new(0x55, 0xff, 0xff), // 11 light cyan
    Rgb888::new(0xff, 0x55, 0x55), // 12 light red
    Rgb888::new(0xff, 0x55, 0xff), // 13 light magenta
    Rgb888::new(0xff, 0xff, 0x55), // 14 yellow
    Rgb888::new(0xff, 0xff, 0xff), // 15 white
];

pub struct FramebufferConsole {
    framebuffer: &'static mut [u8],
    width: usize,
    height: usize,
    stride: usize,
    bytes_per_pixel: usize,
    bgr: bool,
    cols: usize,
    rows: usize,
    col: usize,
    row: usize,
}

impl FramebufferConsole {
    pub fn new(fb: &'static mut FrameBuffer) -> Self {
        let info = fb.info();
        Self {
            width: info.width,
            height: info.height,
            stride: info.stride,
            bytes_per_pixel: info.bytes_per_pixel,
            bgr: matches!(info.pixel_format, PixelFormat::Bgr),
            cols: info.width / CHAR_WIDTH,
            rows: info.height / CHAR_HEIGHT,
            col: 0,
            row: 0,
            framebuffer: fb.buffer_mut(),
        }
    }

    /// Fill the whole screen with `bg` and home the cursor.
    pub fn clear(&mut self, bg: u8) {
        let rect = Rectangle::new(
            Point::zero(),
            Size::new(self.width as u32, self.height as u32),
        );
        rect.into_styled(PrimitiveStyle::with_fill(PALETTE[usize::from(bg & 0xf)]))
            .draw(self)
            .ok();
        self.col = 0;
        self.row = 0;
    }

    fn draw_cell(&mut self, ch: u8, colors: ColorPair) {
        let x = (self.col * CHAR_WIDTH) as i32;
        let y = (self.row * CHAR_HEIGHT) as i32;

        Rectangle::new(
            Point::new(x, y),
            Size::new(CHAR_WIDTH as u32, CHAR_HEIGHT as u32),
        )
        .into_styled(PrimitiveStyle::with_fill(PALETTE[usize::from(colors.bg & 0xf)]))
        .draw(self)
        .ok();

        let mut buf = [0u8; 4];
        let s = char::from(ch).encode_utf8(&mut buf);
        let style = MonoTextStyle::new(&FONT_8X13, PALETTE[usize::from(colors.fg & 0xf)]);
        Text::with_baseline(s, Point::new(x, y), style, Baseline::Top)
            .draw(self)
            .ok();
    }

    fn newline(&mut self, bg: u8) {
        self.col = 0;
        self.row += 1;
        if self.row >= self.rows {
            self.scroll(bg);
            self.row = self.rows - 1;
        }
    }

    /// Shift the pixel rows of one text line upward and clear the freed
    /// bottom line.
    fn scroll(&mut self, bg: u8) {
        let line_bytes = CHAR_HEIGHT * self.stride * self.bytes_per_pixel;
        let visible = self.rows * CHAR_HEIGHT * self.stride * self.bytes_per_pixel;
        self.framebuffer.copy_within(line_bytes..visible, 0);

        let y = ((self.rows - 1) * CHAR_HEIGHT) as i32;
        Rectangle::new(
            Point::new(0, y),
            Size::new(self.width as u32, CHAR_HEIGHT as u32),
        )
        .into_styled(PrimitiveStyle::with_fill(PALETTE[usize::from(bg & 0xf)]))
        .draw(self)
        .ok();
    }
}

impl ConsoleSink for FramebufferConsole {
    fn put(&mut self, byte: u8, colors: ColorPair) {
        match byte {
            b'\n' => self.newline(colors.bg),
            b'\r' => self.col = 0,
            0x08 => {
                if self.col > 0 {
                    self.col -= 1;
                    self.draw_cell(b' ', colors);
                }
            }
            b'\t' => {
                let next = (self.col / TAB_STOP + 1) * TAB_STOP;
                while self.col < next.min(self.cols) {
                    self.draw_cell(b' ', colors);
                    self.col += 1;
                }
                if self.col >= self.cols {
                    self.newline(colors.bg);
                }
            }
            _ => {
                if self.col >= self.cols {
                    self.newline(colors.bg);
                }
                let ch = if byte.is_ascii_graphic() || byte == b' ' {
                    byte
                } else {
                    b'?'
                };
                self.draw_cell(ch, colors);
                self.col += 1;
            }
        }
    }
}

impl DrawTarget for FramebufferConsole {
    type Color = Rgb888;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(Point { x, y }, color) in pixels {
            if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
                continue;
            }

            let offset = (y as usize * self.stride + x as usize) * self.bytes_per_pixel;
            if offset + self.bytes_per_pixel <= self.framebuffer.len() {
                let (a, b, c) = if self.bgr {
                    (color.b(), color.g(), color.r())
                } else {
                    (color.r(), color.g(), color.b())
                };
                self.framebuffer[offset] = a;
                self.framebuffer[offset + 1] = b;
                self.framebuffer[offset + 2] = c;
                if self.bytes_per_pixel == 4 {
                    self.framebuffer[offset + 3] = 255;
                }
            }
        }
        Ok(())
    }
}

impl OriginDimensions for FramebufferConsole {
    fn size(&self) -> Size {
        Size::new(self.width as u32, self.height as u32)
    }
}
