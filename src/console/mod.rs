//! Console output path.
//!
//! Every byte of formatted output flows `kprint!` → [`AnsiFilter`] →
//! [`ConsoleSink`]. The kernel sink paints the framebuffer console and
//! mirrors raw bytes to the serial port; tests substitute recording sinks.

use core::fmt::{self, Write};

use bootloader_api::info::FrameBuffer;
use spin::Mutex;
use uart_16550::SerialPort;

pub mod ansi;
pub mod framebuffer;

pub use ansi::{AnsiFilter, ColorPair};
pub use framebuffer::FramebufferConsole;

/// Raw console output primitive. Assumed to always succeed.
pub trait ConsoleSink {
    fn put(&mut self, byte: u8, colors: ColorPair);
}

pub static SERIAL: Mutex<SerialPort> = Mutex::new(unsafe { SerialPort::new(0x3F8) });

/// Framebuffer console plus a raw serial mirror.
pub struct KernelSink {
    fb: FramebufferConsole,
}

impl ConsoleSink for KernelSink {
    fn put(&mut self, byte: u8, colors: ColorPair) {
        self.fb.put(byte, colors);
        SERIAL.lock().send(byte);
    }
}

static CONSOLE: Mutex<Option<AnsiFilter<KernelSink>>> = Mutex::new(None);

/// Bring up the filtered console over the boot framebuffer.
pub fn init(fb: &'static mut FrameBuffer) {
    SERIAL.lock().init();

    let mut console = FramebufferConsole::new(fb);
    console.clear(ansi::DEFAULT_BG);
    *CONSOLE.lock() = Some(AnsiFilter::new(KernelSink { fb: console }));
}

struct CountingWriter<'a, S: ConsoleSink> {
    filter: &'a mut AnsiFilter<S>,
    count: usize,
}

impl<S: ConsoleSink> Write for CountingWriter<'_, S> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            self.filter.putc(byte);
            self.count += 1;
        }
        Ok(())
    }
}

/// Formatted-output entry point: routes every byte through the ANSI filter
/// and returns the number of bytes produced. A no-op before `init`.
pub fn format_and_emit(args: fmt::Arguments) -> usize {
    let mut guard = CONSOLE.lock();
    match guard.as_mut() {
        Some(filter) => {
            let mut writer = CountingWriter { filter, count: 0 };
            let _ = writer.write_fmt(args);
            writer.count
        }
        None => 0,
    }
}

#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {{
        $crate::console::format_and_emit(core::format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! kprintln {
    () => { $crate::kprint!("\n") };
    ($($arg:tt)*) => {
        $crate::kprint!("{}\n", core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! serial_println {
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let mut serial = $crate::console::SERIAL.lock();
        let _ = writeln!(serial, $($arg)*);
    }};
}
