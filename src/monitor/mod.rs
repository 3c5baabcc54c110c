//! # Kernel Debug Monitor
//!
//! Interactive command interpreter for inspecting and mutating kernel state
//! while the kernel is halted at a breakpoint or running interactively.
//!
//! ## Commands
//!
//! - `help`: list the registered commands
//! - `kerninfo`: kernel layout and allocator facts
//! - `backtrace`: walk the frame-pointer chain with symbol resolution
//! - `showmappings <0xbegin> <0xend>`: enumerate page mappings in a range
//! - `setm <0xaddr> <0|1> <p|w|u>`: clear or set one permission bit
//! - `exit`: leave the monitor loop
//!
//! Commands live in a fixed, insertion-ordered table; lookup is a
//! case-sensitive scan in registration order, first match wins. Handlers
//! report usage errors to the operator and keep the loop running; only
//! `exit` (or any future handler returning [`Outcome::Exit`]) terminates it.

use crate::backtrace::symbols::SymbolResolver;
use crate::backtrace::{self, FrameReader};
use crate::memory::paging::{
    AddressRange, AddressSpace, EntryFlags, FrameAlloc, PermSummary, PhysMapper, VirtualAddress,
};
use crate::{kprint, kprintln};

pub mod readline;

/// Upper bound on tokens per line, including the command name.
pub const MAXARGS: usize = 16;

/// What the dispatcher should do after a line.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Outcome {
    Continue,
    Exit,
}

#[derive(Copy, Clone)]
enum Handler {
    Help,
    KernInfo,
    Backtrace,
    ShowMappings,
    SetPerm,
    Exit,
}

struct Command {
    name: &'static str,
    desc: &'static str,
    handler: Handler,
}

static COMMANDS: &[Command] = &[
    Command {
        name: "help",
        desc: "Display this list of commands",
        handler: Handler::Help,
    },
    Command {
        name: "kerninfo",
        desc: "Display information about the kernel",
        handler: Handler::KernInfo,
    },
    Command {
        name: "backtrace",
        desc: "Display information about the stack",
        handler: Handler::Backtrace,
    },
    Command {
        name: "showmappings",
        desc: "Display physical page mappings and corresponding permission bits",
        handler: Handler::ShowMappings,
    },
    Command {
        name: "setm",
        desc: "Set or clear the permission bits in a particular page",
        handler: Handler::SetPerm,
    },
    Command {
        name: "exit",
        desc: "Leave the monitor and resume the interrupted kernel",
        handler: Handler::Exit,
    },
];

/// Static facts shown by `kerninfo`.
#[derive(Copy, Clone, Debug, Default)]
pub struct KernelInfo {
    pub entry: u64,
    pub heap: (u64, u64),
    pub frame_window: (u64, u64),
}

/// The monitor bundles the external collaborators it inspects through:
/// the staged address space, the table-frame allocator, the stack reader,
/// and the symbol resolver.
pub struct Monitor<'m, M: PhysMapper> {
    space: AddressSpace<'m, M>,
    frames: &'m mut dyn FrameAlloc,
    reader: &'m dyn FrameReader,
    symbols: &'m dyn SymbolResolver,
    frame_base: fn() -> u64,
    info: KernelInfo,
}

impl<'m, M: PhysMapper> Monitor<'m, M> {
    pub fn new(
        space: AddressSpace<'m, M>,
        frames: &'m mut dyn FrameAlloc,
        reader: &'m dyn FrameReader,
        symbols: &'m dyn SymbolResolver,
        frame_base: fn() -> u64,
        info: KernelInfo,
    ) -> Self {
        Self {
            space,
            frames,
            reader,
            symbols,
            frame_base,
            info,
        }
    }

    /// Read-eval loop: blocks on line input until a handler exits.
    pub fn run(&mut self) {
        kprintln!("Welcome to the kmon kernel monitor!");
        kprintln!("Type 'help' for a list of commands.");

        loop {
            let line = readline::readline("kmon> ");
            if self.execute(&line) == Outcome::Exit {
                break;
            }
        }
    }

    /// Dispatch one input line. Tokens are substring views of `line`; the
    /// line itself is never modified.
    pub fn execute(&mut self, line: &str) -> Outcome {
        let mut argv = [""; MAXARGS];
        let mut argc = 0;

        for token in line.split_whitespace() {
            if argc == MAXARGS - 1 {
                kprintln!("Too many arguments (max {})", MAXARGS);
                return Outcome::Continue;
            }
            argv[argc] = token;
            argc += 1;
        }
        if argc == 0 {
            return Outcome::Continue;
        }
        let args = &argv[..argc];

        for command in COMMANDS {
            if command.name == args[0] {
                return self.invoke(command.handler, args);
            }
        }
        kprintln!("Unknown command '{}'", args[0]);
        Outcome::Continue
    }

    fn invoke(&mut self, handler: Handler, args: &[&str]) -> Outcome {
        match handler {
            Handler::Help => self.cmd_help(),
            Handler::KernInfo => self.cmd_kerninfo(),
            Handler::Backtrace => self.cmd_backtrace(),
            Handler::ShowMappings => self.cmd_showmappings(args),
            Handler::SetPerm => self.cmd_setm(args),
            Handler::Exit => Outcome::Exit,
        }
    }

    fn cmd_help(&self) -> Outcome {
        for command in COMMANDS {
            kprintln!("{} - {}", command.name, command.desc);
        }
        Outcome::Continue
    }

    fn cmd_kerninfo(&self) -> Outcome {
        kprintln!("Kernel monitor information:");
        kprintln!("  entry            {:#018x}", self.info.entry);
        kprintln!(
            "  heap             {:#018x} - {:#018x}",
            self.info.heap.0,
            self.info.heap.1
        );
        kprintln!(
            "  frame window     {:#010x} - {:#010x}",
            self.info.frame_window.0,
            self.info.frame_window.1
        );
        kprintln!(
            "  next free frame  {:#010x}",
            crate::memory::next_free_frame()
        );
        kprintln!(
            "  staged root      {:#010x}",
            self.space.root().as_u32()
        );
        Outcome::Continue
    }

    fn cmd_backtrace(&self) -> Outcome {
        kprintln!("Stack backtrace:");
        for step in backtrace::unwind(self.reader, (self.frame_base)()) {
            match step {
                Ok(frame) => {
                    kprintln!(
                        "  fp {:#018x}  ret {:#018x}",
                        frame.frame_base,
                        frame.return_addr
                    );
                    kprint!("    args");
                    for arg in frame.args {
                        kprint!(" {:#x}", arg);
                    }
                    kprintln!();
                    match self.symbols.resolve(frame.return_addr) {
                        Some(sym) => kprintln!(
                            "    {}:{}: {}+{:#x}",
                            sym.file,
                            sym.line,
                            sym.name,
                            frame.return_addr - sym.func_start
                        ),
                        None => kprintln!("    unknown position"),
                    }
                }
                Err(bad) => {
                    kprintln!("  unreadable frame at {:#x}", bad.at);
                }
            }
        }
        Outcome::Continue
    }

    fn cmd_showmappings(&self, args: &[&str]) -> Outcome {
        let (begin, end) = match args {
            [_, begin, end] => match (parse_hex(begin), parse_hex(end)) {
                (Some(b), Some(e)) => (b, e),
                _ => return self.usage_showmappings(),
            },
            _ => return self.usage_showmappings(),
        };

        kprintln!("begin: {:#x}, end: {:#x}", begin, end);
        for (covers, view) in self.space.mappings(AddressRange { begin, end }) {
            match view {
                Some(mapping) => {
                    let size = covers.end.wrapping_sub(covers.begin);
                    let phys = mapping.phys_base.as_u32();
                    kprintln!(
                        "{:#010x} - {:#010x} -> {:#010x} - {:#010x}  {}",
                        covers.begin,
                        covers.end,
                        phys,
                        phys.wrapping_add(size),
                        PermSummary(mapping.flags)
                    );
                }
                None => kprintln!("no mapping: {:#010x}", covers.begin),
            }
        }
        Outcome::Continue
    }

    fn usage_showmappings(&self) -> Outcome {
        kprintln!("Usage: showmappings 0x<begin_addr> 0x<end_addr>");
        Outcome::Continue
    }

    fn cmd_setm(&mut self, args: &[&str]) -> Outcome {
        let (addr, enable, flag) = match args {
            [_, addr, op, bit] => {
                let addr = parse_hex(addr);
                let enable = match *op {
                    "0" => Some(false),
                    "1" => Some(true),
                    _ => None,
                };
                let flag = match *bit {
                    "p" => Some(EntryFlags::PRESENT),
                    "w" => Some(EntryFlags::WRITABLE),
                    "u" => Some(EntryFlags::USER),
                    _ => None,
                };
                match (addr, enable, flag) {
                    (Some(a), Some(e), Some(f)) => (a, e, f),
                    _ => return self.usage_setm(),
                }
            }
            _ => return self.usage_setm(),
        };

        let va = VirtualAddress::new(addr);
        let entry = match self.space.locate_mut(&mut *self.frames, va) {
            Ok(entry) => entry,
            // Running out of table frames is an unrecoverable kernel
            // condition, not a prompt error.
            Err(err) => panic!("setm: {}", err),
        };

        kprintln!("page {:#010x} before: {}", addr, PermSummary(entry.flags()));
        entry.set_flag(flag, enable);
        kprintln!("page {:#010x} after:  {}", addr, PermSummary(entry.flags()));
        Outcome::Continue
    }

    fn usage_setm(&self) -> Outcome {
        kprintln!("Usage: setm 0x<addr> [0|1: clear or set] [p|w|u]");
        Outcome::Continue
    }
}

/// Parse a `0x`-prefixed hexadecimal argument. Anything else, including a
/// non-hex character in the body, is rejected so a typo can never silently
/// target the wrong page.
fn parse_hex(s: &str) -> Option<u32> {
    let body = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
    u32::from_str_radix(body, 16).ok()
}
