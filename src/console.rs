// Console output for kestrel
//
// Two sinks exist: the global diagnostic sink behind `kprint!`/`kprintln!`,
// and the terminal owned by each kernel instance that user processes write
// to through the print syscalls. Both are plain `Console` implementations.
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use lazy_static::lazy_static;
use spin::Mutex;

/// One-way byte sink. Writes never fail and never wait for a reader.
pub trait Console: Send {
    fn write_byte(&mut self, byte: u8);

    fn write_str(&mut self, text: &str) {
        for byte in text.bytes() {
            self.write_byte(byte);
        }
    }
}

/// Writes `bytes` up to (not including) the first NUL.
pub fn kprints(console: &mut dyn Console, bytes: &[u8]) {
    for &byte in bytes.iter().take_while(|&&b| b != 0) {
        console.write_byte(byte);
    }
}

/// Writes `value` as exactly 16 lowercase hex digits.
pub fn kprinthex(console: &mut dyn Console, value: u64) {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    for shift in (0..16).rev() {
        console.write_byte(HEX[((value >> (shift * 4)) & 0xf) as usize]);
    }
}

/// Console that appends everything to a shared in-memory buffer.
///
/// Cloning yields another handle onto the same buffer, so a caller can hand
/// one half to the kernel and keep the other to inspect the output.
#[derive(Clone, Default)]
pub struct BufferConsole {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl BufferConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.buffer.lock().clone()
    }

    pub fn take(&self) -> Vec<u8> {
        core::mem::take(&mut *self.buffer.lock())
    }
}

impl Console for BufferConsole {
    fn write_byte(&mut self, byte: u8) {
        self.buffer.lock().push(byte);
    }
}

/// Console that drops everything.
pub struct NullConsole;

impl Console for NullConsole {
    fn write_byte(&mut self, _byte: u8) {}
}

lazy_static! {
    static ref SINK: Mutex<Option<Box<dyn Console>>> = Mutex::new(None);
}

/// Installs the diagnostic sink and returns the previous one.
pub fn install(console: Box<dyn Console>) -> Option<Box<dyn Console>> {
    SINK.lock().replace(console)
}

/// Removes the diagnostic sink; later output is discarded.
pub fn uninstall() -> Option<Box<dyn Console>> {
    SINK.lock().take()
}

struct Adapter<'a>(&'a mut dyn Console);

impl fmt::Write for Adapter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use core::fmt::Write;

    if let Some(console) = SINK.lock().as_mut() {
        let _ = Adapter(console.as_mut()).write_fmt(args);
    }
}

#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => ($crate::console::_print(format_args!($($arg)*)));
}

#[macro_export]
macro_rules! kprintln {
    () => ($crate::kprint!("\n"));
    ($($arg:tt)*) => ($crate::kprint!("{}\n", format_args!($($arg)*)));
}
