// VGA text mode terminal
use lazy_static::lazy_static;
use spin::Mutex;
use volatile::Volatile;

use crate::console::Console;

const BUFFER_HEIGHT: usize = 25;
const BUFFER_WIDTH: usize = 80;
/// Rows above this are left to the boot screen.
const FIRST_ROW: usize = 5;
const COLOR: u8 = 0x0f;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
struct ScreenChar {
    ascii: u8,
    color: u8,
}

const BLANK: ScreenChar = ScreenChar {
    ascii: b' ',
    color: COLOR,
};

#[repr(transparent)]
struct Buffer {
    chars: [[Volatile<ScreenChar>; BUFFER_WIDTH]; BUFFER_HEIGHT],
}

pub struct Writer {
    row: usize,
    column: usize,
    buffer: &'static mut Buffer,
}

impl Writer {
    /// Lines longer than the screen are cut off at the last column.
    pub fn write_byte(&mut self, byte: u8) {
        match byte {
            b'\n' => self.new_line(),
            _ if self.column >= BUFFER_WIDTH => {}
            byte => {
                let ascii = match byte {
                    0x20..=0x7e => byte,
                    _ => 0xfe,
                };
                self.buffer.chars[self.row][self.column].write(ScreenChar { ascii, color: COLOR });
                self.column += 1;
            }
        }
    }

    fn new_line(&mut self) {
        self.column = 0;
        if self.row + 1 < BUFFER_HEIGHT {
            self.row += 1;
            return;
        }
        for row in FIRST_ROW + 1..BUFFER_HEIGHT {
            for col in 0..BUFFER_WIDTH {
                let character = self.buffer.chars[row][col].read();
                self.buffer.chars[row - 1][col].write(character);
            }
        }
        for col in 0..BUFFER_WIDTH {
            self.buffer.chars[BUFFER_HEIGHT - 1][col].write(BLANK);
        }
    }
}

lazy_static! {
    pub static ref WRITER: Mutex<Writer> = Mutex::new(Writer {
        row: FIRST_ROW,
        column: 0,
        // SAFETY: 0xb8000 is the identity-mapped VGA text buffer.
        buffer: unsafe { &mut *(0xb8000 as *mut Buffer) },
    });
}

/// The user terminal.
pub struct VgaConsole;

impl Console for VgaConsole {
    fn write_byte(&mut self, byte: u8) {
        WRITER.lock().write_byte(byte);
    }
}
