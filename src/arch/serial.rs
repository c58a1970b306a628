use lazy_static::lazy_static;
use spin::Mutex;
use uart_16550::SerialPort;

use crate::console::Console;

/// COM1
const COM1_PORT: u16 = 0x3f8;

lazy_static! {
    pub static ref SERIAL1: Mutex<SerialPort> = {
        let mut port = unsafe { SerialPort::new(COM1_PORT) };
        port.init();
        Mutex::new(port)
    };
}

pub struct SerialConsole;

impl Console for SerialConsole {
    fn write_byte(&mut self, byte: u8) {
        SERIAL1.lock().send(byte);
    }
}
