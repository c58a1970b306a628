// src/interrupts.rs
use core::ops::RangeInclusive;

/// Vectors below this are CPU exceptions.
pub const FIRST_EXTERNAL_VECTOR: u8 = 32;

pub const PIC_1_OFFSET: u8 = 32;
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

pub const TIMER_VECTOR: u8 = PIC_1_OFFSET;

/// IRQ7 on the master PIC and the local APIC spurious vector.
pub const SPURIOUS_VECTORS: [u8; 2] = [PIC_1_OFFSET + 7, 255];

pub const IPI_VECTORS: RangeInclusive<u8> = 240..=254;

/// Software interrupt used for system calls.
pub const SYSCALL_VECTOR: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptKind {
    Exception(u8),
    Timer,
    InterProcessor(u8),
    Spurious(u8),
    Unknown(u8),
}

impl InterruptKind {
    pub fn classify(vector: u8) -> Self {
        match vector {
            v if v < FIRST_EXTERNAL_VECTOR => InterruptKind::Exception(v),
            TIMER_VECTOR => InterruptKind::Timer,
            v if IPI_VECTORS.contains(&v) => InterruptKind::InterProcessor(v),
            v if SPURIOUS_VECTORS.contains(&v) => InterruptKind::Spurious(v),
            v => InterruptKind::Unknown(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_vectors() {
        assert_eq!(InterruptKind::classify(0), InterruptKind::Exception(0));
        assert_eq!(InterruptKind::classify(14), InterruptKind::Exception(14));
        assert_eq!(InterruptKind::classify(31), InterruptKind::Exception(31));
        assert_eq!(InterruptKind::classify(32), InterruptKind::Timer);
        assert_eq!(InterruptKind::classify(39), InterruptKind::Spurious(39));
        assert_eq!(InterruptKind::classify(255), InterruptKind::Spurious(255));
        assert_eq!(InterruptKind::classify(240), InterruptKind::InterProcessor(240));
        assert_eq!(InterruptKind::classify(254), InterruptKind::InterProcessor(254));
        assert_eq!(InterruptKind::classify(33), InterruptKind::Unknown(33));
        assert_eq!(InterruptKind::classify(SYSCALL_VECTOR), InterruptKind::Unknown(0x80));
    }
}
