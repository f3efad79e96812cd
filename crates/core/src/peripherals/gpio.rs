//! 8-bit output port latch.
//!
//! Used for the PORTD LED display on every node and for the coordinator's
//! PORTA select lines.

pub struct OutputPort {
    latch: u8,
    /// Debug counter: writes since reset
    pub dbg_writes: u64,
}

impl OutputPort {
    pub fn new(initial: u8) -> Self {
        OutputPort { latch: initial, dbg_writes: 0 }
    }

    pub fn write(&mut self, value: u8) {
        self.latch = value;
        self.dbg_writes += 1;
    }

    pub fn read(&self) -> u8 {
        self.latch
    }

    pub fn bit(&self, bit: u8) -> bool {
        self.latch & (1 << (bit & 7)) != 0
    }

    pub fn set_bit(&mut self, bit: u8, high: bool) {
        let mask = 1u8 << (bit & 7);
        let value = if high { self.latch | mask } else { self.latch & !mask };
        self.write(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_access() {
        let mut port = OutputPort::new(0);
        port.set_bit(7, true);
        assert_eq!(port.read(), 0x80);
        assert!(port.bit(7));
        port.set_bit(7, false);
        assert!(!port.bit(7));
        assert_eq!(port.dbg_writes, 2);
    }
}
