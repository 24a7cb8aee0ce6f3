/// Numeric identifier of a digital line, as wired on the board.
pub type Pin = u8;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Level {
    Low,
    High,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Direction {
    Input,
    Output,
}

/// Single-line digital I/O. On a bare-metal target this wraps memory-mapped
/// GPIO; in tests it is a simulated pin bank driven by the test.
pub trait PinIo {
    fn read(&mut self, pin: Pin) -> Level;
    fn write(&mut self, pin: Pin, level: Level);
    fn configure(&mut self, pin: Pin, direction: Direction);
}

/// The WD1770 socket, as pin numbers.
///
/// Data lines are bidirectional and owned by the engine only during read
/// cycles. A0/A1/CS/RW/DDEN/DS0/DS1 are inputs, INTRQ/DRQ are outputs.
#[derive(Clone, Copy, Debug)]
pub struct PinAssignment {
    pub data: [Pin; 8],
    pub a0: Pin,
    pub a1: Pin,
    pub cs: Pin,
    pub rw: Pin,
    pub intrq: Pin,
    pub drq: Pin,
    pub dden: Pin,
    pub ds0: Pin,
    pub ds1: Pin,
}

impl PinAssignment {
    /// Default wiring used by the simulated bank: D0..D7 on 0..7, control
    /// lines following.
    pub fn simulated() -> PinAssignment {
        PinAssignment {
            data: [0, 1, 2, 3, 4, 5, 6, 7],
            a0: 8,
            a1: 9,
            cs: 10,
            rw: 11,
            intrq: 12,
            drq: 13,
            dden: 14,
            ds0: 15,
            ds1: 16,
        }
    }
}

/// Simulated pin bank. Levels persist across direction changes, so a test
/// can preset input levels, let the engine drive outputs, and read back
/// whatever was last written to each line.
pub struct SimPins {
    levels: [Level; 32],
    directions: [Direction; 32],
}

impl SimPins {
    pub fn new() -> SimPins {
        SimPins {
            levels: [Level::High; 32],
            directions: [Direction::Input; 32],
        }
    }

    pub fn set(&mut self, pin: Pin, level: Level) {
        self.levels[pin as usize] = level;
    }

    pub fn level(&self, pin: Pin) -> Level {
        self.levels[pin as usize]
    }

    pub fn direction(&self, pin: Pin) -> Direction {
        self.directions[pin as usize]
    }
}

impl PinIo for SimPins {
    fn read(&mut self, pin: Pin) -> Level {
        self.levels[pin as usize]
    }

    fn write(&mut self, pin: Pin, level: Level) {
        self.levels[pin as usize] = level;
    }

    fn configure(&mut self, pin: Pin, direction: Direction) {
        self.directions[pin as usize] = direction;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_pins_keep_levels_across_direction_changes() {
        let mut pins = SimPins::new();
        pins.set(3, Level::Low);
        pins.configure(3, Direction::Output);
        assert_eq!(pins.read(3), Level::Low);
        pins.write(3, Level::High);
        pins.configure(3, Direction::Input);
        assert_eq!(pins.level(3), Level::High);
        assert_eq!(pins.direction(3), Direction::Input);
    }
}
