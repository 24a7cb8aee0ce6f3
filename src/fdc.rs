use log::{debug, trace, warn};

use crate::catalog::Catalog;
use crate::gateway::{self, GatewayError};
use crate::pins::{Direction, Level, PinAssignment, PinIo};

// Status bits as the host sees them. 0x02/0x04/0x10/0x20 change meaning
// between Type-I and Type-II commands; both names kept where used.
pub const ST_BUSY: u8 = 0x01;
pub const ST_DRQ: u8 = 0x02;
pub const ST_TRACK00: u8 = 0x04;
pub const ST_RNF: u8 = 0x10;
pub const ST_WRITE_PROTECT: u8 = 0x40;

// Command opcodes, matched on the high nibble.
const CMD_RESTORE: u8 = 0x00;
const CMD_SEEK: u8 = 0x10;
const CMD_STEP: u8 = 0x20;
const CMD_STEP_IN: u8 = 0x40;
const CMD_STEP_OUT: u8 = 0x60;
const CMD_READ_SECTOR: u8 = 0x80;
const CMD_READ_SECTORS: u8 = 0x90;
const CMD_WRITE_SECTOR: u8 = 0xA0;
const CMD_WRITE_SECTORS: u8 = 0xB0;
const CMD_READ_ADDRESS: u8 = 0xC0;
const CMD_FORCE_INTERRUPT: u8 = 0xD0;

/// Type-I modifier: copy the physical track into the Track register on
/// completion.
const UPDATE_TRACK: u8 = 0x10;

/// The head never steps past this physical track.
const MAX_TRACK: u8 = 84;

/// Sized for the largest supported sector.
const STAGING_SIZE: usize = 1024;

/// How long the data bus stays driven after a read cycle.
const DATA_HOLD_US: u64 = 500;

/// Type-I step rates, indexed by the command's two low bits.
const STEP_RATES_US: [u32; 4] = [6_000, 12_000, 20_000, 30_000];

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Sequencer {
    Idle,
    Seeking,
    ReadingSector,
    SectorReadComplete,
    WaitingForDataIn,
    WritingSector,
    SectorWriteComplete,
}

/// The WD1770 bus-and-command engine.
///
/// One instance owns the register file, the sequencing state machine and
/// the staging buffer. It is driven by [`FdcEngine::poll`] from the
/// super-loop: every call samples the control inputs, services at most one
/// chip-select edge, ticks the state machine and refreshes INTRQ/DRQ.
pub struct FdcEngine {
    pins: PinAssignment,

    // Host-visible register file.
    status: u8,
    track: u8,
    sector: u8,
    data: u8,
    command: u8,

    // Head position, distinct from the Track register until an
    // update-track modifier aligns them.
    current_track: u8,
    direction: i8,

    busy: bool,
    drq: bool,
    intrq: bool,

    staging: [u8; STAGING_SIZE],
    cursor: usize,
    length: usize,
    sectors_remaining: u8,
    multi_sector: bool,

    step_rate: u32,
    op_start: u64,

    active_drive: usize,
    state: Sequencer,

    // Bus cycle tracking.
    last_cs: bool,
    bus_driven: bool,
    bus_hold_until: u64,
}

impl FdcEngine {
    pub fn new(pins: PinAssignment) -> FdcEngine {
        let mut fdc = FdcEngine {
            pins,
            status: 0,
            track: 0,
            sector: 0,
            data: 0,
            command: 0,
            current_track: 0,
            direction: 1,
            busy: false,
            drq: false,
            intrq: false,
            staging: [0; STAGING_SIZE],
            cursor: 0,
            length: 0,
            sectors_remaining: 0,
            multi_sector: false,
            step_rate: STEP_RATES_US[0],
            op_start: 0,
            active_drive: 0,
            state: Sequencer::Idle,
            last_cs: false,
            bus_driven: false,
            bus_hold_until: 0,
        };
        fdc.reset();
        fdc
    }

    /// Power-on register state: head on track 0, sector register 1,
    /// direction stepping in.
    pub fn reset(&mut self) {
        self.status = ST_TRACK00;
        self.track = 0;
        self.sector = 1;
        self.data = 0;
        self.command = 0;
        self.current_track = 0;
        self.direction = 1;
        self.busy = false;
        self.drq = false;
        self.intrq = false;
        self.cursor = 0;
        self.length = 0;
        self.sectors_remaining = 0;
        self.multi_sector = false;
        self.step_rate = STEP_RATES_US[0];
        self.state = Sequencer::Idle;
    }

    pub fn current_track(&self) -> u8 {
        self.current_track
    }

    pub fn active_drive(&self) -> usize {
        self.active_drive
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// One polling cycle: drive-select sampling, bus service, state
    /// machine tick, output refresh. `now_us` is a monotonic microsecond
    /// timestamp.
    pub fn poll(&mut self, io: &mut dyn PinIo, catalog: &mut Catalog, now_us: u64) {
        self.check_drive_select(io);
        if self.enabled(io) {
            self.handle_bus(io, catalog, now_us);
        } else if self.bus_driven {
            // Disabled: get off the bus, but let any transfer in flight
            // run to completion below.
            self.release_data_bus(io);
        }
        self.run_sequencer(catalog, now_us);
        self.update_outputs(io);
    }

    fn enabled(&self, io: &mut dyn PinIo) -> bool {
        io.read(self.pins.dden) == Level::Low
    }

    fn check_drive_select(&mut self, io: &mut dyn PinIo) {
        if io.read(self.pins.ds0) == Level::Low {
            self.active_drive = 0;
        } else if io.read(self.pins.ds1) == Level::Low {
            self.active_drive = 1;
        }
    }

    fn handle_bus(&mut self, io: &mut dyn PinIo, catalog: &mut Catalog, now: u64) {
        let cs = io.read(self.pins.cs) == Level::Low;
        let reading = io.read(self.pins.rw) == Level::High;

        // Chip-select asserted: start of a transaction.
        if cs && !self.last_cs {
            let a0 = (io.read(self.pins.a0) == Level::High) as u8;
            let a1 = (io.read(self.pins.a1) == Level::High) as u8;
            let addr = (a1 << 1) | a0;

            if reading {
                self.handle_read(io, addr, now);
            } else {
                self.data = self.sample_data_bus(io);
                self.handle_write(addr, catalog, now);
            }
        }

        // Chip-select released: end of a transaction.
        if !cs && self.last_cs && self.bus_driven && now > self.bus_hold_until {
            self.release_data_bus(io);
        }

        self.last_cs = cs;
    }

    fn handle_read(&mut self, io: &mut dyn PinIo, addr: u8, now: u64) {
        let value = match addr {
            0 => {
                let mut status = self.status;
                if self.busy {
                    status |= ST_BUSY;
                }
                if self.drq {
                    status |= ST_DRQ;
                }
                self.intrq = false;
                status
            }
            1 => self.track,
            2 => self.sector,
            _ => {
                if self.state == Sequencer::ReadingSector && self.cursor < self.length {
                    self.data = self.staging[self.cursor];
                    self.cursor += 1;
                    if self.cursor >= self.length {
                        self.drq = false;
                        self.state = Sequencer::SectorReadComplete;
                    }
                }
                self.data
            }
        };
        trace!("read reg {} -> {:02x}", addr, value);
        self.drive_data_bus(io, value, now);
    }

    fn handle_write(&mut self, addr: u8, catalog: &mut Catalog, now: u64) {
        trace!("write reg {} <- {:02x}", addr, self.data);
        match addr {
            0 => {
                self.command = self.data;
                self.dispatch(catalog, now);
            }
            1 => self.track = self.data,
            2 => self.sector = self.data,
            _ => {
                if self.state == Sequencer::WaitingForDataIn && self.cursor < self.length {
                    self.staging[self.cursor] = self.data;
                    self.cursor += 1;
                    if self.cursor >= self.length {
                        self.drq = false;
                        self.state = Sequencer::WritingSector;
                        self.write_sector_data(catalog);
                    }
                }
            }
        }
    }

    fn dispatch(&mut self, catalog: &mut Catalog, now: u64) {
        let command = self.command;
        debug!("command {:02x}", command);
        match command & 0xF0 {
            CMD_RESTORE => {
                self.direction = -1;
                self.begin_seek(now);
            }
            CMD_SEEK => {
                self.direction = if self.data > self.current_track { 1 } else { -1 };
                self.begin_seek(now);
            }
            CMD_STEP | 0x30 => self.begin_seek(now),
            CMD_STEP_IN | 0x50 => {
                self.direction = 1;
                self.begin_seek(now);
            }
            CMD_STEP_OUT | 0x70 => {
                self.direction = -1;
                self.begin_seek(now);
            }
            CMD_READ_SECTOR | CMD_READ_SECTORS => self.cmd_read_sector(catalog, now),
            CMD_WRITE_SECTOR | CMD_WRITE_SECTORS => self.cmd_write_sector(catalog, now),
            CMD_READ_ADDRESS => self.cmd_read_address(),
            CMD_FORCE_INTERRUPT => self.cmd_force_interrupt(),
            other => warn!("command {:02x} not implemented", other),
        }
    }

    fn begin_seek(&mut self, now: u64) {
        self.busy = true;
        self.drq = false;
        self.status = ST_BUSY;
        self.step_rate = STEP_RATES_US[(self.command & 0x03) as usize];
        self.op_start = now;
        self.state = Sequencer::Seeking;
    }

    fn cmd_read_sector(&mut self, catalog: &mut Catalog, now: u64) {
        let Some(disk) = catalog.descriptor(self.active_drive) else {
            return self.terminate(ST_RNF);
        };
        self.busy = true;
        self.status = ST_BUSY;
        self.multi_sector = self.command & 0xF0 == CMD_READ_SECTORS;
        self.sectors_remaining = if self.multi_sector { disk.sectors_per_track } else { 1 };
        self.op_start = now;
        self.load_sector(catalog);
    }

    fn cmd_write_sector(&mut self, catalog: &mut Catalog, now: u64) {
        let Some(disk) = catalog.descriptor(self.active_drive) else {
            return self.terminate(ST_RNF);
        };
        if disk.write_protected {
            return self.terminate(ST_WRITE_PROTECT);
        }
        self.busy = true;
        self.status = ST_BUSY;
        self.multi_sector = self.command & 0xF0 == CMD_WRITE_SECTORS;
        self.sectors_remaining = if self.multi_sector { disk.sectors_per_track } else { 1 };
        self.cursor = 0;
        self.length = disk.sector_size.min(STAGING_SIZE);
        self.drq = true;
        self.op_start = now;
        self.state = Sequencer::WaitingForDataIn;
    }

    /// Synthesize the six-byte address mark for the current position. CRC
    /// bytes are zero; nothing on the wire is simulated.
    fn cmd_read_address(&mut self) {
        self.staging[..6].copy_from_slice(&[self.current_track, 0, 1, 2, 0, 0]);
        self.cursor = 0;
        self.length = 6;
        self.busy = true;
        self.drq = true;
        self.status = ST_BUSY;
        self.state = Sequencer::ReadingSector;
    }

    /// Accepted in every state: abandon whatever is in flight.
    fn cmd_force_interrupt(&mut self) {
        self.busy = false;
        self.drq = false;
        self.intrq = true;
        self.status = 0;
        self.state = Sequencer::Idle;
    }

    /// Pull the addressed sector into the staging buffer and hand the
    /// first byte to the host.
    fn load_sector(&mut self, catalog: &mut Catalog) {
        let Some(disk) = catalog.descriptor(self.active_drive) else {
            return self.terminate(ST_RNF);
        };
        let length = disk.sector_size.min(STAGING_SIZE);
        let result = gateway::read_sector(
            catalog.storage_mut(),
            &disk,
            self.current_track,
            self.sector,
            &mut self.staging[..length],
        );
        match result {
            Ok(()) => {
                self.cursor = 0;
                self.length = length;
                self.drq = true;
                self.status = ST_BUSY | ST_DRQ;
                self.state = Sequencer::ReadingSector;
            }
            Err(_) => self.terminate(ST_RNF),
        }
    }

    /// The host has filled the staging buffer; push it to the image.
    fn write_sector_data(&mut self, catalog: &mut Catalog) {
        let Some(disk) = catalog.descriptor(self.active_drive) else {
            return self.terminate(ST_RNF);
        };
        let result = gateway::write_sector(
            catalog.storage_mut(),
            &disk,
            self.current_track,
            self.sector,
            &self.staging[..self.length],
        );
        match result {
            Ok(()) => self.state = Sequencer::SectorWriteComplete,
            Err(GatewayError::WriteProtected) => self.terminate(ST_WRITE_PROTECT),
            Err(GatewayError::RecordNotFound) => self.terminate(ST_RNF),
        }
    }

    /// End the current command with an error status and INTRQ.
    fn terminate(&mut self, status: u8) {
        self.status = status;
        self.busy = false;
        self.drq = false;
        self.intrq = true;
        self.state = Sequencer::Idle;
    }

    fn run_sequencer(&mut self, catalog: &mut Catalog, now: u64) {
        match self.state {
            Sequencer::Idle => {}
            Sequencer::Seeking => {
                if now.saturating_sub(self.op_start) >= self.step_rate as u64 {
                    self.complete_seek();
                }
            }
            // Host-paced: the bus path drains or fills the staging buffer.
            Sequencer::ReadingSector | Sequencer::WaitingForDataIn => {}
            // Transfers complete synchronously in write_sector_data().
            Sequencer::WritingSector => {}
            Sequencer::SectorReadComplete => {
                if self.multi_sector && self.sectors_remaining > 1 {
                    self.sectors_remaining -= 1;
                    self.sector = self.sector.wrapping_add(1);
                    self.load_sector(catalog);
                } else {
                    self.complete_command();
                }
            }
            Sequencer::SectorWriteComplete => {
                if self.multi_sector && self.sectors_remaining > 1 {
                    self.sectors_remaining -= 1;
                    self.sector = self.sector.wrapping_add(1);
                    self.cursor = 0;
                    self.drq = true;
                    self.state = Sequencer::WaitingForDataIn;
                } else {
                    self.complete_command();
                }
            }
        }
    }

    fn complete_seek(&mut self) {
        match self.command & 0xF0 {
            CMD_RESTORE => {
                self.current_track = 0;
                self.track = 0;
            }
            CMD_SEEK => {
                // The Data register holds the last byte seen on the bus.
                self.current_track = self.data.min(MAX_TRACK);
                if self.command & UPDATE_TRACK != 0 {
                    self.track = self.current_track;
                }
            }
            _ => {
                let stepped = self.current_track as i16 + self.direction as i16;
                self.current_track = stepped.clamp(0, MAX_TRACK as i16) as u8;
                if self.command & UPDATE_TRACK != 0 {
                    self.track = self.current_track;
                }
            }
        }
        self.status = if self.current_track == 0 { ST_TRACK00 } else { 0 };
        self.busy = false;
        self.intrq = true;
        self.state = Sequencer::Idle;
        debug!("seek complete, head at track {}", self.current_track);
    }

    fn complete_command(&mut self) {
        self.busy = false;
        self.drq = false;
        self.intrq = true;
        self.status = 0;
        self.state = Sequencer::Idle;
    }

    fn sample_data_bus(&mut self, io: &mut dyn PinIo) -> u8 {
        let mut value = 0u8;
        for (bit, &pin) in self.pins.data.iter().enumerate() {
            io.configure(pin, Direction::Input);
            if io.read(pin) == Level::High {
                value |= 1 << bit;
            }
        }
        value
    }

    fn drive_data_bus(&mut self, io: &mut dyn PinIo, value: u8, now: u64) {
        for (bit, &pin) in self.pins.data.iter().enumerate() {
            io.configure(pin, Direction::Output);
            let level = if value & (1 << bit) != 0 { Level::High } else { Level::Low };
            io.write(pin, level);
        }
        self.bus_driven = true;
        self.bus_hold_until = now + DATA_HOLD_US;
    }

    fn release_data_bus(&mut self, io: &mut dyn PinIo) {
        for &pin in self.pins.data.iter() {
            io.configure(pin, Direction::Input);
        }
        self.bus_driven = false;
    }

    fn update_outputs(&mut self, io: &mut dyn PinIo) {
        io.write(self.pins.intrq, if self.intrq { Level::High } else { Level::Low });
        io.write(self.pins.drq, if self.drq { Level::High } else { Level::Low });
    }
}
