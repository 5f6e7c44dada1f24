//! Read-only view over the named hardware register tables.
//!
//! The tables describe registers (names, addresses, bitfields); the values themselves are owned
//! by the emulation side and read through [MachineState].

use std::rc::Rc;

use crate::plat::{
    RegisterFile, APU_REGISTER_BASE, APU_REGISTER_END, PPU_REGISTER_BASE, PPU_REGISTER_END,
    PRG_WINDOW_BASE,
};

bitflags::bitflags! {
    /// The 6502 processor status register (`P`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusFlags: u8 {
        const CARRY = 1 << 0;
        const ZERO = 1 << 1;
        const IRQ_DISABLE = 1 << 2;
        const DECIMAL = 1 << 3;
        const BREAK = 1 << 4;
        const UNUSED = 1 << 5;
        const OVERFLOW = 1 << 6;
        const NEGATIVE = 1 << 7;
    }
}

impl StatusFlags {
    /// Formats the flags the way debuggers show them: `NV-BDIZC`, with `.` for clear bits.
    pub fn to_letters(self) -> String {
        const LETTERS: [(StatusFlags, char); 8] = [
            (StatusFlags::NEGATIVE, 'N'),
            (StatusFlags::OVERFLOW, 'V'),
            (StatusFlags::UNUSED, '-'),
            (StatusFlags::BREAK, 'B'),
            (StatusFlags::DECIMAL, 'D'),
            (StatusFlags::IRQ_DISABLE, 'I'),
            (StatusFlags::ZERO, 'Z'),
            (StatusFlags::CARRY, 'C'),
        ];
        LETTERS
            .iter()
            .map(|(flag, c)| if self.contains(*flag) { *c } else { '.' })
            .collect()
    }
}

/// A named group of bits inside a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bitfield {
    pub name: &'static str,
    pub lsb: u8,
    pub width: u8,
    /// Human readable meaning of each value, indexed by value. May be empty.
    pub values: &'static [&'static str],
}

impl Bitfield {
    pub const fn new(name: &'static str, lsb: u8, width: u8, values: &'static [&'static str]) -> Self {
        Self {
            name,
            lsb,
            width,
            values,
        }
    }

    const fn flag(name: &'static str, bit: u8) -> Self {
        Self::new(name, bit, 1, &["off", "on"])
    }

    pub fn mask(&self) -> u16 {
        (((1u32 << self.width) - 1) << self.lsb) as u16
    }

    pub fn extract(&self, value: u16) -> u16 {
        (value & self.mask()) >> self.lsb
    }

    pub fn value_name(&self, value: u16) -> Option<&'static str> {
        self.values.get(value as usize).copied()
    }
}

/// Static description of one register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterInfo {
    pub name: &'static str,
    /// CPU address the register is decoded at, if it has one.
    pub addr: Option<u16>,
    pub bitfields: &'static [Bitfield],
}

impl RegisterInfo {
    const fn new(name: &'static str, addr: Option<u16>, bitfields: &'static [Bitfield]) -> Self {
        Self {
            name,
            addr,
            bitfields,
        }
    }
}

const fn at(name: &'static str, addr: u16) -> RegisterInfo {
    RegisterInfo::new(name, Some(addr), &[])
}

const STATUS_BITS: &[Bitfield] = &[
    Bitfield::flag("Carry", 0),
    Bitfield::flag("Zero", 1),
    Bitfield::flag("IRQ disable", 2),
    Bitfield::flag("Decimal", 3),
    Bitfield::flag("Break", 4),
    Bitfield::flag("Overflow", 6),
    Bitfield::flag("Negative", 7),
];

pub const CPU_REGISTERS: &[RegisterInfo] = &[
    RegisterInfo::new("A", None, &[]),
    RegisterInfo::new("X", None, &[]),
    RegisterInfo::new("Y", None, &[]),
    RegisterInfo::new("SP", None, &[]),
    RegisterInfo::new("P", None, STATUS_BITS),
    RegisterInfo::new("PC", None, &[]),
];

pub const PPU_REGISTERS: &[RegisterInfo] = &[
    RegisterInfo::new(
        "PPUCTRL",
        Some(0x2000),
        &[
            Bitfield::new("Base nametable", 0, 2, &["$2000", "$2400", "$2800", "$2C00"]),
            Bitfield::new("VRAM increment", 2, 1, &["+1 across", "+32 down"]),
            Bitfield::new("Sprite pattern table", 3, 1, &["$0000", "$1000"]),
            Bitfield::new("Background pattern table", 4, 1, &["$0000", "$1000"]),
            Bitfield::new("Sprite size", 5, 1, &["8x8", "8x16"]),
            Bitfield::new("PPU master/slave", 6, 1, &["master", "slave"]),
            Bitfield::flag("NMI on vblank", 7),
        ],
    ),
    RegisterInfo::new(
        "PPUMASK",
        Some(0x2001),
        &[
            Bitfield::flag("Greyscale", 0),
            Bitfield::flag("Background in leftmost 8 pixels", 1),
            Bitfield::flag("Sprites in leftmost 8 pixels", 2),
            Bitfield::flag("Show background", 3),
            Bitfield::flag("Show sprites", 4),
            Bitfield::flag("Emphasize red", 5),
            Bitfield::flag("Emphasize green", 6),
            Bitfield::flag("Emphasize blue", 7),
        ],
    ),
    RegisterInfo::new(
        "PPUSTATUS",
        Some(0x2002),
        &[
            Bitfield::flag("Sprite overflow", 5),
            Bitfield::flag("Sprite 0 hit", 6),
            Bitfield::flag("Vertical blank", 7),
        ],
    ),
    at("OAMADDR", 0x2003),
    at("OAMDATA", 0x2004),
    at("PPUSCROLL", 0x2005),
    at("PPUADDR", 0x2006),
    at("PPUDATA", 0x2007),
];

const PULSE_VOLUME: &[Bitfield] = &[
    Bitfield::new("Volume/envelope", 0, 4, &[]),
    Bitfield::flag("Constant volume", 4),
    Bitfield::flag("Length counter halt", 5),
    Bitfield::new("Duty", 6, 2, &["12.5%", "25%", "50%", "75% negated"]),
];

const PULSE_SWEEP: &[Bitfield] = &[
    Bitfield::new("Shift", 0, 3, &[]),
    Bitfield::flag("Negate", 3),
    Bitfield::new("Period", 4, 3, &[]),
    Bitfield::flag("Enabled", 7),
];

pub const APU_REGISTERS: &[RegisterInfo] = &[
    RegisterInfo::new("SQ1_VOL", Some(0x4000), PULSE_VOLUME),
    RegisterInfo::new("SQ1_SWEEP", Some(0x4001), PULSE_SWEEP),
    at("SQ1_LO", 0x4002),
    at("SQ1_HI", 0x4003),
    RegisterInfo::new("SQ2_VOL", Some(0x4004), PULSE_VOLUME),
    RegisterInfo::new("SQ2_SWEEP", Some(0x4005), PULSE_SWEEP),
    at("SQ2_LO", 0x4006),
    at("SQ2_HI", 0x4007),
    at("TRI_LINEAR", 0x4008),
    at("(unused)", 0x4009),
    at("TRI_LO", 0x400A),
    at("TRI_HI", 0x400B),
    at("NOISE_VOL", 0x400C),
    at("(unused)", 0x400D),
    at("NOISE_LO", 0x400E),
    at("NOISE_HI", 0x400F),
    at("DMC_FREQ", 0x4010),
    at("DMC_RAW", 0x4011),
    at("DMC_START", 0x4012),
    at("DMC_LEN", 0x4013),
    at("OAMDMA", 0x4014),
    RegisterInfo::new(
        "SND_CHN",
        Some(0x4015),
        &[
            Bitfield::flag("Pulse 1", 0),
            Bitfield::flag("Pulse 2", 1),
            Bitfield::flag("Triangle", 2),
            Bitfield::flag("Noise", 3),
            Bitfield::flag("DMC", 4),
        ],
    ),
    at("JOY1", 0x4016),
    RegisterInfo::new(
        "JOY2/FRAME",
        Some(0x4017),
        &[
            Bitfield::flag("IRQ inhibit", 6),
            Bitfield::new("Sequencer mode", 7, 1, &["4-step", "5-step"]),
        ],
    ),
];

/// One sprite's four OAM bytes. The OAM file repeats this for all 64 sprites.
pub const OAM_SPRITE: &[RegisterInfo] = &[
    RegisterInfo::new("Y", None, &[]),
    RegisterInfo::new("Tile", None, &[]),
    RegisterInfo::new(
        "Attributes",
        None,
        &[
            Bitfield::new("Palette", 0, 2, &["4", "5", "6", "7"]),
            Bitfield::new("Priority", 5, 1, &["in front", "behind background"]),
            Bitfield::flag("Flip horizontally", 6),
            Bitfield::flag("Flip vertically", 7),
        ],
    ),
    RegisterInfo::new("X", None, &[]),
];
pub const OAM_SIZE: usize = 256;

const MMC1_REGISTERS: &[RegisterInfo] = &[
    RegisterInfo::new(
        "Control",
        Some(0x8000),
        &[
            Bitfield::new("Mirroring", 0, 2, &["one-screen lower", "one-screen upper", "vertical", "horizontal"]),
            Bitfield::new("PRG ROM bank mode", 2, 2, &["32K", "32K", "fix first", "fix last"]),
            Bitfield::new("CHR ROM bank mode", 4, 1, &["8K", "two 4K"]),
        ],
    ),
    at("CHR bank 0", 0xA000),
    at("CHR bank 1", 0xC000),
    at("PRG bank", 0xE000),
];

const UXROM_REGISTERS: &[RegisterInfo] = &[at("Bank select", 0x8000)];

const MMC3_REGISTERS: &[RegisterInfo] = &[
    RegisterInfo::new(
        "Bank select",
        Some(0x8000),
        &[
            Bitfield::new("Bank register", 0, 3, &["R0", "R1", "R2", "R3", "R4", "R5", "R6", "R7"]),
            Bitfield::new("PRG ROM bank mode", 6, 1, &["$8000 swappable", "$C000 swappable"]),
            Bitfield::new("CHR A12 inversion", 7, 1, &["off", "on"]),
        ],
    ),
    at("Bank data", 0x8001),
    at("Mirroring", 0xA000),
    at("PRG RAM protect", 0xA001),
    at("IRQ latch", 0xC000),
    at("IRQ reload", 0xC001),
    at("IRQ disable", 0xE000),
    at("IRQ enable", 0xE001),
];

/// Human readable name of an iNES mapper number.
pub fn mapper_name(mapper_id: u16) -> &'static str {
    match mapper_id {
        0 => "NROM",
        1 => "MMC1",
        2 => "UxROM",
        3 => "CNROM",
        4 => "MMC3",
        5 => "MMC5",
        7 => "AxROM",
        9 => "MMC2",
        10 => "MMC4",
        66 => "GxROM",
        _ => "unknown",
    }
}

fn mapper_table(mapper_id: Option<u16>) -> &'static [RegisterInfo] {
    match mapper_id {
        Some(1) => MMC1_REGISTERS,
        Some(2) => UXROM_REGISTERS,
        Some(4) => MMC3_REGISTERS,
        _ => &[],
    }
}

/// The emulation collaborator's view of current machine state.
pub trait MachineState {
    /// Current value of register `index` in `file`, if the emulator exposes it.
    fn register_value(&self, file: RegisterFile, index: usize) -> Option<u16>;

    /// CPU cycles elapsed since power-on.
    fn cpu_cycle(&self) -> u64 {
        0
    }

    /// iNES mapper number of the loaded cartridge.
    fn mapper_id(&self) -> Option<u16> {
        None
    }
}

/// Resolves register indices to names, addresses, bitfields and current values.
#[derive(Clone)]
pub struct RegisterInspector {
    state: Rc<dyn MachineState>,
}

impl RegisterInspector {
    pub fn new(state: Rc<dyn MachineState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &dyn MachineState {
        self.state.as_ref()
    }

    fn table(&self, file: RegisterFile) -> &'static [RegisterInfo] {
        match file {
            RegisterFile::Cpu => CPU_REGISTERS,
            RegisterFile::Ppu => PPU_REGISTERS,
            RegisterFile::Apu => APU_REGISTERS,
            RegisterFile::Mapper => mapper_table(self.state.mapper_id()),
            RegisterFile::Oam => OAM_SPRITE,
        }
    }

    fn info(&self, file: RegisterFile, index: usize) -> Option<&'static RegisterInfo> {
        match file {
            RegisterFile::Oam if index < OAM_SIZE => OAM_SPRITE.get(index % OAM_SPRITE.len()),
            RegisterFile::Oam => None,
            _ => self.table(file).get(index),
        }
    }

    pub fn count(&self, file: RegisterFile) -> usize {
        match file {
            RegisterFile::Oam => OAM_SIZE,
            _ => self.table(file).len(),
        }
    }

    pub fn name(&self, file: RegisterFile, index: usize) -> Option<String> {
        let info = self.info(file, index)?;
        Some(match file {
            RegisterFile::Oam => format!("Sprite {} {}", index / OAM_SPRITE.len(), info.name),
            _ => info.name.to_owned(),
        })
    }

    pub fn address(&self, file: RegisterFile, index: usize) -> Option<u16> {
        match file {
            RegisterFile::Oam if index < OAM_SIZE => Some(index as u16),
            _ => self.info(file, index)?.addr,
        }
    }

    pub fn bitfields(&self, file: RegisterFile, index: usize) -> &'static [Bitfield] {
        self.info(file, index).map(|i| i.bitfields).unwrap_or(&[])
    }

    /// Which register of `file` an access to `addr` lands on, honouring mirroring.
    pub fn index_for_address(&self, file: RegisterFile, addr: u16) -> Option<usize> {
        match file {
            RegisterFile::Cpu => None,
            RegisterFile::Ppu => (PPU_REGISTER_BASE..=PPU_REGISTER_END)
                .contains(&addr)
                .then(|| ((addr - PPU_REGISTER_BASE) % 8) as usize),
            RegisterFile::Apu => (APU_REGISTER_BASE..=APU_REGISTER_END)
                .contains(&addr)
                .then(|| (addr - APU_REGISTER_BASE) as usize),
            RegisterFile::Oam => ((addr as usize) < OAM_SIZE).then_some(addr as usize),
            RegisterFile::Mapper => {
                if addr < PRG_WINDOW_BASE {
                    return None;
                }
                let window = ((addr - PRG_WINDOW_BASE) / 0x2000) as usize;
                match self.state.mapper_id() {
                    Some(1) => Some(window),
                    Some(2) => Some(0),
                    Some(4) => Some(window * 2 + (addr & 1) as usize),
                    _ => None,
                }
            }
        }
    }

    pub fn value(&self, file: RegisterFile, index: usize) -> Option<u16> {
        if index >= self.count(file) {
            return None;
        }
        self.state.register_value(file, index)
    }

    pub fn bitfield_value(&self, file: RegisterFile, index: usize, bitfield: usize) -> Option<u16> {
        let field = self.bitfields(file, index).get(bitfield)?;
        Some(field.extract(self.value(file, index)?))
    }

    /// `$2000: PPUCTRL` style label, as shown in register inspectors.
    pub fn describe(&self, file: RegisterFile, index: usize) -> Option<String> {
        let name = self.name(file, index)?;
        Some(match self.address(file, index) {
            Some(addr) => format!("${:04X}: {}", addr, name),
            None => name,
        })
    }

    pub fn mapper_name(&self) -> Option<&'static str> {
        self.state.mapper_id().map(mapper_name)
    }
}
