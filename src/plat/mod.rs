//! Common platform vocabulary shared by the translator, the debugger core and the replay collaborator.

use std::fmt;

use thiserror::Error;

/// An error for the core platform vocabulary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("invalid target: {0}")]
    InvalidTarget(u8),
    #[error("invalid register file: {0}")]
    InvalidRegisterFile(u8),
    #[error("unknown name: {0}")]
    UnknownName(String),
}

/// Type alias for Result<T, [PlatformError]>.
pub type PResult<T> = Result<T, PlatformError>;

/// First CPU address served by a bank-switched PRG window.
pub const PRG_WINDOW_BASE: u16 = 0x8000;
/// Size of a single PRG bank (and of each CPU-visible window).
pub const PRG_BANK_SIZE: u32 = 0x2000;
/// Number of PRG windows between [PRG_WINDOW_BASE] and `$FFFF`.
pub const PRG_WINDOW_COUNT: usize = 4;

/// PPU register block, mirrored every 8 bytes up to `$3FFF`.
pub const PPU_REGISTER_BASE: u16 = 0x2000;
pub const PPU_REGISTER_END: u16 = 0x3FFF;
/// APU and I/O register block.
pub const APU_REGISTER_BASE: u16 = 0x4000;
pub const APU_REGISTER_END: u16 = 0x4017;
/// Index of `OAMADDR` in the PPU register table.
pub const PPU_OAMADDR_INDEX: usize = 3;
/// Index of the OAM data portal (`OAMDATA`, `$2004`) in the PPU register table.
pub const PPU_OAMDATA_INDEX: usize = 4;

/// The subsystem an access or a breakpoint belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Target {
    Cpu = 0,
    Ppu,
    Apu,
    Mapper,
}

impl TryFrom<u8> for Target {
    type Error = PlatformError;

    fn try_from(value: u8) -> Result<Self, PlatformError> {
        match value {
            0 => Ok(Self::Cpu),
            1 => Ok(Self::Ppu),
            2 => Ok(Self::Apu),
            3 => Ok(Self::Mapper),
            _ => Err(PlatformError::InvalidTarget(value)),
        }
    }
}

impl std::str::FromStr for Target {
    type Err = PlatformError;

    fn from_str(s: &str) -> PResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "ppu" => Ok(Self::Ppu),
            "apu" => Ok(Self::Apu),
            "mapper" => Ok(Self::Mapper),
            _ => Err(PlatformError::UnknownName(s.to_owned())),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cpu => "CPU",
            Self::Ppu => "PPU",
            Self::Apu => "APU",
            Self::Mapper => "mapper",
        };
        f.write_str(name)
    }
}

/// The named register tables exposed by the snapshot accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RegisterFile {
    Cpu = 0,
    Ppu,
    Apu,
    Mapper,
    Oam,
}

impl RegisterFile {
    /// The register file that holds the state registers of `target`.
    pub fn of_target(target: Target) -> Self {
        match target {
            Target::Cpu => Self::Cpu,
            Target::Ppu => Self::Ppu,
            Target::Apu => Self::Apu,
            Target::Mapper => Self::Mapper,
        }
    }
}

impl TryFrom<u8> for RegisterFile {
    type Error = PlatformError;

    fn try_from(value: u8) -> Result<Self, PlatformError> {
        match value {
            0 => Ok(Self::Cpu),
            1 => Ok(Self::Ppu),
            2 => Ok(Self::Apu),
            3 => Ok(Self::Mapper),
            4 => Ok(Self::Oam),
            _ => Err(PlatformError::InvalidRegisterFile(value)),
        }
    }
}

impl std::str::FromStr for RegisterFile {
    type Err = PlatformError;

    fn from_str(s: &str) -> PResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "ppu" => Ok(Self::Ppu),
            "apu" | "io" => Ok(Self::Apu),
            "mapper" => Ok(Self::Mapper),
            "oam" => Ok(Self::Oam),
            _ => Err(PlatformError::UnknownName(s.to_owned())),
        }
    }
}

/// Direction of a memory or portal access a breakpoint listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Read,
    Write,
    Any,
}

impl Access {
    /// Whether an access with the given direction satisfies this filter.
    #[inline]
    pub fn admits(self, is_write: bool) -> bool {
        match self {
            Access::Read => !is_write,
            Access::Write => is_write,
            Access::Any => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_decode() {
        assert_eq!(Target::try_from(2).unwrap(), Target::Apu);
        assert_eq!(Target::try_from(9), Err(PlatformError::InvalidTarget(9)));
        assert_eq!("PPU".parse::<Target>().unwrap(), Target::Ppu);
    }

    #[test]
    fn test_register_file_decode() {
        assert_eq!(RegisterFile::try_from(4).unwrap(), RegisterFile::Oam);
        assert_eq!("io".parse::<RegisterFile>().unwrap(), RegisterFile::Apu);
        assert!("vram".parse::<RegisterFile>().is_err());
    }

    #[test]
    fn test_access_filter() {
        assert!(Access::Write.admits(true));
        assert!(!Access::Write.admits(false));
        assert!(Access::Any.admits(false));
    }
}
