use thiserror::Error;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const PT_INTERP: u32 = 3;

pub const EM_386: u16 = 3;
pub const EM_MIPS: u16 = 8;
pub const EM_PPC: u16 = 20;
pub const EM_PPC64: u16 = 21;
pub const EM_S390: u16 = 22;
pub const EM_ARM: u16 = 40;
pub const EM_X86_64: u16 = 62;
pub const EM_AARCH64: u16 = 183;
pub const EM_RISCV: u16 = 243;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ElfError {
    #[error("file is too small to be an ELF image")]
    TooShort,
    #[error("missing ELF magic")]
    BadMagic,
    #[error("unsupported ELF class {0}")]
    UnsupportedClass(u8),
    #[error("unsupported ELF data encoding {0}")]
    UnsupportedEncoding(u8),
    #[error("{0} lies outside the file")]
    Truncated(&'static str),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Class {
    Elf32,
    Elf64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// The parts of an ELF image needed to check where it can run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElfImage {
    pub class: Class,
    pub endian: Endian,
    pub machine: u16,
    pub interpreter: Option<String>,
}

impl ElfImage {
    pub fn parse(data: &[u8]) -> Result<Self, ElfError> {
        if data.len() < 20 {
            return Err(ElfError::TooShort);
        }

        if data[0..4] != ELF_MAGIC {
            return Err(ElfError::BadMagic);
        }

        let class = match data[4] {
            1 => Class::Elf32,
            2 => Class::Elf64,
            other => return Err(ElfError::UnsupportedClass(other)),
        };

        let endian = match data[5] {
            1 => Endian::Little,
            2 => Endian::Big,
            other => return Err(ElfError::UnsupportedEncoding(other)),
        };

        let reader = Reader { data, endian };

        let machine = reader.u16(18)?;

        let (phoff, phentsize, phnum) = match class {
            Class::Elf64 => (reader.u64(32)?, reader.u16(54)?, reader.u16(56)?),
            Class::Elf32 => (
                u64::from(reader.u32(28)?),
                reader.u16(42)?,
                reader.u16(44)?,
            ),
        };

        let mut interpreter = None;

        for index in 0..u64::from(phnum) {
            let header = phoff
                .checked_add(index * u64::from(phentsize))
                .and_then(|offset| usize::try_from(offset).ok())
                .ok_or(ElfError::Truncated("program header"))?;

            if reader.u32(header)? != PT_INTERP {
                continue;
            }

            let (offset, size) = match class {
                Class::Elf64 => (
                    reader.u64(header.saturating_add(8))?,
                    reader.u64(header.saturating_add(32))?,
                ),
                Class::Elf32 => (
                    u64::from(reader.u32(header.saturating_add(4))?),
                    u64::from(reader.u32(header.saturating_add(16))?),
                ),
            };

            let bytes = reader.slice(offset, size, "interpreter")?;
            let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());

            interpreter = Some(String::from_utf8_lossy(&bytes[..end]).into_owned());
            break;
        }

        Ok(Self {
            class,
            endian,
            machine,
            interpreter,
        })
    }

    /// Canonical machine name, matching the spelling used in triplets.
    pub fn machine_name(&self) -> Option<&'static str> {
        let name = match (self.machine, self.class) {
            (EM_386, _) => "i386",
            (EM_MIPS, _) => "mips",
            (EM_PPC, _) => "powerpc",
            (EM_PPC64, _) => "powerpc64",
            (EM_S390, _) => "s390x",
            (EM_ARM, _) => "arm",
            (EM_X86_64, _) => "x86_64",
            (EM_AARCH64, _) => "aarch64",
            (EM_RISCV, Class::Elf64) => "riscv64",
            (EM_RISCV, Class::Elf32) => "riscv32",
            _ => return None,
        };
        Some(name)
    }
}

struct Reader<'a> {
    data: &'a [u8],
    endian: Endian,
}

impl Reader<'_> {
    fn bytes<const N: usize>(&self, offset: usize) -> Result<[u8; N], ElfError> {
        offset
            .checked_add(N)
            .and_then(|end| self.data.get(offset..end))
            .and_then(|slice| slice.try_into().ok())
            .ok_or(ElfError::Truncated("header field"))
    }

    fn u16(&self, offset: usize) -> Result<u16, ElfError> {
        let bytes = self.bytes::<2>(offset)?;
        Ok(match self.endian {
            Endian::Little => u16::from_le_bytes(bytes),
            Endian::Big => u16::from_be_bytes(bytes),
        })
    }

    fn u32(&self, offset: usize) -> Result<u32, ElfError> {
        let bytes = self.bytes::<4>(offset)?;
        Ok(match self.endian {
            Endian::Little => u32::from_le_bytes(bytes),
            Endian::Big => u32::from_be_bytes(bytes),
        })
    }

    fn u64(&self, offset: usize) -> Result<u64, ElfError> {
        let bytes = self.bytes::<8>(offset)?;
        Ok(match self.endian {
            Endian::Little => u64::from_le_bytes(bytes),
            Endian::Big => u64::from_be_bytes(bytes),
        })
    }

    fn slice(&self, offset: u64, size: u64, what: &'static str) -> Result<&[u8], ElfError> {
        let start = usize::try_from(offset).map_err(|_| ElfError::Truncated(what))?;
        let len = usize::try_from(size).map_err(|_| ElfError::Truncated(what))?;
        start
            .checked_add(len)
            .and_then(|end| self.data.get(start..end))
            .ok_or(ElfError::Truncated(what))
    }
}
