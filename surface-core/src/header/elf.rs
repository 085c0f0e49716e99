use crate::header::Header;
use anyhow::Result;
use goblin::elf::header::{
    self as ehdr, EI_CLASS, EI_DATA, ELFCLASS64, ELFDATA2LSB, ET_DYN, ET_EXEC,
};
use goblin::elf::Elf;

/// `0x7F 'E' 'L' 'F'`, the first four bytes of every ELF image.
pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// The parts of an ELF file header that matter for a deploy check.
///
/// Decoded with goblin from the leading block only, so the rest of the
/// image is never loaded. Reference:
/// [ELF Specification v1.2](https://refspecs.linuxfoundation.org/elf/elf.pdf)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfSummary {
    /// `ELFCLASS32` or `ELFCLASS64`.
    pub class: u8,

    /// `ELFDATA2LSB` or `ELFDATA2MSB`.
    pub data: u8,

    /// Object file type, e.g. `ET_EXEC` (2) or `ET_DYN` (3).
    ///
    /// Position independent executables are `ET_DYN`, so both count as
    /// programs here.
    pub e_type: u16,

    /// Target architecture, e.g. `EM_X86_64` (62).
    pub e_machine: u16,
}

impl ElfSummary {
    pub fn parse(block: &[u8]) -> Result<Self> {
        let header = Elf::parse_header(block)?;
        Ok(Self {
            class: header.e_ident[EI_CLASS],
            data: header.e_ident[EI_DATA],
            e_type: header.e_type,
            e_machine: header.e_machine,
        })
    }
}

impl Header for ElfSummary {
    fn is_64(&self) -> bool {
        self.class == ELFCLASS64
    }

    fn format_name(&self) -> &'static str {
        "ELF"
    }

    fn is_executable(&self) -> bool {
        self.e_type == ET_EXEC || self.e_type == ET_DYN
    }

    fn describe(&self) -> String {
        let bits = if self.is_64() { 64 } else { 32 };
        let endian = if self.data == ELFDATA2LSB { "LSB" } else { "MSB" };
        format!(
            "{} {}-bit {} {} ({})",
            self.format_name(),
            bits,
            endian,
            ehdr::et_to_str(self.e_type),
            ehdr::machine_to_str(self.e_machine)
        )
    }
}
