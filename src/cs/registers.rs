//! Flat register address to type-3 packet register index translation.
//!
//! Inside a type-3 `SET_*` packet a register is addressed relative to the start of its
//! category window, in dwords, rather than by its absolute address.

use crate::error::{CsError, CsResult};

// PM4 type-3 opcodes used by this crate.
pub const IT_NOP: u8 = 0x10;
pub const IT_CONTEXT_CONTROL: u8 = 0x28;
pub const IT_SET_CONFIG_REG: u8 = 0x68;
pub const IT_SET_CONTEXT_REG: u8 = 0x69;
pub const IT_SET_ALU_CONST: u8 = 0x6A;
pub const IT_SET_BOOL_CONST: u8 = 0x6B;
pub const IT_SET_LOOP_CONST: u8 = 0x6C;
pub const IT_SET_RESOURCE: u8 = 0x6D;
pub const IT_SET_SAMPLER: u8 = 0x6E;
pub const IT_SET_CTL_CONST: u8 = 0x6F;

// A few R600 registers, for demos and tests.
pub const SX_MEMORY_EXPORT_SIZE: u32 = 0x0000_9014;
pub const SX_MISC: u32 = 0x0002_8350;
pub const SX_ALPHA_TEST_CONTROL: u32 = 0x0002_8410;
pub const DB_DEPTH_CONTROL: u32 = 0x0002_8800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterCategory {
    Config,
    Context,
    AluConst,
    Resource,
    Sampler,
    CtlConst,
    LoopConst,
    BoolConst,
}

impl RegisterCategory {
    /// The type-3 opcode that writes registers of this category.
    #[must_use]
    pub const fn set_opcode(self) -> u8 {
        match self {
            Self::Config => IT_SET_CONFIG_REG,
            Self::Context => IT_SET_CONTEXT_REG,
            Self::AluConst => IT_SET_ALU_CONST,
            Self::Resource => IT_SET_RESOURCE,
            Self::Sampler => IT_SET_SAMPLER,
            Self::CtlConst => IT_SET_CTL_CONST,
            Self::LoopConst => IT_SET_LOOP_CONST,
            Self::BoolConst => IT_SET_BOOL_CONST,
        }
    }

    /// Inverse of [`set_opcode`](Self::set_opcode).
    #[must_use]
    pub const fn from_set_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            IT_SET_CONFIG_REG => Some(Self::Config),
            IT_SET_CONTEXT_REG => Some(Self::Context),
            IT_SET_ALU_CONST => Some(Self::AluConst),
            IT_SET_RESOURCE => Some(Self::Resource),
            IT_SET_SAMPLER => Some(Self::Sampler),
            IT_SET_CTL_CONST => Some(Self::CtlConst),
            IT_SET_LOOP_CONST => Some(Self::LoopConst),
            IT_SET_BOOL_CONST => Some(Self::BoolConst),
            _ => None,
        }
    }
}

/// A `[base, end)` register window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterRange {
    pub base: u32,
    pub end: u32,
    pub category: RegisterCategory,
}

impl RegisterRange {
    #[must_use]
    pub const fn new(base: u32, end: u32, category: RegisterCategory) -> Self {
        Self {
            base,
            end,
            category,
        }
    }

    #[must_use]
    pub const fn contains(&self, address: u32) -> bool {
        address >= self.base && address < self.end
    }
}

/// R6xx/R7xx register windows, from `r600_reg.h`.
pub const R600_RANGES: [RegisterRange; 8] = [
    RegisterRange::new(0x0000_8000, 0x0000_ac00, RegisterCategory::Config),
    RegisterRange::new(0x0002_8000, 0x0002_9000, RegisterCategory::Context),
    RegisterRange::new(0x0003_0000, 0x0003_2000, RegisterCategory::AluConst),
    RegisterRange::new(0x0003_8000, 0x0003_c000, RegisterCategory::Resource),
    RegisterRange::new(0x0003_c000, 0x0003_cff0, RegisterCategory::Sampler),
    RegisterRange::new(0x0003_cff0, 0x0003_e200, RegisterCategory::CtlConst),
    RegisterRange::new(0x0003_e200, 0x0003_e380, RegisterCategory::LoopConst),
    RegisterRange::new(0x0003_e380, 0x0003_e38c, RegisterCategory::BoolConst),
];

#[derive(Debug, Clone)]
pub struct RegisterTranslator {
    ranges: Vec<RegisterRange>,
}

impl Default for RegisterTranslator {
    fn default() -> Self {
        Self::r600()
    }
}

impl RegisterTranslator {
    #[must_use]
    pub fn r600() -> Self {
        Self {
            ranges: R600_RANGES.to_vec(),
        }
    }

    /// Builds a translator from a custom window table.
    ///
    /// # Errors
    /// Returns `InvalidRegisterMap` if a range is empty or two ranges overlap.
    pub fn new(mut ranges: Vec<RegisterRange>) -> CsResult<Self> {
        ranges.sort_by_key(|r| r.base);

        for r in &ranges {
            if r.end <= r.base {
                return Err(CsError::InvalidRegisterMap(format!(
                    "empty range [0x{:x}, 0x{:x})",
                    r.base, r.end
                )));
            }
        }
        for pair in ranges.windows(2) {
            if pair[1].base < pair[0].end {
                return Err(CsError::InvalidRegisterMap(format!(
                    "range at 0x{:x} overlaps range ending at 0x{:x}",
                    pair[1].base, pair[0].end
                )));
            }
        }

        Ok(Self { ranges })
    }

    #[must_use]
    pub fn ranges(&self) -> &[RegisterRange] {
        &self.ranges
    }

    /// The window containing `address`, if any.
    #[must_use]
    pub fn lookup(&self, address: u32) -> Option<&RegisterRange> {
        self.ranges.iter().find(|r| r.contains(address))
    }

    /// Dword index of `address` within its window.
    ///
    /// Addresses outside every window yield 0; supplying one is a caller error.
    #[must_use]
    pub fn translate(&self, address: u32) -> u32 {
        self.lookup(address)
            .map_or(0, |r| (address - r.base) >> 2)
    }

    /// Absolute address of dword `index` in the window of `category`.
    #[must_use]
    pub fn address_of(&self, category: RegisterCategory, index: u32) -> Option<u32> {
        let range = self.ranges.iter().find(|r| r.category == category)?;
        let address = range.base.checked_add(index.checked_mul(4)?)?;
        range.contains(address).then_some(address)
    }
}
