//! Scoped masking of floating-point traps around backend calls.
//!
//! Some backend builds deliberately divide by zero or compute with NaN (SVD
//! in particular). When the host process has unmasked those exceptions, the
//! call would trap. [`TrapMask`] masks them for its lifetime and restores the
//! previous control word on drop.

use cfg_if::cfg_if;
use std::ops::BitOr;

/// Set of floating-point exceptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FpTraps(u8);

impl FpTraps {
    pub const NONE: FpTraps = FpTraps(0);
    pub const INVALID: FpTraps = FpTraps(1);
    pub const DIVIDE_BY_ZERO: FpTraps = FpTraps(1 << 1);
    pub const ALL: FpTraps = FpTraps(1 | 1 << 1);

    pub fn contains(self, other: FpTraps) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for FpTraps {
    type Output = FpTraps;

    fn bitor(self, rhs: FpTraps) -> FpTraps {
        FpTraps(self.0 | rhs.0)
    }
}

cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        mod arch {
            use super::FpTraps;

            // MXCSR exception mask bits; a set bit masks the exception.
            const INVALID_MASK: u32 = 1 << 7;
            const DIVIDE_BY_ZERO_MASK: u32 = 1 << 9;

            pub(super) type ControlWord = u32;

            #[allow(deprecated)]
            pub(super) fn read() -> ControlWord {
                // SAFETY: reading MXCSR has no side effects; SSE is baseline on x86_64.
                unsafe { std::arch::x86_64::_mm_getcsr() }
            }

            #[allow(deprecated)]
            pub(super) fn write(word: ControlWord) {
                // SAFETY: only exception mask bits are changed relative to a value read from MXCSR.
                unsafe { std::arch::x86_64::_mm_setcsr(word) }
            }

            pub(super) fn masked(word: ControlWord, traps: FpTraps) -> ControlWord {
                let mut word = word;
                if traps.contains(FpTraps::INVALID) {
                    word |= INVALID_MASK;
                }
                if traps.contains(FpTraps::DIVIDE_BY_ZERO) {
                    word |= DIVIDE_BY_ZERO_MASK;
                }
                word
            }
        }
    } else if #[cfg(target_arch = "aarch64")] {
        mod arch {
            use super::FpTraps;

            // FPCR trap enable bits; a cleared bit masks the exception.
            const INVALID_ENABLE: u64 = 1 << 8;
            const DIVIDE_BY_ZERO_ENABLE: u64 = 1 << 9;

            pub(super) type ControlWord = u64;

            pub(super) fn read() -> ControlWord {
                let word: u64;
                // SAFETY: reading FPCR has no side effects.
                unsafe { std::arch::asm!("mrs {}, fpcr", out(reg) word, options(nomem, nostack)) };
                word
            }

            pub(super) fn write(word: ControlWord) {
                // SAFETY: only trap enable bits are changed relative to a value read from FPCR.
                unsafe { std::arch::asm!("msr fpcr, {}", in(reg) word, options(nomem, nostack)) };
            }

            pub(super) fn masked(word: ControlWord, traps: FpTraps) -> ControlWord {
                let mut word = word;
                if traps.contains(FpTraps::INVALID) {
                    word &= !INVALID_ENABLE;
                }
                if traps.contains(FpTraps::DIVIDE_BY_ZERO) {
                    word &= !DIVIDE_BY_ZERO_ENABLE;
                }
                word
            }
        }
    } else {
        mod arch {
            use super::FpTraps;

            pub(super) type ControlWord = ();

            pub(super) fn read() -> ControlWord {}

            pub(super) fn write(_word: ControlWord) {}

            pub(super) fn masked(word: ControlWord, _traps: FpTraps) -> ControlWord {
                word
            }
        }
    }
}

/// Masks a set of floating-point traps until dropped.
///
/// Guards nest: each one restores exactly the word it found.
#[must_use = "traps are unmasked again as soon as the guard is dropped"]
pub struct TrapMask {
    saved: arch::ControlWord,
}

impl TrapMask {
    pub fn new(traps: FpTraps) -> Self {
        let saved = arch::read();
        let word = arch::masked(saved, traps);
        if word != saved {
            log::trace!("masking floating-point traps {:?}", traps);
            arch::write(word);
        }
        TrapMask { saved }
    }

    /// Masks invalid-operation and divide-by-zero traps.
    pub fn all() -> Self {
        Self::new(FpTraps::ALL)
    }
}

impl Drop for TrapMask {
    fn drop(&mut self) {
        if arch::read() != self.saved {
            arch::write(self.saved);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trap_set() {
        let traps = FpTraps::INVALID | FpTraps::DIVIDE_BY_ZERO;
        assert_eq!(traps, FpTraps::ALL);
        assert!(traps.contains(FpTraps::INVALID));
        assert!(!FpTraps::INVALID.contains(FpTraps::DIVIDE_BY_ZERO));
        assert!(FpTraps::NONE.contains(FpTraps::NONE));
    }

    #[test]
    fn test_guard_restores_control_word() {
        let before = arch::read();
        {
            let _outer = TrapMask::all();
            let _inner = TrapMask::new(FpTraps::INVALID);
            let x = 0.0f64;
            assert!((x / x).is_nan());
        }
        assert_eq!(arch::read(), before);
    }
}
