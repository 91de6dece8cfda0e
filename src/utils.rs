#![allow(clippy::used_underscore_items, clippy::cast_possible_truncation)]

const _IOC_NRBITS: u32 = 8;
const _IOC_TYPEBITS: u32 = 8;
const _IOC_SIZEBITS: u32 = 14;

const _IOC_NRSHIFT: u32 = 0;
const _IOC_TYPESHIFT: u32 = _IOC_NRSHIFT + _IOC_NRBITS;
const _IOC_SIZESHIFT: u32 = _IOC_TYPESHIFT + _IOC_TYPEBITS;
const _IOC_DIRSHIFT: u32 = _IOC_SIZESHIFT + _IOC_SIZEBITS;

const _IOC_WRITE: u32 = 1;
const _IOC_READ: u32 = 2;

#[must_use]
pub const fn _ioc(dir: u32, type_: u32, nr: u32, size: usize) -> u32 {
    (dir << _IOC_DIRSHIFT)
        | (type_ << _IOC_TYPESHIFT)
        | (nr << _IOC_NRSHIFT)
        | ((size as u32) << _IOC_SIZESHIFT)
}

#[must_use]
pub const fn iow<T>(type_: u32, nr: u32) -> u32 {
    _ioc(_IOC_WRITE, type_, nr, std::mem::size_of::<T>())
}

#[must_use]
pub const fn iowr<T>(type_: u32, nr: u32) -> u32 {
    _ioc(_IOC_READ | _IOC_WRITE, type_, nr, std::mem::size_of::<T>())
}

/// Generates `len` bytes where byte `i` is `(i * multiplier) % modulus`.
///
/// Used to fill buffer objects with recognisable content before reading them back.
/// A `modulus` of zero yields an all-zero pattern. Each value is truncated to its low
/// byte, so a `modulus` above 256 produces values that wrap.
#[must_use]
pub fn pattern_bytes(len: usize, multiplier: usize, modulus: usize) -> Vec<u8> {
    if modulus == 0 {
        return vec![0; len];
    }
    (0..len)
        .map(|i| (i.wrapping_mul(multiplier) % modulus) as u8)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C)]
    struct SixteenBytes([u64; 2]);

    #[test]
    fn test_ioctl_numbers() {
        // DRM_IOCTL_SET_VERSION = _IOWR('d', 0x07, struct drm_set_version)
        assert_eq!(iowr::<[i32; 4]>(0x64, 0x07), 0xC010_6407);
        // DRM_IOCTL_GEM_CLOSE = _IOW('d', 0x09, struct drm_gem_close)
        assert_eq!(iow::<[u32; 2]>(0x64, 0x09), 0x4008_6409);
        assert_eq!(iowr::<SixteenBytes>(0x64, 0x40), 0xC010_6440);
    }

    #[test]
    fn test_pattern_bytes() {
        let p = pattern_bytes(256, 50, 253);
        assert_eq!(p.len(), 256);
        assert_eq!(&p[..6], &[0, 50, 100, 150, 200, 250]);
        assert_eq!(p[6], 47); // 300 % 253
        assert_eq!(p, pattern_bytes(256, 50, 253));
        assert!(pattern_bytes(8, 3, 0).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_pattern_bytes_wide_modulus_wraps() {
        // 300 % 1000 = 300, low byte 44
        let p = pattern_bytes(4, 100, 1000);
        assert_eq!(p, vec![0, 100, 200, 44]);
    }
}
