//! Hole Tables
//!
//! Per-byte lookup tables for the sub-page bitmap scan. Bit 0 of a bitmap
//! byte describes the lowest quantum, so a hole "continuing" from the
//! previous byte meets this byte's low bits, and a hole "starting" here
//! occupies its high bits.

/// Zero bits at the low end of the byte (8 for an empty byte)
pub static FIRST_HOLE: [u8; 256] = build_first_hole();

/// Zero bits at the high end of the byte (8 for an empty byte)
pub static LAST_HOLE: [u8; 256] = build_last_hole();

/// Length of the longest zero run inside the byte
pub static MAX_HOLE: [u8; 256] = build_max_hole().0;

/// Bit offset of the longest zero run (lowest one on ties)
pub static MAX_HOLE_OFFSET: [u8; 256] = build_max_hole().1;

const fn build_first_hole() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut mask = 0;
    while mask < 256 {
        let mut n = 0;
        while n < 8 && (mask >> n) & 1 == 0 {
            n += 1;
        }
        table[mask] = n as u8;
        mask += 1;
    }
    table
}

const fn build_last_hole() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut mask = 0;
    while mask < 256 {
        let mut n = 0;
        while n < 8 && (mask >> (7 - n)) & 1 == 0 {
            n += 1;
        }
        table[mask] = n as u8;
        mask += 1;
    }
    table
}

const fn build_max_hole() -> ([u8; 256], [u8; 256]) {
    let mut sizes = [0u8; 256];
    let mut offsets = [0u8; 256];
    let mut mask = 0;
    while mask < 256 {
        let mut best = 0;
        let mut best_at = 0;
        let mut run = 0;
        let mut bit = 0;
        while bit < 8 {
            if (mask >> bit) & 1 == 0 {
                run += 1;
                if run > best {
                    best = run;
                    best_at = bit + 1 - run;
                }
            } else {
                run = 0;
            }
            bit += 1;
        }
        sizes[mask] = best as u8;
        offsets[mask] = best_at as u8;
        mask += 1;
    }
    (sizes, offsets)
}
