// Copyright 2018-2026 the jsrt authors. MIT license.

//! `crc32` and `adler32`, incremental over an explicit initial value
//! (so chunked updates equal one-shot calls).

/// Reflected CRC-32, polynomial 0xEDB88320.
const fn build_crc_table() -> [u32; 256] {
  let mut table = [0u32; 256];
  let mut n = 0;
  while n < 256 {
    let mut c = n as u32;
    let mut k = 0;
    while k < 8 {
      c = if c & 1 != 0 { 0xEDB8_8320 ^ (c >> 1) } else { c >> 1 };
      k += 1;
    }
    table[n] = c;
    n += 1;
  }
  table
}

static CRC_TABLE: [u32; 256] = build_crc_table();

/// CRC-32 of `data` continued from `init` (0 for a fresh checksum).
pub fn crc32(data: &[u8], init: u32) -> u32 {
  let mut c = init ^ 0xFFFF_FFFF;
  for &byte in data {
    c = CRC_TABLE[((c ^ byte as u32) & 0xFF) as usize] ^ (c >> 8);
  }
  c ^ 0xFFFF_FFFF
}

const ADLER_MOD: u32 = 65_521;
// Largest n with 255n(n+1)/2 + (n+1)(ADLER_MOD-1) < 2^32.
const ADLER_NMAX: usize = 5552;

/// Adler-32 of `data` continued from `init` (1 for a fresh checksum).
pub fn adler32(data: &[u8], init: u32) -> u32 {
  let mut a = init & 0xFFFF;
  let mut b = (init >> 16) & 0xFFFF;
  for block in data.chunks(ADLER_NMAX) {
    for &byte in block {
      a += byte as u32;
      b += a;
    }
    a %= ADLER_MOD;
    b %= ADLER_MOD;
  }
  (b << 16) | a
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn crc32_check_value() {
    // The standard check vector.
    assert_eq!(crc32(b"123456789", 0), 0xCBF4_3926);
  }

  #[test]
  fn crc32_empty_is_zero() {
    assert_eq!(crc32(b"", 0), 0);
  }

  #[test]
  fn adler32_check_value() {
    assert_eq!(adler32(b"123456789", 1), 0x091E_01DE);
  }

  #[test]
  fn adler32_empty_is_one() {
    assert_eq!(adler32(b"", 1), 1);
  }

  #[test]
  fn incremental_chunking_matches_one_shot() {
    let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let whole_crc = crc32(&data, 0);
    let whole_adler = adler32(&data, 1);

    for split in [1, 7, 251, 4096, 9999] {
      let (left, right) = data.split_at(split);
      assert_eq!(crc32(right, crc32(left, 0)), whole_crc);
      assert_eq!(adler32(right, adler32(left, 1)), whole_adler);
    }
  }
}
