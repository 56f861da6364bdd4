//! リトルエンディアンの生データ読み書き

use std::io::{self, Read, Write};

#[inline]
pub fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// i32 配列を読み込み
pub fn read_i32_into<R: Read>(reader: &mut R, out: &mut [i32]) -> io::Result<()> {
    let mut buf = [0u8; 4];
    for v in out.iter_mut() {
        reader.read_exact(&mut buf)?;
        *v = i32::from_le_bytes(buf);
    }
    Ok(())
}

/// i8 配列を読み込み（1バイトずつなのでエンディアンは関係しない）
pub fn read_i8_into<R: Read>(reader: &mut R, out: &mut [i8]) -> io::Result<()> {
    let mut buf = vec![0u8; out.len()];
    reader.read_exact(&mut buf)?;
    for (dst, &b) in out.iter_mut().zip(buf.iter()) {
        *dst = b as i8;
    }
    Ok(())
}

#[inline]
pub fn write_u32<W: Write>(writer: &mut W, v: u32) -> io::Result<()> {
    writer.write_all(&v.to_le_bytes())
}

pub fn write_i32s<W: Write>(writer: &mut W, values: &[i32]) -> io::Result<()> {
    for &v in values {
        writer.write_all(&v.to_le_bytes())?;
    }
    Ok(())
}

pub fn write_i8s<W: Write>(writer: &mut W, values: &[i8]) -> io::Result<()> {
    let bytes: Vec<u8> = values.iter().map(|&v| v as u8).collect();
    writer.write_all(&bytes)
}
