//! LEB128（Little Endian Base 128）圧縮ブロックの符号化・復号
//!
//! 圧縮ブロックの形式:
//!
//! ```text
//! "COMPRESSED_LEB128" (17 bytes) | byte_count: u32 LE | byte_count bytes of signed LEB128
//! ```
//!
//! 各値は 7bit ずつ下位から格納され、最上位ビットが継続フラグ。
//! 終端バイトの 0x40 ビットが立っていれば符号拡張する。
//!
//! 復号は 64bit の中間値で行い、格納先の型の範囲に収まらない値や
//! 型幅に必要なバイト数（`ceil(BITS / 7)`）を超える値はエラーとする。
//! 終端バイトで shift が型幅に達した場合も、中間値が 64bit なので
//! 符号拡張は常に正しく行われる。

use super::constants::LEB128_MAGIC;
use super::error::{Leb128Error, LoadError, LoadResult};
use std::io::{self, Read, Write};

/// LEB128 で格納できる整数型
pub trait Leb128Int: Copy + Default {
    /// ビット幅
    const BITS: u32;

    /// 1値あたりの最大バイト数
    const MAX_BYTES: u32 = Self::BITS.div_ceil(7);

    fn from_i64(v: i64) -> Option<Self>;

    fn to_i64(self) -> i64;
}

macro_rules! impl_leb128_int {
    ($($t:ty),*) => {
        $(
            impl Leb128Int for $t {
                const BITS: u32 = <$t>::BITS;

                #[inline]
                fn from_i64(v: i64) -> Option<Self> {
                    <$t>::try_from(v).ok()
                }

                #[inline]
                fn to_i64(self) -> i64 {
                    self as i64
                }
            }
        )*
    };
}

impl_leb128_int!(i8, i16, i32);

/// 1値を復号する
///
/// `next_byte` が None を返した場合（入力切れ）は `Ok(None)`。
fn decode_value<T: Leb128Int>(
    mut next_byte: impl FnMut() -> LoadResult<Option<u8>>,
) -> LoadResult<Option<T>> {
    let mut result: i64 = 0;
    let mut shift: u32 = 0;
    for _ in 0..T::MAX_BYTES {
        let Some(b) = next_byte()? else {
            return Ok(None);
        };
        result |= i64::from(b & 0x7f) << shift;
        shift += 7;
        if b & 0x80 == 0 {
            if shift < 64 && b & 0x40 != 0 {
                result |= !0i64 << shift;
            }
            return T::from_i64(result)
                .map(Some)
                .ok_or(LoadError::Leb128(Leb128Error::OutOfRange { value: result, bits: T::BITS }));
        }
    }
    Err(Leb128Error::Overlong { bits: T::BITS, max_bytes: T::MAX_BYTES }.into())
}

/// 宣言されたバイト数だけを読み出すバッファ付きリーダー
struct BlockReader<'a, R: Read> {
    reader: &'a mut R,
    buf: Box<[u8; 4096]>,
    pos: usize,
    len: usize,
    declared: u32,
    /// まだ `buf` に読み込んでいないバイト数
    unread: u32,
}

impl<'a, R: Read> BlockReader<'a, R> {
    fn new(reader: &'a mut R, declared: u32) -> Self {
        Self { reader, buf: Box::new([0u8; 4096]), pos: 0, len: 0, declared, unread: declared }
    }

    fn consumed(&self) -> u32 {
        self.declared - self.unread - (self.len - self.pos) as u32
    }

    fn next_byte(&mut self) -> LoadResult<Option<u8>> {
        if self.pos == self.len {
            if self.unread == 0 {
                return Ok(None);
            }
            let n = (self.unread as usize).min(self.buf.len());
            match self.reader.read_exact(&mut self.buf[..n]) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(Leb128Error::Truncated {
                        declared: self.declared,
                        consumed: self.consumed(),
                    }
                    .into());
                }
                Err(e) => return Err(e.into()),
            }
            self.unread -= n as u32;
            self.pos = 0;
            self.len = n;
        }
        let b = self.buf[self.pos];
        self.pos += 1;
        Ok(Some(b))
    }
}

/// 圧縮ブロックを読み込んで `out` を埋める
///
/// 宣言バイト数を使い切る前に値が揃った場合、または値が揃う前に
/// 宣言バイト数を使い切った場合はエラー。
pub fn read_leb128_into<R: Read, T: Leb128Int>(reader: &mut R, out: &mut [T]) -> LoadResult<()> {
    let mut magic = [0u8; 17];
    reader.read_exact(&mut magic)?;
    if &magic != LEB128_MAGIC {
        return Err(Leb128Error::MagicMismatch.into());
    }
    let mut buf4 = [0u8; 4];
    reader.read_exact(&mut buf4)?;
    let declared = u32::from_le_bytes(buf4);

    let mut block = BlockReader::new(reader, declared);
    for slot in out.iter_mut() {
        match decode_value::<T>(|| block.next_byte())? {
            Some(v) => *slot = v,
            None => {
                return Err(Leb128Error::Truncated { declared, consumed: block.consumed() }.into());
            }
        }
    }

    let consumed = block.consumed();
    if consumed != declared {
        return Err(Leb128Error::ByteCountMismatch { declared, consumed }.into());
    }
    Ok(())
}

/// 圧縮ブロックを読み込んで Vec を返す
pub fn read_leb128_vec<R: Read, T: Leb128Int>(reader: &mut R, count: usize) -> LoadResult<Vec<T>> {
    let mut out = vec![T::default(); count];
    read_leb128_into(reader, &mut out)?;
    Ok(out)
}

/// 1値を符号化して `out` に追記
pub fn encode_signed(value: i64, out: &mut Vec<u8>) {
    let mut value = value;
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        let done = if byte & 0x40 == 0 { value == 0 } else { value == -1 };
        if done {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// 圧縮ブロックを書き出す
pub fn write_leb128<W: Write, T: Leb128Int>(writer: &mut W, values: &[T]) -> io::Result<()> {
    let mut bytes = Vec::with_capacity(values.len() * 2);
    for &v in values {
        encode_signed(v.to_i64(), &mut bytes);
    }
    let count = u32::try_from(bytes.len()).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "LEB128 block exceeds 4 GiB")
    })?;
    writer.write_all(LEB128_MAGIC)?;
    writer.write_all(&count.to_le_bytes())?;
    writer.write_all(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn block(payload: &[u8]) -> Vec<u8> {
        let mut data = LEB128_MAGIC.to_vec();
        data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        data.extend_from_slice(payload);
        data
    }

    fn decode_block<T: Leb128Int>(payload: &[u8], count: usize) -> LoadResult<Vec<T>> {
        read_leb128_vec(&mut Cursor::new(block(payload)), count)
    }

    #[test]
    fn test_decode_known_values() {
        // 0, -1, 128, 64, -65
        let v: Vec<i16> =
            decode_block(&[0x00, 0x7F, 0x80, 0x01, 0xC0, 0x00, 0xBF, 0x7F], 5).unwrap();
        assert_eq!(v, vec![0, -1, 128, 64, -65]);
    }

    #[test]
    fn test_decode_type_extremes() {
        let v: Vec<i16> = decode_block(&[0xFF, 0xFF, 0x01, 0x80, 0x80, 0x7E], 2).unwrap();
        assert_eq!(v, vec![i16::MAX, i16::MIN]);

        // i8::MIN: 終端バイトで shift(14) が型幅(8)を超えるケース
        let v: Vec<i8> = decode_block(&[0x80, 0x7F], 1).unwrap();
        assert_eq!(v, vec![i8::MIN]);
    }

    #[test]
    fn test_magic_mismatch() {
        let mut data = block(&[0x00]);
        data[0] = b'X';
        let err = read_leb128_vec::<_, i16>(&mut Cursor::new(data), 1).unwrap_err();
        assert!(matches!(err, LoadError::Leb128(Leb128Error::MagicMismatch)));
    }

    #[test]
    fn test_excess_bytes_rejected() {
        let err = decode_block::<i16>(&[0x01, 0x02, 0x03], 2).unwrap_err();
        assert!(matches!(
            err,
            LoadError::Leb128(Leb128Error::ByteCountMismatch { declared: 3, consumed: 2 })
        ));
    }

    #[test]
    fn test_shortfall_rejected() {
        let err = decode_block::<i16>(&[0x01], 2).unwrap_err();
        assert!(matches!(err, LoadError::Leb128(Leb128Error::Truncated { .. })));

        // 宣言バイト数よりストリームが短い
        let mut data = block(&[0x01, 0x02]);
        data.pop();
        let err = read_leb128_vec::<_, i16>(&mut Cursor::new(data), 2).unwrap_err();
        assert!(matches!(err, LoadError::Leb128(Leb128Error::Truncated { .. })));
    }

    #[test]
    fn test_value_out_of_range() {
        // 128 は i8 に収まらない
        let err = decode_block::<i8>(&[0x80, 0x01], 1).unwrap_err();
        assert!(matches!(
            err,
            LoadError::Leb128(Leb128Error::OutOfRange { value: 128, bits: 8 })
        ));
    }

    #[test]
    fn test_overlong_rejected() {
        // i16 は最大3バイト
        let err = decode_block::<i16>(&[0x80, 0x80, 0x80, 0x00], 1).unwrap_err();
        assert!(matches!(
            err,
            LoadError::Leb128(Leb128Error::Overlong { bits: 16, max_bytes: 3 })
        ));
    }

    #[test]
    fn test_encoding_is_minimal() {
        let mut out = Vec::new();
        encode_signed(-64, &mut out);
        assert_eq!(out, vec![0x40]);
        out.clear();
        encode_signed(64, &mut out);
        assert_eq!(out, vec![0xC0, 0x00]);
    }

    fn roundtrip<T: Leb128Int + PartialEq + std::fmt::Debug>(values: &[T]) {
        let mut data = Vec::new();
        write_leb128(&mut data, values).unwrap();
        let decoded: Vec<T> = read_leb128_vec(&mut Cursor::new(data), values.len()).unwrap();
        assert_eq!(decoded, values);
    }

    proptest! {
        #[test]
        fn prop_boundary_i8(v in any::<i8>()) {
            roundtrip(&[v, i8::MIN, i8::MAX]);
        }

        #[test]
        fn prop_boundary_i16(v in any::<i16>()) {
            roundtrip(&[v, i16::MIN, i16::MAX]);
        }

        #[test]
        fn prop_boundary_i32(v in any::<i32>()) {
            roundtrip(&[v, i32::MIN, i32::MAX]);
        }

        /// 型幅を超える値は必ず拒否される
        #[test]
        fn prop_wider_value_rejected_for_i16(v in (i16::MAX as i64 + 1)..=(i32::MAX as i64)) {
            let mut payload = Vec::new();
            encode_signed(v, &mut payload);
            let result = decode_block::<i16>(&payload, 1);
            prop_assert!(result.is_err());
            let mut payload = Vec::new();
            encode_signed(-v - 1, &mut payload);
            prop_assert!(decode_block::<i16>(&payload, 1).is_err());
        }

        /// 符号化長は型の最大バイト数以下
        #[test]
        fn prop_encoded_length_bounded(v in any::<i32>()) {
            let mut payload = Vec::new();
            encode_signed(v as i64, &mut payload);
            prop_assert!(payload.len() as u32 <= <i32 as Leb128Int>::MAX_BYTES);
        }
    }
}
