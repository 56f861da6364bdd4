//! 升（Square）
//!
//! a1 = 0, b1 = 1, ..., h8 = 63 の順で番号付けする。

use std::fmt;

/// 升
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Square(u8);

impl Square {
    /// 升の数
    pub const NUM: usize = 64;

    pub const A1: Square = Square(0);
    pub const B1: Square = Square(1);
    pub const C1: Square = Square(2);
    pub const D1: Square = Square(3);
    pub const E1: Square = Square(4);
    pub const F1: Square = Square(5);
    pub const G1: Square = Square(6);
    pub const H1: Square = Square(7);
    pub const A8: Square = Square(56);
    pub const C8: Square = Square(58);
    pub const D8: Square = Square(59);
    pub const E8: Square = Square(60);
    pub const F8: Square = Square(61);
    pub const G8: Square = Square(62);
    pub const H8: Square = Square(63);

    /// 番号から生成（範囲外なら None）
    #[inline]
    pub const fn new(index: u8) -> Option<Square> {
        if index < 64 { Some(Square(index)) } else { None }
    }

    /// 筋・段（いずれも 0..8）から生成
    #[inline]
    pub const fn from_file_rank(file: u8, rank: u8) -> Option<Square> {
        if file < 8 && rank < 8 {
            Some(Square(rank * 8 + file))
        } else {
            None
        }
    }

    /// 検査なしで生成（呼び出し側が 0..64 を保証する）
    #[inline]
    pub(crate) const fn from_index_unchecked(index: usize) -> Square {
        debug_assert!(index < 64);
        Square(index as u8)
    }

    /// 筋（a=0 .. h=7）
    #[inline]
    pub const fn file(self) -> u8 {
        self.0 & 7
    }

    /// 段（1段目=0 .. 8段目=7）
    #[inline]
    pub const fn rank(self) -> u8 {
        self.0 >> 3
    }

    /// インデックスとして使用
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// 上下反転（a1 <-> a8）
    #[inline]
    pub const fn flip_rank(self) -> Square {
        Square(self.0 ^ 56)
    }

    /// 左右反転（a1 <-> h1）
    #[inline]
    pub const fn flip_file(self) -> Square {
        Square(self.0 ^ 7)
    }

    /// "e4" 形式の文字列から生成
    pub fn from_algebraic(s: &str) -> Option<Square> {
        let mut chars = s.chars();
        let file = chars.next()?;
        let rank = chars.next()?;
        if chars.next().is_some() || !('a'..='h').contains(&file) || !('1'..='8').contains(&rank)
        {
            return None;
        }
        Square::from_file_rank(file as u8 - b'a', rank as u8 - b'1')
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", (b'a' + self.file()) as char, (b'1' + self.rank()) as char)
    }
}
