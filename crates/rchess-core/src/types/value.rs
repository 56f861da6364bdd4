//! 評価値（Value）

/// 評価値（センチポーン相当の内部スケール）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Value(i32);

impl Value {
    pub const ZERO: Value = Value(0);

    /// 歩の内部評価値
    pub const PAWN: i32 = 208;
    pub const KNIGHT: i32 = 781;
    pub const BISHOP: i32 = 825;
    pub const ROOK: i32 = 1276;
    pub const QUEEN: i32 = 2538;

    #[inline]
    pub const fn new(v: i32) -> Value {
        Value(v)
    }

    /// 生の値を取得
    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }
}

impl std::ops::Neg for Value {
    type Output = Value;

    #[inline]
    fn neg(self) -> Value {
        Value(-self.0)
    }
}
