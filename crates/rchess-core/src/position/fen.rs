//! FEN 形式の解析・出力
//!
//! 駒配置と手番のフィールドのみを扱う。キャスリング権・アンパッサン升・手数は
//! 評価に影響しないため読み飛ばす。

use super::Position;
use crate::types::{Color, Piece, PieceType, Square};

/// 平手初期局面
pub const FEN_STARTPOS: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// FEN 解析エラー
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FenError {
    #[error("FEN is empty")]
    Empty,
    #[error("invalid piece character '{0}'")]
    InvalidPiece(char),
    #[error("invalid board layout: {0}")]
    InvalidLayout(String),
    #[error("invalid side to move: {0}")]
    InvalidSideToMove(String),
    #[error("{0:?} must have exactly one king, found {1}")]
    KingCount(Color, usize),
    #[error("{0:?} has {1} pieces (at most 16 allowed)")]
    TooManyPieces(Color, u32),
}

impl Position {
    /// FEN 文字列で局面を設定
    pub fn set_fen(&mut self, fen: &str) -> Result<(), FenError> {
        let mut fields = fen.split_whitespace();
        let placement = fields.next().ok_or(FenError::Empty)?;

        let mut pos = Position::new();
        let ranks: Vec<&str> = placement.split('/').collect();
        if ranks.len() != 8 {
            return Err(FenError::InvalidLayout(format!("expected 8 ranks, got {}", ranks.len())));
        }
        for (i, rank_str) in ranks.iter().enumerate() {
            let rank = 7 - i as u8;
            let mut file = 0u8;
            for c in rank_str.chars() {
                if let Some(d) = c.to_digit(10) {
                    if !(1..=8).contains(&d) {
                        return Err(FenError::InvalidLayout(format!("bad empty count '{c}'")));
                    }
                    file = file.saturating_add(d as u8);
                    continue;
                }
                let pc = Piece::from_fen_char(c).ok_or(FenError::InvalidPiece(c))?;
                let sq = Square::from_file_rank(file, rank).ok_or_else(|| {
                    FenError::InvalidLayout(format!("rank {} overflows", rank + 1))
                })?;
                pos.put_piece(pc, sq);
                file += 1;
            }
            if file != 8 {
                return Err(FenError::InvalidLayout(format!(
                    "rank {} has {file} files",
                    rank + 1
                )));
            }
        }

        pos.side_to_move = match fields.next() {
            None | Some("w") => Color::White,
            Some("b") => Color::Black,
            Some(other) => return Err(FenError::InvalidSideToMove(other.to_string())),
        };

        for color in Color::ALL {
            let kings = pos.count(Piece::new(color, PieceType::King));
            if kings != 1 {
                return Err(FenError::KingCount(color, kings));
            }
            let pieces = pos.pieces_of(color).count();
            if pieces > 16 {
                return Err(FenError::TooManyPieces(color, pieces));
            }
        }

        *self = pos;
        Ok(())
    }

    /// 駒配置と手番を FEN 形式で出力（残りのフィールドは固定値）
    pub fn to_fen(&self) -> String {
        let mut s = String::new();
        for rank in (0..8u8).rev() {
            let mut empty = 0;
            for file in 0..8u8 {
                let sq = Square::from_index_unchecked((rank * 8 + file) as usize);
                match self.piece_on(sq) {
                    Some(pc) => {
                        if empty > 0 {
                            s.push(char::from(b'0' + empty));
                            empty = 0;
                        }
                        s.push(pc.to_fen_char());
                    }
                    None => empty += 1,
                }
            }
            if empty > 0 {
                s.push(char::from(b'0' + empty));
            }
            if rank > 0 {
                s.push('/');
            }
        }
        s.push_str(match self.side_to_move {
            Color::White => " w - - 0 1",
            Color::Black => " b - - 0 1",
        });
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fen_roundtrip_startpos() {
        let pos = Position::from_fen(FEN_STARTPOS).unwrap();
        assert_eq!(pos.to_fen(), "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w - - 0 1");
    }

    #[test]
    fn test_fen_errors() {
        assert_eq!(Position::from_fen(""), Err(FenError::Empty));
        assert!(matches!(
            Position::from_fen("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP w"),
            Err(FenError::InvalidLayout(_))
        ));
        assert_eq!(
            Position::from_fen("8/8/8/8/8/8/8/4K3 w - - 0 1"),
            Err(FenError::KingCount(Color::Black, 0))
        );
        assert_eq!(
            Position::from_fen("4k3/8/8/8/8/8/8/4X3 w - - 0 1"),
            Err(FenError::InvalidPiece('X'))
        );
        // 白が 18 駒
        assert_eq!(
            Position::from_fen("4k3/8/8/8/P7/PPPPPPPP/PPPPPPPP/4K3 w - - 0 1"),
            Err(FenError::TooManyPieces(Color::White, 18))
        );
    }
}
