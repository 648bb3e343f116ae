//! GTP coordinate codec

use crate::error::GtpError;

/// The column letters used by GTP, excluding `i` per the protocol spec.
const LETTERS: [char; 25] = [
    'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't',
    'u', 'v', 'w', 'x', 'y', 'z',
];

/// A board move in server coordinates: `x` is the column from the left,
/// `y` the row from the top, both zero-based. A negative `x` is a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Move {
    pub x: i32,
    pub y: i32,
}

impl Move {
    pub fn pass() -> Self {
        Move { x: -1, y: -1 }
    }

    pub fn is_pass(&self) -> bool {
        self.x < 0
    }
}

/// The GTP column letter for a zero-based column index.
pub fn gtp_column(x: usize) -> char {
    LETTERS[x]
}

/// Encode a move as a GTP vertex. GTP rows count from the bottom of the
/// board, so the server's top-based `y` is flipped against `height`.
pub fn encode_move(mv: Move, height: i32) -> String {
    if mv.is_pass() {
        "pass".to_string()
    } else {
        format!("{}{}", gtp_column(mv.x as usize), height - mv.y)
    }
}

/// Decode a GTP vertex (`q16`, `pass`, ...) back into server coordinates.
pub fn decode_move(s: &str, height: i32) -> Result<Move, GtpError> {
    let s = s.trim().to_lowercase();
    if s == "pass" {
        return Ok(Move::pass());
    }
    let mut chars = s.chars();
    let col = chars
        .next()
        .and_then(|c| LETTERS.iter().position(|&l| l == c));
    let row = chars.as_str().parse::<i32>().ok();
    match (col, row) {
        (Some(x), Some(row)) if row >= 1 && row <= height => Ok(Move {
            x: x as i32,
            y: height - row,
        }),
        _ => Err(GtpError::UnexpectedOutput(format!("bad vertex: {s}"))),
    }
}
