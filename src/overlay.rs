//! Running-timecode overlay stamped onto frames before they reach the encoder.
//!
//! The recorder burns the accumulated video length into each outgoing frame as
//! `hh:mm:ss.zzz`. Glyphs come from a built-in 5x7 bitmap font (digits, colon,
//! dot) rendered white at a fixed position.

use crate::frame::FrameBuffer;

const GLYPH_W: usize = 5;
const GLYPH_H: usize = 7;
const SCALE: usize = 2;
const ADVANCE: usize = (GLYPH_W + 1) * SCALE;

/// Top-left corner of the stamped text.
const ORIGIN: (usize, usize) = (40, 40);

/// 5x7 rows, most significant of the low five bits is the leftmost column.
const fn glyph(c: char) -> Option<&'static [u8; GLYPH_H]> {
    match c {
        '0' => Some(&[0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110]),
        '1' => Some(&[0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110]),
        '2' => Some(&[0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111]),
        '3' => Some(&[0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110]),
        '4' => Some(&[0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010]),
        '5' => Some(&[0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110]),
        '6' => Some(&[0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110]),
        '7' => Some(&[0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000]),
        '8' => Some(&[0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110]),
        '9' => Some(&[0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100]),
        ':' => Some(&[0b00000, 0b00100, 0b00100, 0b00000, 0b00100, 0b00100, 0b00000]),
        '.' => Some(&[0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b00100, 0b00100]),
        _ => None,
    }
}

/// Formats a video length in milliseconds as `hh:mm:ss.zzz`.
///
/// Hours wrap at 24 like a time of day; negative inputs clamp to zero.
pub fn format_timecode(ms: i64) -> String {
    let ms = ms.max(0);
    let millis = ms % 1000;
    let secs = (ms / 1000) % 60;
    let mins = (ms / 60_000) % 60;
    let hours = (ms / 3_600_000) % 24;
    format!("{hours:02}:{mins:02}:{secs:02}.{millis:03}")
}

/// Stamps the running timecode for `video_length_ms` onto `frame` in white.
///
/// Glyphs falling outside the frame are clipped; undersized frames simply get a
/// partial (or no) stamp.
pub fn stamp_timecode(frame: &mut FrameBuffer, video_length_ms: i64) {
    if frame.is_empty() {
        return;
    }

    let text = format_timecode(video_length_ms);
    let (mut pen_x, pen_y) = ORIGIN;
    let width = frame.width as usize;
    let height = frame.height as usize;

    for c in text.chars() {
        let Some(rows) = glyph(c) else {
            pen_x += ADVANCE;
            continue;
        };
        for (gy, row) in rows.iter().enumerate() {
            for gx in 0..GLYPH_W {
                if row & (0b10000 >> gx) == 0 {
                    continue;
                }
                for sy in 0..SCALE {
                    for sx in 0..SCALE {
                        let x = pen_x + gx * SCALE + sx;
                        let y = pen_y + gy * SCALE + sy;
                        if x >= width || y >= height {
                            continue;
                        }
                        let at = (y * width + x) * 4;
                        frame.data[at..at + 4].copy_from_slice(&[255, 255, 255, 255]);
                    }
                }
            }
        }
        pen_x += ADVANCE;
    }
}
