use std::path::PathBuf;

use ffmpeg_next as ffmpeg;
use livecap::{EncoderSession, FrameBuffer, StreamConfig};

fn mpeg4_available() -> bool {
    ffmpeg::init().is_ok() && ffmpeg::encoder::find_by_name("mpeg4").is_some()
}

fn test_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "livecap_{}_{}_{}",
        tag,
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn small_config() -> StreamConfig {
    StreamConfig {
        width: 64,
        height: 64,
        ..StreamConfig::default()
    }
}

fn gradient_frame(width: u32, height: u32, seed: u8) -> FrameBuffer {
    let mut frame = FrameBuffer::blank(width, height, 0).unwrap();
    for (i, px) in frame.data.chunks_exact_mut(4).enumerate() {
        px[0] = (i % 256) as u8;
        px[1] = seed;
        px[2] = ((i / 7) % 256) as u8;
        px[3] = 255;
    }
    frame
}

#[test]
fn extensionless_path_falls_back_to_avi() {
    if !mpeg4_available() {
        return;
    }
    let dir = test_dir("avi_fallback");
    let mut session = EncoderSession::new(dir.join("clip"), small_config());

    session.open().unwrap();
    let out = session.out_path().unwrap().to_path_buf();
    assert_eq!(out, dir.join("clip.avi"));

    assert_eq!(session.write_frame(&gradient_frame(64, 64, 1), 120).unwrap(), 3);
    session.close().unwrap();

    let written = std::fs::metadata(&out).unwrap().len();
    assert!(written > 0, "expected a non-empty file at {}", out.display());
}

#[test]
fn repeat_count_truncates_without_carry() {
    if !mpeg4_available() {
        return;
    }
    let dir = test_dir("truncation");
    let mut session = EncoderSession::new(dir.join("trunc.avi"), small_config());
    session.open().unwrap();

    let frame = gradient_frame(64, 64, 2);
    // 120 ms at 25 fps floors to 3 output frames.
    assert_eq!(session.write_frame(&frame, 120).unwrap(), 3);
    // 37 ms floors to 0, and the 0.925 remainder is not carried forward:
    // a second 37 ms write still produces nothing.
    assert_eq!(session.write_frame(&frame, 37).unwrap(), 0);
    assert_eq!(session.write_frame(&frame, 37).unwrap(), 0);
    assert_eq!(session.write_frame(&frame, 40).unwrap(), 1);
    assert_eq!(session.frames_pushed(), 4);

    session.close().unwrap();
}

#[test]
fn open_while_open_fails_and_close_is_idempotent() {
    if !mpeg4_available() {
        return;
    }
    let dir = test_dir("lifecycle");
    let mut session = EncoderSession::new(dir.join("life.avi"), small_config());

    session.open().unwrap();
    assert!(session.is_open());
    assert!(session.open().is_err());
    assert!(session.is_open());

    session.close().unwrap();
    assert!(!session.is_open());
    session.close().unwrap();
}

#[test]
fn stored_bit_rate_is_honored_by_the_next_open() {
    if !mpeg4_available() {
        return;
    }
    let dir = test_dir("bitrate");
    let mut session = EncoderSession::new(dir.join("rate.avi"), small_config());

    assert!(session.set_bit_rate(900_000));
    session.open().unwrap();
    assert_eq!(session.bit_rate(), 900_000);
    assert!(!session.set_bit_rate(1_000_000));
    assert_eq!(session.bit_rate(), 900_000);
    session.close().unwrap();

    assert!(session.set_bit_rate(1_000_000));
    assert_eq!(session.bit_rate(), 1_000_000);
}

#[test]
fn capture_size_changes_are_absorbed_by_the_staging_rebuild() {
    if !mpeg4_available() {
        return;
    }
    let dir = test_dir("resize");
    let mut session = EncoderSession::new(dir.join("resize.avi"), small_config());
    session.open().unwrap();

    assert_eq!(session.write_frame(&gradient_frame(64, 64, 3), 40).unwrap(), 1);
    // Larger capture than the stream: converted and scaled down.
    assert_eq!(session.write_frame(&gradient_frame(128, 96, 4), 40).unwrap(), 1);
    // And back again.
    assert_eq!(session.write_frame(&gradient_frame(64, 64, 5), 80).unwrap(), 2);
    assert_eq!(session.frames_pushed(), 4);

    session.close().unwrap();
}

#[test]
fn a_second_of_frames_produces_a_plausible_file() {
    if !mpeg4_available() {
        return;
    }
    let dir = test_dir("content");
    let mut session = EncoderSession::new(dir.join("second.avi"), small_config());
    session.open().unwrap();

    for i in 0..25 {
        session
            .write_frame(&gradient_frame(64, 64, i as u8), 40)
            .unwrap();
    }
    assert_eq!(session.frames_pushed(), 25);
    let out = session.out_path().unwrap().to_path_buf();
    session.close().unwrap();

    // Header, 25 encoded frames and a trailer; anything this small means the
    // delayed-packet flush or the trailer went missing.
    let written = std::fs::metadata(&out).unwrap().len();
    assert!(written > 2_000, "file too small: {written} bytes");
}
