use std::path::PathBuf;

use ffmpeg_next as ffmpeg;

fn livecap_exe() -> PathBuf {
    std::env::var_os("CARGO_BIN_EXE_livecap")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let mut p = PathBuf::from("target").join("debug");
            p.push(if cfg!(windows) {
                "livecap.exe"
            } else {
                "livecap"
            });
            p
        })
}

fn mpeg4_available() -> bool {
    ffmpeg::init().is_ok() && ffmpeg::encoder::find_by_name("mpeg4").is_some()
}

#[test]
fn cli_frame_writes_png() {
    let dir = PathBuf::from("target").join("cli_smoke");
    std::fs::create_dir_all(&dir).unwrap();

    let out_path = dir.join("out.png");
    let _ = std::fs::remove_file(&out_path);

    let out_arg = out_path.to_string_lossy().to_string();
    let status = std::process::Command::new(livecap_exe())
        .args(["frame", "--out", out_arg.as_str(), "--width", "64"])
        .args(["--height", "64"])
        .status()
        .unwrap();

    assert!(status.success());
    assert!(out_path.exists());
}

#[test]
fn cli_probe_reports_encoder_availability() {
    let output = std::process::Command::new(livecap_exe())
        .arg("probe")
        .output()
        .unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("mpeg4:"), "unexpected probe output: {stdout}");
}

#[test]
fn cli_record_writes_a_short_capture() {
    if !mpeg4_available() {
        return;
    }
    let dir = PathBuf::from("target").join("cli_smoke");
    std::fs::create_dir_all(&dir).unwrap();

    // Extensionless path: the recorder falls back to an AVI container.
    let out_path = dir.join("cap");
    let avi_path = dir.join("cap.avi");
    let _ = std::fs::remove_file(&avi_path);

    let out_arg = out_path.to_string_lossy().to_string();
    let status = std::process::Command::new(livecap_exe())
        .args(["record", "--out", out_arg.as_str(), "--width", "64"])
        .args(["--height", "64", "--quality", "low", "--duration-secs", "1"])
        .status()
        .unwrap();

    assert!(status.success());
    assert!(avi_path.exists(), "missing {}", avi_path.display());
    assert!(std::fs::metadata(&avi_path).unwrap().len() > 0);
}
