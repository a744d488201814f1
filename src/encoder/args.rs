//! Encoder command-line construction
//!
//! Builds an ffmpeg-style argv from [`EncoderConfig`]. The only contract the
//! rest of the worker relies on: the encoder writes a single live stream in
//! the configured container shape on stdout, and treats a lone `q` on stdin
//! as a polite quit request.

use crate::config::{ContainerKind, EncoderConfig};

/// Assemble the full argv (binary first) for one encoder run
pub fn build_argv(cfg: &EncoderConfig) -> Vec<String> {
    let mut argv: Vec<String> = vec![
        cfg.encoder_bin.display().to_string(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
    ];

    // Capture input
    if cfg!(windows) {
        argv.extend([
            "-f".into(),
            "dshow".into(),
            "-framerate".into(),
            cfg.fps.to_string(),
            "-video_size".into(),
            format!("{}x{}", cfg.width, cfg.height),
            "-i".into(),
            format!("video={}", cfg.device),
        ]);
    } else {
        argv.extend([
            "-f".into(),
            "v4l2".into(),
            "-framerate".into(),
            cfg.fps.to_string(),
            "-video_size".into(),
            format!("{}x{}", cfg.width, cfg.height),
            "-i".into(),
            cfg.device.clone(),
        ]);
    }

    // Codec selection and low-latency tuning
    argv.push("-c:v".into());
    match cfg.codec.as_str() {
        "vp9" => argv.extend([
            "libvpx-vp9".into(),
            "-deadline".into(),
            "realtime".into(),
            "-cpu-used".into(),
            "8".into(),
        ]),
        "vp8" => argv.extend([
            "libvpx".into(),
            "-deadline".into(),
            "realtime".into(),
        ]),
        "h264" => argv.extend([
            "libx264".into(),
            "-preset".into(),
            "veryfast".into(),
            "-tune".into(),
            "zerolatency".into(),
        ]),
        other => argv.push(other.to_string()),
    }

    argv.extend(["-an".into(), "-g".into(), (cfg.fps * 2).to_string()]);

    // Container on stdout
    match cfg.container {
        ContainerKind::Cluster => argv.extend(["-f".into(), "webm".into()]),
        ContainerKind::Boxed => argv.extend([
            "-f".into(),
            "mp4".into(),
            "-movflags".into(),
            "frag_keyframe+empty_moov+default_base_moof".into(),
        ]),
    }

    argv.extend(cfg.extra_args.iter().cloned());
    argv.push("pipe:1".into());
    argv
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stdout_is_the_sink() {
        let argv = build_argv(&EncoderConfig::default());
        assert_eq!(argv.last().map(String::as_str), Some("pipe:1"));
    }

    #[test]
    fn test_cluster_container_args() {
        let argv = build_argv(&EncoderConfig::default().codec("vp9"));
        assert!(argv.contains(&"libvpx-vp9".to_string()));
        assert!(argv.windows(2).any(|w| w == ["-f", "webm"]));
    }

    #[test]
    fn test_boxed_container_args() {
        let argv = build_argv(&EncoderConfig::default().codec("h264"));
        assert!(argv.contains(&"libx264".to_string()));
        assert!(argv.windows(2).any(|w| w == ["-f", "mp4"]));
        assert!(argv.iter().any(|a| a.contains("frag_keyframe")));
    }

    #[test]
    fn test_capture_parameters_present() {
        let cfg = EncoderConfig::default()
            .device("/dev/video7")
            .frame_size(640, 480)
            .fps(15);
        let argv = build_argv(&cfg);

        assert!(argv.contains(&"640x480".to_string()));
        assert!(argv.contains(&"15".to_string()));
        assert!(argv.iter().any(|a| a.contains("video7")));
    }

    #[test]
    fn test_extra_args_precede_sink() {
        let mut cfg = EncoderConfig::default();
        cfg.extra_args = vec!["-threads".into(), "2".into()];
        let argv = build_argv(&cfg);

        let threads = argv.iter().position(|a| a == "-threads").unwrap();
        assert_eq!(threads, argv.len() - 3);
    }
}
