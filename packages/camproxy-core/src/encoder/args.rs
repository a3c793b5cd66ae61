//! Builds the encoder argument set required by §4.2's invocation contract.

use std::path::Path;

use crate::driver::VideoCodec;
use crate::protocol_constants::{
    AUDIO_CHANNELS, FRAGMENT_DURATION_SHORT_MS, FRAGMENT_DURATION_STANDARD_MS, GOP_SIZE_SHORT,
    GOP_SIZE_STANDARD, VIDEO_LEVEL, VIDEO_PIX_FMT, VIDEO_PROFILE,
};

use super::EncoderTunables;

/// Builds the full argument list for the encoder invocation: video on
/// stdin, audio on the auxiliary pipe at `aux_path`, fMP4 on stdout.
pub fn build_args(video_codec: VideoCodec, tunables: &EncoderTunables, aux_path: &Path) -> Vec<String> {
    let gop = if tunables.short_keyframes { GOP_SIZE_SHORT } else { GOP_SIZE_STANDARD };
    let fragment_ms = if tunables.short_keyframes {
        FRAGMENT_DURATION_SHORT_MS
    } else {
        FRAGMENT_DURATION_STANDARD_MS
    };

    let mut args: Vec<String> = Vec::new();

    // Primary input: video on stdin.
    args.extend(["-f".into(), video_codec.as_ffmpeg_format().into()]);
    args.extend(["-i".into(), "pipe:0".into()]);

    // Auxiliary input: audio on the named pipe.
    args.extend(["-f".into(), "aac".into()]);
    args.extend(["-i".into(), aux_path.display().to_string()]);

    args.extend(["-map".into(), "0:v:0".into()]);
    args.extend(["-map".into(), "1:a:0".into()]);

    args.extend(["-c:v".into(), "libx264".into()]);
    args.extend(["-profile:v".into(), VIDEO_PROFILE.into()]);
    args.extend(["-level".into(), VIDEO_LEVEL.into()]);
    args.extend(["-pix_fmt".into(), VIDEO_PIX_FMT.into()]);
    args.extend(["-preset".into(), tunables.preset.clone()]);
    args.extend(["-crf".into(), tunables.crf.to_string()]);
    args.extend(["-threads".into(), tunables.threads.to_string()]);
    args.extend(["-sc_threshold".into(), "0".into()]);
    args.extend(["-g".into(), gop.to_string()]);
    args.extend(["-keyint_min".into(), gop.to_string()]);
    args.extend(["-flags".into(), "+cgop".into()]);

    if let Some(scale) = &tunables.scale {
        args.extend(["-vf".into(), format!("scale={scale}")]);
    }

    args.extend(["-c:a".into(), "aac".into()]);
    args.extend(["-ac".into(), AUDIO_CHANNELS.to_string()]);
    args.extend(["-ar".into(), tunables.audio_sample_rate.to_string()]);
    args.extend(["-b:a".into(), tunables.audio_bitrate.to_string()]);

    args.extend(["-f".into(), "mp4".into()]);
    args.extend([
        "-movflags".into(),
        "frag_keyframe+empty_moov+default_base_moof+faststart".into(),
    ]);
    args.extend(["-frag_duration".into(), (fragment_ms * 1000).to_string()]);
    args.extend(["-muxdelay".into(), "0".into()]);
    args.extend(["-muxpreload".into(), "0".into()]);

    args.push("pipe:1".into());

    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn short_keyframes_selects_small_gop_and_fragment_duration() {
        let tunables = EncoderTunables {
            short_keyframes: true,
            ..Default::default()
        };
        let args = build_args(VideoCodec::H264, &tunables, &PathBuf::from("/tmp/aux.aac"));
        let g_index = args.iter().position(|a| a == "-g").unwrap();
        assert_eq!(args[g_index + 1], "15");
    }

    #[test]
    fn standard_keyframes_selects_gop_of_30() {
        let tunables = EncoderTunables::default();
        let args = build_args(VideoCodec::H264, &tunables, &PathBuf::from("/tmp/aux.aac"));
        let g_index = args.iter().position(|a| a == "-g").unwrap();
        assert_eq!(args[g_index + 1], "30");
    }

    #[test]
    fn scale_filter_is_included_only_when_configured() {
        let mut tunables = EncoderTunables::default();
        let args_no_scale = build_args(VideoCodec::H264, &tunables, &PathBuf::from("/tmp/aux.aac"));
        assert!(!args_no_scale.contains(&"-vf".to_string()));

        tunables.scale = Some("1280:-2".to_string());
        let args_with_scale = build_args(VideoCodec::H264, &tunables, &PathBuf::from("/tmp/aux.aac"));
        let vf_index = args_with_scale.iter().position(|a| a == "-vf").unwrap();
        assert_eq!(args_with_scale[vf_index + 1], "scale=1280:-2");
    }

    #[test]
    fn hevc_input_format_reflects_codec() {
        let args = build_args(VideoCodec::H265, &EncoderTunables::default(), &PathBuf::from("/tmp/aux.aac"));
        let f_index = args.iter().position(|a| a == "-f").unwrap();
        assert_eq!(args[f_index + 1], "hevc");
    }

    #[test]
    fn audio_profile_is_applied_from_tunables() {
        let tunables = EncoderTunables {
            audio_sample_rate: 48_000,
            audio_bitrate: 64_000,
            ..Default::default()
        };
        let args = build_args(VideoCodec::H264, &tunables, &PathBuf::from("/tmp/aux.aac"));

        let ac_index = args.iter().position(|a| a == "-ac").unwrap();
        assert_eq!(args[ac_index + 1], "1");

        let ar_index = args.iter().position(|a| a == "-ar").unwrap();
        assert_eq!(args[ar_index + 1], "48000");

        let ba_index = args.iter().position(|a| a == "-b:a").unwrap();
        assert_eq!(args[ba_index + 1], "64000");
    }
}
