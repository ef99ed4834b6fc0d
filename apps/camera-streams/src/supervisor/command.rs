//! ffmpeg argument sets for live HLS output and archival recordings.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use validator::Validate;

use crate::config::{LiveDefaults, TranscoderConfig};
use crate::session::Purpose;
use crate::storage::LiveOutput;
use crate::{Result, StreamManagerError};

const ANALYZE_DURATION: &str = "5000000";
const PROBE_SIZE: &str = "5000000";
const GOP_SIZE: &str = "30";
const LIVE_BUFSIZE: &str = "4M";
const AUDIO_BITRATE: &str = "128k";
const AUDIO_SAMPLE_RATE: &str = "44100";

/// A fully resolved transcoder command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub camera_id: String,
    pub purpose: Purpose,
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Playlist for live, the finished file for recordings.
    pub output_path: PathBuf,
}

/// Per-request overrides of the live encoder settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, Validate)]
pub struct LiveOptions {
    #[validate(length(min = 1, max = 32))]
    pub codec: Option<String>,
    #[validate(length(min = 1, max = 32))]
    pub preset: Option<String>,
    #[validate(length(min = 1, max = 16))]
    pub bitrate: Option<String>,
    #[validate(length(min = 1, max = 16))]
    pub maxrate: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveEncoding {
    pub codec: String,
    pub preset: String,
    pub bitrate: String,
    pub maxrate: String,
}

fn is_identifier(value: &str) -> bool {
    value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        && !value.starts_with('-')
}

/// `2M`, `800k`, `1500000`
fn is_rate(value: &str) -> bool {
    let digits = value.trim_end_matches(['k', 'K', 'm', 'M']);
    !digits.is_empty()
        && digits.len() + 1 >= value.len()
        && digits.chars().all(|c| c.is_ascii_digit())
}

impl LiveOptions {
    pub fn resolve(&self, defaults: &LiveDefaults) -> Result<LiveEncoding> {
        self.validate()
            .map_err(|e| StreamManagerError::InvalidOptions(e.to_string()))?;

        let pick = |value: &Option<String>, default: &str| {
            value.clone().unwrap_or_else(|| default.to_string())
        };
        let encoding = LiveEncoding {
            codec: pick(&self.codec, &defaults.codec),
            preset: pick(&self.preset, &defaults.preset),
            bitrate: pick(&self.bitrate, &defaults.bitrate),
            maxrate: pick(&self.maxrate, &defaults.maxrate),
        };

        if !is_identifier(&encoding.codec) {
            return Err(StreamManagerError::InvalidOptions(format!("codec: {}", encoding.codec)));
        }
        if !is_identifier(&encoding.preset) {
            return Err(StreamManagerError::InvalidOptions(format!("preset: {}", encoding.preset)));
        }
        if !is_rate(&encoding.bitrate) {
            return Err(StreamManagerError::InvalidOptions(format!("bitrate: {}", encoding.bitrate)));
        }
        if !is_rate(&encoding.maxrate) {
            return Err(StreamManagerError::InvalidOptions(format!("maxrate: {}", encoding.maxrate)));
        }
        Ok(encoding)
    }
}

fn validate_source_uri(source_uri: &str) -> Result<()> {
    if source_uri.trim().is_empty() || source_uri.starts_with('-') {
        return Err(StreamManagerError::InvalidOptions(format!(
            "invalid source uri: {:?}",
            source_uri
        )));
    }
    Ok(())
}

fn is_rtsp(source_uri: &str) -> bool {
    let lower = source_uri.to_ascii_lowercase();
    lower.starts_with("rtsp://") || lower.starts_with("rtsps://")
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Builds deterministic command lines from the transcoder configuration.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    program: PathBuf,
    hls_time_seconds: u32,
    hls_list_size: u32,
    live_defaults: LiveDefaults,
}

impl CommandBuilder {
    pub fn new(transcoder: &TranscoderConfig, live_defaults: &LiveDefaults) -> Self {
        Self {
            program: transcoder.ffmpeg_path.clone(),
            hls_time_seconds: transcoder.hls_time_seconds,
            hls_list_size: transcoder.hls_list_size,
            live_defaults: live_defaults.clone(),
        }
    }

    fn base_args(&self, source_uri: &str, low_latency: bool) -> Vec<String> {
        let mut args: Vec<String> = [
            "-hide_banner",
            "-nostdin",
            "-loglevel",
            "warning",
            "-nostats",
            "-progress",
            "pipe:1",
            "-y",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        if is_rtsp(source_uri) {
            args.extend(["-rtsp_transport".to_string(), "tcp".to_string()]);
        }
        args.extend(
            ["-analyzeduration", ANALYZE_DURATION, "-probesize", PROBE_SIZE]
                .iter()
                .map(|s| s.to_string()),
        );
        if low_latency {
            args.extend(["-fflags".to_string(), "nobuffer".to_string()]);
        }
        args.extend(["-i".to_string(), source_uri.to_string()]);
        args
    }

    pub fn live(
        &self,
        camera_id: &str,
        source_uri: &str,
        output: &LiveOutput,
        options: &LiveOptions,
    ) -> Result<Invocation> {
        validate_source_uri(source_uri)?;
        let encoding = options.resolve(&self.live_defaults)?;

        let mut args = self.base_args(source_uri, true);
        args.extend([
            "-c:v".to_string(),
            encoding.codec,
            "-preset".to_string(),
            encoding.preset,
            "-tune".to_string(),
            "zerolatency".to_string(),
            "-g".to_string(),
            GOP_SIZE.to_string(),
            "-sc_threshold".to_string(),
            "0".to_string(),
            "-b:v".to_string(),
            encoding.bitrate,
            "-maxrate".to_string(),
            encoding.maxrate,
            "-bufsize".to_string(),
            LIVE_BUFSIZE.to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            AUDIO_BITRATE.to_string(),
            "-ar".to_string(),
            AUDIO_SAMPLE_RATE.to_string(),
            "-f".to_string(),
            "hls".to_string(),
            "-hls_time".to_string(),
            self.hls_time_seconds.to_string(),
            "-hls_list_size".to_string(),
            self.hls_list_size.to_string(),
            "-hls_flags".to_string(),
            "delete_segments+append_list".to_string(),
            "-hls_segment_filename".to_string(),
            path_arg(&output.segment_pattern),
            path_arg(&output.playlist),
        ]);

        Ok(Invocation {
            camera_id: camera_id.to_string(),
            purpose: Purpose::Live,
            program: self.program.clone(),
            args,
            output_path: output.playlist.clone(),
        })
    }

    pub fn recording(
        &self,
        camera_id: &str,
        source_uri: &str,
        output_path: &Path,
    ) -> Result<Invocation> {
        validate_source_uri(source_uri)?;

        let mut args = self.base_args(source_uri, false);
        args.extend([
            "-c:v".to_string(),
            "copy".to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            path_arg(output_path),
        ]);

        Ok(Invocation {
            camera_id: camera_id.to_string(),
            purpose: Purpose::Recording,
            program: self.program.clone(),
            args,
            output_path: output_path.to_path_buf(),
        })
    }
}
