// Merge backends

pub mod copy;
pub mod transcode;

use lazy_static::lazy_static;
use regex::Regex;

pub use copy::CopyBackend;
pub use transcode::TranscodeBackend;

use super::models::MergeMode;
use super::traits::MuxBackend;
use super::utils::ProcessLine;

pub fn backend_for(mode: MergeMode) -> Box<dyn MuxBackend> {
    match mode {
        MergeMode::Copy => Box::new(CopyBackend),
        MergeMode::Transcode => Box::new(TranscodeBackend::default()),
    }
}

lazy_static! {
    // "  Duration: 00:03:21.45, start: 0.000000, bitrate: 2417 kb/s"
    static ref DURATION_RE: Regex =
        Regex::new(r"Duration:\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").unwrap();
    // -progress output; out_time_ms is microseconds too, despite the name
    static ref OUT_TIME_RE: Regex = Regex::new(r"^out_time_(?:us|ms)=(\d+)$").unwrap();
}

/// Tracks encoder output and turns it into a completion fraction.
/// Duration comes from the input banner on stderr, position from
/// `-progress pipe:1` on stdout.
#[derive(Debug, Default)]
pub struct EncoderProgress {
    duration_us: Option<u64>,
}

impl EncoderProgress {
    pub fn observe(&mut self, line: &ProcessLine) -> Option<f64> {
        match line {
            ProcessLine::Stderr(text) => {
                if let Some(us) = parse_duration_us(text) {
                    // Two inputs print two banners; the longer one bounds the output.
                    self.duration_us = Some(self.duration_us.map_or(us, |d| d.max(us)));
                }
                None
            }
            ProcessLine::Stdout(text) => {
                let text = text.trim();
                if text == "progress=end" {
                    return Some(1.0);
                }
                let position: u64 = OUT_TIME_RE.captures(text)?.get(1)?.as_str().parse().ok()?;
                let duration = self.duration_us.filter(|d| *d > 0)?;
                Some((position as f64 / duration as f64).min(1.0))
            }
        }
    }
}

fn parse_duration_us(line: &str) -> Option<u64> {
    let caps = DURATION_RE.captures(line)?;
    let hours: f64 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: f64 = caps.get(2)?.as_str().parse().ok()?;
    let seconds: f64 = caps.get(3)?.as_str().parse().ok()?;
    Some(((hours * 3600.0 + minutes * 60.0 + seconds) * 1_000_000.0).round() as u64)
}
