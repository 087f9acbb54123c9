//! Scripted process runner
//!
//! Answers engine invocations by looking at their arguments, so pipeline
//! tests run without ffmpeg, ffprobe or a Python denoiser installed. Files
//! produced by the apply pass are remembered and analyzed with "processed"
//! readings; everything else gets "raw" readings.

use async_trait::async_trait;
use blinky_worker::audio::{EngineError, Invocation, ProcessOutput, ProcessRunner};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

pub const FFMPEG: &str = "ffmpeg";
pub const FFPROBE: &str = "ffprobe";

/// Integrated loudness reported for raw inputs
pub const RAW_INTEGRATED: f64 = -24.8;
/// Integrated loudness reported for apply-pass outputs
pub const PROCESSED_INTEGRATED: f64 = -16.1;
/// Mean peak minus mean RMS of the raw astats readings
pub const RAW_SNR: f64 = 30.0;
/// Mean peak minus mean RMS of the processed astats readings
pub const PROCESSED_SNR: f64 = 16.0;
pub const PROBED_DURATION: f64 = 12.5;
pub const MEAN_VOLUME: f64 = -27.3;

const RAW_SUMMARY: &str = "\
[Parsed_loudnorm_0 @ 0x55d1]
Input Integrated:    -24.8 LUFS
Input True Peak:      -3.2 dBTP
Input LRA:             5.1 LU
Input Threshold:     -35.0 LUFS

Output Integrated:   -16.4 LUFS
Output True Peak:     -1.5 dBTP
Output LRA:            4.2 LU
Target Offset:        +0.4 LU
";

const PROCESSED_SUMMARY: &str = "\
[Parsed_loudnorm_0 @ 0x55d1]
Input Integrated:    -16.1 LUFS
Input True Peak:      -1.6 dBTP
Input LRA:             3.9 LU
Input Threshold:     -26.3 LUFS

Output Integrated:   -16.0 LUFS
Output True Peak:     -1.5 dBTP
Output LRA:            3.8 LU
Target Offset:        +0.0 LU
";

// RMS mean -41, peak mean -11
const RAW_ASTATS: &str = "\
[Parsed_astats_0 @ 0x1] RMS_level_dB: 0.0
[Parsed_astats_0 @ 0x1] RMS_level_dB: -40.0
[Parsed_astats_0 @ 0x1] Peak_level_dB: -10.0
[Parsed_astats_0 @ 0x1] Noise_floor_dB: -68.0
[Parsed_astats_0 @ 0x1] RMS_level_dB: -42.0
[Parsed_astats_0 @ 0x1] Peak_level_dB: -12.0
[Parsed_astats_0 @ 0x1] Noise_floor_dB: -70.0
";

// RMS mean -18, peak mean -2
const PROCESSED_ASTATS: &str = "\
[Parsed_astats_0 @ 0x1] RMS_level_dB: -17.0
[Parsed_astats_0 @ 0x1] Peak_level_dB: -1.5
[Parsed_astats_0 @ 0x1] RMS_level_dB: -19.0
[Parsed_astats_0 @ 0x1] Peak_level_dB: -2.5
[Parsed_astats_0 @ 0x1] Noise_floor_dB: -60.0
";

const FILTERS: [&str; 5] = ["afftdn", "arnndn", "astats", "loudnorm", "volumedetect"];

/// What the external denoiser does when invoked
#[derive(Debug, Clone, PartialEq)]
pub enum DenoiserBehaviour {
    /// Writes a non-empty output file and exits 0
    Succeed,
    /// Exits 0 but leaves an empty output file
    EmptyOutput,
    /// Exits 2 with the given stderr
    Fail(String),
    /// Exceeds its time budget
    TimeOut,
    /// Writes a partial output file, then runs for the given time
    Hang(Duration),
}

pub struct FakeRunner {
    apply_failure: Option<String>,
    apply_delay: Option<Duration>,
    denoiser: DenoiserBehaviour,
    filters: Vec<String>,
    silent_analysis: bool,
    calls: Mutex<Vec<Invocation>>,
    written: Mutex<Vec<PathBuf>>,
}

impl Default for FakeRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRunner {
    pub fn new() -> Self {
        Self {
            apply_failure: None,
            apply_delay: None,
            denoiser: DenoiserBehaviour::Succeed,
            filters: FILTERS.iter().map(|f| f.to_string()).collect(),
            silent_analysis: false,
            calls: Mutex::new(Vec::new()),
            written: Mutex::new(Vec::new()),
        }
    }

    /// Apply pass exits 1 with `stderr`
    pub fn failing_apply(mut self, stderr: &str) -> Self {
        self.apply_failure = Some(stderr.to_string());
        self
    }

    /// Apply pass sleeps before writing its output
    pub fn slow_apply(mut self, delay: Duration) -> Self {
        self.apply_delay = Some(delay);
        self
    }

    pub fn with_denoiser(mut self, behaviour: DenoiserBehaviour) -> Self {
        self.denoiser = behaviour;
        self
    }

    /// Drop `name` from the capability listing
    pub fn without_filter(mut self, name: &str) -> Self {
        self.filters.retain(|f| f != name);
        self
    }

    /// Analysis runs print nothing parseable
    pub fn silent_analysis(mut self) -> Self {
        self.silent_analysis = true;
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    /// ffmpeg invocations that write an output file
    pub fn apply_calls(&self) -> Vec<Invocation> {
        self.calls()
            .into_iter()
            .filter(|c| c.program == FFMPEG && c.args.iter().any(|a| a == "-y"))
            .collect()
    }

    pub fn denoiser_calls(&self) -> Vec<Invocation> {
        self.calls()
            .into_iter()
            .filter(|c| c.program != FFMPEG && c.program != FFPROBE)
            .collect()
    }

    async fn ffmpeg(&self, invocation: &Invocation) -> Result<ProcessOutput, EngineError> {
        let args = &invocation.args;
        if args.iter().any(|a| a == "-filters") {
            let listing = self
                .filters
                .iter()
                .map(|f| format!(" ... {:<16} A->A       test filter\n", f))
                .collect::<String>();
            return Ok(ok(&format!("Filters:\n  T.. = Timeline support\n{}", listing), ""));
        }

        let Some(filter) = arg_after(args, "-af") else {
            return Ok(failed(1, "no filter graph\n"));
        };

        if args.iter().any(|a| a == "-y") {
            return self.apply(invocation).await;
        }

        if self.silent_analysis {
            return Ok(ok("", "Press [q] to stop\n"));
        }
        let processed = arg_after(args, "-i")
            .map(|input| self.written.lock().unwrap().contains(&PathBuf::from(input)))
            .unwrap_or(false);

        let stderr = if filter.starts_with("astats") {
            if processed {
                PROCESSED_ASTATS.to_string()
            } else {
                RAW_ASTATS.to_string()
            }
        } else if filter.contains("print_format=summary") {
            if processed {
                PROCESSED_SUMMARY.to_string()
            } else {
                RAW_SUMMARY.to_string()
            }
        } else if filter.starts_with("volumedetect") {
            format!(
                "[Parsed_volumedetect_0 @ 0x2] n_samples: 96000\n\
                 [Parsed_volumedetect_0 @ 0x2] mean_volume: {} dB\n\
                 [Parsed_volumedetect_0 @ 0x2] max_volume: -1.5 dB\n",
                MEAN_VOLUME
            )
        } else {
            String::new()
        };
        Ok(ok("", &stderr))
    }

    async fn apply(&self, invocation: &Invocation) -> Result<ProcessOutput, EngineError> {
        if let Some(delay) = self.apply_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(stderr) = &self.apply_failure {
            return Ok(failed(1, stderr));
        }

        let output = PathBuf::from(invocation.args.last().cloned().unwrap_or_default());
        write_file(&output, b"RIFF\x24\x00\x00\x00WAVEfmt ");
        self.written.lock().unwrap().push(output);
        Ok(ok("", "size=     188kB time=00:00:12.50\n"))
    }

    async fn denoise(&self, invocation: &Invocation, timeout: Duration) -> Result<ProcessOutput, EngineError> {
        let output = arg_after(&invocation.args, "--out").map(PathBuf::from);
        match &self.denoiser {
            DenoiserBehaviour::Succeed => {
                if let Some(output) = output {
                    write_file(&output, b"RIFF denoised");
                }
                Ok(ok("", ""))
            }
            DenoiserBehaviour::EmptyOutput => {
                if let Some(output) = output {
                    write_file(&output, b"");
                }
                Ok(ok("", ""))
            }
            DenoiserBehaviour::Fail(stderr) => Ok(failed(2, stderr)),
            DenoiserBehaviour::TimeOut => Err(EngineError::TimedOut {
                program: invocation.program.clone(),
                timeout,
            }),
            DenoiserBehaviour::Hang(delay) => {
                if let Some(output) = output {
                    write_file(&output, b"RIFF partial");
                }
                tokio::time::sleep(*delay).await;
                Ok(ok("", ""))
            }
        }
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(&self, invocation: &Invocation, timeout: Duration) -> Result<ProcessOutput, EngineError> {
        self.calls.lock().unwrap().push(invocation.clone());

        if invocation.args.iter().any(|a| a == "-version") {
            return Ok(ok("fake version 6.1\n", ""));
        }
        match invocation.program.as_str() {
            FFPROBE => Ok(ok(&format!("{}\n", PROBED_DURATION), "")),
            FFMPEG => self.ffmpeg(invocation).await,
            _ => self.denoise(invocation, timeout).await,
        }
    }
}

fn arg_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn write_file(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, bytes).unwrap();
}

fn ok(stdout: &str, stderr: &str) -> ProcessOutput {
    ProcessOutput {
        exit_code: Some(0),
        success: true,
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
    }
}

fn failed(code: i32, stderr: &str) -> ProcessOutput {
    ProcessOutput {
        exit_code: Some(code),
        success: false,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}
