use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use frame_source::CaptureConfig;
use ml_detect::{ClassTable, DetectMode, tch::Device};

use crate::viewer::stream::LoopOptions;

pub const SERVE_USAGE: &str = "Usage: visdrone-live serve [--source <uri>] [--model <path>] \
[--classes <data.yaml>] [--width <px>] [--height <px>] [--fps <n>] [--fourcc <code>] \
[--buffer-depth <n>] [--detector-width <px>] [--detector-height <px>] [--tracked] [--cpu] \
[--jpeg-quality <1-100>] [--retry-delay-ms <n>] [--max-failures <n>] [--reset-tracks-on-skip] \
[--preview] [--port <n>] [--verbose]\n\nWith --preview the server runs one background \
detection loop over the source and serves its latest frame at /frame.jpg and its status line \
at /status, in addition to the per-connection /stream.mjpg.\n\nPositional form is also \
supported: serve <source-uri> <model-path> \
[...flags...]\n\nThe source is a local device (\"0\", \"/dev/video0\") or a stream URL \
(\"http://192.168.100.4:8080/video\", \"rtsp://...\").";

pub const DETECT_USAGE: &str = "Usage: visdrone-live detect [--image <path>] [--model <path>] \
[--output <path>] [--classes <data.yaml>] [--detector-width <px>] [--detector-height <px>] \
[--cpu] [--jpeg-quality <1-100>]\n\nPositional form is also supported: detect <image-path> \
<model-path> [...flags...]";

/// Settings for the `serve` command.
#[derive(Clone, Debug)]
pub struct ViewerConfig {
    pub source_uri: String,
    pub model_path: PathBuf,
    pub classes_path: Option<PathBuf>,
    pub width: i32,
    pub height: i32,
    pub fps: f64,
    pub fourcc: Option<String>,
    pub buffer_depth: Option<i32>,
    pub detector_width: i64,
    pub detector_height: i64,
    pub tracked: bool,
    pub use_cpu: bool,
    pub jpeg_quality: i32,
    pub retry_delay_ms: u64,
    pub max_consecutive_failures: u32,
    pub reset_tracks_on_skip: bool,
    pub preview: bool,
    pub port: u16,
    pub verbose: bool,
}

impl ViewerConfig {
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut source_uri: Option<String> = None;
        let mut model_path: Option<PathBuf> = None;
        let mut classes_path: Option<PathBuf> = None;
        let mut width: i32 = 1280;
        let mut height: i32 = 720;
        let mut fps: f64 = 30.0;
        let mut fourcc: Option<String> = Some("YUY2".to_string());
        let mut buffer_depth: Option<i32> = Some(2);
        let mut detector_width: i64 = 640;
        let mut detector_height: i64 = 640;
        let mut tracked = false;
        let mut use_cpu = false;
        let mut jpeg_quality: i32 = 85;
        let mut retry_delay_ms: u64 = 50;
        let mut max_consecutive_failures: u32 = 120;
        let mut reset_tracks_on_skip = false;
        let mut preview = false;
        let mut port: u16 = 8080;
        let mut verbose = false;
        let mut positional: Vec<String> = Vec::new();

        let mut idx = 2;
        while idx < args.len() {
            match args[idx].as_str() {
                "--source" => source_uri = Some(take_value(args, &mut idx, "--source")?.to_string()),
                "--model" => model_path = Some(PathBuf::from(take_value(args, &mut idx, "--model")?)),
                "--classes" => {
                    classes_path = Some(PathBuf::from(take_value(args, &mut idx, "--classes")?));
                }
                "--width" => width = parse_value(args, &mut idx, "--width")?,
                "--height" => height = parse_value(args, &mut idx, "--height")?,
                "--fps" => fps = parse_value(args, &mut idx, "--fps")?,
                "--fourcc" => fourcc = Some(take_value(args, &mut idx, "--fourcc")?.to_string()),
                "--buffer-depth" => buffer_depth = Some(parse_value(args, &mut idx, "--buffer-depth")?),
                "--detector-width" => detector_width = parse_value(args, &mut idx, "--detector-width")?,
                "--detector-height" => {
                    detector_height = parse_value(args, &mut idx, "--detector-height")?;
                }
                "--tracked" => tracked = true,
                "--cpu" => use_cpu = true,
                "--jpeg-quality" => jpeg_quality = parse_value(args, &mut idx, "--jpeg-quality")?,
                "--retry-delay-ms" => retry_delay_ms = parse_value(args, &mut idx, "--retry-delay-ms")?,
                "--max-failures" => {
                    max_consecutive_failures = parse_value(args, &mut idx, "--max-failures")?;
                }
                "--reset-tracks-on-skip" => reset_tracks_on_skip = true,
                "--preview" => preview = true,
                "--port" => port = parse_value(args, &mut idx, "--port")?,
                "--verbose" => verbose = true,
                arg if arg.starts_with('-') => bail!("unrecognised flag: {arg}\n\n{SERVE_USAGE}"),
                other => positional.push(other.to_string()),
            }
            idx += 1;
        }

        let mut positional = positional.into_iter();
        if source_uri.is_none() {
            source_uri = positional.next();
        }
        if model_path.is_none() {
            model_path = positional.next().map(PathBuf::from);
        }

        let source_uri = source_uri.ok_or_else(|| {
            anyhow!("missing source. Provide --source <uri> or positional <source-uri>.")
        })?;
        let model_path = model_path.ok_or_else(|| {
            anyhow!("missing model path. Provide --model <path> or positional <model-path>.")
        })?;

        if !(1..=100).contains(&jpeg_quality) {
            bail!("--jpeg-quality must be an integer between 1 and 100");
        }

        Ok(Self {
            source_uri,
            model_path,
            classes_path,
            width,
            height,
            fps,
            fourcc,
            buffer_depth,
            detector_width,
            detector_height,
            tracked,
            use_cpu,
            jpeg_quality,
            retry_delay_ms,
            max_consecutive_failures,
            reset_tracks_on_skip,
            preview,
            port,
            verbose,
        })
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            width: self.width,
            height: self.height,
            fps: self.fps,
            fourcc: self.fourcc.clone(),
            buffer_depth: self.buffer_depth,
        }
    }

    pub fn loop_options(&self) -> LoopOptions {
        LoopOptions {
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            max_consecutive_failures: self.max_consecutive_failures,
            reset_tracks_on_skip: self.reset_tracks_on_skip,
        }
    }

    pub fn mode(&self) -> DetectMode {
        if self.tracked {
            DetectMode::Tracked
        } else {
            DetectMode::Plain
        }
    }

    pub fn device(&self) -> Device {
        if self.use_cpu {
            Device::Cpu
        } else {
            Device::cuda_if_available()
        }
    }

    pub fn detector_size(&self) -> (i64, i64) {
        (self.detector_width, self.detector_height)
    }

    pub fn load_classes(&self) -> Result<ClassTable> {
        load_classes(self.classes_path.as_deref())
    }
}

/// Settings for the one-shot `detect` command.
#[derive(Clone, Debug)]
pub struct DetectConfig {
    pub image_path: PathBuf,
    pub model_path: PathBuf,
    pub output_path: PathBuf,
    pub classes_path: Option<PathBuf>,
    pub detector_size: (i64, i64),
    pub use_cpu: bool,
    pub jpeg_quality: i32,
}

impl DetectConfig {
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut image_path: Option<PathBuf> = None;
        let mut model_path: Option<PathBuf> = None;
        let mut output_path: Option<PathBuf> = None;
        let mut classes_path: Option<PathBuf> = None;
        let mut detector_width: i64 = 640;
        let mut detector_height: i64 = 640;
        let mut use_cpu = false;
        let mut jpeg_quality: i32 = 85;
        let mut positional: Vec<String> = Vec::new();

        let mut idx = 2;
        while idx < args.len() {
            match args[idx].as_str() {
                "--image" => image_path = Some(PathBuf::from(take_value(args, &mut idx, "--image")?)),
                "--model" => model_path = Some(PathBuf::from(take_value(args, &mut idx, "--model")?)),
                "--output" => {
                    output_path = Some(PathBuf::from(take_value(args, &mut idx, "--output")?));
                }
                "--classes" => {
                    classes_path = Some(PathBuf::from(take_value(args, &mut idx, "--classes")?));
                }
                "--detector-width" => detector_width = parse_value(args, &mut idx, "--detector-width")?,
                "--detector-height" => {
                    detector_height = parse_value(args, &mut idx, "--detector-height")?;
                }
                "--cpu" => use_cpu = true,
                "--jpeg-quality" => jpeg_quality = parse_value(args, &mut idx, "--jpeg-quality")?,
                arg if arg.starts_with('-') => bail!("unrecognised flag: {arg}\n\n{DETECT_USAGE}"),
                other => positional.push(other.to_string()),
            }
            idx += 1;
        }

        let mut positional = positional.into_iter();
        if image_path.is_none() {
            image_path = positional.next().map(PathBuf::from);
        }
        if model_path.is_none() {
            model_path = positional.next().map(PathBuf::from);
        }

        let image_path = image_path.ok_or_else(|| {
            anyhow!("missing image. Provide --image <path> or positional <image-path>.")
        })?;
        let model_path = model_path.ok_or_else(|| {
            anyhow!("missing model path. Provide --model <path> or positional <model-path>.")
        })?;
        let output_path = output_path.unwrap_or_else(|| image_path.with_extension("annotated.jpg"));

        if !(1..=100).contains(&jpeg_quality) {
            bail!("--jpeg-quality must be an integer between 1 and 100");
        }

        Ok(Self {
            image_path,
            model_path,
            output_path,
            classes_path,
            detector_size: (detector_width, detector_height),
            use_cpu,
            jpeg_quality,
        })
    }

    pub fn load_classes(&self) -> Result<ClassTable> {
        load_classes(self.classes_path.as_deref())
    }
}

fn load_classes(path: Option<&std::path::Path>) -> Result<ClassTable> {
    match path {
        Some(path) => ClassTable::from_yaml_file(path),
        None => Ok(ClassTable::visdrone()),
    }
}

fn take_value<'a>(args: &'a [String], idx: &mut usize, flag: &str) -> Result<&'a str> {
    *idx += 1;
    args.get(*idx)
        .map(|s| s.as_str())
        .ok_or_else(|| anyhow!("{flag} requires a value"))
}

fn parse_value<T>(args: &[String], idx: &mut usize, flag: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    take_value(args, idx, flag)?
        .parse::<T>()
        .with_context(|| format!("{flag} has an invalid value"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn serve_defaults_match_the_capture_profile() {
        let args = strings(&["visdrone-live", "serve", "--source", "0", "--model", "m.pt"]);
        let config = ViewerConfig::from_args(&args).unwrap();
        assert_eq!(config.source_uri, "0");
        assert_eq!((config.width, config.height), (1280, 720));
        assert_eq!(config.fps, 30.0);
        assert_eq!(config.fourcc.as_deref(), Some("YUY2"));
        assert_eq!(config.buffer_depth, Some(2));
        assert_eq!(config.retry_delay_ms, 50);
        assert_eq!(config.port, 8080);
        assert!(!config.tracked);
        assert!(!config.preview);
    }

    #[test]
    fn serve_accepts_positional_source_and_model() {
        let args = strings(&[
            "visdrone-live",
            "serve",
            "rtsp://cam/stream",
            "model.pt",
            "--tracked",
            "--max-failures",
            "0",
        ]);
        let config = ViewerConfig::from_args(&args).unwrap();
        assert_eq!(config.source_uri, "rtsp://cam/stream");
        assert_eq!(config.model_path, PathBuf::from("model.pt"));
        assert!(config.tracked);
        assert_eq!(config.max_consecutive_failures, 0);
    }

    #[test]
    fn serve_requires_a_source() {
        let args = strings(&["visdrone-live", "serve", "--model", "m.pt"]);
        assert!(ViewerConfig::from_args(&args).is_err());
    }

    #[test]
    fn serve_rejects_out_of_range_jpeg_quality() {
        let args = strings(&[
            "visdrone-live",
            "serve",
            "0",
            "m.pt",
            "--jpeg-quality",
            "0",
        ]);
        assert!(ViewerConfig::from_args(&args).is_err());
    }

    #[test]
    fn serve_rejects_unknown_flags() {
        let args = strings(&["visdrone-live", "serve", "0", "m.pt", "--nope"]);
        assert!(ViewerConfig::from_args(&args).is_err());
    }

    #[test]
    fn detect_derives_an_output_path() {
        let args = strings(&["visdrone-live", "detect", "photo.png", "m.pt"]);
        let config = DetectConfig::from_args(&args).unwrap();
        assert_eq!(config.output_path, PathBuf::from("photo.annotated.jpg"));
        assert_eq!(config.detector_size, (640, 640));
    }
}
