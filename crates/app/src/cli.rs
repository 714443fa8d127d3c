use anyhow::{Context, Result, bail};
use ml_detect::{DetectMode, tch::Device};

use crate::viewer::{self, DetectConfig, ViewerConfig};

const USAGE: &str = "Usage: visdrone-live <command> [options]\n\n\
Commands:\n  \
serve    Run the live detection viewer server\n  \
detect   Run one-shot detection on an image file\n  \
help     Print this message\n\n\
Run `visdrone-live serve --help` or `visdrone-live detect --help` for command options.";

pub fn print_usage() {
    println!("{USAGE}");
}

pub fn handle_commands(args: &[String]) -> Result<bool> {
    match args.get(1).map(|s| s.as_str()) {
        Some("serve") => {
            if wants_help(args) {
                println!("{}", viewer::SERVE_USAGE);
                return Ok(true);
            }
            let config = ViewerConfig::from_args(args)?;
            viewer::server::run(config)?;
            Ok(true)
        }
        Some("detect") => {
            if wants_help(args) {
                println!("{}", viewer::DETECT_USAGE);
                return Ok(true);
            }
            let config = DetectConfig::from_args(args)?;
            run_detect(config)?;
            Ok(true)
        }
        Some("help") => {
            print_usage();
            Ok(true)
        }
        Some(other) => bail!("unrecognised command {other:?}\n\n{USAGE}"),
        None => Ok(false),
    }
}

fn wants_help(args: &[String]) -> bool {
    args.iter().skip(2).any(|arg| arg == "--help")
}

/// One-shot detection: read an image file, annotate it, write the result.
fn run_detect(config: DetectConfig) -> Result<()> {
    if !config.use_cpu {
        viewer::runtime::load_torch_cuda_runtime(false);
    }
    let device = if config.use_cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available()
    };

    let classes = config.load_classes()?;
    let mut detector = ml_detect::TorchDetector::new(
        &config.model_path,
        device,
        config.detector_size,
        classes,
        DetectMode::Plain,
    )?;

    let bytes = std::fs::read(&config.image_path)
        .with_context(|| format!("failed to read image {}", config.image_path.display()))?;
    let result = viewer::detect_image(&mut detector, &bytes, config.jpeg_quality)?;

    std::fs::write(&config.output_path, &result.jpeg).with_context(|| {
        format!(
            "failed to write annotated image to {}",
            config.output_path.display()
        )
    })?;

    println!(
        "{} detection(s), annotated image written to {}",
        result.detections.len(),
        config.output_path.display()
    );
    for det in &result.detections {
        println!(
            "  {} {:.2} [{:.0} {:.0} {:.0} {:.0}]",
            det.class_name, det.confidence, det.bbox[0], det.bbox[1], det.bbox[2], det.bbox[3]
        );
    }
    Ok(())
}
