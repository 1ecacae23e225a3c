use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use rotta_features::config::Config;
use rotta_features::features::{
    ExtractionSettings, FeatureCache, IdentityFeatures, SocialContext,
};
use rotta_features::pose::{open_pose_file, PoseEstimation};
use rotta_features::BUILD_VERSION;

const CONFIG_PATH: &str = "rotta.toml";
const USAGE: &str = "usage: pose_info [--features] [--fps N] [--behavior NAME] <pose.h5>...";

struct Args {
    paths: Vec<PathBuf>,
    features: bool,
    fps: f64,
    behavior: Option<String>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        paths: Vec::new(),
        features: false,
        fps: 30.0,
        behavior: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--features" => args.features = true,
            "--fps" => {
                let value = iter.next().context("--fps needs a value")?;
                args.fps = value.parse().with_context(|| format!("invalid fps '{value}'"))?;
            }
            "--behavior" => args.behavior = Some(iter.next().context("--behavior needs a value")?),
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            _ => args.paths.push(PathBuf::from(arg)),
        }
    }
    if args.paths.is_empty() {
        bail!("{USAGE}");
    }
    Ok(args)
}

fn print_summary(pose: &PoseEstimation) {
    println!("  version:    {}", pose.format_major_version());
    println!("  frames:     {}", pose.num_frames());
    println!("  identities: {}", pose.num_identities());
    match pose.cm_per_pixel() {
        Some(cm) => println!("  cm/pixel:   {cm}"),
        None => println!("  cm/pixel:   -"),
    }
    println!("  social:     {}", pose.supports_social_features());
    for identity in pose.identities() {
        let present = pose.identity_mask(identity).iter().filter(|&&m| m).count();
        println!("    identity {identity}: present in {present} frames");
    }
    for (name, points) in pose.static_objects() {
        println!("    static object '{name}': {} points", points.nrows());
    }
}

fn print_features(pose: &PoseEstimation, video: &str, config: &Config, args: &Args) -> Result<()> {
    let behavior = config.behavior(args.behavior.as_deref().unwrap_or_default());
    let settings = ExtractionSettings::from_config(&config.features, &behavior, args.fps);
    let cache = config.features.cache_dir.clone().map(FeatureCache::new);

    let social = if settings.wants_social(pose) {
        Some(SocialContext::compute(pose, settings.pixel_scale(pose), settings.half_fov_deg)?)
    } else {
        None
    };

    for identity in pose.identities() {
        let features = IdentityFeatures::new(video, identity, pose, social.as_ref(), &settings, cache.clone())?;
        let present = features.present_frame_features(behavior.window_size)?;
        println!(
            "    identity {identity}: {} per-frame columns, {} window columns (w={}), {} present frames",
            features.per_frame_columns().len(),
            features.window_columns().len(),
            behavior.window_size,
            present.frames.len(),
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = parse_args()?;
    let config = Config::load_or_default(CONFIG_PATH)?;

    println!("pose_info {BUILD_VERSION}");
    for path in &args.paths {
        let pose = open_pose_file(path).with_context(|| format!("loading {}", path.display()))?;
        println!("{}", path.display());
        print_summary(&pose);

        if args.features {
            let video = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            print_features(&pose, &video, &config, &args)?;
        }
    }
    Ok(())
}
