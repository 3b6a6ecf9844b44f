use clap::{Parser, Subcommand};
use gridcascade::{
    format_stage, merge, rescale_stage, select_crops, ConfigMap, ConfigValue, Detection,
    GridOffsets, RawProjection, StageConfig, StageOutput,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const EXAMPLE_JSON: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/config.example.json"));

#[derive(Parser, Debug)]
#[command(author, version, about = "Grid cascade CLI (JSON config driven)")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(short, long, value_name = "FILE", default_value = "config.json")]
    config: PathBuf,
    /// Print an example config and exit.
    #[arg(long)]
    print_example: bool,
    /// Enable tracing output for performance profiling.
    #[arg(long)]
    trace: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Format the coarse stage and print its crop plan and carried detections.
    Select,
    /// Rescale the child stage into the coarse frame and print merged detections.
    Merge,
}

/// A backbone projection dumped to JSON.
#[derive(Debug, Deserialize)]
struct ProjectionDump {
    images: usize,
    cells_y: usize,
    cells_x: usize,
    channels: usize,
    data: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct StageJson {
    /// Flat stage options, see `StageConfig::from_map`.
    #[serde(default)]
    options: serde_json::Map<String, serde_json::Value>,
    projection_path: String,
}

#[derive(Debug, Deserialize)]
struct Config {
    coarse: StageJson,
    child: Option<StageJson>,
    #[serde(default)]
    output_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct DetectionRecord {
    bbox: [f32; 4],
    confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    class_probs: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_logit: Option<f32>,
    cell: [usize; 3],
}

impl From<&Detection> for DetectionRecord {
    fn from(det: &Detection) -> Self {
        Self {
            bbox: det.bbox.to_array(),
            confidence: det.confidence,
            class_probs: det.class_probs.clone(),
            group_logit: det.group.map(|flag| flag.logit),
            cell: [det.cell.row, det.cell.col, det.cell.slot],
        }
    }
}

#[derive(Debug, Serialize)]
struct CropRecord {
    slot: usize,
    rect: [f32; 4],
    source_cell: [usize; 3],
    confidence: f32,
}

#[derive(Debug, Serialize)]
struct SelectImage {
    crops: Vec<CropRecord>,
    carried: Vec<DetectionRecord>,
}

#[derive(Debug, Serialize)]
struct MergeImage {
    bounding_boxes: Vec<[f32; 4]>,
    detection_scores: Vec<f32>,
}

fn to_config_map(
    options: serde_json::Map<String, serde_json::Value>,
) -> Result<ConfigMap, Box<dyn std::error::Error>> {
    let mut map = ConfigMap::new();
    for (key, value) in options {
        let value = match value {
            serde_json::Value::Bool(b) => ConfigValue::Bool(b),
            serde_json::Value::String(s) => ConfigValue::Str(s),
            serde_json::Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => ConfigValue::Int(i),
                (None, Some(f)) => ConfigValue::Float(f),
                (None, None) => return Err(format!("option `{key}` is out of range").into()),
            },
            _ => return Err(format!("option `{key}` must be a bool, number, or string").into()),
        };
        map.insert(key, value);
    }
    Ok(map)
}

/// Loads a stage's config and projection, and formats it.
fn run_stage(
    stage: StageJson,
    base: &Path,
) -> Result<(StageConfig, StageOutput), Box<dyn std::error::Error>> {
    let cfg = StageConfig::from_map(&to_config_map(stage.options)?)?;
    let text = fs::read_to_string(base.join(&stage.projection_path))?;
    let dump: ProjectionDump = serde_json::from_str(&text)?;
    let projection = RawProjection::from_vec(
        dump.data,
        dump.images,
        dump.cells_y,
        dump.cells_x,
        dump.channels,
    )?;
    let grid = GridOffsets::new(cfg.cells_y, cfg.cells_x)?;
    let output = format_stage(projection.view(), &grid, &cfg.head)?.output;
    tracing::info!(
        images = output.batch_size(),
        detections = output.num_detections(),
        "stage formatted"
    );
    Ok((cfg, output))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.trace {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive("gridcascade=info".parse()?),
            )
            .with_target(false)
            .init();
    }

    if cli.print_example {
        println!("{EXAMPLE_JSON}");
        return Ok(());
    }
    let command = cli
        .command
        .ok_or("a command is required: `select` or `merge`")?;

    let config_text = fs::read_to_string(&cli.config)?;
    let config: Config = serde_json::from_str(&config_text)?;
    let base = cli
        .config
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let (coarse_cfg, coarse) = run_stage(config.coarse, &base)?;
    let selection = select_crops(&coarse, coarse_cfg.image_size, &coarse_cfg.selector)?;

    let json = match command {
        Command::Select => {
            let images: Vec<SelectImage> = selection
                .carried
                .iter()
                .enumerate()
                .map(|(image, carried)| SelectImage {
                    crops: selection
                        .plan
                        .crops(image)
                        .iter()
                        .map(|crop| CropRecord {
                            slot: crop.slot,
                            rect: crop.rect.to_array(),
                            source_cell: [crop.source.row, crop.source.col, crop.source.slot],
                            confidence: crop.confidence,
                        })
                        .collect(),
                    carried: carried
                        .iter()
                        .map(|c| DetectionRecord::from(c.detection()))
                        .collect(),
                })
                .collect();
            serde_json::to_string_pretty(&images)?
        }
        Command::Merge => {
            let child = config
                .child
                .ok_or("`merge` needs a `child` stage in the config")?;
            let (child_cfg, child_out) = run_stage(child, &base)?;
            let rescaled = rescale_stage(child_out, &selection.plan)?;
            let merged = merge(rescaled, selection.carried, child_cfg.score_mode)?;
            let images: Vec<MergeImage> = merged
                .into_iter()
                .map(|image| MergeImage {
                    bounding_boxes: image.bounding_boxes,
                    detection_scores: image.detection_scores,
                })
                .collect();
            serde_json::to_string_pretty(&images)?
        }
    };

    match config.output_path {
        Some(path) => fs::write(path, json)?,
        None => println!("{json}"),
    }

    Ok(())
}
