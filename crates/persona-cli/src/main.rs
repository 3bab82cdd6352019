use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use persona_core::mapper::{map_to_camera, map_to_sensor, map_to_view, rotate_to_upright};
use persona_core::{
    Config, EmbeddingStore, MatchResult, OnnxExtractor, Recognizer, Rect, Rotation, Size,
    SqliteStore,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "persona", about = "Persona face identity CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a face crop under a name
    Enroll {
        /// Display name for the persona
        #[arg(short, long)]
        name: String,
        /// Persona identifier (a UUID is generated when omitted; single-table
        /// stores only accept the name itself)
        #[arg(long)]
        id: Option<String>,
        /// Face crop image
        image: PathBuf,
    },
    /// Match a face crop against enrolled personas
    Analyze {
        /// Face crop image
        image: PathBuf,
    },
    /// List enrolled personas
    List,
    /// Remove a persona and all of its embeddings
    Remove {
        /// Persona ID to remove
        id: String,
    },
    /// Map a box between camera and view coordinates
    MapBox {
        /// Sensor size, e.g. 640x480
        #[arg(long, value_parser = parse_size)]
        camera: Size,
        /// View size, e.g. 1080x1920
        #[arg(long, value_parser = parse_size)]
        view: Size,
        /// Clockwise rotation that turns the sensor image upright
        #[arg(long, default_value_t = 0)]
        rotation: u32,
        /// Box as left,top,right,bottom
        #[arg(value_parser = parse_rect, allow_hyphen_values = true)]
        rect: Rect,
        /// Map from view back to camera coordinates
        #[arg(long)]
        inverse: bool,
        /// Camera-side box is in native sensor orientation, before rotation
        #[arg(long)]
        sensor: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Enroll { name, id, image } => {
            let config = Config::load()?;
            let mut recognizer = open_recognizer(&config)?;
            let face = load_face(&image)?;
            let persona = recognizer.enroll(id.as_deref(), &name, &face)?;
            println!("Enrolled {} ({})", persona.name, persona.id);
        }
        Commands::Analyze { image } => {
            let config = Config::load()?;
            let mut recognizer = open_recognizer(&config)?;
            let face = load_face(&image)?;
            let verdict = match recognizer.analyze(&face)? {
                MatchResult::Recognized {
                    persona_id,
                    persona_name,
                    distance,
                } => serde_json::json!({
                    "verdict": "recognized",
                    "persona_id": persona_id,
                    "name": persona_name,
                    "distance": distance,
                }),
                MatchResult::Unknown { face } => serde_json::json!({
                    "verdict": "unknown",
                    "width": face.width(),
                    "height": face.height(),
                }),
            };
            println!("{}", serde_json::to_string_pretty(&verdict)?);
        }
        Commands::List => {
            let config = Config::load()?;
            let store = open_store(&config)?;
            let personas = store.personas()?;
            if personas.is_empty() {
                println!("No personas enrolled");
            } else {
                println!("{}", serde_json::to_string_pretty(&personas)?);
            }
        }
        Commands::Remove { id } => {
            let config = Config::load()?;
            let mut store = open_store(&config)?;
            if !store.remove(&id)? {
                bail!("no persona with id {id}");
            }
            println!("Removed persona {id}");
        }
        Commands::MapBox {
            camera,
            view,
            rotation,
            rect,
            inverse,
            sensor,
        } => {
            let rotation = Rotation::from_degrees(rotation)?;
            let mapped = match (inverse, sensor) {
                (false, false) => {
                    serde_json::to_value(map_to_view(rect, camera, view, rotation)?)?
                }
                (false, true) => {
                    let upright = rotate_to_upright(rect, camera, rotation);
                    serde_json::to_value(map_to_view(upright, camera, view, rotation)?)?
                }
                (true, false) => {
                    serde_json::to_value(map_to_camera(rect, camera, view, rotation)?)?
                }
                (true, true) => {
                    serde_json::to_value(map_to_sensor(rect, camera, view, rotation)?)?
                }
            };
            println!("{}", serde_json::to_string_pretty(&mapped)?);
        }
    }

    Ok(())
}

fn open_store(config: &Config) -> Result<SqliteStore> {
    SqliteStore::open(&config.db_path, config.store_layout)
        .with_context(|| format!("opening store {}", config.db_path.display()))
}

fn open_recognizer(config: &Config) -> Result<Recognizer<OnnxExtractor, SqliteStore>> {
    tracing::debug!(
        model = %config.model_path.display(),
        threshold = config.recognition_threshold,
        "opening recognizer"
    );
    let extractor = OnnxExtractor::load(&config.model_path_str(), config.feature_vector_size)?;
    let store = open_store(config)?;
    Ok(Recognizer::new(
        config.normalizer(),
        extractor,
        store,
        config.recognition_threshold,
    ))
}

fn load_face(path: &Path) -> Result<image::RgbImage> {
    let image = image::open(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(image.to_rgb8())
}

fn parse_size(s: &str) -> Result<Size, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
    let parse = |v: &str| v.trim().parse::<u32>().map_err(|e| format!("{v:?}: {e}"));
    Ok(Size::new(parse(w)?, parse(h)?))
}

fn parse_rect(s: &str) -> Result<Rect, String> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<i32>().map_err(|e| format!("{v:?}: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    match values.as_slice() {
        &[left, top, right, bottom] => Ok(Rect::new(left, top, right, bottom)),
        _ => Err(format!("expected left,top,right,bottom, got {s:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("640x480").unwrap(), Size::new(640, 480));
        assert_eq!(parse_size("1080X1920").unwrap(), Size::new(1080, 1920));
        assert!(parse_size("640").is_err());
        assert!(parse_size("ax480").is_err());
    }

    #[test]
    fn test_parse_rect() {
        assert_eq!(
            parse_rect("-5, 10, 20, 30").unwrap(),
            Rect::new(-5, 10, 20, 30)
        );
        assert!(parse_rect("1,2,3").is_err());
    }

    #[test]
    fn test_map_box_args() {
        let cli = Cli::try_parse_from([
            "persona",
            "map-box",
            "--camera",
            "640x480",
            "--view",
            "1080x1920",
            "--rotation",
            "90",
            "--sensor",
            "0,0,480,640",
        ])
        .unwrap();
        match cli.command {
            Commands::MapBox {
                camera,
                rotation,
                rect,
                inverse,
                sensor,
                ..
            } => {
                assert_eq!(camera, Size::new(640, 480));
                assert_eq!(rotation, 90);
                assert_eq!(rect, Rect::new(0, 0, 480, 640));
                assert!(!inverse);
                assert!(sensor);
            }
            _ => panic!("expected map-box"),
        }
    }
}
