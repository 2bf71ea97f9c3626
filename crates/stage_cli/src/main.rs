//! # stage-inspect
//!
//! Loads a scene file into a fresh stage, lets every reference resolve,
//! and prints the resulting components and reference states as JSON.

mod scene;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use stage_core::Stage;
use tracing::info;
use tracing_subscriber::EnvFilter;

use scene::Scene;

#[derive(Parser)]
#[command(name = "stage-inspect", about = "Load a scene and report its components and references")]
struct Args {
    /// Scene file (JSON)
    scene: PathBuf,

    /// Directory asset URIs are resolved against
    #[arg(short, long, default_value = ".")]
    assets: PathBuf,

    /// Print compact JSON
    #[arg(short, long)]
    compact: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("stage_cli=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    info!(scene = %args.scene.display(), "loading scene");
    let scene = Scene::read(&args.scene).await?;
    let stage = Stage::new();
    scene.apply(&stage, &args.assets)?;

    stage.settle().await;
    info!(
        component_refs = stage.references().components().len(),
        asset_refs = stage.references().assets().len(),
        "references settled"
    );

    let report = scene::report(&stage);
    let out = if args.compact {
        serde_json::to_string(&report)?
    } else {
        serde_json::to_string_pretty(&report)?
    };
    println!("{out}");
    Ok(())
}
