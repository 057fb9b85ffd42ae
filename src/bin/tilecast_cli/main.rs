//! tilecast-cli: fetch scene listings and whole frames from a tilecast server.
#![deny(clippy::all, clippy::pedantic)]

mod args;
mod client;
mod stitch;


use clap::Parser;
use futures::{StreamExt, TryStreamExt, stream};
use image::{DynamicImage, ImageFormat};

use args::{Cli, Commands, FetchArgs};
use client::{CliError, Ctx};

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    let ctx = Ctx::new(&cli.server)?;

    match cli.command {
        Commands::Scenes => {
            for file in ctx.scenes().await?.files {
                println!("{file}");
            }
        }
        Commands::Fetch(args) => {
            fetch(&ctx, &args).await?;
            println!("{}", args.output.display());
        }
    }

    Ok(())
}

/// Request every tile of the grid and write the stitched frame to `args.output`.
pub async fn fetch(ctx: &Ctx, args: &FetchArgs) -> Result<(), CliError> {
    let tiles = fetch_tiles(ctx, args).await?;
    let frame = stitch::stitch(args.cols, &tiles)?;
    frame.save_with_format(&args.output, ImageFormat::Png)?;
    Ok(())
}

async fn fetch_tiles(ctx: &Ctx, args: &FetchArgs) -> Result<Vec<DynamicImage>, CliError> {
    let count = args.cols.checked_mul(args.cols).ok_or_else(|| {
        CliError::Stitch(format!("a {0}x{0} grid has too many tiles", args.cols))
    })?;
    let mut tiles: Vec<(u32, DynamicImage)> = stream::iter(0..count)
        .map(|n| async move {
            let bytes = ctx.tile(args, n).await?;
            let tile = image::load_from_memory_with_format(&bytes, ImageFormat::Png)?;
            Ok::<_, CliError>((n, tile))
        })
        .buffer_unordered(args.concurrency as usize)
        .try_collect()
        .await?;

    tiles.sort_by_key(|(n, _)| *n);
    Ok(tiles.into_iter().map(|(_, tile)| tile).collect())
}
