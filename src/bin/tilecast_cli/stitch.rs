//! Reassemble a full frame from its tiles.
//!
//! Tile `n` sits at column `n % cols`, row `n / cols`, counted from the
//! top-left. Tiles in one column share a width and tiles in one row share a
//! height, so column widths are read from the first row and row heights from
//! the first column.

#![deny(clippy::all, clippy::pedantic)]

use image::{DynamicImage, GenericImageView, RgbaImage, imageops};

use crate::client::CliError;

pub fn stitch(cols: u32, tiles: &[DynamicImage]) -> Result<RgbaImage, CliError> {
    let cols_usize = cols as usize;
    let expected = cols_usize * cols_usize;
    if cols == 0 || tiles.len() != expected {
        return Err(CliError::Stitch(format!(
            "expected {expected} tiles for {cols} columns, got {}",
            tiles.len()
        )));
    }

    let widths: Vec<u32> = tiles[..cols_usize].iter().map(GenericImageView::width).collect();
    let heights: Vec<u32> = tiles
        .iter()
        .step_by(cols_usize)
        .map(GenericImageView::height)
        .collect();
    let x_offsets = offsets(&widths);
    let y_offsets = offsets(&heights);

    let mut frame = RgbaImage::new(widths.iter().sum(), heights.iter().sum());
    for (n, tile) in tiles.iter().enumerate() {
        let (x, y) = (n % cols_usize, n / cols_usize);
        if tile.dimensions() != (widths[x], heights[y]) {
            return Err(CliError::Stitch(format!(
                "tile {n} is {}x{}, expected {}x{}",
                tile.width(),
                tile.height(),
                widths[x],
                heights[y]
            )));
        }
        imageops::replace(
            &mut frame,
            &tile.to_rgba8(),
            i64::from(x_offsets[x]),
            i64::from(y_offsets[y]),
        );
    }
    Ok(frame)
}

fn offsets(sizes: &[u32]) -> Vec<u32> {
    sizes
        .iter()
        .scan(0, |next, size| {
            let offset = *next;
            *next += size;
            Some(offset)
        })
        .collect()
}
