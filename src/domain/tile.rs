//! Tile geometry.
//!
//! Callers number tiles row-major from the top-left corner (the order a montage
//! is assembled in). Blender border rectangles are normalized with the origin in
//! the bottom-left corner, so the row has to be flipped on the way through.

use super::error::DomainError;

/// Crop rectangle in normalized, bottom-left-origin coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileRect {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl TileRect {
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

/// One tile of a square `grid_size` x `grid_size` grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileSpec {
    grid_size: u64,
    tile_index: u64,
}

impl TileSpec {
    /// Validate a caller-supplied grid size and tile index.
    ///
    /// Fails with [`DomainError::InvalidTileIndex`] when the grid is smaller than
    /// one tile or the index falls outside `0..grid_size²`.
    pub fn new(grid_size: i64, tile_index: i64) -> Result<Self, DomainError> {
        let invalid = || DomainError::invalid_tile_index(tile_index, grid_size);

        let grid = u64::try_from(grid_size)
            .ok()
            .filter(|grid| *grid >= 1)
            .ok_or_else(invalid)?;
        let index = u64::try_from(tile_index).map_err(|_| invalid())?;
        let count = grid.checked_mul(grid).ok_or_else(invalid)?;
        if index >= count {
            return Err(invalid());
        }

        Ok(Self {
            grid_size: grid,
            tile_index: index,
        })
    }

    /// The whole frame as a single tile.
    pub fn full_frame() -> Self {
        Self {
            grid_size: 1,
            tile_index: 0,
        }
    }

    pub fn grid_size(&self) -> u64 {
        self.grid_size
    }

    pub fn tile_index(&self) -> u64 {
        self.tile_index
    }

    pub fn tile_count(&self) -> u64 {
        self.grid_size * self.grid_size
    }

    /// Zero-based column, counted from the left.
    pub fn column(&self) -> u64 {
        self.tile_index % self.grid_size
    }

    /// Zero-based row, counted from the top.
    pub fn row(&self) -> u64 {
        self.tile_index / self.grid_size
    }

    pub fn is_full_frame(&self) -> bool {
        self.grid_size == 1
    }

    /// Border rectangle for this tile, or `None` for a 1x1 grid.
    ///
    /// A single-tile grid leaves bordering switched off in the engine instead of
    /// handing it a full-frame rectangle.
    pub fn border(&self) -> Option<TileRect> {
        if self.is_full_frame() {
            return None;
        }

        let cols = self.grid_size as f64;
        let x = self.column() as f64;
        let flipped_row = (self.grid_size - 1 - self.row()) as f64;

        // Each edge is computed as k / cols so neighbouring tiles share bit-identical edges.
        Some(TileRect {
            min_x: x / cols,
            max_x: (x + 1.0) / cols,
            min_y: flipped_row / cols,
            max_y: (flipped_row + 1.0) / cols,
        })
    }
}

pub(crate) fn tile_bounds_message(index: &i64, grid_size: &i64) -> String {
    if *grid_size < 1 {
        return format!("invalid grid size {grid_size} (cols must be at least 1)");
    }
    let max = grid_size
        .checked_mul(*grid_size)
        .map(|count| count - 1)
        .map_or_else(|| "cols^2 - 1".to_string(), |max| max.to_string());
    format!("invalid tile index {index} (must be min: 0, max: {max})")
}
