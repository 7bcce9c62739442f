use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MIN_GRID_SIDE: u32 = 1;
pub const MAX_GRID_SIDE: u32 = 10;

/// Layout the sticker instruction asks the model for: 4 rows by 6 columns.
pub const DEFAULT_ROWS: u32 = 4;
pub const DEFAULT_COLS: u32 = 6;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("grid {rows}x{cols} out of range (rows and cols must be within 1..=10)")]
    OutOfRange { rows: u32, cols: u32 },
    #[error("image {width}x{height} is too small for a {rows}x{cols} grid")]
    ImageTooSmall {
        width: u32,
        height: u32,
        rows: u32,
        cols: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawGrid")]
pub struct GridSpec {
    rows: u32,
    cols: u32,
}

#[derive(Deserialize)]
struct RawGrid {
    rows: u32,
    cols: u32,
}

impl TryFrom<RawGrid> for GridSpec {
    type Error = GridError;

    fn try_from(raw: RawGrid) -> Result<Self, Self::Error> {
        Self::new(raw.rows, raw.cols)
    }
}

impl GridSpec {
    pub fn new(rows: u32, cols: u32) -> Result<Self, GridError> {
        let in_range = |side: u32| (MIN_GRID_SIDE..=MAX_GRID_SIDE).contains(&side);
        if !in_range(rows) || !in_range(cols) {
            return Err(GridError::OutOfRange { rows, cols });
        }
        Ok(Self { rows, cols })
    }

    /// Input-boundary constructor: pulls arbitrary user numbers into range.
    pub fn clamped(rows: i64, cols: i64) -> Self {
        let clamp = |side: i64| side.clamp(MIN_GRID_SIDE as i64, MAX_GRID_SIDE as i64) as u32;
        Self {
            rows: clamp(rows),
            cols: clamp(cols),
        }
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn tile_count(&self) -> usize {
        (self.rows * self.cols) as usize
    }

    /// Row-major tile rectangles covering a `width`x`height` image.
    ///
    /// Every column but the last is `floor(width / cols)` wide and the last one
    /// takes whatever is left, so the last column can be up to `cols - 1`
    /// pixels wider than the others. Rows follow the same rule.
    pub fn tile_rects(&self, width: u32, height: u32) -> Result<Vec<TileRect>, GridError> {
        let grid = Self::new(self.rows, self.cols)?;
        if width < grid.cols || height < grid.rows {
            return Err(GridError::ImageTooSmall {
                width,
                height,
                rows: grid.rows,
                cols: grid.cols,
            });
        }

        let cell_w = width / grid.cols;
        let cell_h = height / grid.rows;
        let mut rects = Vec::with_capacity(grid.tile_count());
        for row in 0..grid.rows {
            for col in 0..grid.cols {
                let x = col * cell_w;
                let y = row * cell_h;
                let w = if col == grid.cols - 1 { width - x } else { cell_w };
                let h = if row == grid.rows - 1 { height - y } else { cell_h };
                rects.push(TileRect {
                    index: (row * grid.cols + col) as usize,
                    row,
                    col,
                    x,
                    y,
                    width: w,
                    height: h,
                });
            }
        }
        Ok(rects)
    }
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            rows: DEFAULT_ROWS,
            cols: DEFAULT_COLS,
        }
    }
}

impl fmt::Display for GridSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRect {
    pub index: usize,
    pub row: u32,
    pub col: u32,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{GridError, GridSpec, DEFAULT_COLS, DEFAULT_ROWS};

    #[test]
    fn deserializing_checks_the_range() {
        let grid: GridSpec = serde_json::from_str(r#"{"rows":6,"cols":4}"#).unwrap();
        assert_eq!((grid.rows(), grid.cols()), (6, 4));
        assert_eq!(serde_json::to_string(&grid).unwrap(), r#"{"rows":6,"cols":4}"#);

        assert!(serde_json::from_str::<GridSpec>(r#"{"rows":0,"cols":0}"#).is_err());
        assert!(serde_json::from_str::<GridSpec>(r#"{"rows":4294967295,"cols":2}"#).is_err());
    }

    #[test]
    fn new_rejects_zero_and_oversized_sides() {
        assert_eq!(
            GridSpec::new(0, 4),
            Err(GridError::OutOfRange { rows: 0, cols: 4 })
        );
        assert_eq!(
            GridSpec::new(4, 11),
            Err(GridError::OutOfRange { rows: 4, cols: 11 })
        );
        assert!(GridSpec::new(10, 1).is_ok());
    }

    #[test]
    fn clamped_pulls_values_into_range() {
        let grid = GridSpec::clamped(-3, 42);
        assert_eq!((grid.rows(), grid.cols()), (1, 10));
        let default = GridSpec::default();
        assert_eq!((default.rows(), default.cols()), (DEFAULT_ROWS, DEFAULT_COLS));
        assert_eq!(default.to_string(), "4x6");
    }

    #[test]
    fn last_row_and_column_absorb_remainder() -> anyhow::Result<()> {
        let grid = GridSpec::new(3, 4)?;
        let rects = grid.tile_rects(103, 50)?;
        assert_eq!(rects.len(), 12);
        let first = rects[0];
        assert_eq!((first.x, first.y, first.width, first.height), (0, 0, 25, 16));
        let last = rects[11];
        assert_eq!((last.row, last.col), (2, 3));
        assert_eq!((last.x, last.y, last.width, last.height), (75, 32, 28, 18));
        Ok(())
    }

    #[test]
    fn rects_are_row_major() -> anyhow::Result<()> {
        let grid = GridSpec::new(2, 3)?;
        let rects = grid.tile_rects(30, 20)?;
        let order: Vec<(u32, u32)> = rects.iter().map(|rect| (rect.row, rect.col)).collect();
        assert_eq!(order, vec![(0, 0), (0, 1), (0, 2), (1, 0), (1, 1), (1, 2)]);
        for (idx, rect) in rects.iter().enumerate() {
            assert_eq!(rect.index, idx);
        }
        Ok(())
    }

    #[test]
    fn image_narrower_than_grid_is_rejected() -> anyhow::Result<()> {
        let grid = GridSpec::new(2, 5)?;
        assert_eq!(
            grid.tile_rects(4, 100),
            Err(GridError::ImageTooSmall {
                width: 4,
                height: 100,
                rows: 2,
                cols: 5
            })
        );
        Ok(())
    }

    proptest! {
        #[test]
        fn rects_partition_the_image(
            width in 10u32..400,
            height in 10u32..400,
            rows in 1u32..=10,
            cols in 1u32..=10,
        ) {
            let grid = GridSpec::new(rows, cols).unwrap();
            let rects = grid.tile_rects(width, height).unwrap();
            prop_assert_eq!(rects.len(), (rows * cols) as usize);

            let mut covered = vec![0u8; (width * height) as usize];
            for rect in &rects {
                prop_assert!(rect.width > 0 && rect.height > 0);
                for y in rect.y..rect.y + rect.height {
                    for x in rect.x..rect.x + rect.width {
                        covered[(y * width + x) as usize] += 1;
                    }
                }
            }
            prop_assert!(covered.iter().all(|count| *count == 1));

            for row in 0..rows {
                let sum: u32 = rects
                    .iter()
                    .filter(|rect| rect.row == row)
                    .map(|rect| rect.width)
                    .sum();
                prop_assert_eq!(sum, width);
            }
            for col in 0..cols {
                let sum: u32 = rects
                    .iter()
                    .filter(|rect| rect.col == col)
                    .map(|rect| rect.height)
                    .sum();
                prop_assert_eq!(sum, height);
            }
        }
    }
}
