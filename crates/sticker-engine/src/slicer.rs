use image::{DynamicImage, GenericImageView};
use sticker_contracts::grid::GridSpec;

use crate::codec::encode_png;
use crate::error::Result;

/// One cropped sticker, already PNG encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    pub index: usize,
    pub row: u32,
    pub col: u32,
    pub origin_x: u32,
    pub origin_y: u32,
    pub width: u32,
    pub height: u32,
    pub encoded_bytes: Vec<u8>,
}

/// Cuts `image` into `grid.rows() * grid.cols()` tiles in row-major order.
///
/// The grid is checked against the image before any pixel is touched. A single
/// failed encode discards every tile produced so far.
pub fn slice(image: &DynamicImage, grid: GridSpec) -> Result<Vec<Tile>> {
    let (width, height) = image.dimensions();
    let rects = grid.tile_rects(width, height)?;

    let mut tiles = Vec::with_capacity(rects.len());
    for rect in rects {
        let cropped = image.crop_imm(rect.x, rect.y, rect.width, rect.height);
        tiles.push(Tile {
            index: rect.index,
            row: rect.row,
            col: rect.col,
            origin_x: rect.x,
            origin_y: rect.y,
            width: rect.width,
            height: rect.height,
            encoded_bytes: encode_png(&cropped)?,
        });
    }
    tracing::debug!(grid = %grid, tiles = tiles.len(), width, height, "sheet sliced");
    Ok(tiles)
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, GenericImage, GenericImageView, Rgba, RgbaImage};
    use proptest::prelude::*;
    use sticker_contracts::grid::{GridError, GridSpec};

    use super::slice;
    use crate::error::PipelineError;

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 251) as u8, (y % 241) as u8, ((x * 3 + y) % 256) as u8, 255])
        }))
    }

    #[test]
    fn portrait_sheet_cut_into_twenty_four_tiles() -> anyhow::Result<()> {
        let sheet = gradient(1200, 1800);
        let tiles = slice(&sheet, GridSpec::new(6, 4)?)?;
        assert_eq!(tiles.len(), 24);
        for (idx, tile) in tiles.iter().enumerate() {
            assert_eq!(tile.index, idx);
            assert!(tile.width <= 300 && tile.height <= 300);
            let decoded = image::load_from_memory(&tile.encoded_bytes)?;
            assert_eq!(decoded.dimensions(), (tile.width, tile.height));
        }
        let last = &tiles[23];
        assert_eq!((last.row, last.col, last.origin_x, last.origin_y), (5, 3, 900, 1500));
        Ok(())
    }

    #[test]
    fn single_cell_grid_returns_whole_image() -> anyhow::Result<()> {
        let sheet = gradient(37, 21);
        let tiles = slice(&sheet, GridSpec::new(1, 1)?)?;
        assert_eq!(tiles.len(), 1);
        let decoded = image::load_from_memory(&tiles[0].encoded_bytes)?;
        assert_eq!(decoded.to_rgba8(), sheet.to_rgba8());
        Ok(())
    }

    #[test]
    fn image_smaller_than_grid_is_invalid_grid() -> anyhow::Result<()> {
        let err = slice(&gradient(3, 3), GridSpec::new(4, 4)?).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidGrid(GridError::ImageTooSmall { .. })
        ));
        Ok(())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn tiles_reassemble_losslessly(
            width in 10u32..90,
            height in 10u32..90,
            rows in 1u32..=10,
            cols in 1u32..=10,
        ) {
            let sheet = gradient(width, height);
            let grid = GridSpec::new(rows, cols).map_err(|err| TestCaseError::fail(err.to_string()))?;
            let tiles = slice(&sheet, grid).map_err(|err| TestCaseError::fail(err.to_string()))?;
            prop_assert_eq!(tiles.len(), (rows * cols) as usize);

            let mut canvas = DynamicImage::ImageRgba8(RgbaImage::new(width, height));
            let mut covered = 0u64;
            for tile in &tiles {
                let decoded = image::load_from_memory(&tile.encoded_bytes)
                    .map_err(|err| TestCaseError::fail(err.to_string()))?;
                canvas
                    .copy_from(&decoded, tile.origin_x, tile.origin_y)
                    .map_err(|err| TestCaseError::fail(err.to_string()))?;
                covered += u64::from(tile.width) * u64::from(tile.height);
            }
            prop_assert_eq!(covered, u64::from(width) * u64::from(height));
            prop_assert_eq!(canvas.to_rgba8(), sheet.to_rgba8());
        }
    }
}
