use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{PipelineError, Result};
use crate::slicer::Tile;

/// A finished zip held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    pub bytes: Vec<u8>,
    pub entry_names: Vec<String>,
}

/// `sticker-001.png` for the first tile. Three digits keep name order equal to
/// tile order for the largest 10x10 grid.
pub fn tile_entry_name(index: usize) -> String {
    format!("sticker-{:03}.png", index + 1)
}

pub fn archive_file_name(timestamp_ms: i64) -> String {
    format!("fox-stickers-pack-{timestamp_ms}.zip")
}

pub fn single_image_file_name(timestamp_ms: i64, extension: &str) -> String {
    format!("fox-sticker-sheet-{timestamp_ms}.{extension}")
}

/// Writes every tile, in the order given, as a stored (uncompressed) entry.
pub fn pack(tiles: &[Tile]) -> Result<Archive> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let mut entry_names = Vec::with_capacity(tiles.len());

    for tile in tiles {
        let name = tile_entry_name(tile.index);
        writer.start_file(name.as_str(), options)?;
        writer
            .write_all(&tile.encoded_bytes)
            .map_err(|err| PipelineError::Packaging(format!("failed to write {name}: {err}")))?;
        entry_names.push(name);
    }

    let bytes = writer.finish()?.into_inner();
    tracing::debug!(entries = entry_names.len(), bytes = bytes.len(), "archive packed");
    Ok(Archive { bytes, entry_names })
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};

    use zip::ZipArchive;

    use super::{archive_file_name, pack, single_image_file_name, tile_entry_name};
    use crate::slicer::Tile;

    fn tile(index: usize, payload: &[u8]) -> Tile {
        Tile {
            index,
            row: 0,
            col: index as u32,
            origin_x: 0,
            origin_y: 0,
            width: 1,
            height: 1,
            encoded_bytes: payload.to_vec(),
        }
    }

    #[test]
    fn entries_keep_tile_order_and_bytes() -> anyhow::Result<()> {
        let tiles: Vec<Tile> = (0..12)
            .map(|idx| tile(idx, format!("tile-{idx}").as_bytes()))
            .collect();
        let archive = pack(&tiles)?;
        assert_eq!(archive.entry_names.len(), 12);

        let mut reader = ZipArchive::new(Cursor::new(archive.bytes))?;
        assert_eq!(reader.len(), 12);
        for idx in 0..reader.len() {
            let mut entry = reader.by_index(idx)?;
            assert_eq!(entry.name(), tile_entry_name(idx));
            let mut body = String::new();
            entry.read_to_string(&mut body)?;
            assert_eq!(body, format!("tile-{idx}"));
        }
        Ok(())
    }

    #[test]
    fn entry_names_sort_in_generation_order() {
        let mut names: Vec<String> = (0..100).map(tile_entry_name).collect();
        let expected = names.clone();
        names.sort();
        assert_eq!(names, expected);
        assert_eq!(tile_entry_name(0), "sticker-001.png");
        assert_eq!(tile_entry_name(99), "sticker-100.png");
    }

    #[test]
    fn empty_tile_list_still_yields_a_valid_zip() -> anyhow::Result<()> {
        let archive = pack(&[])?;
        assert!(archive.entry_names.is_empty());
        let reader = zip::ZipArchive::new(Cursor::new(archive.bytes))?;
        assert_eq!(reader.len(), 0);
        Ok(())
    }

    #[test]
    fn output_file_names() {
        assert_eq!(archive_file_name(1_700_000_000_000), "fox-stickers-pack-1700000000000.zip");
        assert_eq!(
            single_image_file_name(42, "jpg"),
            "fox-sticker-sheet-42.jpg"
        );
    }
}
