use std::io::Cursor;

use image::{DynamicImage, Rgb, RgbImage};
use sha2::{Digest, Sha256};
use sticker_contracts::grid::{DEFAULT_COLS, DEFAULT_ROWS};
use sticker_contracts::modes::GenerationMode;
use sticker_contracts::wire::{delta_line, GenerateRequestBody, SSE_DONE_LINE};

use crate::codec::{encode_png, png_data_uri};
use crate::error::Result;
use crate::transport::{GenerationTransport, TransportResponse};

const CELL_PX: u32 = 48;
const DELTA_CHARS: usize = 512;

/// Offline transport answering with a placeholder sheet.
///
/// The picture is a grid of solid cells coloured from a hash of the upload and
/// mode, so the same input always yields the same image.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryrunTransport;

impl GenerationTransport for DryrunTransport {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn submit(&self, body: &GenerateRequestBody) -> Result<TransportResponse> {
        let sheet = placeholder_sheet(&body.image_base64, body.mode);
        let png = encode_png(&DynamicImage::ImageRgb8(sheet))?;
        let content = format!("Here is your result:\n![dryrun]({})", png_data_uri(&png));

        let mut stream = String::new();
        let chars: Vec<char> = content.chars().collect();
        for piece in chars.chunks(DELTA_CHARS) {
            stream.push_str(&delta_line(&piece.iter().collect::<String>()));
        }
        stream.push_str(SSE_DONE_LINE);
        stream.push('\n');

        tracing::debug!(mode = %body.mode, bytes = stream.len(), "dryrun stream synthesized");
        Ok(TransportResponse::new(200, Cursor::new(stream.into_bytes())))
    }
}

/// Sticker packs get the default 4x6 sheet; single images get one cell.
pub fn placeholder_sheet(image_base64: &str, mode: GenerationMode) -> RgbImage {
    let (rows, cols) = if mode.produces_sheet() {
        (DEFAULT_ROWS, DEFAULT_COLS)
    } else {
        (1, 1)
    };
    let mut hasher = Sha256::new();
    hasher.update(image_base64.as_bytes());
    hasher.update(mode.as_str().as_bytes());
    let digest = hasher.finalize();

    RgbImage::from_fn(cols * CELL_PX, rows * CELL_PX, |x, y| {
        let cell = ((y / CELL_PX) * cols + x / CELL_PX) as usize;
        let base = (cell * 3) % (digest.len() - 2);
        Rgb([
            digest[base],
            digest[base + 1].wrapping_add((cell as u8).wrapping_mul(17)),
            digest[base + 2],
        ])
    })
}

#[cfg(test)]
mod tests {
    use image::GenericImageView;
    use sticker_contracts::modes::GenerationMode;
    use sticker_contracts::wire::GenerateRequestBody;

    use super::{placeholder_sheet, DryrunTransport, CELL_PX};
    use crate::extract::ContentAccumulator;
    use crate::stream::consume_event_stream;
    use crate::transport::GenerationTransport;

    fn body(mode: GenerationMode) -> GenerateRequestBody {
        GenerateRequestBody {
            password: String::new(),
            image_base64: "Zm94".to_string(),
            mime_type: "image/png".to_string(),
            mode,
        }
    }

    #[test]
    fn stream_carries_a_data_uri_over_several_lines() -> anyhow::Result<()> {
        let response = DryrunTransport.submit(&body(GenerationMode::StickerPack))?;
        assert!(response.is_success());
        let mut acc = ContentAccumulator::new();
        let stats = consume_event_stream(response.body, &mut acc, None)?;
        assert!(stats.saw_done);
        assert!(stats.deltas > 1);
        assert_eq!(stats.malformed_lines, 0);

        let reference = acc.finish()?;
        assert_eq!(reference.kind(), "data_uri");
        let decoded = crate::codec::decode_data_uri(reference.as_str())?;
        let image = image::load_from_memory(&decoded.bytes)?;
        assert_eq!(image.dimensions(), (6 * CELL_PX, 4 * CELL_PX));
        Ok(())
    }

    #[test]
    fn placeholder_is_deterministic_per_input_and_mode() {
        let first = placeholder_sheet("abc", GenerationMode::StickerPack);
        let again = placeholder_sheet("abc", GenerationMode::StickerPack);
        let other = placeholder_sheet("abd", GenerationMode::StickerPack);
        assert_eq!(first, again);
        assert_ne!(first, other);

        let single = placeholder_sheet("abc", GenerationMode::ChristmasHat);
        assert_eq!(single.dimensions(), (CELL_PX, CELL_PX));
    }
}
