use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const STICKER_PACK_INSTRUCTION: &str = "
Generate a sticker sheet featuring a Chibi-style, LINE sticker-like character based on the input image.
The character should maintain key features like headwear from the original image.
Style: Hand-drawn color illustration.
Layout: 4x6 grid (24 stickers total).
Content: Various common chat expressions and fun memes.
Language: All text must be in Handwritten Simplified Chinese.
Do not just copy the original image. Create expressive, stylized stickers.
";

const CHRISTMAS_HAT_INSTRUCTION: &str = "
Generate a single image based on the input image.
Add a Christmas hat to the character's head in the input image.
Ensure the hat matches the existing art style and lighting.
Return a single image.
Do not generate a sticker sheet or grid.
";

/// What the upstream model is asked to draw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GenerationMode {
    #[default]
    StickerPack,
    ChristmasHat,
}

impl GenerationMode {
    pub const ALL: [GenerationMode; 2] = [GenerationMode::StickerPack, GenerationMode::ChristmasHat];

    pub fn as_str(self) -> &'static str {
        match self {
            GenerationMode::StickerPack => "sticker-pack",
            GenerationMode::ChristmasHat => "christmas-hat",
        }
    }

    pub fn instruction(self) -> &'static str {
        match self {
            GenerationMode::StickerPack => STICKER_PACK_INSTRUCTION,
            GenerationMode::ChristmasHat => CHRISTMAS_HAT_INSTRUCTION,
        }
    }

    /// Only the sticker sheet is meant to be cut into tiles.
    pub fn produces_sheet(self) -> bool {
        matches!(self, GenerationMode::StickerPack)
    }
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase().replace('_', "-");
        GenerationMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == normalized)
            .ok_or_else(|| {
                format!(
                    "unknown mode '{}' (expected one of: {})",
                    raw.trim(),
                    GenerationMode::ALL.map(GenerationMode::as_str).join(", ")
                )
            })
    }
}
