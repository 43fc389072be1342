//! Image encoding: `DynamicImage` → base64 PNG wrapped in a [`PageImage`].
//!
//! Vision APIs accept images as base64 payloads embedded in the JSON request
//! body. PNG is lossless, which keeps hand-lettered bubble text crisp; JPEG
//! artefacts around thin strokes noticeably hurt transcription.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::fmt;
use std::io::Cursor;
use tracing::debug;

/// One rasterised page, ready to embed in a model request.
#[derive(Clone)]
pub struct PageImage {
    /// 1-based position in the source PDF.
    pub page_number: usize,
    pub width: u32,
    pub height: u32,
    /// Base64 PNG payload.
    pub data: ImageData,
}

impl PageImage {
    /// Encode `img` as the image for `page_number`.
    pub fn encode(page_number: usize, img: &DynamicImage) -> Result<Self, image::ImageError> {
        Ok(Self {
            page_number,
            width: img.width(),
            height: img.height(),
            data: encode_page(img)?,
        })
    }
}

impl fmt::Debug for PageImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageImage")
            .field("page_number", &self.page_number)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("base64_len", &self.data.data.len())
            .finish()
    }
}

/// Encode a rasterised page as a base64 PNG.
///
/// `detail: "high"` asks OpenAI-style providers for the full tile budget;
/// without it small lettering is downsampled away.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}
