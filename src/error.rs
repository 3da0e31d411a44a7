use thiserror::Error;

/// Errors surfaced by the library. Nothing is retried internally; the unmix
/// kernel itself never fails, so every error originates at the edges
/// (parsing, decoding, deduction, encoding).
#[derive(Debug, Error)]
pub enum Error {
    /// A hex color string could not be parsed.
    #[error("invalid color: {0}")]
    InvalidColor(String),

    /// The input bytes could not be decoded as an image.
    #[error("failed to decode image: {0}")]
    DecodeFailed(#[source] image::ImageError),

    /// The image has a zero width or height.
    #[error("image has zero width or height")]
    EmptyImage,

    /// Color deduction could not produce the requested number of colors.
    #[error("insufficient foreground colors: {0}")]
    InsufficientColors(String),

    /// The output image could not be encoded.
    #[error("failed to encode image: {0}")]
    EncodeFailed(#[source] image::ImageError),
}

pub type Result<T> = std::result::Result<T, Error>;
