use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fit {
    Cover,
    Contain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImgFormat {
    Webp,
    Jpeg,
    Png,
}

impl ImgFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Webp => "image/webp",
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
        }
    }
}

/// Options parsed from the image URL suffix, e.g. `/w:200/fmt:webp`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImgProcessOpts {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub quality: Option<u8>,
    pub fit: Option<Fit>,
    pub format: Option<ImgFormat>,
}

impl ImgProcessOpts {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Parses a slash-separated option path. Unknown or malformed tokens
/// are an error so the caller can answer 422.
pub fn uri_to_img_opts(opts_path: &str) -> Result<ImgProcessOpts> {
    let mut opts = ImgProcessOpts::default();

    for token in opts_path.split('/').filter(|t| !t.is_empty()) {
        let (key, value) = token
            .split_once(':')
            .ok_or_else(|| Error::validation(format!("malformed image option: {token}")))?;
        match key {
            "w" => {
                opts.width = Some(parse_dim(key, value)?);
            }
            "h" => {
                opts.height = Some(parse_dim(key, value)?);
            }
            "q" => {
                let q: u8 = value
                    .parse()
                    .map_err(|_| Error::validation(format!("bad quality: {value}")))?;
                if !(1..=100).contains(&q) {
                    return Err(Error::validation(format!("quality out of range: {q}")));
                }
                opts.quality = Some(q);
            }
            "fit" => {
                opts.fit = Some(match value {
                    "cover" => Fit::Cover,
                    "contain" => Fit::Contain,
                    other => return Err(Error::validation(format!("unknown fit: {other}"))),
                });
            }
            "fmt" => {
                opts.format = Some(match value {
                    "webp" => ImgFormat::Webp,
                    "jpeg" => ImgFormat::Jpeg,
                    "png" => ImgFormat::Png,
                    other => return Err(Error::validation(format!("unknown format: {other}"))),
                });
            }
            other => {
                return Err(Error::validation(format!("unknown image option: {other}")));
            }
        }
    }

    Ok(opts)
}

fn parse_dim(key: &str, value: &str) -> Result<u32> {
    let n: u32 = value
        .parse()
        .map_err(|_| Error::validation(format!("bad {key}: {value}")))?;
    if n == 0 {
        return Err(Error::validation(format!("{key} must be positive")));
    }
    Ok(n)
}

/// Seam for the actual resize/transcode library, which lives outside
/// this crate. Implementations receive the full original and return
/// the bytes to stream plus their content type.
#[async_trait]
pub trait ImageProcessor: Send + Sync {
    async fn process(
        &self,
        data: Bytes,
        content_type: &str,
        opts: &ImgProcessOpts,
    ) -> Result<(Bytes, String)>;
}

/// Default processor: serves the original bytes. The advertised
/// content type still follows a `fmt:` option so the wiring is
/// observable without a codec.
pub struct PassthroughProcessor;

#[async_trait]
impl ImageProcessor for PassthroughProcessor {
    async fn process(
        &self,
        data: Bytes,
        content_type: &str,
        opts: &ImgProcessOpts,
    ) -> Result<(Bytes, String)> {
        let ct = opts
            .format
            .map(|f| f.content_type().to_string())
            .unwrap_or_else(|| content_type.to_string());
        Ok((data, ct))
    }
}
