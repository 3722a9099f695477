pub mod bounds;
pub mod common;
pub mod dot_splat;
pub mod error;
pub mod iter;
pub mod morton;
pub mod ply;
mod structures;

pub use bounds::{Aabb, Predicate};
pub use error::{Result, SplatError};
pub use iter::{IterFields, SplatIter};
pub use ply::{encode_ply, write_splat_ply, DecodeOptions, PlyData};
pub use structures::{DataType, Element, Property, SplatData, Storage, VERTEX_ELEMENT};

use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Container formats accepted by [`load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ply,
    Splat,
}

impl Format {
    /// Sniffs the format from the leading bytes; headerless data must be whole `.splat` records.
    pub fn detect(data: &[u8]) -> Option<Self> {
        if data.starts_with(ply::MAGIC) {
            Some(Format::Ply)
        } else if !data.is_empty() && data.len() % dot_splat::RECORD_SIZE == 0 {
            Some(Format::Splat)
        } else {
            None
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ext.parse().ok())
    }
}

impl FromStr for Format {
    type Err = SplatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ply" => Ok(Format::Ply),
            "splat" => Ok(Format::Splat),
            other => Err(SplatError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Ply => write!(f, "ply"),
            Format::Splat => write!(f, "splat"),
        }
    }
}

/// Decodes a complete in-memory file into a [`SplatData`].
///
/// When `format` is `None` it is detected with [`Format::detect`]. `options` only apply to PLY.
pub fn load(data: &[u8], format: Option<Format>, options: DecodeOptions<'_>) -> Result<SplatData> {
    let format = format
        .or_else(|| Format::detect(data))
        .ok_or_else(|| SplatError::Format("Unrecognized splat file format".to_string()))?;

    let splat_data = match format {
        Format::Ply => {
            let ply = ply::decode(data, options)?;
            if ply.is_compressed() {
                tracing::debug!("PLY uses the chunked compressed layout; columns kept packed");
            }
            ply.into_splat_data()
        }
        Format::Splat => SplatData::new(dot_splat::decode(data)?),
    };

    tracing::debug!(
        %format,
        bytes = data.len(),
        splats = splat_data.num_splats(),
        "Loaded splat data"
    );
    Ok(splat_data)
}

cfg_if::cfg_if! {
if #[cfg(feature = "async")] {
    use tokio::io::{AsyncRead, AsyncReadExt};

    /// Buffers `reader` to the end, then decodes it like [`load`].
    #[inline(never)]
    pub async fn load_async<R>(
        reader: &mut R,
        format: Option<Format>,
        options: DecodeOptions<'_>,
    ) -> Result<SplatData>
    where
        R: AsyncRead + Unpin,
    {
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        load(&data, format, options)
    }
}
}
