use std::{fmt, io};

#[derive(Debug)]
pub enum SplatError {
    Format(String),
    Header(String),
    UnsupportedFormat(String),
    Index { index: usize, len: usize },
    MissingProperty { element: String, property: String },
    DuplicateProperty(String),
    LengthMismatch { expected: usize, actual: usize },
    IoError(io::Error),
}

impl fmt::Display for SplatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplatError::Format(e) => {
                write!(f, "Malformed splat data: {}", e)
            }
            SplatError::Header(token) => {
                write!(f, "Failed to parse PLY header near '{}'", token)
            }
            SplatError::UnsupportedFormat(format) => {
                write!(
                    f,
                    "Unsupported PLY format '{}' (only binary_little_endian is supported)",
                    format
                )
            }
            SplatError::Index { index, len } => {
                write!(f, "Splat index {} is out of range for {} splats", index, len)
            }
            SplatError::MissingProperty { element, property } => {
                write!(f, "Element '{}' has no property '{}'", element, property)
            }
            SplatError::DuplicateProperty(name) => {
                write!(f, "Property '{}' already exists", name)
            }
            SplatError::LengthMismatch { expected, actual } => {
                write!(
                    f,
                    "Column length mismatch: expected {} values, got {}",
                    expected, actual
                )
            }
            SplatError::IoError(e) => {
                write!(f, "An I/O error occurred: {}", e)
            }
        }
    }
}

impl std::error::Error for SplatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SplatError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SplatError {
    fn from(e: io::Error) -> Self {
        SplatError::IoError(e)
    }
}

pub type Result<T> = std::result::Result<T, SplatError>;
