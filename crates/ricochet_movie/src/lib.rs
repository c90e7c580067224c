//! RICOCHET movie file codec
//!
//! Bit-exact reader/writer for the fixed-offset binary movie format used for
//! interop with external recording tools: a header with signature, version,
//! frame counts and ROM identity, followed at a fixed base offset by one
//! four-byte input record per frame (big-endian button mask plus two signed
//! analog axes). Frames with no explicit input are stored as zeroes.

#![warn(missing_docs)]
#![warn(clippy::all)]

use ricochet_core::{CoreError, Input, InputDiff};
use std::fs;
use std::path::Path;
use tracing::debug;

/// File signature, big-endian at offset 0
pub const SIGNATURE: u32 = 0x4D36_341A;
/// Supported format version
pub const VERSION: u32 = 3;
/// Byte offset of the first input record
pub const INPUT_BASE: usize = 0x400;
/// Bytes per input record
pub const RECORD_SIZE: usize = 4;

const OFF_VERSION: usize = 0x4;
const OFF_FRAME_COUNT: usize = 0xC;
const OFF_FPS: usize = 0x14;
const OFF_CONTROLLERS: usize = 0x15;
const OFF_SAMPLES: usize = 0x18;
const OFF_MOVIE_TYPE: usize = 0x1C;
const OFF_CONTROLLER_FLAGS: usize = 0x20;
const OFF_ROM_NAME: usize = 0xC4;
const ROM_NAME_LEN: usize = 32;
const OFF_ROM_CRC: usize = 0xE4;
const OFF_COUNTRY: usize = 0xE8;

/// Movie codec error
#[derive(Debug, thiserror::Error)]
pub enum MovieError {
    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Signature bytes did not match
    #[error("bad signature: expected {SIGNATURE:#010x}, found {found:#010x}")]
    BadSignature {
        /// Signature actually present in the file
        found: u32,
    },

    /// Format version not supported
    #[error("unsupported version {version}")]
    UnsupportedVersion {
        /// Version actually present in the file
        version: u32,
    },

    /// File ends before the header or a whole record
    #[error("file truncated at offset {offset:#x}")]
    Truncated {
        /// Offset at which data ran out
        offset: usize,
    },
}

impl From<MovieError> for CoreError {
    fn from(err: MovieError) -> Self {
        match err {
            MovieError::Io(e) => CoreError::Io {
                message: e.to_string(),
            },
            other => CoreError::Validation {
                field: "movie".to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// A recorded input movie plus its header identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Movie {
    /// Sparse inputs (neutral frames are omitted)
    pub inputs: InputDiff,
    /// Declared frame count field (many tools write `u32::MAX`)
    pub frame_count: u32,
    /// Frames per second
    pub fps: u8,
    /// Controller count
    pub controllers: u8,
    /// ROM internal name, NUL-trimmed
    pub rom_name: String,
    /// ROM CRC
    pub rom_crc: u32,
    /// ROM country code
    pub country_code: u16,
}

impl Movie {
    /// Create an empty movie with default header identity
    #[must_use]
    pub fn new() -> Self {
        Self {
            inputs: InputDiff::new(),
            frame_count: u32::MAX,
            fps: 60,
            controllers: 1,
            rom_name: String::new(),
            rom_crc: 0,
            country_code: 0,
        }
    }

    /// Set the ROM identity fields
    #[must_use]
    pub fn with_rom(mut self, name: &str, crc: u32, country_code: u16) -> Self {
        self.rom_name = name.to_string();
        self.rom_crc = crc;
        self.country_code = country_code;
        self
    }

    /// Effective input at `frame` (neutral when absent)
    #[must_use]
    pub fn input_at(&self, frame: u64) -> Input {
        self.inputs.get(frame).unwrap_or_else(Input::neutral)
    }

    /// Number of sample records the file carries (last frame + 1)
    #[must_use]
    pub fn samples(&self) -> u64 {
        self.inputs.last_frame().map_or(0, |f| f + 1)
    }

    /// Decode a movie from bytes
    ///
    /// # Errors
    ///
    /// Returns error on bad signature, unsupported version, or truncation.
    pub fn decode(bytes: &[u8]) -> Result<Self, MovieError> {
        if bytes.len() < INPUT_BASE {
            return Err(MovieError::Truncated { offset: bytes.len() });
        }

        let signature = u32::from_be_bytes(take4(bytes, 0)?);
        if signature != SIGNATURE {
            return Err(MovieError::BadSignature { found: signature });
        }
        let version = u32::from_le_bytes(take4(bytes, OFF_VERSION)?);
        if version != VERSION {
            return Err(MovieError::UnsupportedVersion { version });
        }

        let frame_count = u32::from_le_bytes(take4(bytes, OFF_FRAME_COUNT)?);
        let fps = bytes[OFF_FPS];
        let controllers = bytes[OFF_CONTROLLERS];
        let rom_name = decode_rom_name(&bytes[OFF_ROM_NAME..OFF_ROM_NAME + ROM_NAME_LEN]);
        let rom_crc = u32::from_be_bytes(take4(bytes, OFF_ROM_CRC)?);
        let country_code = u16::from_be_bytes([bytes[OFF_COUNTRY], bytes[OFF_COUNTRY + 1]]);

        let mut inputs = InputDiff::new();
        let mut frame = 0u64;
        let mut offset = INPUT_BASE;
        // Trailing partial records are ignored, matching existing readers.
        while offset + RECORD_SIZE <= bytes.len() {
            let buttons = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]);
            let stick_x = bytes[offset + 2] as i8;
            let stick_y = bytes[offset + 3] as i8;
            let input = Input::new(buttons, stick_x, stick_y);
            if !input.is_neutral() {
                inputs.set(frame, input);
            }
            frame += 1;
            offset += RECORD_SIZE;
        }

        Ok(Self {
            inputs,
            frame_count,
            fps,
            controllers,
            rom_name,
            rom_crc,
            country_code,
        })
    }

    /// Encode the movie to bytes
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let samples = self.samples();
        let mut bytes = vec![0u8; INPUT_BASE + samples as usize * RECORD_SIZE];

        bytes[0..4].copy_from_slice(&SIGNATURE.to_be_bytes());
        bytes[OFF_VERSION..OFF_VERSION + 4].copy_from_slice(&VERSION.to_le_bytes());
        bytes[OFF_FRAME_COUNT..OFF_FRAME_COUNT + 4].copy_from_slice(&self.frame_count.to_le_bytes());
        bytes[OFF_FPS] = self.fps;
        bytes[OFF_CONTROLLERS] = self.controllers;
        bytes[OFF_SAMPLES..OFF_SAMPLES + 4].copy_from_slice(&(samples as u32).to_le_bytes());
        bytes[OFF_MOVIE_TYPE..OFF_MOVIE_TYPE + 2].copy_from_slice(&2u16.to_be_bytes());
        bytes[OFF_CONTROLLER_FLAGS] = 1;

        let name = self.rom_name.as_bytes();
        let name_len = name.len().min(ROM_NAME_LEN);
        bytes[OFF_ROM_NAME..OFF_ROM_NAME + name_len].copy_from_slice(&name[..name_len]);
        bytes[OFF_ROM_CRC..OFF_ROM_CRC + 4].copy_from_slice(&self.rom_crc.to_be_bytes());
        bytes[OFF_COUNTRY..OFF_COUNTRY + 2].copy_from_slice(&self.country_code.to_be_bytes());

        for frame in 0..samples {
            let input = self.input_at(frame);
            let offset = INPUT_BASE + frame as usize * RECORD_SIZE;
            bytes[offset..offset + 2].copy_from_slice(&input.buttons.to_be_bytes());
            bytes[offset + 2] = input.stick_x as u8;
            bytes[offset + 3] = input.stick_y as u8;
        }

        bytes
    }

    /// Read a movie file
    ///
    /// # Errors
    ///
    /// Returns error on I/O failure or malformed contents.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, MovieError> {
        let bytes = fs::read(&path)?;
        let movie = Self::decode(&bytes)?;
        debug!(
            path = %path.as_ref().display(),
            samples = movie.samples(),
            rom = %movie.rom_name,
            "movie loaded"
        );
        Ok(movie)
    }

    /// Write the movie to a file
    ///
    /// # Errors
    ///
    /// Returns error on I/O failure.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), MovieError> {
        fs::write(&path, self.encode())?;
        debug!(
            path = %path.as_ref().display(),
            samples = self.samples(),
            "movie written"
        );
        Ok(())
    }
}

impl Default for Movie {
    fn default() -> Self {
        Self::new()
    }
}

fn take4(bytes: &[u8], offset: usize) -> Result<[u8; 4], MovieError> {
    bytes
        .get(offset..offset + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or(MovieError::Truncated { offset })
}

fn decode_rom_name(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
