//! Simulation capability contract and an in-memory backend for tests.

use crate::error::{CoreError, CoreResult};
use crate::fingerprint::Fingerprint;
use crate::input::{Input, buttons};
use serde::{Deserialize, Serialize};

/// Capability contract for a deterministic discrete-time simulation
///
/// One instance is owned by exactly one consumer at a time; determinism is
/// assumed: same state plus same input sequence yields the same state.
/// Faults from these operations are fatal to the run.
pub trait Simulation {
    /// Serialize the full simulation state to an opaque blob
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot capture its state.
    fn save_state(&mut self) -> CoreResult<Vec<u8>>;

    /// Restore state from a blob previously produced by [`save_state`](Self::save_state)
    ///
    /// # Errors
    ///
    /// Returns error if the blob is not a valid state image.
    fn load_state(&mut self, blob: &[u8]) -> CoreResult<()>;

    /// Advance one discrete timestep with `input` latched
    ///
    /// # Errors
    ///
    /// Returns error on backend fault.
    fn advance(&mut self, input: Input) -> CoreResult<()>;

    /// Read a named memory field
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::FieldNotFound`] for unknown names.
    fn read(&self, field: &str) -> CoreResult<Vec<u8>>;

    /// Write a named memory field
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::FieldNotFound`] for unknown names.
    fn write(&mut self, field: &str, bytes: &[u8]) -> CoreResult<()>;

    /// Current frame number
    fn current_frame(&self) -> u64;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct MemoryState {
    frame: u64,
    pos_x: i64,
    pos_y: i64,
    filler: u8,
}

/// Toy deterministic simulation backed by plain memory
///
/// Walks a point around a plane under stick control; the A button doubles
/// the step. Carries one raw filler byte so padding-mask probing has
/// something to find. Used throughout the workspace's tests.
#[derive(Debug, Clone)]
pub struct MemorySim {
    state: MemoryState,
}

impl MemorySim {
    /// Create a simulation at frame 0, origin position
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: MemoryState {
                frame: 0,
                pos_x: 0,
                pos_y: 0,
                filler: 0,
            },
        }
    }

    /// Fingerprint of the interesting state plus the raw filler byte
    #[must_use]
    pub fn state_bin(&self) -> Fingerprint {
        let mut bytes = Vec::with_capacity(17);
        bytes.extend_from_slice(&self.state.pos_x.to_le_bytes());
        bytes.extend_from_slice(&self.state.pos_y.to_le_bytes());
        bytes.push(self.state.filler);
        Fingerprint::from_bytes(bytes)
    }

    /// Flood the filler byte, as a padding probe would
    pub fn flood_filler(&mut self, value: u8) {
        self.state.filler = value;
    }

    fn field_bytes(&self, field: &str) -> CoreResult<Vec<u8>> {
        match field {
            "frame" => Ok(self.state.frame.to_le_bytes().to_vec()),
            "pos_x" => Ok(self.state.pos_x.to_le_bytes().to_vec()),
            "pos_y" => Ok(self.state.pos_y.to_le_bytes().to_vec()),
            "filler" => Ok(vec![self.state.filler]),
            _ => Err(CoreError::FieldNotFound {
                name: field.to_string(),
            }),
        }
    }
}

impl Default for MemorySim {
    fn default() -> Self {
        Self::new()
    }
}

fn i64_from(bytes: &[u8], field: &str) -> CoreResult<i64> {
    let arr: [u8; 8] = bytes.try_into().map_err(|_| CoreError::Validation {
        field: field.to_string(),
        reason: format!("expected 8 bytes, got {}", bytes.len()),
    })?;
    Ok(i64::from_le_bytes(arr))
}

impl Simulation for MemorySim {
    fn save_state(&mut self) -> CoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.state)?)
    }

    fn load_state(&mut self, blob: &[u8]) -> CoreResult<()> {
        self.state = serde_json::from_slice(blob).map_err(|e| CoreError::Simulation {
            message: format!("corrupt state blob: {}", e),
        })?;
        Ok(())
    }

    fn advance(&mut self, input: Input) -> CoreResult<()> {
        let scale = if input.pressed(buttons::A) { 2 } else { 1 };
        self.state.pos_x += i64::from(input.stick_x) * scale;
        self.state.pos_y += i64::from(input.stick_y) * scale;
        self.state.frame += 1;
        Ok(())
    }

    fn read(&self, field: &str) -> CoreResult<Vec<u8>> {
        self.field_bytes(field)
    }

    fn write(&mut self, field: &str, bytes: &[u8]) -> CoreResult<()> {
        match field {
            "pos_x" => self.state.pos_x = i64_from(bytes, field)?,
            "pos_y" => self.state.pos_y = i64_from(bytes, field)?,
            "filler" => {
                self.state.filler = *bytes.first().ok_or_else(|| CoreError::Validation {
                    field: field.to_string(),
                    reason: "expected 1 byte".to_string(),
                })?;
            }
            _ => {
                return Err(CoreError::FieldNotFound {
                    name: field.to_string(),
                });
            }
        }
        Ok(())
    }

    fn current_frame(&self) -> u64 {
        self.state.frame
    }
}
