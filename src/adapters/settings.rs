//! Persistent-settings adapter.
//!
//! Implements [`SettingsPort`] by serialising [`PersistedSettings`] with
//! `postcard` into an in-memory blob, the same bytes an EEPROM or flash
//! backend would write.
//!
//! - Values are range-checked before persistence and after loading.
//! - A blob that fails to decode reports [`ConfigError::Corrupted`].

use log::{info, warn};

use crate::app::ports::{ConfigError, SettingsPort};
use crate::config::PersistedSettings;

/// Upper bound on the encoded blob (matches a small EEPROM page budget).
pub const MAX_BLOB_SIZE: usize = 256;

#[derive(Debug, Default, Clone)]
pub struct PostcardSettingsStore {
    blob: Option<Vec<u8>>,
    writes: u32,
}

impl PostcardSettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from previously written bytes (e.g. read back from flash).
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { blob: Some(bytes), writes: 0 }
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        self.blob.as_deref()
    }

    /// Successful saves since construction.
    pub fn writes(&self) -> u32 {
        self.writes
    }
}

impl SettingsPort for PostcardSettingsStore {
    fn load(&self) -> Result<PersistedSettings, ConfigError> {
        let bytes = self.blob.as_deref().ok_or(ConfigError::NotFound)?;
        let settings: PersistedSettings = postcard::from_bytes(bytes).map_err(|e| {
            warn!("SETTINGS: decode failed: {}", e);
            ConfigError::Corrupted
        })?;
        settings.validate()?;
        Ok(settings)
    }

    fn save(&mut self, settings: &PersistedSettings) -> Result<(), ConfigError> {
        settings.validate()?;
        let bytes = postcard::to_allocvec(settings).map_err(|_| ConfigError::IoError)?;
        if bytes.len() > MAX_BLOB_SIZE {
            return Err(ConfigError::IoError);
        }
        info!("SETTINGS: {} bytes written", bytes.len());
        self.blob = Some(bytes);
        self.writes += 1;
        Ok(())
    }
}
