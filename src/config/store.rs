//! JSON file storage for credentials.

use std::fs;
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::{ConfigStore, StoreError};

/// Camera-side record: the verifiable hash of the current password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    /// Password hash.
    pub hash: String,
}

/// Client-side record: where to connect and which password to present.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCredentials {
    /// WebSocket address of the camera, e.g. `ws://10.0.0.2:8080`.
    pub address: String,
    /// Plaintext password.
    pub pwd: String,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("address", &self.address)
            .field("pwd", &"..")
            .finish()
    }
}

/// [`ConfigStore`] backed by one JSON file.
///
/// Writes go to a sibling temporary file which is then renamed over the
/// target, so readers see either the old or the new record.
#[derive(Debug)]
pub struct JsonFileStore<T> {
    path: PathBuf,
    _record: PhantomData<fn() -> T>,
}

impl<T> JsonFileStore<T> {
    /// Store at `path`. The file is not touched until the first access.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _record: PhantomData,
        }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl<T> ConfigStore<T> for JsonFileStore<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    fn load(&self) -> Result<T, StoreError> {
        let bytes = fs::read(&self.path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn persist(&self, value: &T) -> Result<(), StoreError> {
        let json = serde_json::to_vec(value)?;
        let temp = self.temp_path();
        {
            let mut file = fs::File::create(&temp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;
        Ok(())
    }
}
