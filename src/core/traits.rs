//! Traits at the boundary between the protocol engine and its collaborators.

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::error::{ProtocolError, StoreError};

/// Application settings exchanged verbatim after authentication.
///
/// The engine never looks inside; it only serializes the value to UTF-8 JSON
/// and back. Blanket-implemented for every serde type that can cross tasks.
///
/// # Example
///
/// ```
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Clone, Serialize, Deserialize)]
/// struct CameraSettings {
///     width: u32,
///     height: u32,
/// }
///
/// fn assert_settings<S: camlink::Settings>() {}
/// assert_settings::<CameraSettings>();
/// ```
pub trait Settings: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Serialize to UTF-8 JSON.
    fn to_json(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse from UTF-8 JSON.
    fn from_json(data: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(data)?)
    }
}

impl<T> Settings for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Read-current / persist-new storage for a single record.
///
/// Values are consumed atomically: `load` returns the whole record and
/// `persist` replaces it entirely.
pub trait ConfigStore<T>: Send + Sync + 'static {
    /// Read the current value.
    fn load(&self) -> Result<T, StoreError>;

    /// Replace the stored value.
    fn persist(&self, value: &T) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        width: u32,
        label: String,
    }

    #[test]
    fn test_settings_json_roundtrip() {
        let settings = Sample {
            width: 640,
            label: "porch".into(),
        };
        let json = settings.to_json().unwrap();
        assert_eq!(std::str::from_utf8(&json).unwrap(), r#"{"width":640,"label":"porch"}"#);
        assert_eq!(Sample::from_json(&json).unwrap(), settings);
    }

    #[test]
    fn test_settings_rejects_garbage() {
        assert!(matches!(
            Sample::from_json(b"\xff\xfe"),
            Err(ProtocolError::InvalidSettings(_))
        ));
    }
}
