//! Face descriptor payloads submitted with a registration.

/// Non-empty vector of finite floats produced by the verifier's extraction endpoint.
#[derive(Clone, Debug, PartialEq)]
pub struct FaceEncoding(Vec<f64>);

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BiometricError {
    #[error("face payload missing")]
    Missing,
    #[error("face payload malformed")]
    Malformed,
}

impl FaceEncoding {
    /// Parse the JSON array form. A blank payload is treated as absent.
    ///
    /// # Errors
    /// [`BiometricError::Malformed`] for invalid JSON, an empty array, or a
    /// non-finite component.
    pub fn parse(raw: Option<&str>) -> Result<Option<Self>, BiometricError> {
        let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
            return Ok(None);
        };
        let values: Vec<f64> =
            serde_json::from_str(raw).map_err(|_| BiometricError::Malformed)?;
        Self::try_from(values).map(Some)
    }

    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.0
    }

    /// Canonical JSON array, as persisted.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "[]".to_string())
    }
}

impl TryFrom<Vec<f64>> for FaceEncoding {
    type Error = BiometricError;

    fn try_from(values: Vec<f64>) -> Result<Self, Self::Error> {
        if values.is_empty() || values.iter().any(|value| !value.is_finite()) {
            return Err(BiometricError::Malformed);
        }
        Ok(Self(values))
    }
}
