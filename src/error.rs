use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid tile address: {coordinate}={value} is out of range for zoom {zoom}.")]
    InvalidTileAddress {
        coordinate: &'static str,
        value: String,
        zoom: String,
    },

    #[error("Invalid cadastral code {0:?}: expected 18 digits.")]
    InvalidCadastralCode(String),

    #[error("Invalid district code {0:?}: expected 1 to 18 digits.")]
    InvalidDistrictCode(String),

    #[error("Unknown layer {0:?}.")]
    UnknownLayer(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No route for {0}.")]
    NotFound(String),

    #[error("Spatial store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    #[error("Spatial store query exceeded {0:?}.")]
    StoreTimeout(Duration),

    #[error("Malformed geometry: {0}")]
    MalformedGeometry(String),

    #[error("Failed to encode tile: {0}")]
    EncodingFailure(String),

    #[error("Invalid YAML in tile source.")]
    Config(#[from] serde_yaml::Error),

    #[error("Invalid tile source: {0}")]
    InvalidSource(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid_address(
        coordinate: &'static str,
        value: impl ToString,
        zoom: impl ToString,
    ) -> Self {
        Error::InvalidTileAddress {
            coordinate,
            value: value.to_string(),
            zoom: zoom.to_string(),
        }
    }

    /// Stable name used in the `error` field of JSON error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidTileAddress { .. } => "InvalidTileAddress",
            Error::InvalidCadastralCode(_) => "InvalidCadastralCode",
            Error::InvalidDistrictCode(_) => "InvalidDistrictCode",
            Error::UnknownLayer(_) => "UnknownLayer",
            Error::InvalidRequest(_) => "InvalidRequest",
            Error::NotFound(_) => "NotFound",
            Error::StoreUnavailable(_) | Error::StoreTimeout(_) => "StoreUnavailable",
            Error::MalformedGeometry(_) => "MalformedGeometry",
            Error::EncodingFailure(_) => "EncodingFailure",
            Error::Config(_) | Error::InvalidSource(_) | Error::Io(_) => "Configuration",
        }
    }

    /// Whether the caller is at fault. Client errors map to 4xx responses and
    /// are not logged as failures.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidTileAddress { .. }
                | Error::InvalidCadastralCode(_)
                | Error::InvalidDistrictCode(_)
                | Error::UnknownLayer(_)
                | Error::InvalidRequest(_)
                | Error::NotFound(_)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
