use thiserror::Error;

#[derive(Debug, Error)]
pub enum CartridgeError {
    #[error("Invalid cartridge: {0}")]
    Deserialize(#[from] serde_json::Error),

    #[error("Invalid interaction: {0}")]
    Validation(String),
}

impl CartridgeError {
    /// Short error code string surfaced at the transport boundary.
    pub fn code(&self) -> &'static str {
        match self {
            CartridgeError::Deserialize(_) => "CARTRIDGE_INVALID",
            CartridgeError::Validation(_) => "CARTRIDGE_VALIDATION",
        }
    }
}

pub type Result<T> = std::result::Result<T, CartridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct_per_variant() {
        let parse = CartridgeError::from(
            serde_json::from_str::<serde_json::Value>("{").unwrap_err(),
        );
        assert_eq!(parse.code(), "CARTRIDGE_INVALID");

        let validation = CartridgeError::Validation("blogi rėžiai".to_string());
        assert_eq!(validation.code(), "CARTRIDGE_VALIDATION");
        assert!(validation.to_string().contains("blogi rėžiai"));
    }
}
