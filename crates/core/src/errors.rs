use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("design memo `{memo_id}` maps `{replacement_code}` to no obsolete codes")]
    EmptyMemoMapping { memo_id: String, replacement_code: String },
    #[error("replacement code `{0}` is mapped by more than one design memo")]
    DuplicateReplacementCode(String),
    #[error("unknown crosswalk status `{status}` for pay item `{old_pay_item}`")]
    UnknownCrosswalkStatus { old_pay_item: String, status: String },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("configuration failure: {0}")]
    Configuration(String),
    #[error("input failure: {0}")]
    Input(String),
}

impl ApplicationError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::Domain(_) => "reference_data",
            Self::Configuration(_) => "config_validation",
            Self::Input(_) => "input",
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Configuration(_) => 2,
            Self::Input(_) => 3,
            Self::Domain(_) => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, DomainError};

    #[test]
    fn domain_error_maps_to_reference_data_class() {
        let error = ApplicationError::from(DomainError::EmptyMemoMapping {
            memo_id: "25-10".to_owned(),
            replacement_code: "401-11526".to_owned(),
        });

        assert_eq!(error.error_class(), "reference_data");
        assert_eq!(error.exit_code(), 4);
        assert!(error.to_string().contains("401-11526"));
    }

    #[test]
    fn configuration_error_uses_config_exit_code() {
        let error = ApplicationError::Configuration("bad sigma".to_owned());

        assert_eq!(error.error_class(), "config_validation");
        assert_eq!(error.exit_code(), 2);
    }
}
