/// Error returned from the fitting and aggregation pipeline
#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum Error {
    #[error("no trial data for participant {participant} at frequency index {frequency_index}")]
    MissingInput {
        participant: String,
        frequency_index: usize,
    },

    #[error("psychometric fit did not converge: {0}")]
    FitFailed(&'static str),

    #[error("{actual} distinct abscissa values are fewer than the minimum required {minimum}")]
    InsufficientData { actual: usize, minimum: usize },

    #[error("modulation depth units not specified; pass Decimal or Percent explicitly")]
    AmbiguousUnits,

    #[error("modulation depth {0} is outside (0, 1] after unit conversion")]
    NonPositiveModulation(f64),

    #[error("frequency {0} Hz is not positive")]
    NonPositiveFrequency(f64),
}
