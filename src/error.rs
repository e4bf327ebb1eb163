//! Errors raised while setting up flux calculations.

/// Possible errors when setting up a flux calculation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TcradError {
    /// The inputs don't have the expected shape(s)
    InconsistentInputs,
    /// Only two ("Doubleclouds") or three ("Tripleclouds") regions are supported
    UnsupportedRegionCount(usize),
    /// The sub-grid distribution name wasn't recognized
    UnknownDistribution(String),
    /// An array is not contiguous when it was assumed to be
    NotContiguous,
    /// The operation was aborted early
    Cancelled,
}

impl std::fmt::Display for TcradError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TcradError::InconsistentInputs => {
                write!(f, "inputs to the flux calculation have the wrong shape")
            }
            TcradError::UnsupportedRegionCount(n) => {
                write!(f, "{n} regions requested, but only 2 or 3 are supported")
            }
            TcradError::UnknownDistribution(name) => {
                write!(f, "unknown sub-grid distribution \"{name}\" (expected \"lognormal\" or \"gamma\")")
            }
            TcradError::NotContiguous => write!(f, "array slice not contiguous in memory"),
            TcradError::Cancelled => write!(f, "operation cancelled early"),
        }
    }
}

impl std::error::Error for TcradError {}
