//! Collaborator traits for AquaCal
//!
//! The calibration engine drives three external collaborators: the stores
//! that write parameter values into the model's configuration, the model
//! executable itself, and whatever materializes the resampled ensemble.
//! All three live behind traits so the engine stays synchronous,
//! deterministic and free of file-format knowledge.

use crate::Result;

/// Write access to one declared parameter of the model configuration.
///
/// Implementations (Fortran namelists, YAML documents, ...) stage values
/// with [`ParameterBinding::set_value`] and flush them with
/// [`ParameterBinding::store`] before the model is launched. Bindings are
/// positional: the engine pairs them with candidate values in declaration
/// order.
pub trait ParameterBinding: Send {
    /// Stage a new value for this parameter.
    fn set_value(&mut self, value: f64) -> Result<()>;

    /// Flush staged values into the model's configuration files.
    fn store(&mut self) -> Result<()>;
}

/// Consumer of the resampled posterior ensemble.
///
/// Typically creates one independent model setup per member; what that
/// involves on disk is entirely the implementation's business.
pub trait EnsembleSink {
    /// Accept the resampled parameter vectors, one per ensemble member.
    fn materialize(&mut self, members: &[Vec<f64>]) -> Result<()>;
}
