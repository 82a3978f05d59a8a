use thiserror::Error;

/// Custom error type for chromsol
///
/// This error type wraps all errors that can occur when configuring or
/// initializing a General Rate Model unit operation. Hot-path residual and
/// solve entry points do not use it; they report integer status codes
/// (0 success, negative unrecoverable, positive recoverable).
#[derive(Error, Debug)]
pub enum ChromsolError {
    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Linear solver error: {0}")]
    LinearSolverError(#[from] LinearSolverError),
    #[error("Non-linear solver error: {0}")]
    NonLinearSolverError(#[from] NonLinearSolverError),
    #[error("Error: {0}")]
    Other(String),
}

/// Possible errors raised while reading the parameter provider during
/// `configure` or `configure_model_discretization`
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Field {field} was not found")]
    MissingParameter { field: String },
    #[error("Field {field} contains too few elements ({expected} required)")]
    TooFewElements { field: String, expected: usize },
    #[error("Field {field} requires (only) {expected} element(s)")]
    WrongElementCount { field: String, expected: usize },
    #[error(
        "Number of elements in field {field} is not a positive multiple of {multiple} (got {found})"
    )]
    NotAMultiple {
        field: String,
        multiple: usize,
        found: usize,
    },
    #[error("Sum of field PAR_TYPE_VOLFRAC differs from 1.0 (is {sum}) in axial cell {cell}")]
    VolumeFractionSum { cell: usize, sum: f64 },
    #[error("Unknown binding model {0}")]
    UnknownBindingModel(String),
    #[error("Unknown dynamic reaction model {0}")]
    UnknownReactionModel(String),
    #[error("Field {field} has wrong type")]
    WrongParameterType { field: String },
    #[error("Field {field} is invalid: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Possible errors that can occur when solving a linear problem
#[derive(Error, Debug)]
pub enum LinearSolverError {
    #[error("Banded matrix not factorized before solve")]
    NotFactorized,
    #[error("Zero pivot encountered in row {row} during banded LU factorization")]
    SingularMatrix { row: usize },
    #[error("GMRES did not converge: residual {residual} after {iterations} iterations")]
    GmresDidNotConverge { residual: f64, iterations: usize },
    #[error("Error: {0}")]
    Other(String),
}

/// Possible errors that can occur when solving a non-linear problem
#[derive(Error, Debug)]
pub enum NonLinearSolverError {
    #[error("Newton iterations did not converge")]
    NewtonDidNotConverge,
    #[error("Linear solve inside Newton iteration failed")]
    LinearSolveFailed,
    #[error("State has wrong length: expected {expected}, got {found}")]
    WrongStateLength { expected: usize, found: usize },
    #[error("Error: {0}")]
    Other(String),
}

#[macro_export]
macro_rules! config_error {
    ($variant:ident) => {
        $crate::error::ChromsolError::from($crate::error::ConfigError::$variant)
    };
    ($variant:ident { $($field:ident: $value:expr),* $(,)? }) => {
        $crate::error::ChromsolError::from($crate::error::ConfigError::$variant {
            $($field: $value),*
        })
    };
    ($variant:ident, $($arg:tt)*) => {
        $crate::error::ChromsolError::from($crate::error::ConfigError::$variant($($arg)*))
    };
}

#[macro_export]
macro_rules! linear_solver_error {
    ($variant:ident) => {
        $crate::error::ChromsolError::from($crate::error::LinearSolverError::$variant)
    };
    ($variant:ident { $($field:ident: $value:expr),* $(,)? }) => {
        $crate::error::ChromsolError::from($crate::error::LinearSolverError::$variant {
            $($field: $value),*
        })
    };
}

#[macro_export]
macro_rules! non_linear_solver_error {
    ($variant:ident) => {
        $crate::error::ChromsolError::from($crate::error::NonLinearSolverError::$variant)
    };
    ($variant:ident { $($field:ident: $value:expr),* $(,)? }) => {
        $crate::error::ChromsolError::from($crate::error::NonLinearSolverError::$variant {
            $($field: $value),*
        })
    };
}

#[macro_export]
macro_rules! other_error {
    ($msg:expr) => {
        $crate::error::ChromsolError::Other($msg.to_string())
    };
}
