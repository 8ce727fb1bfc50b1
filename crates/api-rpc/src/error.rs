//! RPC Error Types
//!
//! Maps application errors to JSON-RPC error codes.

use jsonrpsee::types::ErrorObjectOwned;
use rollup_core::error::AppError;

/// RPC Error Codes
pub mod code {
    pub const BAD_REQUEST: i32 = 4000;
    pub const NOT_FOUND: i32 = 4001;
    pub const CONFLICT: i32 = 4002;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const STORAGE_ERROR: i32 = 5001;
    pub const TRANSIENT_ERROR: i32 = 5003;
}

/// Convert AppError to JSON-RPC ErrorObject
pub fn to_rpc_error(err: AppError) -> ErrorObjectOwned {
    let code = match &err {
        AppError::BadRequest(_) | AppError::Domain(_) | AppError::Serialization(_) => {
            code::BAD_REQUEST
        }
        AppError::NotFound(_) => code::NOT_FOUND,
        AppError::Conflict(_) => code::CONFLICT,
        AppError::RetriesExhausted(_) | AppError::PartialProgress(_) => code::TRANSIENT_ERROR,
        AppError::Database(_) | AppError::Write(_) => code::STORAGE_ERROR,
        AppError::Execution(_) | AppError::Config(_) | AppError::Internal(_) => {
            code::INTERNAL_ERROR
        }
    };
    ErrorObjectOwned::owned(code, err.to_string(), None::<()>)
}
