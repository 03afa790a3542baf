//! # Type System
//!
//! The value model shared by the buffer subsystem and the rewriter.
//!
//! ## Module Structure
//!
//! - `data_type`: `DataType` column type hints (`#[repr(u8)]` tags)
//! - `value`: owned runtime `Value`, plus `LobValue`/`LobData` for large objects
//! - `convert`: `cast` between types and the widening/injective predicates
//!
//! ## Usage
//!
//! ```ignore
//! use querybuf::types::{convert, DataType, Value};
//!
//! let v = convert::cast(&Value::from("42"), DataType::Integer)?;
//! assert_eq!(v, Value::Integer(42));
//! ```

pub mod convert;
mod data_type;
mod value;

pub use data_type::DataType;
pub use value::{LobData, LobValue, Value};

/// One row of column values.
pub type Tuple = Vec<Value>;
