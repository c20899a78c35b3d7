//! Type attribute support for probe-rs
//!
//! This crate turns the raw attributes of a DWARF debugging information entry (DIE) into
//! records that a type reconstruction system can consume directly:
//!
//! - [`ParsedAttributes`] holds every attribute relevant for rebuilding a type, decoded
//!   from a single pass over the attribute list of an entry.
//! - [`resolve_array_bounds`] computes the dimensions of a `DW_TAG_array_type`, including
//!   dimensions whose element count refers to a variable that only has a value in a live
//!   stack frame.
//!
//! Both operations work against the [`DieNode`] abstraction. [`GimliDie`] implements it for
//! DWARF loaded into [`DebugInfo`], and [`DwarfStackFrame`] provides an
//! [`ExecutionContext`] backed by target memory.

/// The access level of a member, as described by `DW_AT_accessibility`.
pub mod accessibility;
/// Array dimensions resolved from `DW_TAG_subrange_type` children.
pub mod array_info;
/// The normalized attributes of a DIE.
pub mod attributes;
/// Debug information which is parsed from DWARF debugging information.
pub mod debug_info;
/// The view of a DIE that the normalizer and the array bound resolver operate on.
pub mod die_node;
/// The live execution state used to evaluate variables.
pub mod execution_context;
/// Boolean properties collected from the attributes of a DIE.
pub mod flags;
/// Variable evaluation in a halted stack frame, using DWARF location expressions.
pub mod stack_frame;
/// Information about a Unit in the debug information.
pub mod unit_info;

#[cfg(test)]
mod test;

pub use self::{
    accessibility::{map_accessibility, AccessLevel},
    array_info::{resolve_array_bounds, ArrayInfo},
    attributes::{Declaration, DeferredDie, ParsedAttributes},
    debug_info::{DebugInfo, GimliDie},
    die_node::{DieAttribute, DieNode, FormValue},
    execution_context::{ExecutionContext, StackFrameContext},
    flags::AttributeFlags,
    stack_frame::{DwarfStackFrame, MemoryReader, StackFrameInfo},
    unit_info::UnitInfo,
};

use std::{io, str::Utf8Error};

/// A simplified type alias of the [`gimli::EndianReader`] type.
pub type GimliReader = gimli::EndianReader<gimli::RunTimeEndian, std::rc::Rc<[u8]>>;

/// An error occurred while reading debug information or evaluating a variable.
#[derive(Debug, thiserror::Error)]
pub enum DebugError {
    /// An IO error occurred when accessing debug data.
    #[error("IO Error while accessing debug data")]
    Io(#[from] io::Error),
    /// An error occurred while accessing debug data.
    #[error("Error accessing debug data")]
    DebugData(#[from] object::read::Error),
    /// Something failed while parsing debug data.
    #[error("Error parsing debug data")]
    Parse(#[from] gimli::read::Error),
    /// Non-UTF8 data was found in the debug data.
    #[error("Non-UTF8 data found in debug data")]
    NonUtf8(#[from] Utf8Error),
    /// Non-terminal errors encountered while evaluating a variable, e.g. a register value is not available.
    /// These do not interrupt processing. Callers report the reason for the incomplete result and continue.
    #[error("{message}")]
    WarnAndContinue {
        /// A message that can be displayed to the user to help them understand the reason for the incomplete results.
        message: String,
    },
    /// No variable with the given name is visible from the current frame.
    #[error("No variable named `{0}` is in scope")]
    UnknownVariable(String),
    /// Required functionality is not implemented
    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),
    /// Some other error occurred.
    #[error("{0}")]
    Other(String),
}

fn serialize_typed_path<S>(
    path: &Option<typed_path::TypedPathBuf>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match path {
        Some(path) => serializer.serialize_some(&path.to_string_lossy()),
        None => serializer.serialize_none(),
    }
}
