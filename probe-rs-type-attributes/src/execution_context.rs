use crate::DebugError;

/// A stack frame of a halted target, in which variables can be evaluated.
pub trait StackFrameContext {
    /// Evaluate the variable with the given name in this frame.
    ///
    /// This can be slow, e.g. when target memory has to be read through a probe.
    fn evaluate_variable(&self, name: &str) -> Result<gimli::Value, DebugError>;
}

/// The live state of a debug session, e.g. a halted core with a selected frame.
pub trait ExecutionContext {
    /// The currently selected stack frame, if there is one.
    fn current_frame(&self) -> Option<&dyn StackFrameContext>;
}

/// Interpret the result of a variable evaluation as an unsigned integer.
///
/// Signed values are reinterpreted. Floating point values have no unsigned interpretation.
pub fn value_as_unsigned(value: gimli::Value) -> Option<u64> {
    let value = match value {
        gimli::Value::Generic(value) => value,
        gimli::Value::I8(value) => value as u64,
        gimli::Value::U8(value) => value as u64,
        gimli::Value::I16(value) => value as u64,
        gimli::Value::U16(value) => value as u64,
        gimli::Value::I32(value) => value as u64,
        gimli::Value::U32(value) => value as u64,
        gimli::Value::I64(value) => value as u64,
        gimli::Value::U64(value) => value,
        gimli::Value::F32(_) | gimli::Value::F64(_) => return None,
    };
    Some(value)
}
